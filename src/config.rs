//! 配置
//!
//! 各组件在构造时显式接收所需配置，核心不持有任何全局单例。

use serde::{Deserialize, Serialize};

use crate::error::{RadishError, Result};

/// Radish 核心配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RadishConfig {
    pub registry: RegistryConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// 注册中心（etcd）配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// etcd 端点列表
    pub endpoints: Vec<String>,

    /// etcd 用户名（可选）
    pub username: Option<String>,

    /// etcd 密码（可选）
    pub password: Option<String>,

    /// 数据中心
    pub datacenter: String,

    /// 网段
    pub segment: String,

    /// 租约 TTL（秒）
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl: i64,
}

fn default_lease_ttl() -> i64 {
    30
}

impl RegistryConfig {
    /// etcd 连接选项（带凭证时启用认证）
    pub fn connect_options(&self) -> Option<etcd_client::ConnectOptions> {
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => {
                Some(etcd_client::ConnectOptions::new().with_user(user.as_str(), password.as_str()))
            }
            _ => None,
        }
    }
}

/// 名称解析配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// 自动刷新间隔（秒）
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// 单次 discover RPC 超时（秒）
    #[serde(default = "default_discover_timeout")]
    pub discover_timeout: u64,

    /// discovery 服务地址（radish scheme 远端解析时使用）
    pub discovery_endpoint: Option<String>,

    /// 集群 API 地址（kubernetes scheme 使用）
    pub api_server: Option<String>,

    /// 集群 API bearer token（可选）
    pub api_token: Option<String>,
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_discover_timeout() -> u64 {
    5
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
            discover_timeout: default_discover_timeout(),
            discovery_endpoint: None,
            api_server: None,
            api_token: None,
        }
    }
}

impl RadishConfig {
    /// 从 TOML 文件加载配置
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RadishError::config(format!("read {path}: {e}")))?;
        toml::from_str(&content).map_err(|e| RadishError::config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config_applies_defaults() {
        let config: RadishConfig = toml::from_str(
            r#"
            [registry]
            endpoints = ["http://127.0.0.1:2379"]
            datacenter = "aliyun"
            segment = "prod"
            "#,
        )
        .unwrap();

        assert_eq!(config.registry.lease_ttl, 30);
        assert_eq!(config.resolver.refresh_interval, 300);
        assert_eq!(config.resolver.discover_timeout, 5);
        assert!(config.registry.connect_options().is_none());
    }

    #[test]
    fn parse_full_config() {
        let config: RadishConfig = toml::from_str(
            r#"
            [registry]
            endpoints = ["http://etcd-1:2379", "http://etcd-2:2379"]
            username = "service_registry"
            password = "secret"
            datacenter = "aliyun"
            segment = "unittest"
            lease_ttl = 10

            [resolver]
            refresh_interval = 60
            discovery_endpoint = "http://127.0.0.1:8006"
            "#,
        )
        .unwrap();

        assert_eq!(config.registry.endpoints.len(), 2);
        assert_eq!(config.registry.lease_ttl, 10);
        assert_eq!(config.resolver.refresh_interval, 60);
        assert!(config.registry.connect_options().is_some());
    }
}
