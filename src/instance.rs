//! 服务实例定义

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{RadishError, Result};
use crate::pb;

/// 服务实例
///
/// 注册时创建，之后不可变；相等性与哈希均为结构化比较。
/// 实例在 (datacenter, segment, desc_name) 范围内以 `ip:port` 唯一标识。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ServiceInstance {
    /// 服务描述名（完整限定的 RPC 服务名，如 "com.radish.GreeterService"）
    pub desc_name: String,

    /// 实例 IP
    pub ip: String,

    /// RPC 端口
    pub port: u16,

    /// 运维端口（带外管理）
    pub operation_port: u16,

    /// 主机名
    pub hostname: String,

    /// 应用名
    pub app_name: String,

    /// 数据中心
    pub datacenter: String,

    /// 网段（数据中心内的多租户隔离分区）
    pub segment: String,
}

impl ServiceInstance {
    /// 创建新的服务实例
    pub fn new(desc_name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            desc_name: desc_name.into(),
            ip: ip.into(),
            port,
            operation_port: 0,
            hostname: String::new(),
            app_name: String::new(),
            datacenter: String::new(),
            segment: String::new(),
        }
    }

    /// 设置运维端口
    pub fn with_operation_port(mut self, operation_port: u16) -> Self {
        self.operation_port = operation_port;
        self
    }

    /// 设置主机名
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// 设置应用名
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// 设置数据中心与网段
    pub fn with_scope(
        mut self,
        datacenter: impl Into<String>,
        segment: impl Into<String>,
    ) -> Self {
        self.datacenter = datacenter.into();
        self.segment = segment.into();
        self
    }

    /// 实例唯一标识，`ip:port`
    pub fn instance_id(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// 实例的套接字地址
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .ip
            .parse()
            .map_err(|_| RadishError::resolution(format!("invalid instance ip: {}", self.ip)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// 探活/拨号用的 gRPC URI
    pub fn to_grpc_uri(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

impl From<&ServiceInstance> for pb::common::InstanceInfo {
    fn from(instance: &ServiceInstance) -> Self {
        pb::common::InstanceInfo {
            ip: instance.ip.clone(),
            port: i32::from(instance.port),
            hostname: instance.hostname.clone(),
            operation_port: i32::from(instance.operation_port),
            app_name: instance.app_name.clone(),
            desc_name: instance.desc_name.clone(),
            datacenter: instance.datacenter.clone(),
            segment: instance.segment.clone(),
        }
    }
}

impl TryFrom<&pb::common::InstanceInfo> for ServiceInstance {
    type Error = RadishError;

    fn try_from(info: &pb::common::InstanceInfo) -> Result<Self> {
        let port = u16::try_from(info.port)
            .map_err(|_| RadishError::resolution(format!("port out of range: {}", info.port)))?;
        let operation_port = u16::try_from(info.operation_port).map_err(|_| {
            RadishError::resolution(format!("operation port out of range: {}", info.operation_port))
        })?;
        Ok(ServiceInstance {
            desc_name: info.desc_name.clone(),
            ip: info.ip.clone(),
            port,
            operation_port,
            hostname: info.hostname.clone(),
            app_name: info.app_name.clone(),
            datacenter: info.datacenter.clone(),
            segment: info.segment.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_instance() -> ServiceInstance {
        ServiceInstance::new("com.radish.GreeterService", "172.10.32.89", 8006)
            .with_operation_port(8909)
            .with_hostname("testcomputer")
            .with_app_name("greeter")
            .with_scope("aliyun", "prod")
    }

    #[test]
    fn instance_id_is_ip_and_port() {
        assert_eq!(sample_instance().instance_id(), "172.10.32.89:8006");
    }

    #[test]
    fn serde_round_trip_preserves_all_fields() {
        let instance = sample_instance();
        let bytes = serde_json::to_vec(&instance).unwrap();
        let decoded: ServiceInstance = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(instance, decoded);
    }

    #[test]
    fn wire_conversion_round_trip() {
        let instance = sample_instance();
        let info = pb::common::InstanceInfo::from(&instance);
        let decoded = ServiceInstance::try_from(&info).unwrap();
        assert_eq!(instance, decoded);
    }

    #[test]
    fn wire_conversion_rejects_out_of_range_port() {
        let mut info = pb::common::InstanceInfo::from(&sample_instance());
        info.port = 70000;
        assert!(ServiceInstance::try_from(&info).is_err());
    }

    #[test]
    fn socket_addr_parses_ip() {
        let addr = sample_instance().socket_addr().unwrap();
        assert_eq!(addr.to_string(), "172.10.32.89:8006");

        let bad = ServiceInstance::new("svc", "not-an-ip", 1);
        assert!(bad.socket_addr().is_err());
    }
}
