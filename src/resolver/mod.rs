//! 名称解析
//!
//! RPC 客户端通道把逻辑服务名换成网络地址时使用的插件边界。
//! 按 scheme 选择后端实现：`radish://{service}` 走 Discovery 服务或
//! 本地发现缓存，`kubernetes:///{namespace}/{service}/{port}` 走集群 API。

pub mod channel;
pub mod discovery;
pub mod kubernetes;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::ResolverConfig;
use crate::error::{RadishError, Result};
use crate::pb::discovery::discovery_client::DiscoveryClient;

pub use channel::BalanceChannelListener;
pub use discovery::{CacheSource, DiscoveryResolver, InstanceSource, RemoteSource};
pub use kubernetes::KubernetesResolver;

/// radish scheme
pub const RADISH_SCHEME: &str = "radish";

/// kubernetes scheme
pub const KUBERNETES_SCHEME: &str = "kubernetes";

/// 解析结果接收方
///
/// 成功时交付完整地址列表（整体替换语义，由通道自行做差量）；
/// 失败时交付 unavailable 状态，通道在下次成功解析前快速失败。
pub trait ResolverListener: Send + Sync + 'static {
    fn on_addresses(&self, addresses: Vec<SocketAddr>);

    fn on_error(&self, status: tonic::Status);
}

/// 名称解析器插件契约
pub trait NameResolver: Send + Sync {
    /// 解析器的 authority（用于日志）
    fn authority(&self) -> String;

    /// 启动首轮解析；只允许调用一次，重复调用被拒绝
    fn start(&self, listener: Arc<dyn ResolverListener>) -> Result<()>;

    /// 请求一次带外重新解析；可重复调用，已有解析在途时合并
    fn refresh(&self);

    /// 关闭解析器并停止自动刷新；幂等
    fn shutdown(&self);
}

/// 解析目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverTarget {
    /// `radish://{service-name}`
    Radish { service: String },
    /// `kubernetes:///{namespace}/{service}/{port}`
    Kubernetes {
        namespace: String,
        service: String,
        port: u16,
    },
}

impl ResolverTarget {
    /// 解析目标字符串
    pub fn parse(target: &str) -> Result<Self> {
        let (scheme, rest) = target
            .split_once("://")
            .ok_or_else(|| RadishError::resolution(format!("target missing scheme: {target}")))?;

        match scheme {
            RADISH_SCHEME => {
                let service = rest.trim_end_matches('/');
                if service.is_empty() {
                    return Err(RadishError::resolution(format!(
                        "empty service name: {target}"
                    )));
                }
                Ok(ResolverTarget::Radish {
                    service: service.to_string(),
                })
            }
            KUBERNETES_SCHEME => {
                let mut parts = rest.trim_start_matches('/').split('/');
                let (Some(namespace), Some(service), Some(port)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    return Err(RadishError::resolution(format!(
                        "kubernetes target must be kubernetes:///{{namespace}}/{{service}}/{{port}}: {target}"
                    )));
                };
                if namespace.is_empty() || service.is_empty() || parts.next().is_some() {
                    return Err(RadishError::resolution(format!(
                        "kubernetes target must be kubernetes:///{{namespace}}/{{service}}/{{port}}: {target}"
                    )));
                }
                let port = port.parse::<u16>().map_err(|_| {
                    RadishError::resolution(format!("invalid port in target: {target}"))
                })?;
                Ok(ResolverTarget::Kubernetes {
                    namespace: namespace.to_string(),
                    service: service.to_string(),
                    port,
                })
            }
            other => Err(RadishError::resolution(format!(
                "unsupported scheme: {other}"
            ))),
        }
    }
}

/// 依据目标 scheme 构建对应的解析器实现
pub async fn new_resolver(target: &str, config: &ResolverConfig) -> Result<Box<dyn NameResolver>> {
    match ResolverTarget::parse(target)? {
        ResolverTarget::Radish { service } => {
            let endpoint = config
                .discovery_endpoint
                .clone()
                .ok_or_else(|| RadishError::config("discovery endpoint not configured"))?;
            let client = DiscoveryClient::connect(endpoint).await?;
            Ok(Box::new(DiscoveryResolver::remote(service, client, config)))
        }
        ResolverTarget::Kubernetes {
            namespace,
            service,
            port,
        } => {
            let api_server = config
                .api_server
                .clone()
                .ok_or_else(|| RadishError::config("cluster api server not configured"))?;
            Ok(Box::new(KubernetesResolver::new(
                api_server,
                config.api_token.clone(),
                namespace,
                service,
                port,
            )))
        }
    }
}
