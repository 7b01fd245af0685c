//! radish scheme 解析器
//!
//! 经由 Discovery 服务（或本地发现缓存）把服务描述名解析为地址列表。
//! 解析工作始终派发到运行时工作线程上执行，`start`/`refresh` 立即返回；
//! `resolving` 标志保证任意时刻至多一次解析在途。

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tonic::Status;
use tonic::transport::Channel;
use tracing::{debug, error, info, warn};

use crate::config::ResolverConfig;
use crate::discovery::cache::ServiceDiscovery;
use crate::error::{RadishError, Result};
use crate::instance::ServiceInstance;
use crate::pb::discovery::DiscoverRequest;
use crate::pb::discovery::discovery_client::DiscoveryClient;
use crate::resolver::{NameResolver, ResolverListener};

/// 实例来源：远端 Discovery RPC 或本地发现缓存
#[async_trait::async_trait]
pub trait InstanceSource: Send + Sync + 'static {
    async fn lookup(&self, desc_name: &str) -> Result<Vec<ServiceInstance>>;
}

/// 远端 Discovery 服务来源
pub struct RemoteSource {
    client: DiscoveryClient<Channel>,
    timeout: Duration,
}

impl RemoteSource {
    pub fn new(client: DiscoveryClient<Channel>, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait::async_trait]
impl InstanceSource for RemoteSource {
    async fn lookup(&self, desc_name: &str) -> Result<Vec<ServiceInstance>> {
        let mut client = self.client.clone();
        let mut request = tonic::Request::new(DiscoverRequest {
            desc_name: desc_name.to_string(),
        });
        // 单个不可达的发现端点不能无限拖住解析
        request.set_timeout(self.timeout);

        let response = client.discover(request).await?.into_inner();
        if !response.success {
            return Ok(Vec::new());
        }
        response
            .instance
            .iter()
            .map(ServiceInstance::try_from)
            .collect()
    }
}

/// 本地发现缓存来源
pub struct CacheSource {
    discovery: Arc<ServiceDiscovery>,
}

impl CacheSource {
    pub fn new(discovery: Arc<ServiceDiscovery>) -> Self {
        Self { discovery }
    }
}

#[async_trait::async_trait]
impl InstanceSource for CacheSource {
    async fn lookup(&self, desc_name: &str) -> Result<Vec<ServiceInstance>> {
        Ok(self.discovery.find(desc_name).await.unwrap_or_default())
    }
}

/// radish scheme 名称解析器
pub struct DiscoveryResolver {
    inner: Arc<ResolverInner>,
}

struct ResolverInner {
    authority: String,
    source: Arc<dyn InstanceSource>,
    refresh_interval: Duration,
    state: Mutex<ResolverState>,
}

#[derive(Default)]
struct ResolverState {
    listener: Option<Arc<dyn ResolverListener>>,
    resolving: bool,
    shutdown: bool,
    refresh_timer: Option<JoinHandle<()>>,
}

impl DiscoveryResolver {
    /// 以任意实例来源构建
    pub fn new(
        service: impl Into<String>,
        source: Arc<dyn InstanceSource>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                authority: service.into(),
                source,
                refresh_interval,
                state: Mutex::new(ResolverState::default()),
            }),
        }
    }

    /// 远端 Discovery RPC 来源
    pub fn remote(
        service: impl Into<String>,
        client: DiscoveryClient<Channel>,
        config: &ResolverConfig,
    ) -> Self {
        let source = RemoteSource::new(client, Duration::from_secs(config.discover_timeout));
        Self::new(
            service,
            Arc::new(source),
            Duration::from_secs(config.refresh_interval),
        )
    }

    /// 本地发现缓存来源
    pub fn cached(
        service: impl Into<String>,
        discovery: Arc<ServiceDiscovery>,
        config: &ResolverConfig,
    ) -> Self {
        Self::new(
            service,
            Arc::new(CacheSource::new(discovery)),
            Duration::from_secs(config.refresh_interval),
        )
    }

    fn resolve(inner: &Arc<ResolverInner>) {
        let listener = {
            let mut state = inner.state.lock().unwrap();
            if state.resolving || state.shutdown {
                return;
            }
            let Some(listener) = state.listener.clone() else {
                return;
            };
            state.resolving = true;
            listener
        };

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            debug!(authority = %inner.authority, "attempting radish resolution");
            let result = inner.source.lookup(&inner.authority).await;

            // 已关闭的解析器只收尾，不再交付结果
            if !inner.state.lock().unwrap().shutdown {
                Self::deliver(&inner, listener.as_ref(), result);
            }

            // 无论成败都调度下一次自动刷新
            let mut state = inner.state.lock().unwrap();
            state.resolving = false;
            if !state.shutdown {
                if let Some(pending) = state.refresh_timer.take() {
                    pending.abort();
                }
                let next = Arc::clone(&inner);
                state.refresh_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(next.refresh_interval).await;
                    Self::resolve(&next);
                }));
            }
        });
    }

    fn deliver(
        inner: &Arc<ResolverInner>,
        listener: &dyn ResolverListener,
        result: Result<Vec<ServiceInstance>>,
    ) {
        let instances = match result {
            Ok(instances) => instances,
            Err(e) => {
                error!(authority = %inner.authority, error = %e, "resolve internal error");
                listener.on_error(Status::unavailable(format!(
                    "Unable to resolve service info {}",
                    inner.authority
                )));
                return;
            }
        };

        let addresses: Vec<SocketAddr> = instances
            .iter()
            .filter_map(|instance| match instance.socket_addr() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    warn!(error = %e, "skipping instance with invalid address");
                    None
                }
            })
            .collect();

        if addresses.is_empty() {
            listener.on_error(Status::unavailable(format!(
                "Unable to resolve service info {}",
                inner.authority
            )));
            return;
        }

        for address in &addresses {
            info!(authority = %inner.authority, provider = %address, "service provider resolved");
        }
        listener.on_addresses(addresses);
    }
}

impl NameResolver for DiscoveryResolver {
    fn authority(&self) -> String {
        self.inner.authority.clone()
    }

    fn start(&self, listener: Arc<dyn ResolverListener>) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.shutdown {
                return Err(RadishError::resolution("resolver already shut down"));
            }
            if state.listener.is_some() {
                return Err(RadishError::resolution("resolver already started"));
            }
            state.listener = Some(listener);
        }
        Self::resolve(&self.inner);
        Ok(())
    }

    fn refresh(&self) {
        Self::resolve(&self.inner);
    }

    fn shutdown(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        state.listener = None;
        if let Some(pending) = state.refresh_timer.take() {
            pending.abort();
        }
    }
}
