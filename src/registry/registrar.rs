//! 健康驱动注册器
//!
//! 以到目标实例的服务端流式健康检查为存活判据，把实例在注册中心的
//! 存在与其健康状态耦合：探活通过写入租约键，探活失败撤销租约，
//! 流终止则整体回收。每个实例 id 至多存在一个活动的注册流程。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tonic::transport::Endpoint;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::instance::ServiceInstance;
use crate::pb::health::HealthCheckRequest;
use crate::pb::health::health_check_response::ServingStatus;
use crate::pb::health::health_client::HealthClient;
use crate::registry::storage::{Lease, RegistryStorage};

/// 探活连接超时
const HEALTH_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type StreamMap = Arc<RwLock<HashMap<String, RegistrarEntry>>>;

struct RegistrarEntry {
    generation: u64,
    cancel: oneshot::Sender<()>,
    #[allow(dead_code)]
    task: JoinHandle<()>,
}

/// 健康驱动注册器
pub struct ServiceRegistrar {
    storage: Arc<RegistryStorage>,
    streams: StreamMap,
    generation: AtomicU64,
}

impl ServiceRegistrar {
    pub fn new(storage: Arc<RegistryStorage>) -> Self {
        Self {
            storage,
            streams: Arc::new(RwLock::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// 注册一个服务实例
    ///
    /// 打开到实例的健康检查流，并按健康状态驱动注册信息的写入与撤销。
    /// 该实例 id 已有活动流程时为空操作。
    pub async fn register(&self, instance: ServiceInstance) {
        let instance_id = instance.instance_id();
        let mut streams = self.streams.write().await;
        if streams.contains_key(&instance_id) {
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let stream = HealthCheckStream {
            instance,
            generation,
            storage: self.storage.clone(),
            streams: self.streams.clone(),
        };
        let task = tokio::spawn(stream.run(cancel_rx));
        streams.insert(
            instance_id,
            RegistrarEntry {
                generation,
                cancel: cancel_tx,
                task,
            },
        );
    }

    /// 注销一个实例：终止其健康流，走与流终止相同的整体回收路径
    pub async fn deregister(&self, instance_id: &str) {
        let entry = self.streams.write().await.remove(instance_id);
        if let Some(entry) = entry {
            let _ = entry.cancel.send(());
        }
    }

    /// 当前活动的注册流程数
    pub async fn active_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// 某实例 id 是否存在活动流程
    pub async fn is_registering(&self, instance_id: &str) -> bool {
        self.streams.read().await.contains_key(instance_id)
    }
}

/// 单个实例的健康检查流程
struct HealthCheckStream {
    instance: ServiceInstance,
    generation: u64,
    storage: Arc<RegistryStorage>,
    streams: StreamMap,
}

impl HealthCheckStream {
    async fn run(self, mut cancel: oneshot::Receiver<()>) {
        let instance_id = self.instance.instance_id();
        let mut lease: Option<Lease> = None;

        let result = tokio::select! {
            res = self.watch_health(&mut lease) => res,
            _ = &mut cancel => {
                debug!(instance_id = %instance_id, "health watch cancelled");
                Ok(())
            }
        };

        if let Err(e) = result {
            error!(
                instance_id = %instance_id,
                desc_name = %self.instance.desc_name,
                error = %e,
                "health check failure"
            );
        }

        // 任一退出路径都整体回收：关租约、丢弃探活连接、移除表项；
        // 之后只有新的 register() 调用才会重试
        if let Some(held) = lease.take() {
            if let Err(e) = held.close().await {
                error!(error = %e, "close lease error");
            }
        }
        let mut streams = self.streams.write().await;
        if streams.get(&instance_id).map(|e| e.generation) == Some(self.generation) {
            streams.remove(&instance_id);
        }
    }

    async fn watch_health(&self, lease: &mut Option<Lease>) -> Result<()> {
        let endpoint =
            Endpoint::from_shared(self.instance.to_grpc_uri())?.connect_timeout(HEALTH_CONNECT_TIMEOUT);
        let channel = endpoint.connect().await?;
        let mut health = HealthClient::new(channel);

        let request = HealthCheckRequest {
            service: self.instance.desc_name.clone(),
        };
        let mut stream = health.watch(request).await?.into_inner();

        while let Some(resp) = stream.message().await? {
            if resp.status() != ServingStatus::Serving {
                // 探活未通过：撤销注册，保持流打开等待恢复
                if let Some(held) = lease.take() {
                    info!(
                        instance_id = %self.instance.instance_id(),
                        lease_id = held.id(),
                        "instance not serving, closing lease"
                    );
                    if let Err(e) = held.close().await {
                        error!(error = %e, "close lease error");
                    }
                }
                continue;
            }

            // 已持有存活租约时复用，不在每个 serving 信号上重建
            if lease.is_some() {
                continue;
            }

            match self.storage.save(&self.instance).await {
                Ok(held) => {
                    info!(
                        instance_id = %self.instance.instance_id(),
                        desc_name = %self.instance.desc_name,
                        lease_id = held.id(),
                        "✅ service registered"
                    );
                    *lease = Some(held);
                }
                Err(e) => {
                    // 维持未注册状态，等待下一个 serving 信号再试
                    error!(error = %e, "write registry info failure");
                }
            }
        }

        // 健康协议的 watch 不应正常终止，按失败整体回收
        error!(
            instance_id = %self.instance.instance_id(),
            "health watch stream completed unexpectedly"
        );
        Ok(())
    }
}
