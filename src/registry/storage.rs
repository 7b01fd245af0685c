//! 注册信息存储
//!
//! 将服务实例以租约方式写入 etcd。租约与写入不在同一事务中：
//! 写入失败时错误向上传播、租约句柄被丢弃，保活停止后由服务端
//! 按 TTL 过期回收。本层不做重试，重试策略归注册器。

use std::time::Duration;

use etcd_client::{Client, PutOptions};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::instance::ServiceInstance;
use crate::registry::key;

/// 租约句柄
///
/// 持有 etcd 租约 id 与后台保活任务。`close` 撤销租约，其关联键在
/// 一次协调往返内被服务端删除；直接丢弃句柄只停止保活，键随租约
/// 到期消失。
pub struct Lease {
    id: i64,
    client: Client,
    keeper: Option<JoinHandle<()>>,
}

impl Lease {
    fn start(client: Client, id: i64, ttl: i64) -> Self {
        let mut keep_alive_client = client.clone();
        let interval = Duration::from_secs((ttl as u64 / 3).max(1));

        let keeper = tokio::spawn(async move {
            loop {
                match keep_alive_client.lease_keep_alive(id).await {
                    Ok((mut keeper, mut stream)) => loop {
                        if let Err(e) = keeper.keep_alive().await {
                            warn!(lease_id = id, error = %e, "lease keep-alive send failed");
                            break;
                        }
                        match stream.next().await {
                            Some(Ok(resp)) => {
                                if resp.ttl() <= 0 {
                                    // 服务端已判定过期，保活无意义
                                    warn!(lease_id = id, "lease expired on server side");
                                    return;
                                }
                            }
                            Some(Err(e)) => {
                                warn!(lease_id = id, error = %e, "lease keep-alive stream error");
                                break;
                            }
                            None => break,
                        }
                        tokio::time::sleep(interval).await;
                    },
                    Err(e) => {
                        error!(lease_id = id, error = %e, "lease keep-alive failed");
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });

        Self {
            id,
            client,
            keeper: Some(keeper),
        }
    }

    /// 租约 id
    pub fn id(&self) -> i64 {
        self.id
    }

    /// 撤销租约，其关联的注册键随之删除
    pub async fn close(mut self) -> Result<()> {
        if let Some(keeper) = self.keeper.take() {
            keeper.abort();
        }
        let mut client = self.client.clone();
        client.lease_revoke(self.id).await?;
        debug!(lease_id = self.id, "lease revoked");
        Ok(())
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(keeper) = self.keeper.take() {
            keeper.abort();
        }
    }
}

/// 注册信息存储
pub struct RegistryStorage {
    client: Client,
    lease_ttl: i64,
}

impl RegistryStorage {
    pub fn new(client: Client, lease_ttl: i64) -> Self {
        Self { client, lease_ttl }
    }

    /// 写入一个实例注册信息，返回保活中的租约
    pub async fn save(&self, instance: &ServiceInstance) -> Result<Lease> {
        let mut client = self.client.clone();
        let granted = client.lease_grant(self.lease_ttl, None).await?;
        let lease = Lease::start(self.client.clone(), granted.id(), self.lease_ttl);

        let instance_key = key::instance_key(instance);
        let value = serde_json::to_vec(instance)?;
        let opts = PutOptions::new().with_lease(lease.id());
        client.put(instance_key.clone(), value, Some(opts)).await?;

        debug!(key = %instance_key, lease_id = lease.id(), "instance info saved");
        Ok(lease)
    }
}
