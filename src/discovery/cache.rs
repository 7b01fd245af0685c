//! 服务发现本地缓存
//!
//! 预加载 + watch 增量维护「服务描述名 -> 实例集合」的本地副本；
//! `find` 只读本地映射，从不等待网络。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use etcd_client::{Client, EventType, GetOptions, WatchOptions};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::instance::ServiceInstance;
use crate::registry::key;

/// 重建 watch 订阅前的固定短延迟，避免批量重订阅造成惊群
const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(10);

type InstanceMap = HashMap<String, HashMap<String, ServiceInstance>>;

/// 服务发现本地缓存
pub struct ServiceDiscovery {
    client: Client,
    prefix: String,
    instances: Arc<RwLock<InstanceMap>>,
    /// 已观察到的最大 revision；watch 从其后一位开始订阅，
    /// 衔接预加载快照与增量事件，重连时也从此处续播
    revision: Arc<AtomicI64>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceDiscovery {
    pub fn new(client: Client, datacenter: &str, segment: &str) -> Self {
        Self {
            client,
            prefix: key::range_prefix(datacenter, segment),
            instances: Arc::new(RwLock::new(HashMap::new())),
            revision: Arc::new(AtomicI64::new(0)),
            watch_task: Mutex::new(None),
        }
    }

    /// 查询某服务当前已知的实例集合
    ///
    /// 纯本地读取；服务从未出现过时返回 `None`。
    pub async fn find(&self, desc_name: &str) -> Option<Vec<ServiceInstance>> {
        let instances = self.instances.read().await;
        instances
            .get(desc_name)
            .map(|entries| entries.values().cloned().collect())
    }

    /// 预加载当前范围下的全部注册信息
    ///
    /// 单次全量范围读，期间会阻塞调用方；预期仅在组件初始化早期执行一次。
    pub async fn preload(&self) -> Result<()> {
        let mut client = self.client.clone();
        let resp = client
            .get(self.prefix.clone(), Some(GetOptions::new().with_prefix()))
            .await?;
        if let Some(header) = resp.header() {
            self.revision.store(header.revision(), Ordering::SeqCst);
        }

        let mut instances = self.instances.write().await;
        for kv in resp.kvs() {
            apply_put(&mut instances, kv.value());
        }
        info!(
            prefix = %self.prefix,
            services = instances.len(),
            "service registry preloaded"
        );
        Ok(())
    }

    /// 订阅当前范围下注册信息的后续变更
    ///
    /// 订阅在后台任务中建立与消费；流出错或意外终止时关闭旧句柄、
    /// 经固定短延迟后从最近 revision 重新订阅。
    pub fn watch(&self) {
        let client = self.client.clone();
        let prefix = self.prefix.clone();
        let instances = self.instances.clone();
        let revision = self.revision.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(RESUBSCRIBE_DELAY).await;

                let start_revision = revision.load(Ordering::SeqCst) + 1;
                let mut options = WatchOptions::new().with_prefix();
                if start_revision > 1 {
                    options = options.with_start_revision(start_revision);
                }

                let mut client = client.clone();
                let (mut watcher, mut stream) =
                    match client.watch(prefix.clone(), Some(options)).await {
                        Ok(subscription) => subscription,
                        Err(e) => {
                            error!(error = %e, "etcd watch subscribe error");
                            continue;
                        }
                    };
                debug!(prefix = %prefix, start_revision, "etcd watch established");

                loop {
                    match stream.message().await {
                        Ok(Some(resp)) => {
                            if let Some(header) = resp.header() {
                                revision.store(header.revision(), Ordering::SeqCst);
                            }
                            let mut map = instances.write().await;
                            for event in resp.events() {
                                let Some(kv) = event.kv() else { continue };
                                match event.event_type() {
                                    EventType::Put => apply_put(&mut map, kv.value()),
                                    EventType::Delete => {
                                        apply_delete(&mut map, &prefix, kv.key());
                                    }
                                }
                            }
                        }
                        Ok(None) => {
                            error!("etcd watch unexpectedly completed");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "etcd watch error");
                            break;
                        }
                    }
                }

                // 先关闭旧订阅句柄再重建
                let _ = watcher.cancel().await;
            }
        });

        let mut slot = self.watch_task.lock().unwrap();
        if let Some(old) = slot.replace(task) {
            old.abort();
        }
    }

    /// 停止 watch 订阅；缓存内容保持最后一次观察到的状态
    pub fn close(&self) {
        if let Some(task) = self.watch_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for ServiceDiscovery {
    fn drop(&mut self) {
        self.close();
    }
}

/// PUT 事件：反序列化并按 (desc_name, instance_id) 覆盖写入
fn apply_put(instances: &mut InstanceMap, value: &[u8]) {
    match serde_json::from_slice::<ServiceInstance>(value) {
        Ok(instance) => {
            instances
                .entry(instance.desc_name.clone())
                .or_default()
                .insert(instance.instance_id(), instance);
        }
        Err(e) => {
            // 单条数据损坏只跳过，不中断订阅
            error!(error = %e, "instance info format error from etcd");
        }
    }
}

/// DELETE 事件：从键路径反解 (desc_name, instance_id) 后移除
fn apply_delete(instances: &mut InstanceMap, prefix: &str, key_bytes: &[u8]) {
    let Ok(instance_key) = std::str::from_utf8(key_bytes) else {
        error!("non utf-8 instance key from etcd");
        return;
    };
    match key::parse_instance_key(prefix, instance_key) {
        Ok((desc_name, instance_id)) => {
            if let Some(entries) = instances.get_mut(&desc_name) {
                entries.remove(&instance_id);
            }
        }
        Err(e) => {
            error!(error = %e, "unparsable instance key from etcd");
        }
    }
}
