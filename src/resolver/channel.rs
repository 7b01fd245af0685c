//! 解析结果到客户端通道的接入
//!
//! 解析器交付的是整体替换语义的地址列表；本监听器将相邻两次列表做
//! 差量，换算成 balance channel 的 `Change` 事件，使解析器可以直接
//! 驱动一条 tonic 客户端通道。

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Mutex;

use tokio::sync::mpsc::Sender;
use tonic::transport::Endpoint;
use tonic::transport::channel::Change;
use tracing::warn;

use crate::resolver::ResolverListener;

/// 向 balance channel 馈送地址变更的监听器
pub struct BalanceChannelListener {
    tx: Sender<Change<SocketAddr, Endpoint>>,
    current: Mutex<HashSet<SocketAddr>>,
}

impl BalanceChannelListener {
    pub fn new(tx: Sender<Change<SocketAddr, Endpoint>>) -> Self {
        Self {
            tx,
            current: Mutex::new(HashSet::new()),
        }
    }
}

impl ResolverListener for BalanceChannelListener {
    fn on_addresses(&self, addresses: Vec<SocketAddr>) {
        let next: HashSet<SocketAddr> = addresses.into_iter().collect();
        let mut current = self.current.lock().unwrap();

        for removed in current.difference(&next) {
            if self.tx.try_send(Change::Remove(*removed)).is_err() {
                warn!(address = %removed, "balance channel full, dropping remove");
            }
        }
        for added in next.difference(&current) {
            match Endpoint::from_shared(format!("http://{added}")) {
                Ok(endpoint) => {
                    if self.tx.try_send(Change::Insert(*added, endpoint)).is_err() {
                        warn!(address = %added, "balance channel full, dropping insert");
                    }
                }
                Err(e) => warn!(address = %added, error = %e, "invalid endpoint uri"),
            }
        }

        *current = next;
    }

    fn on_error(&self, status: tonic::Status) {
        // 保留通道中已有地址：仅当地址集本就为空时新调用才会失败，
        // 与解析恢复前快速失败的语义一致
        warn!(status = %status, "resolution failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn full_lists_are_diffed_into_changes() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let listener = BalanceChannelListener::new(tx);

        listener.on_addresses(vec![addr("10.0.0.1:9000"), addr("10.0.0.2:9000")]);
        let mut inserted = HashSet::new();
        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                Change::Insert(address, _) => {
                    inserted.insert(address);
                }
                Change::Remove(address) => panic!("unexpected remove of {address}"),
            }
        }
        assert_eq!(
            inserted,
            HashSet::from([addr("10.0.0.1:9000"), addr("10.0.0.2:9000")])
        );

        // {1, 2} -> {2, 3}：移除 1，插入 3，2 保持不动
        listener.on_addresses(vec![addr("10.0.0.2:9000"), addr("10.0.0.3:9000")]);
        let mut removed = HashSet::new();
        let mut inserted = HashSet::new();
        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                Change::Insert(address, _) => {
                    inserted.insert(address);
                }
                Change::Remove(address) => {
                    removed.insert(address);
                }
            }
        }
        assert_eq!(removed, HashSet::from([addr("10.0.0.1:9000")]));
        assert_eq!(inserted, HashSet::from([addr("10.0.0.3:9000")]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn resolution_error_keeps_existing_addresses() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let listener = BalanceChannelListener::new(tx);

        listener.on_addresses(vec![addr("10.0.0.1:9000")]);
        assert!(matches!(rx.recv().await.unwrap(), Change::Insert(_, _)));

        listener.on_error(tonic::Status::unavailable("no instances"));
        assert!(rx.try_recv().is_err());
    }
}
