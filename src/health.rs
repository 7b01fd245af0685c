//! 健康检查服务
//!
//! `grpc.health.v1` 协议的服务端实现。每个服务名对应一条 watch 通道，
//! 订阅者先收到当前状态，之后在每次状态变化时收到推送；健康驱动
//! 注册器即以本服务作为探活判据。

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{RwLock, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tonic::{Request, Response, Status};

use crate::pb::health::health_check_response::ServingStatus;
use crate::pb::health::health_server::Health;
use crate::pb::health::{HealthCheckRequest, HealthCheckResponse};

/// 健康检查服务端
pub struct HealthService {
    statuses: Arc<RwLock<HashMap<String, watch::Sender<ServingStatus>>>>,
}

impl HealthService {
    pub fn new() -> Self {
        Self {
            statuses: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 设置某个服务的健康状态；服务尚未登记时先登记
    pub async fn set_status(&self, service: impl Into<String>, status: ServingStatus) {
        let service = service.into();
        let mut statuses = self.statuses.write().await;
        match statuses.get(&service) {
            Some(tx) => {
                let _ = tx.send(status);
            }
            None => {
                let (tx, _rx) = watch::channel(status);
                statuses.insert(service, tx);
            }
        }
    }

    /// 标记服务为 SERVING
    pub async fn set_serving(&self, service: impl Into<String>) {
        self.set_status(service, ServingStatus::Serving).await;
    }

    /// 标记服务为 NOT_SERVING
    pub async fn set_not_serving(&self, service: impl Into<String>) {
        self.set_status(service, ServingStatus::NotServing).await;
    }

    async fn subscribe(&self, service: &str) -> Option<watch::Receiver<ServingStatus>> {
        self.statuses
            .read()
            .await
            .get(service)
            .map(|tx| tx.subscribe())
    }
}

impl Default for HealthService {
    fn default() -> Self {
        Self::new()
    }
}

#[tonic::async_trait]
impl Health for HealthService {
    async fn check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let service = request.into_inner().service;
        match self.subscribe(&service).await {
            Some(rx) => Ok(Response::new(HealthCheckResponse {
                status: *rx.borrow() as i32,
            })),
            None => Err(Status::not_found(format!("unknown service {service}"))),
        }
    }

    type WatchStream = Pin<Box<dyn Stream<Item = Result<HealthCheckResponse, Status>> + Send>>;

    async fn watch(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let service = request.into_inner().service;

        // 未登记的服务按协议先推送 SERVICE_UNKNOWN，登记后自动跟进
        let rx = match self.subscribe(&service).await {
            Some(rx) => rx,
            None => {
                let mut statuses = self.statuses.write().await;
                statuses
                    .entry(service)
                    .or_insert_with(|| watch::channel(ServingStatus::ServiceUnknown).0)
                    .subscribe()
            }
        };

        let stream = WatchStream::new(rx).map(|status| {
            Ok(HealthCheckResponse {
                status: status as i32,
            })
        });
        Ok(Response::new(Box::pin(stream)))
    }
}
