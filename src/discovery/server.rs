//! Discovery RPC 服务实现

use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::discovery::cache::ServiceDiscovery;
use crate::pb::common::InstanceInfo;
use crate::pb::discovery::discovery_server::Discovery;
use crate::pb::discovery::{DiscoverRequest, DiscoverResponse};

/// Discovery 服务端，直接消费本地发现缓存
pub struct DiscoveryService {
    discovery: Arc<ServiceDiscovery>,
}

impl DiscoveryService {
    pub fn new(discovery: Arc<ServiceDiscovery>) -> Self {
        Self { discovery }
    }
}

#[tonic::async_trait]
impl Discovery for DiscoveryService {
    async fn discover(
        &self,
        request: Request<DiscoverRequest>,
    ) -> Result<Response<DiscoverResponse>, Status> {
        let desc_name = request.into_inner().desc_name;

        match self.discovery.find(&desc_name).await {
            None => Ok(Response::new(DiscoverResponse {
                success: false,
                instance: Vec::new(),
            })),
            Some(instances) => Ok(Response::new(DiscoverResponse {
                success: true,
                instance: instances.iter().map(InstanceInfo::from).collect(),
            })),
        }
    }
}
