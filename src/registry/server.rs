//! Registry RPC 服务实现
//!
//! 接收实例的注册请求，打上本注册中心配置的 (datacenter, segment)
//! 后交给健康驱动注册器。

use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::instance::ServiceInstance;
use crate::pb::registry::registry_server::Registry;
use crate::pb::registry::{RegisterRequest, RegisterResponse};
use crate::registry::registrar::ServiceRegistrar;

/// 健康检查服务自身不参与注册
const HEALTH_SERVICE_NAME: &str = "grpc.health.v1.Health";

/// Registry 服务端
pub struct RegistryService {
    registrar: Arc<ServiceRegistrar>,
    datacenter: String,
    segment: String,
}

impl RegistryService {
    pub fn new(
        registrar: Arc<ServiceRegistrar>,
        datacenter: impl Into<String>,
        segment: impl Into<String>,
    ) -> Self {
        Self {
            registrar,
            datacenter: datacenter.into(),
            segment: segment.into(),
        }
    }
}

#[tonic::async_trait]
impl Registry for RegistryService {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let request = request.into_inner();

        // 强制忽略 health 服务
        if request.desc_name == HEALTH_SERVICE_NAME {
            return Ok(Response::new(RegisterResponse { success: true }));
        }

        let info = request
            .instance_info
            .ok_or_else(|| Status::invalid_argument("instance_info required"))?;
        let mut instance = ServiceInstance::try_from(&info)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        instance.desc_name = request.desc_name;
        instance.datacenter = self.datacenter.clone();
        instance.segment = self.segment.clone();

        self.registrar.register(instance).await;
        Ok(Response::new(RegisterResponse { success: true }))
    }
}
