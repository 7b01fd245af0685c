//! kubernetes scheme 解析器
//!
//! 不经注册中心，直接查询集群 API 的 Endpoints 资源；查不到时延迟
//! 重试而非立即报错，之后以 chunked 传输的 watch 订阅接收增量更新。

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tonic::Status;
use tracing::{debug, error, warn};

use crate::error::{RadishError, Result};
use crate::resolver::{NameResolver, ResolverListener};

/// 未找到 Endpoints 时的重试间隔
const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Endpoints 资源，只保留解析所需字段
#[derive(Debug, Clone, Deserialize)]
struct Endpoints {
    subsets: Option<Vec<EndpointSubset>>,
}

#[derive(Debug, Clone, Deserialize)]
struct EndpointSubset {
    addresses: Option<Vec<EndpointAddress>>,
    ports: Option<Vec<EndpointPort>>,
}

#[derive(Debug, Clone, Deserialize)]
struct EndpointAddress {
    ip: String,
}

#[derive(Debug, Clone, Deserialize)]
struct EndpointPort {
    port: u16,
}

/// 集群 API 的 watch 事件帧
#[derive(Debug, Deserialize)]
struct WatchEvent {
    #[serde(rename = "type")]
    kind: String,
    object: Endpoints,
}

/// kubernetes scheme 名称解析器
pub struct KubernetesResolver {
    inner: Arc<K8sInner>,
}

struct K8sInner {
    api_server: String,
    token: Option<String>,
    namespace: String,
    name: String,
    port: u16,
    http: reqwest::Client,
    listener: Mutex<Option<Arc<dyn ResolverListener>>>,
    refreshing: AtomicBool,
    watching: AtomicBool,
    shutdown: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl K8sInner {
    fn endpoints_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/endpoints/{}",
            self.api_server, self.namespace, self.name
        )
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.get(url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    fn listener(&self) -> Option<Arc<dyn ResolverListener>> {
        self.listener.lock().unwrap().clone()
    }

    fn push_task(&self, task: JoinHandle<()>) {
        self.tasks.lock().unwrap().push(task);
    }

    /// 以整体替换语义交付 Endpoints 当前对应的地址列表
    fn update(&self, endpoints: &Endpoints) {
        if endpoints.subsets.is_none() {
            return;
        }
        let Some(listener) = self.listener() else {
            return;
        };
        listener.on_addresses(endpoint_addresses(endpoints, self.port));
    }
}

impl KubernetesResolver {
    pub fn new(
        api_server: impl Into<String>,
        token: Option<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            inner: Arc::new(K8sInner {
                api_server: api_server.into(),
                token,
                namespace: namespace.into(),
                name: name.into(),
                port,
                http: reqwest::Client::new(),
                listener: Mutex::new(None),
                refreshing: AtomicBool::new(false),
                watching: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    fn resolve(inner: &Arc<K8sInner>) {
        if inner.shutdown.load(Ordering::SeqCst) || inner.listener().is_none() {
            return;
        }
        if inner.refreshing.swap(true, Ordering::SeqCst) {
            return;
        }

        let owner = Arc::clone(inner);
        let runner = Arc::clone(inner);
        let task = tokio::spawn(async move {
            Self::do_resolve(&runner).await;
            runner.refreshing.store(false, Ordering::SeqCst);
        });
        owner.push_task(task);
    }

    async fn do_resolve(inner: &Arc<K8sInner>) {
        match Self::fetch_endpoints(inner).await {
            Ok(Some(endpoints)) => {
                inner.update(&endpoints);
                Self::spawn_watch(inner);
            }
            Ok(None) => {
                // 资源还不存在：延迟后重试，不向通道报错
                debug!(
                    namespace = %inner.namespace,
                    name = %inner.name,
                    "endpoints not found, retrying later"
                );
                let retry = Arc::clone(inner);
                inner.push_task(tokio::spawn(async move {
                    tokio::time::sleep(RETRY_DELAY).await;
                    KubernetesResolver::resolve(&retry);
                }));
            }
            Err(e) => {
                error!(
                    namespace = %inner.namespace,
                    name = %inner.name,
                    error = %e,
                    "endpoints query failed"
                );
                if let Some(listener) = inner.listener() {
                    listener.on_error(Status::unavailable(format!(
                        "Unable to resolve endpoints {}/{}",
                        inner.namespace, inner.name
                    )));
                }
            }
        }
    }

    async fn fetch_endpoints(inner: &Arc<K8sInner>) -> Result<Option<Endpoints>> {
        let response = inner
            .request(&inner.endpoints_url())
            .send()
            .await
            .map_err(|e| RadishError::transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RadishError::transport(format!(
                "endpoints query returned {}",
                response.status()
            )));
        }
        let endpoints = response
            .json::<Endpoints>()
            .await
            .map_err(|e| RadishError::transport(e.to_string()))?;
        Ok(Some(endpoints))
    }

    fn spawn_watch(inner: &Arc<K8sInner>) {
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        if inner.watching.swap(true, Ordering::SeqCst) {
            return;
        }

        let owner = Arc::clone(inner);
        let runner = Arc::clone(inner);
        let task = tokio::spawn(async move {
            if let Err(e) = KubernetesResolver::watch_endpoints(&runner).await {
                warn!(error = %e, "endpoints watch terminated");
            }
            runner.watching.store(false, Ordering::SeqCst);
        });
        owner.push_task(task);
    }

    /// 长连 watch 订阅：chunked 传输，每行一个 JSON 事件帧
    async fn watch_endpoints(inner: &Arc<K8sInner>) -> Result<()> {
        let url = format!("{}?watch=true", inner.endpoints_url());
        let response = inner
            .request(&url)
            .send()
            .await
            .map_err(|e| RadishError::transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RadishError::transport(format!(
                "endpoints watch returned {}",
                response.status()
            )));
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            if inner.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let chunk = chunk.map_err(|e| RadishError::transport(e.to_string()))?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = &line[..line.len() - 1];
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_slice::<WatchEvent>(line) {
                    Ok(event) => Self::apply_watch_event(inner, &event),
                    Err(e) => warn!(error = %e, "malformed endpoints watch event"),
                }
            }
        }
        Ok(())
    }

    fn apply_watch_event(inner: &Arc<K8sInner>, event: &WatchEvent) {
        match event.kind.as_str() {
            "ADDED" | "MODIFIED" => inner.update(&event.object),
            "DELETED" => {
                if let Some(listener) = inner.listener() {
                    listener.on_addresses(Vec::new());
                }
            }
            other => warn!(kind = other, "unrecognized endpoints watch event"),
        }
    }
}

impl NameResolver for KubernetesResolver {
    fn authority(&self) -> String {
        self.inner
            .api_server
            .split("://")
            .last()
            .unwrap_or(self.inner.api_server.as_str())
            .to_string()
    }

    fn start(&self, listener: Arc<dyn ResolverListener>) -> Result<()> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(RadishError::resolution("resolver already shut down"));
        }
        {
            let mut slot = self.inner.listener.lock().unwrap();
            if slot.is_some() {
                return Err(RadishError::resolution("resolver already started"));
            }
            *slot = Some(listener);
        }
        Self::resolve(&self.inner);
        Ok(())
    }

    fn refresh(&self) {
        Self::resolve(&self.inner);
    }

    fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.inner.listener.lock().unwrap() = None;
        for task in self.inner.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

/// 过滤出暴露指定端口的子集并展开为套接字地址
fn endpoint_addresses(endpoints: &Endpoints, port: u16) -> Vec<SocketAddr> {
    let Some(subsets) = &endpoints.subsets else {
        return Vec::new();
    };
    subsets
        .iter()
        .filter(|subset| {
            subset
                .ports
                .as_deref()
                .unwrap_or_default()
                .iter()
                .any(|p| p.port == port)
        })
        .flat_map(|subset| subset.addresses.as_deref().unwrap_or_default())
        .filter_map(|address| {
            address
                .ip
                .parse::<IpAddr>()
                .ok()
                .map(|ip| SocketAddr::new(ip, port))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINTS_FIXTURE: &str = r#"{
        "kind": "Endpoints",
        "metadata": { "name": "orders", "namespace": "default" },
        "subsets": [
            {
                "addresses": [ { "ip": "10.244.0.12" }, { "ip": "10.244.1.7" } ],
                "ports": [ { "name": "grpc", "port": 9000 } ]
            },
            {
                "addresses": [ { "ip": "10.244.2.3" } ],
                "ports": [ { "name": "metrics", "port": 8080 } ]
            }
        ]
    }"#;

    #[test]
    fn endpoint_addresses_filters_by_port() {
        let endpoints: Endpoints = serde_json::from_str(ENDPOINTS_FIXTURE).unwrap();

        let addresses = endpoint_addresses(&endpoints, 9000);
        assert_eq!(
            addresses,
            vec![
                "10.244.0.12:9000".parse::<SocketAddr>().unwrap(),
                "10.244.1.7:9000".parse::<SocketAddr>().unwrap(),
            ]
        );

        assert!(endpoint_addresses(&endpoints, 7000).is_empty());
    }

    #[test]
    fn endpoint_addresses_tolerates_missing_subsets() {
        let endpoints: Endpoints = serde_json::from_str(r#"{ "kind": "Endpoints" }"#).unwrap();
        assert!(endpoint_addresses(&endpoints, 9000).is_empty());
    }

    #[test]
    fn watch_event_frame_parses() {
        let frame = format!(r#"{{ "type": "MODIFIED", "object": {ENDPOINTS_FIXTURE} }}"#);
        let event: WatchEvent = serde_json::from_str(&frame).unwrap();
        assert_eq!(event.kind, "MODIFIED");
        assert_eq!(endpoint_addresses(&event.object, 9000).len(), 2);
    }
}
