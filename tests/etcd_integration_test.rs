//! etcd 集成测试
//!
//! 这些测试需要一个运行中的 etcd 实例，默认被忽略，
//! 使用 `cargo test --test etcd_integration_test -- --ignored` 运行。
//!
//! 启动 etcd：
//! ```bash
//! docker run -d --name etcd-test -p 2379:2379 -p 2380:2380 \
//!   quay.io/coreos/etcd:v3.5.9 \
//!   etcd --advertise-client-urls=http://127.0.0.1:2379 \
//!        --listen-client-urls=http://0.0.0.0:2379
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use etcd_client::{Client, DeleteOptions, EventType, GetOptions, WatchOptions};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use radish_core::pb::discovery::DiscoverRequest;
use radish_core::pb::discovery::discovery_client::DiscoveryClient;
use radish_core::pb::discovery::discovery_server::DiscoveryServer;
use radish_core::pb::health::health_server::HealthServer;
use radish_core::registry::key;
use radish_core::{
    DiscoveryResolver, DiscoveryService, HealthService, NameResolver, RegistryStorage,
    ResolverConfig, ResolverListener, ServiceDiscovery, ServiceInstance, ServiceRegistrar,
};

const DATACENTER: &str = "aliyun";

/// etcd 地址，可通过环境变量 ETCD_ENDPOINTS 覆盖
fn etcd_endpoints() -> Vec<String> {
    std::env::var("ETCD_ENDPOINTS")
        .map(|value| value.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["http://127.0.0.1:2379".to_string()])
}

async fn etcd_client() -> Client {
    Client::connect(etcd_endpoints(), None)
        .await
        .expect("failed to connect to etcd")
}

fn test_instance(segment: &str, desc_name: &str, ip: &str, port: u16) -> ServiceInstance {
    ServiceInstance::new(desc_name, ip, port)
        .with_operation_port(8909)
        .with_hostname("testcomputer")
        .with_app_name("itest")
        .with_scope(DATACENTER, segment)
}

/// 清理该网段下的残留注册键，保证用例可重复运行
async fn cleanup(client: &Client, segment: &str) {
    let mut client = client.clone();
    let _ = client
        .delete(
            key::range_prefix(DATACENTER, segment),
            Some(DeleteOptions::new().with_prefix()),
        )
        .await;
}

async fn wait_for_instance_ids(
    discovery: &ServiceDiscovery,
    desc_name: &str,
    expected: &HashSet<String>,
) {
    let mut ids = HashSet::new();
    for _ in 0..100 {
        ids = discovery
            .find(desc_name)
            .await
            .unwrap_or_default()
            .iter()
            .map(|instance| instance.instance_id())
            .collect();
        if ids == *expected {
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("instances of {desc_name} stuck at {ids:?}, expected {expected:?}");
}

async fn wait_for_instances(discovery: &ServiceDiscovery, desc_name: &str, expected: usize) {
    for _ in 0..100 {
        let current = discovery
            .find(desc_name)
            .await
            .map(|instances| instances.len())
            .unwrap_or(0);
        if current == expected {
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("expected {expected} instances of {desc_name} within 10s");
}

#[derive(Default)]
struct RecordingListener {
    addresses: Mutex<Vec<Vec<SocketAddr>>>,
    errors: Mutex<Vec<tonic::Code>>,
}

impl ResolverListener for RecordingListener {
    fn on_addresses(&self, addresses: Vec<SocketAddr>) {
        self.addresses.lock().unwrap().push(addresses);
    }

    fn on_error(&self, status: tonic::Status) {
        self.errors.lock().unwrap().push(status.code());
    }
}

async fn spawn_health_server(health: Arc<HealthService>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        Server::builder()
            .add_service(HealthServer::from_arc(health))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr
}

/// 测试：写入带租约的注册键，关闭租约后键消失
#[tokio::test]
#[ignore]
async fn save_writes_leased_key_and_close_removes_it() {
    let client = etcd_client().await;
    let segment = "it-save";
    cleanup(&client, segment).await;

    let storage = RegistryStorage::new(client.clone(), 10);
    let instance = test_instance(segment, "com.radish.GreeterService", "127.0.0.1", 8005);

    let lease = storage.save(&instance).await.expect("save failed");
    assert!(lease.id() > 0);

    let mut kv = client.clone();
    let resp = kv
        .get(
            key::range_prefix(DATACENTER, segment),
            Some(GetOptions::new().with_prefix()),
        )
        .await
        .unwrap();
    assert_eq!(resp.kvs().len(), 1);
    assert_eq!(
        String::from_utf8_lossy(resp.kvs()[0].key()),
        key::instance_key(&instance)
    );
    let stored: ServiceInstance = serde_json::from_slice(resp.kvs()[0].value()).unwrap();
    assert_eq!(stored, instance);

    lease.close().await.expect("close failed");
    sleep(Duration::from_millis(200)).await;

    let resp = kv
        .get(
            key::range_prefix(DATACENTER, segment),
            Some(GetOptions::new().with_prefix()),
        )
        .await
        .unwrap();
    assert!(resp.kvs().is_empty(), "key must disappear with its lease");
}

/// 测试：租约关闭产生的 DELETE 事件到达该前缀上的订阅者
#[tokio::test]
#[ignore]
async fn lease_close_fans_out_delete_to_watchers() {
    let client = etcd_client().await;
    let segment = "it-fanout";
    cleanup(&client, segment).await;

    let mut watch_client = client.clone();
    let (_watcher, mut stream) = watch_client
        .watch(
            key::range_prefix(DATACENTER, segment),
            Some(WatchOptions::new().with_prefix()),
        )
        .await
        .unwrap();

    let storage = RegistryStorage::new(client.clone(), 10);
    let instance = test_instance(segment, "orders", "10.0.0.5", 9000);
    let lease = storage.save(&instance).await.unwrap();

    let put = timeout(Duration::from_secs(5), stream.message())
        .await
        .expect("no PUT event within 5s")
        .unwrap()
        .unwrap();
    assert!(
        put.events()
            .iter()
            .any(|e| matches!(e.event_type(), EventType::Put))
    );

    lease.close().await.unwrap();

    let deleted = timeout(Duration::from_secs(5), stream.message())
        .await
        .expect("no DELETE event within 5s")
        .unwrap()
        .unwrap();
    assert!(
        deleted
            .events()
            .iter()
            .any(|e| matches!(e.event_type(), EventType::Delete))
    );
}

/// 测试：预加载 {A, B}，DELETE B 后 PUT C，find 结果为 {A, C}
#[tokio::test]
#[ignore]
async fn preload_then_watch_keeps_cache_consistent() {
    let client = etcd_client().await;
    let segment = "it-cache";
    cleanup(&client, segment).await;

    let storage = RegistryStorage::new(client.clone(), 10);
    let a = test_instance(segment, "orders", "10.0.0.1", 9000);
    let b = test_instance(segment, "orders", "10.0.0.2", 9000);
    let _lease_a = storage.save(&a).await.unwrap();
    let lease_b = storage.save(&b).await.unwrap();

    let discovery = ServiceDiscovery::new(client.clone(), DATACENTER, segment);
    discovery.preload().await.unwrap();
    discovery.watch();

    assert_eq!(discovery.find("orders").await.unwrap().len(), 2);
    assert!(discovery.find("ghost").await.is_none());

    lease_b.close().await.unwrap();
    let c = test_instance(segment, "orders", "10.0.0.3", 9000);
    let _lease_c = storage.save(&c).await.unwrap();

    let expected = HashSet::from(["10.0.0.1:9000".to_string(), "10.0.0.3:9000".to_string()]);
    wait_for_instance_ids(&discovery, "orders", &expected).await;

    discovery.close();
}

/// 测试：健康状态起落驱动注册信息的写入与撤销，另一实例不受影响
#[tokio::test]
#[ignore]
async fn health_transitions_drive_registration() {
    let client = etcd_client().await;
    let segment = "it-health";
    cleanup(&client, segment).await;

    let health_a = Arc::new(HealthService::new());
    let health_b = Arc::new(HealthService::new());
    health_a.set_serving("orders").await;
    health_b.set_serving("orders").await;
    let addr_a = spawn_health_server(health_a.clone()).await;
    let addr_b = spawn_health_server(health_b.clone()).await;

    let storage = Arc::new(RegistryStorage::new(client.clone(), 10));
    let registrar = ServiceRegistrar::new(storage);

    let instance_a = test_instance(segment, "orders", "127.0.0.1", addr_a.port());
    let instance_b = test_instance(segment, "orders", "127.0.0.1", addr_b.port());
    registrar.register(instance_a.clone()).await;
    registrar.register(instance_b.clone()).await;

    let discovery = ServiceDiscovery::new(client.clone(), DATACENTER, segment);
    discovery.preload().await.unwrap();
    discovery.watch();

    wait_for_instances(&discovery, "orders", 2).await;

    // A 掉健康：租约被关闭，DELETE 传播到缓存，B 仍可见
    health_a.set_not_serving("orders").await;
    wait_for_instances(&discovery, "orders", 1).await;
    let remaining = discovery.find("orders").await.unwrap();
    assert_eq!(remaining[0].instance_id(), instance_b.instance_id());
    assert!(registrar.is_registering(&instance_a.instance_id()).await);

    // A 恢复健康后重新写入
    health_a.set_serving("orders").await;
    wait_for_instances(&discovery, "orders", 2).await;

    registrar.deregister(&instance_a.instance_id()).await;
    wait_for_instances(&discovery, "orders", 1).await;

    discovery.close();
}

/// 测试：Discover RPC 与远端解析器；未注册服务给出 unavailable 而非空成功
#[tokio::test]
#[ignore]
async fn discover_rpc_and_remote_resolver() {
    let client = etcd_client().await;
    let segment = "it-resolver";
    cleanup(&client, segment).await;

    let storage = RegistryStorage::new(client.clone(), 10);
    let instance = test_instance(segment, "orders", "10.0.0.1", 9000);
    let _lease = storage.save(&instance).await.unwrap();

    let discovery = Arc::new(ServiceDiscovery::new(client.clone(), DATACENTER, segment));
    discovery.preload().await.unwrap();
    discovery.watch();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = DiscoveryService::new(discovery.clone());
    tokio::spawn(async move {
        Server::builder()
            .add_service(DiscoveryServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    sleep(Duration::from_millis(200)).await;

    let mut rpc = DiscoveryClient::connect(format!("http://{addr}")).await.unwrap();
    let response = rpc
        .discover(DiscoverRequest {
            desc_name: "orders".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(response.success);
    assert_eq!(response.instance.len(), 1);
    assert_eq!(response.instance[0].ip, "10.0.0.1");
    assert_eq!(response.instance[0].port, 9000);

    let config = ResolverConfig {
        discovery_endpoint: Some(format!("http://{addr}")),
        ..Default::default()
    };

    let resolver = DiscoveryResolver::remote("orders", rpc.clone(), &config);
    let recorder = Arc::new(RecordingListener::default());
    resolver.start(recorder.clone()).unwrap();
    for _ in 0..50 {
        if !recorder.addresses.lock().unwrap().is_empty() {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(
        recorder.addresses.lock().unwrap()[0],
        vec!["10.0.0.1:9000".parse::<SocketAddr>().unwrap()]
    );

    let ghost = DiscoveryResolver::remote("ghost", rpc, &config);
    let ghost_recorder = Arc::new(RecordingListener::default());
    ghost.start(ghost_recorder.clone()).unwrap();
    for _ in 0..50 {
        if !ghost_recorder.errors.lock().unwrap().is_empty() {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
    assert!(ghost_recorder.addresses.lock().unwrap().is_empty());
    assert_eq!(
        ghost_recorder.errors.lock().unwrap()[0],
        tonic::Code::Unavailable
    );

    resolver.shutdown();
    ghost.shutdown();
    discovery.close();
}

/// 测试：并发重复注册同一实例时至多一个活动流程
#[tokio::test]
#[ignore]
async fn at_most_one_registrar_entry_per_instance() {
    let client = etcd_client().await;
    let segment = "it-single";
    cleanup(&client, segment).await;

    // 只建立 TCP 不回应 HTTP/2，让探活流保持挂起而不触发回收
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let storage = Arc::new(RegistryStorage::new(client.clone(), 10));
    let registrar = Arc::new(ServiceRegistrar::new(storage));
    let instance = test_instance(segment, "orders", "127.0.0.1", addr.port());

    let mut register_tasks = Vec::new();
    for _ in 0..8 {
        let registrar = registrar.clone();
        let instance = instance.clone();
        register_tasks.push(tokio::spawn(async move {
            registrar.register(instance).await;
        }));
    }
    for task in register_tasks {
        task.await.unwrap();
    }

    assert_eq!(registrar.active_count().await, 1);
    assert!(registrar.is_registering(&instance.instance_id()).await);

    registrar.deregister(&instance.instance_id()).await;
    assert!(!registrar.is_registering(&instance.instance_id()).await);
    drop(listener);
}
