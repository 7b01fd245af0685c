//! 服务发现模块
//!
//! 本地发现缓存与 Discovery RPC 服务端。

pub mod cache;
pub mod server;

pub use cache::ServiceDiscovery;
pub use server::DiscoveryService;
