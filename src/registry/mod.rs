//! 服务注册模块
//!
//! 注册键、租约存储、健康驱动注册器与 Registry RPC 服务端。

pub mod key;
pub mod registrar;
pub mod server;
pub mod storage;

pub use registrar::ServiceRegistrar;
pub use server::RegistryService;
pub use storage::{Lease, RegistryStorage};
