//! gRPC 线上协议存根
//!
//! 离线维护的 prost/tonic 存根，与 proto 定义一一对应，
//! 构建期不依赖 protoc。客户端/服务端实现与 tonic 生成代码同构。

pub mod common;
pub mod discovery;
pub mod health;
pub mod registry;
