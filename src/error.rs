//! Radish 统一错误类型
//!
//! 核心各组件共用同一个错误枚举，按类别收敛为少量变体；
//! 单个键/订阅范围内的错误在原地处理，不会升级为进程级失败。

use thiserror::Error;

/// 统一 Result 别名
pub type Result<T> = std::result::Result<T, RadishError>;

/// Radish 核心错误
#[derive(Error, Debug)]
pub enum RadishError {
    /// 协调存储读写/订阅失败
    #[error("etcd error: {0}")]
    Store(#[from] etcd_client::Error),

    /// 租约生命周期错误（创建失败、保活失败导致的过期）
    #[error("lease error: {0}")]
    Lease(String),

    /// 实例数据序列化/反序列化失败
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 服务发现失败（键解析、缓存状态异常）
    #[error("discovery error: {0}")]
    Discovery(String),

    /// 名称解析失败
    #[error("resolution error: {0}")]
    Resolution(String),

    /// 网络传输错误
    #[error("transport error: {0}")]
    Transport(String),

    /// 配置错误
    #[error("config error: {0}")]
    Config(String),
}

impl RadishError {
    /// 创建租约错误
    pub fn lease(msg: impl Into<String>) -> Self {
        RadishError::Lease(msg.into())
    }

    /// 创建服务发现错误
    pub fn discovery(msg: impl Into<String>) -> Self {
        RadishError::Discovery(msg.into())
    }

    /// 创建名称解析错误
    pub fn resolution(msg: impl Into<String>) -> Self {
        RadishError::Resolution(msg.into())
    }

    /// 创建传输错误
    pub fn transport(msg: impl Into<String>) -> Self {
        RadishError::Transport(msg.into())
    }

    /// 创建配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        RadishError::Config(msg.into())
    }
}

impl From<tonic::Status> for RadishError {
    fn from(status: tonic::Status) -> Self {
        RadishError::Transport(status.to_string())
    }
}

impl From<tonic::transport::Error> for RadishError {
    fn from(err: tonic::transport::Error) -> Self {
        RadishError::Transport(err.to_string())
    }
}

impl From<RadishError> for tonic::Status {
    fn from(err: RadishError) -> Self {
        match err {
            RadishError::Resolution(msg) | RadishError::Discovery(msg) => {
                tonic::Status::unavailable(msg)
            }
            other => tonic::Status::internal(other.to_string()),
        }
    }
}
