//! `radish.common` 消息定义

/// 服务实例信息
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InstanceInfo {
    #[prost(string, tag = "1")]
    pub ip: ::prost::alloc::string::String,
    #[prost(int32, tag = "2")]
    pub port: i32,
    #[prost(string, tag = "3")]
    pub hostname: ::prost::alloc::string::String,
    #[prost(int32, tag = "4")]
    pub operation_port: i32,
    #[prost(string, tag = "5")]
    pub app_name: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub desc_name: ::prost::alloc::string::String,
    #[prost(string, tag = "7")]
    pub datacenter: ::prost::alloc::string::String,
    #[prost(string, tag = "8")]
    pub segment: ::prost::alloc::string::String,
}
