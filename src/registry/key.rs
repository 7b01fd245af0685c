//! 注册键路径
//!
//! 键形如 `/radish/instances/{datacenter}/{segment}/{desc_name}/{instance_id}`；
//! (root, datacenter, segment, desc_name) 前缀下的键集合即该范围内
//! 当前注册的全部实例。

use crate::error::{RadishError, Result};
use crate::instance::ServiceInstance;

/// etcd 路径分隔符
pub const PATH_SPLITTER: &str = "/";

/// 服务实例注册键根前缀
pub const INSTANCE_PATH_PREFIX: &str = "/radish/instances";

/// (datacenter, segment) 范围的范围读/订阅前缀，带尾部分隔符以避免同级前缀误匹配
pub fn range_prefix(datacenter: &str, segment: &str) -> String {
    format!("{INSTANCE_PATH_PREFIX}{PATH_SPLITTER}{datacenter}{PATH_SPLITTER}{segment}{PATH_SPLITTER}")
}

/// 单个实例的注册键
pub fn instance_key(instance: &ServiceInstance) -> String {
    format!(
        "{}{}{}{}",
        range_prefix(&instance.datacenter, &instance.segment),
        instance.desc_name,
        PATH_SPLITTER,
        instance.instance_id(),
    )
}

/// 从注册键解析出 (desc_name, instance_id)
///
/// `prefix` 为 [`range_prefix`] 的返回值；instance_id 不含分隔符，
/// 因此从最后一个分隔符切分即可还原含点号的服务描述名。
pub fn parse_instance_key(prefix: &str, key: &str) -> Result<(String, String)> {
    let rest = key
        .strip_prefix(prefix)
        .ok_or_else(|| RadishError::discovery(format!("key out of scope: {key}")))?;
    let (desc_name, instance_id) = rest
        .rsplit_once(PATH_SPLITTER)
        .ok_or_else(|| RadishError::discovery(format!("malformed instance key: {key}")))?;
    if desc_name.is_empty() || instance_id.is_empty() {
        return Err(RadishError::discovery(format!(
            "malformed instance key: {key}"
        )));
    }
    Ok((desc_name.to_string(), instance_id.to_string()))
}
