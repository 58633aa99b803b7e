use crate::{EventedBackend, RawSocketBackend, StreamBackend};
use qsocket_core::{Result, SocketBackend, SocketConfig, SocketType};
use tracing::debug;

/// 按选择器创建一个全新的、未连接的后端实例，使用默认配置。
pub fn create(socket_type: SocketType) -> Box<dyn SocketBackend> {
    instantiate(socket_type, SocketConfig::default())
}

/// 按选择器与给定配置创建后端。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 门面只认识 [`SocketType`]，具体实现的选择收敛在此处；
/// - 返回 trait 对象，调用方拿到的是能力而非具体类型。
///
/// ## 契约（What）
/// - 每次调用都返回独立实例，彼此不共享状态、回调或连接；
/// - 配置先经 [`SocketConfig::validate`] 校验，非法取值返回 `InvalidConfiguration`，不创建实例；
/// - `match` 穷尽所有选择器，新增变体时编译器会强制在此补齐。
pub fn create_with_config(
    socket_type: SocketType,
    config: &SocketConfig,
) -> Result<Box<dyn SocketBackend>> {
    config.validate()?;
    Ok(instantiate(socket_type, config.clone()))
}

fn instantiate(socket_type: SocketType, config: SocketConfig) -> Box<dyn SocketBackend> {
    debug!(%socket_type, "creating socket backend");
    match socket_type {
        SocketType::Raw => Box::new(RawSocketBackend::new(config)),
        SocketType::Evented => Box::new(EventedBackend::new(config)),
        SocketType::Stream => Box::new(StreamBackend::new(config)),
    }
}
