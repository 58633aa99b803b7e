use std::sync::Arc;

use bytes::Bytes;

use crate::{
    error::{ErrorCode, Result, SocketError},
    types::{ConnectionState, SocketType},
};

/// 入站数据回调：每个数据块恰好触发一次，顺序与网络到达顺序一致。
pub type ReceiveCallback = Arc<dyn Fn(Bytes) + Send + Sync + 'static>;

/// 连接状态回调：`(true, None)` 表示连接成功，`(false, err)` 表示断开或失败。
pub type StateCallback = Arc<dyn Fn(bool, Option<&SocketError>) + Send + Sync + 'static>;

/// 所有传输后端必须满足的统一能力契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 阻塞套接字、事件轮询与托管流三种实现的并发模型截然不同，门面只通过该 trait
///   与它们交互，从而保证外部可观察行为（状态迁移、错误码、回调时机）一致；
/// - 新后端只需实现本 trait 并扩展 [`SocketType`]，门面无需任何改动。
///
/// ## 契约说明（What）
/// - `connect`：先校验参数（[`validate_endpoint`]），连接中/已连接时返回
///   [`ErrorCode::AlreadyConnected`] 且不触碰现有连接；之后同步建连，成功前后依次经过
///   `Connecting → Connected`，并在返回前以 `(true, None)` 触发一次状态回调；
///   失败时以 `(false, Some(err))` 触发状态回调并返回同一错误码；
/// - `disconnect`：幂等、不失败；若存在连接或连接尝试，以 `(false, None)` 触发一次状态回调；
///   返回后不会再有任何回调；
/// - `send`：空数据返回 [`ErrorCode::EmptyData`]，未连接返回 [`ErrorCode::NotConnected`]；
///   阻塞直至全部写出或发送超时（部分写出为 `SendIncomplete`，完全未写出为 `SendTimeout`）；
/// - 非请求性断开（对端关闭、读错误）只通过状态回调上报：
///   `ConnectionClosed` 或 `ReadError`；
/// - 同一后端的所有回调彼此串行，不会并发执行。
///
/// ## 风险提示（Trade-offs）
/// - 回调在后端自己的执行上下文中触发（读线程、事件线程或运行时线程），实现方不得跨队列转发；
/// - 所有方法只借用 `&self`，实现内部自行同步，因此 `disconnect` 可以从任意线程调用；
/// - 回调内部可以再次调用后端的 `disconnect`，实现需避免在自身线程上 `join` 自己。
pub trait SocketBackend: Send + Sync + 'static {
    /// 返回该实现对应的选择器。
    fn socket_type(&self) -> SocketType;

    /// 建立到 `host:port` 的连接。
    fn connect(&self, host: &str, port: u16) -> Result<()>;

    /// 断开连接并释放后端持有的资源。
    fn disconnect(&self);

    /// 发送整段数据。
    fn send(&self, data: &[u8]) -> Result<()>;

    /// 读取当前连接状态。
    fn state(&self) -> ConnectionState;

    /// 是否处于真正的已连接状态。
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// 注册或替换数据回调；`None` 表示清除。
    fn set_receive_callback(&self, callback: Option<ReceiveCallback>);

    /// 注册或替换状态回调；`None` 表示清除。
    fn set_state_callback(&self, callback: Option<StateCallback>);
}

/// 在任何网络动作之前校验目标地址。
pub fn validate_endpoint(host: &str, port: u16) -> Result<()> {
    if host.trim().is_empty() {
        return Err(SocketError::new(ErrorCode::InvalidHost));
    }
    if port == 0 {
        return Err(SocketError::new(ErrorCode::InvalidPort).with_extra("port", port));
    }
    Ok(())
}

/// 在任何网络动作之前校验待发送数据。
pub fn validate_payload(data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(SocketError::new(ErrorCode::EmptyData));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_validation_precedes_network() {
        assert_eq!(
            validate_endpoint("", 80).expect_err("empty host").code(),
            ErrorCode::InvalidHost
        );
        assert_eq!(
            validate_endpoint("   ", 80).expect_err("blank host").code(),
            ErrorCode::InvalidHost
        );
        assert_eq!(
            validate_endpoint("example.test", 0).expect_err("port 0").code(),
            ErrorCode::InvalidPort
        );
        assert!(validate_endpoint("example.test", 65535).is_ok());
        assert!(validate_endpoint("example.test", 1).is_ok());
    }

    #[test]
    fn empty_payload_is_rejected() {
        let err = validate_payload(&[]).expect_err("empty payload");
        assert_eq!(err.code(), ErrorCode::EmptyData);
        assert!(err.is_config());
        assert!(validate_payload(b"x").is_ok());
    }
}
