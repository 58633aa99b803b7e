use std::{
    fmt,
    sync::{Arc, Weak},
};

use bytes::Bytes;
use parking_lot::RwLock;
use qsocket_core::{
    ConnectionState, Result, SocketBackend, SocketConfig, SocketDelegate, SocketError, SocketId,
    SocketType,
};
use tracing::{debug, info};

use crate::config::QsSocketConfig;

type DelegateSlot = Arc<RwLock<Option<Weak<dyn SocketDelegate>>>>;

/// 面向调用方的长连接 Socket。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 调用方只面对一个稳定的 API，后端在构造时由 [`SocketType`] 选定，此后不可更换；
/// - 后端的两个原始回调（状态、数据）被翻译为 [`SocketDelegate`] 的四类通知。
///
/// ## 逻辑（How）
/// - 构造时通过工厂创建后端，并立即把自己注册为两个回调的唯一消费者；
/// - 回调闭包只捕获观察者槽位与 [`SocketId`]，不持有门面本身，因此不存在引用环；
/// - 观察者以 `Weak` 存放，每次通知前升级，升级失败即静默丢弃。
///
/// ## 契约（What）
/// - 连接成功 → `socket_did_connect`；
/// - 带错误的断开（建连失败、对端关闭、读错误）→ 先 `socket_did_fail` 再
///   `socket_did_disconnect(Some(err))`；
/// - 主动断开 → `socket_did_disconnect(None)`；
/// - 入站数据 → `socket_did_receive_data`；
/// - `connect`/`send` 原样返回后端结果，不缓冲、不重试、不自动重连。
///
/// ## 注意事项（Trade-offs）
/// - 通知在后端回调所在线程上同步触发，观察者内部的耗时操作会阻塞该后端的 IO；
/// - 释放门面时先摘除回调再断开，因此释放过程不会产生任何通知。
pub struct QsSocket {
    id: SocketId,
    socket_type: SocketType,
    config: SocketConfig,
    backend: Box<dyn SocketBackend>,
    delegate: DelegateSlot,
}

impl QsSocket {
    /// 以默认配置创建指定类型的门面。
    pub fn new(socket_type: SocketType) -> Self {
        let backend = qsocket_transport::create(socket_type);
        Self::assemble(socket_type, SocketConfig::default(), backend)
    }

    /// 以显式配置创建门面；配置非法时返回 `InvalidConfiguration`。
    pub fn with_config(socket_type: SocketType, config: SocketConfig) -> Result<Self> {
        let backend = qsocket_transport::create_with_config(socket_type, &config)?;
        Ok(Self::assemble(socket_type, config, backend))
    }

    /// 按整体配置（通常来自 TOML 文件）创建门面。
    pub fn from_config(config: &QsSocketConfig) -> Result<Self> {
        Self::with_config(config.socket_type, config.socket.clone())
    }

    fn assemble(socket_type: SocketType, config: SocketConfig, backend: Box<dyn SocketBackend>) -> Self {
        let id = SocketId::next();
        let delegate: DelegateSlot = Arc::new(RwLock::new(None));

        let slot = Arc::clone(&delegate);
        backend.set_state_callback(Some(Arc::new(
            move |connected: bool, error: Option<&SocketError>| {
                let Some(delegate) = current_delegate(&slot) else {
                    return;
                };
                match (connected, error) {
                    (true, _) => delegate.socket_did_connect(id),
                    (false, Some(err)) => {
                        delegate.socket_did_fail(id, err);
                        delegate.socket_did_disconnect(id, Some(err));
                    }
                    (false, None) => delegate.socket_did_disconnect(id, None),
                }
            },
        )));

        let slot = Arc::clone(&delegate);
        backend.set_receive_callback(Some(Arc::new(move |data: Bytes| {
            if let Some(delegate) = current_delegate(&slot) {
                delegate.socket_did_receive_data(id, &data);
            }
        })));

        debug!(socket = %id, %socket_type, "socket created");
        Self {
            id,
            socket_type,
            config,
            backend,
            delegate,
        }
    }

    /// 注册观察者；门面只持有弱引用，替换之前的观察者。
    pub fn set_delegate<D>(&self, delegate: &Arc<D>)
    where
        D: SocketDelegate + 'static,
    {
        let weak: Weak<D> = Arc::downgrade(delegate);
        let weak: Weak<dyn SocketDelegate> = weak;
        *self.delegate.write() = Some(weak);
    }

    pub fn clear_delegate(&self) {
        *self.delegate.write() = None;
    }

    /// 观察者已注册且仍存活。
    pub fn has_delegate(&self) -> bool {
        current_delegate(&self.delegate).is_some()
    }

    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        info!(socket = %self.id, host, port, "connect requested");
        self.backend.connect(host, port)
    }

    pub fn send(&self, data: &[u8]) -> Result<()> {
        self.backend.send(data)
    }

    pub fn disconnect(&self) {
        debug!(socket = %self.id, "disconnect requested");
        self.backend.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.backend.state()
    }

    pub fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }
}

impl Default for QsSocket {
    fn default() -> Self {
        Self::new(SocketType::default())
    }
}

impl fmt::Debug for QsSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QsSocket")
            .field("id", &self.id)
            .field("socket_type", &self.socket_type)
            .field("state", &self.state())
            .field("has_delegate", &self.has_delegate())
            .finish()
    }
}

impl Drop for QsSocket {
    fn drop(&mut self) {
        self.backend.set_state_callback(None);
        self.backend.set_receive_callback(None);
        self.backend.disconnect();
        debug!(socket = %self.id, "socket dropped");
    }
}

/// 读锁内只克隆弱引用，升级与通知都在锁外进行，观察者可以在通知中替换自己。
fn current_delegate(slot: &RwLock<Option<Weak<dyn SocketDelegate>>>) -> Option<Arc<dyn SocketDelegate>> {
    let weak = slot.read().clone()?;
    weak.upgrade()
}
