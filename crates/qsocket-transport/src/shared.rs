use bytes::Bytes;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use qsocket_core::{
    ConnectionState, ErrorCode, ReceiveCallback, Result, SocketError, SocketType, StateCallback,
};
use std::sync::Arc;
use tracing::{debug, trace};

/// 一次连接尝试的代次编号。
///
/// 每次 `connect` 都会递增代次；IO 线程只为自己所属的代次上报事件，
/// 旧连接遗留的线程即使仍在运行也无法触发新连接的回调。
pub(crate) type Epoch = u64;

#[derive(Debug, Default)]
struct Lifecycle {
    state: ConnectionState,
    epoch: Epoch,
}

/// 后端与其 IO 执行上下文之间共享的状态机与回调槽。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 三种后端的 IO 分别运行在读线程、事件线程与运行时线程上，而 `connect`/`disconnect`
///   运行在调用方线程上；状态迁移与回调分发必须在这些上下文之间保持一致；
/// - 把“谁有权上报断开”收敛为一次原子的状态认领，确保断开通知至多一次。
///
/// ## 逻辑（How）
/// - `lifecycle` 保存状态与代次：`begin_connect` 认领 `Connecting`，`complete_connect`
///   仅在代次匹配时迁移到 `Connected`，`release`/`release_epoch` 原子地回到 `Disconnected`
///   并告知调用者是否由它完成了这次迁移；
/// - 所有回调都在 `dispatch` 可重入锁内执行：不同线程的回调互斥，同一线程内
///   （例如在回调里调用 `disconnect`）允许重入；
/// - 回调本身在锁外克隆出来再调用，注册/清除回调不会被正在执行的回调阻塞。
///
/// ## 契约（What）
/// - `emit_data` 仅在代次仍为当前且处于 `Connected` 时调用数据回调，返回值指示 IO 循环是否继续；
/// - `fail_connect` / `connection_lost` 只有在本次调用完成状态迁移时才触发状态回调。
pub(crate) struct Shared {
    socket_type: SocketType,
    log_io: bool,
    lifecycle: Mutex<Lifecycle>,
    receive: Mutex<Option<ReceiveCallback>>,
    state_changed: Mutex<Option<StateCallback>>,
    dispatch: ReentrantMutex<()>,
}

impl Shared {
    pub(crate) fn new(socket_type: SocketType, log_io: bool) -> Arc<Self> {
        Arc::new(Self {
            socket_type,
            log_io,
            lifecycle: Mutex::new(Lifecycle::default()),
            receive: Mutex::new(None),
            state_changed: Mutex::new(None),
            dispatch: ReentrantMutex::new(()),
        })
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.lifecycle.lock().state
    }

    pub(crate) fn set_receive_callback(&self, callback: Option<ReceiveCallback>) {
        *self.receive.lock() = callback;
    }

    pub(crate) fn set_state_callback(&self, callback: Option<StateCallback>) {
        *self.state_changed.lock() = callback;
    }

    pub(crate) fn clear_callbacks(&self) {
        self.set_receive_callback(None);
        self.set_state_callback(None);
    }

    /// 认领一次新的连接尝试。
    pub(crate) fn begin_connect(&self) -> Result<Epoch> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state.is_active() {
            return Err(SocketError::new(ErrorCode::AlreadyConnected)
                .with_extra("state", format!("{:?}", lifecycle.state)));
        }
        lifecycle.epoch = lifecycle.epoch.wrapping_add(1);
        lifecycle.state = ConnectionState::Connecting;
        Ok(lifecycle.epoch)
    }

    /// `Connecting → Connected`；若期间已被 `disconnect` 认领则返回 `false`。
    pub(crate) fn complete_connect(&self, epoch: Epoch) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.epoch == epoch && lifecycle.state == ConnectionState::Connecting {
            lifecycle.state = ConnectionState::Connected;
            true
        } else {
            false
        }
    }

    /// 无条件回到 `Disconnected`，返回之前是否处于活动状态。
    pub(crate) fn release(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        let was_active = lifecycle.state.is_active();
        lifecycle.state = ConnectionState::Disconnected;
        was_active
    }

    /// 仅当代次匹配时回到 `Disconnected`。
    pub(crate) fn release_epoch(&self, epoch: Epoch) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.epoch == epoch && lifecycle.state.is_active() {
            lifecycle.state = ConnectionState::Disconnected;
            true
        } else {
            false
        }
    }

    pub(crate) fn is_current(&self, epoch: Epoch) -> bool {
        let lifecycle = self.lifecycle.lock();
        lifecycle.epoch == epoch && lifecycle.state == ConnectionState::Connected
    }

    /// 持有分发锁，期间其他线程的回调不会执行。
    pub(crate) fn dispatch_guard(&self) -> ReentrantMutexGuard<'_, ()> {
        self.dispatch.lock()
    }

    /// 当前线程是否正持有分发锁，即处于某个回调之内。
    ///
    /// IO 线程退出前可能还要进入一次分发锁，持锁线程等待它会互相阻塞。
    pub(crate) fn dispatching_on_current_thread(&self) -> bool {
        self.dispatch.is_owned_by_current_thread()
    }

    pub(crate) fn emit_connected(&self) {
        debug!(socket_type = %self.socket_type, "socket connected");
        self.emit_state(true, None);
    }

    pub(crate) fn emit_disconnected(&self, error: Option<&SocketError>) {
        match error {
            Some(err) => debug!(
                socket_type = %self.socket_type,
                code = err.code().as_i32(),
                error = %err,
                "socket disconnected with error"
            ),
            None => debug!(socket_type = %self.socket_type, "socket disconnected"),
        }
        self.emit_state(false, error);
    }

    fn emit_state(&self, connected: bool, error: Option<&SocketError>) {
        let _dispatch = self.dispatch.lock();
        let callback = self.state_changed.lock().clone();
        if let Some(callback) = callback {
            callback(connected, error);
        }
    }

    /// 上报一块入站数据；返回 `false` 表示该代次已失效，IO 循环应当退出。
    pub(crate) fn emit_data(&self, epoch: Epoch, data: Bytes) -> bool {
        let _dispatch = self.dispatch.lock();
        if !self.is_current(epoch) {
            return false;
        }
        if self.log_io {
            trace!(socket_type = %self.socket_type, bytes = data.len(), "received chunk");
        }
        let callback = self.receive.lock().clone();
        if let Some(callback) = callback {
            callback(data);
        }
        true
    }

    /// 连接尝试失败：若仍由本代次持有状态，则回到 `Disconnected` 并上报失败。
    pub(crate) fn fail_connect(&self, epoch: Epoch, error: SocketError) -> SocketError {
        let _dispatch = self.dispatch.lock();
        if self.release_epoch(epoch) {
            self.emit_disconnected(Some(&error));
        }
        error
    }

    /// 非请求性断开：对端关闭或读错误。
    pub(crate) fn connection_lost(&self, epoch: Epoch, error: SocketError) {
        let _dispatch = self.dispatch.lock();
        if self.release_epoch(epoch) {
            self.emit_disconnected(Some(&error));
        }
    }

    pub(crate) fn log_io(&self) -> bool {
        self.log_io
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_state(shared: &Shared) -> Arc<Mutex<Vec<(bool, Option<ErrorCode>)>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        shared.set_state_callback(Some(Arc::new(move |connected: bool, err: Option<&SocketError>| {
            sink.lock().push((connected, err.map(SocketError::code)));
        })));
        events
    }

    #[test]
    fn second_connect_attempt_is_rejected_while_active() {
        let shared = Shared::new(SocketType::Raw, false);
        let epoch = shared.begin_connect().expect("first");
        let err = shared.begin_connect().expect_err("second");
        assert_eq!(err.code(), ErrorCode::AlreadyConnected);
        assert!(shared.complete_connect(epoch));
        assert_eq!(
            shared.begin_connect().expect_err("connected").code(),
            ErrorCode::AlreadyConnected
        );
        assert_eq!(shared.state(), ConnectionState::Connected);
    }

    #[test]
    fn loss_is_reported_once_even_if_disconnect_races() {
        let shared = Shared::new(SocketType::Evented, false);
        let events = counting_state(&shared);
        let epoch = shared.begin_connect().expect("connect");
        assert!(shared.complete_connect(epoch));

        shared.connection_lost(epoch, SocketError::new(ErrorCode::ConnectionClosed));
        assert!(!shared.release(), "断开已由 IO 侧认领");
        shared.connection_lost(epoch, SocketError::new(ErrorCode::ReadError));

        assert_eq!(
            events.lock().as_slice(),
            &[(false, Some(ErrorCode::ConnectionClosed))]
        );
    }

    #[test]
    fn stale_epoch_cannot_deliver_data() {
        let shared = Shared::new(SocketType::Stream, false);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        shared.set_receive_callback(Some(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        let old = shared.begin_connect().expect("connect");
        assert!(shared.complete_connect(old));
        assert!(shared.release());
        let new = shared.begin_connect().expect("reconnect");
        assert!(shared.complete_connect(new));

        assert!(!shared.emit_data(old, Bytes::from_static(b"stale")));
        assert!(shared.emit_data(new, Bytes::from_static(b"fresh")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_ownership_is_per_thread() {
        let shared = Shared::new(SocketType::Raw, false);
        assert!(!shared.dispatching_on_current_thread());

        let inner = Arc::clone(&shared);
        shared.set_state_callback(Some(Arc::new(move |_: bool, _: Option<&SocketError>| {
            assert!(inner.dispatching_on_current_thread());
            let other = Arc::clone(&inner);
            let seen = std::thread::spawn(move || other.dispatching_on_current_thread())
                .join()
                .expect("observer thread");
            assert!(!seen);
        })));
        shared.emit_connected();
        assert!(!shared.dispatching_on_current_thread());
    }

    #[test]
    fn disconnect_during_connect_wins_over_completion() {
        let shared = Shared::new(SocketType::Raw, false);
        let events = counting_state(&shared);
        let epoch = shared.begin_connect().expect("connect");
        assert!(shared.release());
        assert!(!shared.complete_connect(epoch));
        let err = shared.fail_connect(epoch, SocketError::new(ErrorCode::ConnectionFailed));
        assert_eq!(err.code(), ErrorCode::ConnectionFailed);
        assert!(events.lock().is_empty(), "失败不应在断开后重复上报");
    }
}
