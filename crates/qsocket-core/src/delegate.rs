use bytes::Bytes;

use crate::{error::SocketError, types::SocketId};

/// 门面向外转发事件的观察者契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 调用方只关心“连上了/断开了/收到数据/出错了”四类事件，无需感知底层后端；
/// - 所有方法都有空实现，观察者按需覆盖即可，门面调用前无需探测能力。
///
/// ## 契约（What）
/// - 门面以弱引用持有观察者，不会延长其生命周期；观察者已释放时通知被静默丢弃；
/// - 通知在后端回调所在的执行上下文中同步触发，本层不做线程切换；
/// - 出错断开时先调用 [`socket_did_fail`](Self::socket_did_fail)，再调用
///   [`socket_did_disconnect`](Self::socket_did_disconnect)，两者携带同一错误。
pub trait SocketDelegate: Send + Sync {
    /// 连接建立成功。
    fn socket_did_connect(&self, socket: SocketId) {
        let _ = socket;
    }

    /// 连接断开；`error` 为 `None` 表示主动、正常地断开。
    fn socket_did_disconnect(&self, socket: SocketId, error: Option<&SocketError>) {
        let _ = (socket, error);
    }

    /// 收到一块入站数据。
    fn socket_did_receive_data(&self, socket: SocketId, data: &Bytes) {
        let _ = (socket, data);
    }

    /// 发生连接失败或非请求性错误。
    fn socket_did_fail(&self, socket: SocketId, error: &SocketError) {
        let _ = (socket, error);
    }
}
