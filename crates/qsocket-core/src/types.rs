use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, SocketError};

/// 后端选择器：决定门面实例化哪一种传输策略。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `Raw`：阻塞套接字 + 独立读线程，最贴近系统调用；
/// - `Evented`：非阻塞套接字 + 就绪事件轮询，所有 IO 在单一事件线程完成；
/// - `Stream`：托管异步流，由专属线程上的运行时驱动（默认值）；
/// - 集合在编译期封闭，门面构造后不可变更。
///
/// ## 注意事项（Trade-offs）
/// - 文本形式（配置文件）使用小写名称，未知名称解析为
///   [`ErrorCode::InvalidConfiguration`]。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketType {
    Raw,
    Evented,
    #[default]
    Stream,
}

impl SocketType {
    pub const ALL: [SocketType; 3] = [SocketType::Raw, SocketType::Evented, SocketType::Stream];

    pub const fn as_str(self) -> &'static str {
        match self {
            SocketType::Raw => "raw",
            SocketType::Evented => "evented",
            SocketType::Stream => "stream",
        }
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocketType {
    type Err = SocketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SocketType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                SocketError::new(ErrorCode::InvalidConfiguration)
                    .with_message(format!("unknown socket type `{s}`"))
            })
    }
}

/// 连接状态，由后端权威维护。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// 连接中或已连接时，再次 `connect` 会被拒绝。
    pub const fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// 进程内唯一的门面标识，随每条代理通知一并传递。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    /// 分配下一个标识。
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SocketId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qsocket#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_type_parses_its_own_names() {
        for kind in SocketType::ALL {
            assert_eq!(kind.as_str().parse::<SocketType>().expect("parse"), kind);
        }
        assert_eq!(" Stream ".parse::<SocketType>().expect("parse"), SocketType::Stream);
    }

    #[test]
    fn unknown_socket_type_is_a_config_error() {
        let err = "cfnetwork".parse::<SocketType>().expect_err("未知名称必须失败");
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
        assert!(err.is_config());
    }

    #[test]
    fn socket_ids_are_unique() {
        let a = SocketId::next();
        let b = SocketId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }
}
