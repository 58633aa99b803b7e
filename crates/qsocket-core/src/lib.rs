#![deny(unsafe_code)]
#![doc = "qsocket-core: 长连接 Socket 的契约层。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：阻塞套接字、事件轮询与托管流三类后端的故障与并发语义各不相同，需要一套共同语言保证门面对外行为一致。"]
#![doc = "- **What**：定义错误分类（`error`）、后端能力契约（`backend`）、观察者契约（`delegate`）、选择器与状态（`types`）以及构造期配置（`config`）。"]
#![doc = "- **How**：本 crate 不做任何 IO，具体后端位于 `qsocket-transport`，门面位于 `qsocket`。"]

pub mod backend;
pub mod config;
pub mod delegate;
pub mod error;
pub mod types;

pub use backend::{ReceiveCallback, SocketBackend, StateCallback, validate_endpoint, validate_payload};
pub use config::SocketConfig;
pub use delegate::SocketDelegate;
pub use error::{
    ErrorCategory, ErrorCause, ErrorCode, Result, SocketError, classify, describe, is_config,
    is_connection, is_read_write, is_state,
};
pub use types::{ConnectionState, SocketId, SocketType};
