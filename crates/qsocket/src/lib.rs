#![deny(unsafe_code)]
#![doc = "qsocket: 长连接 Socket 门面。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：调用方只需要一个 `connect / send / disconnect` 接口和一个观察者，不应关心底层是阻塞套接字、事件轮询还是运行时托管的流。"]
#![doc = "- **What**：[`QsSocket`] 在构造时按 [`SocketType`] 选定后端，把后端回调翻译为 [`SocketDelegate`] 通知；[`QsSocketConfig`] 支持从 TOML 整体加载；[`logging::install`] 提供可选的日志安装。"]
#![doc = "- **How**：契约类型来自 `qsocket-core`，后端与工厂来自 `qsocket-transport`，本 crate 只负责组装与事件翻译。"]
#![doc = ""]
#![doc = "```no_run"]
#![doc = "use std::sync::Arc;"]
#![doc = "use qsocket::prelude::*;"]
#![doc = ""]
#![doc = "struct Printer;"]
#![doc = ""]
#![doc = "impl SocketDelegate for Printer {"]
#![doc = "    fn socket_did_receive_data(&self, socket: SocketId, data: &Bytes) {"]
#![doc = "        println!(\"{socket}: {} bytes\", data.len());"]
#![doc = "    }"]
#![doc = "}"]
#![doc = ""]
#![doc = "let socket = QsSocket::new(SocketType::Evented);"]
#![doc = "let printer = Arc::new(Printer);"]
#![doc = "socket.set_delegate(&printer);"]
#![doc = "socket.connect(\"example.com\", 80)?;"]
#![doc = "socket.send(b\"GET / HTTP/1.0\\r\\n\\r\\n\")?;"]
#![doc = "# Ok::<(), qsocket::SocketError>(())"]
#![doc = "```"]

pub mod config;
pub mod logging;
mod socket;

pub use config::{LogConfig, QsSocketConfig};
pub use logging::LogInstallError;
pub use socket::QsSocket;

pub use bytes::Bytes;
pub use qsocket_core::{
    ConnectionState, ErrorCategory, ErrorCode, Result, SocketConfig, SocketDelegate, SocketError,
    SocketId, SocketType, classify, describe, is_config, is_connection, is_read_write, is_state,
};

/// 常用类型的一站式导入。
pub mod prelude {
    pub use crate::{
        Bytes, ConnectionState, ErrorCategory, ErrorCode, QsSocket, QsSocketConfig, SocketConfig,
        SocketDelegate, SocketError, SocketId, SocketType,
    };
}
