#![doc = r#"
# qsocket-transport

## 设计动机（Why）
- **定位**：提供长连接 Socket 的三种可互换后端，以及按选择器构造它们的工厂。
- **架构角色**：位于契约层 `qsocket-core` 与门面 `qsocket` 之间，负责全部真实 IO。
- **设计理念**：三种后端并发模型不同，但共享同一个状态机（代次 + 分发锁），
  因而对外表现出完全一致的状态迁移、错误码与回调时机。

## 核心契约（What）
- [`RawSocketBackend`]：socket2 建连，阻塞读线程；
- [`EventedBackend`]：mio 反应器，单事件线程承载握手与读写；
- [`StreamBackend`]：每连接一个 Tokio `current_thread` 运行时；
- [`factory::create`]：按 [`SocketType`](qsocket_core::SocketType) 返回全新的未连接实例。

## 实现策略（How）
- `connect` 同步完成：成功时在返回前以 `(true, None)` 触发状态回调；
- `send` 阻塞至写完或达到固定发送超时，部分写出报告 `SendIncomplete`；
- 所有回调在分发锁内串行执行，断开通知至多一次，旧连接的 IO 线程无法向新连接上报事件。

## 风险与考量（Trade-offs）
- 每条连接至少占用一个线程；本 crate 面向少量长连接客户端，而非高并发服务端。
"#]
#![deny(unsafe_code)]

mod io_error;
mod resolve;
mod shared;

pub mod evented;
pub mod factory;
pub mod raw;
pub mod stream;

pub use evented::EventedBackend;
pub use factory::{create, create_with_config};
pub use raw::RawSocketBackend;
pub use stream::StreamBackend;
