use qsocket_core::{ErrorCode, SocketError};
use std::io;

/// 描述一次底层操作对应的错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: ErrorCode,
    pub message: &'static str,
}

pub(crate) const RESOLVE: OperationKind = OperationKind {
    code: ErrorCode::HostResolutionFailed,
    message: "resolve host",
};
pub(crate) const CREATE_SOCKET: OperationKind = OperationKind {
    code: ErrorCode::CreateSocketFailed,
    message: "create socket",
};
pub(crate) const CREATE_STREAM: OperationKind = OperationKind {
    code: ErrorCode::CreateStreamFailed,
    message: "create stream",
};
pub(crate) const OPEN_STREAM: OperationKind = OperationKind {
    code: ErrorCode::OpenStreamFailed,
    message: "open stream",
};
pub(crate) const REGISTER: OperationKind = OperationKind {
    code: ErrorCode::SetCallbackFailed,
    message: "register readiness interest",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: ErrorCode::ConnectionFailed,
    message: "tcp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: ErrorCode::ReadError,
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: ErrorCode::SendFailed,
    message: "tcp write",
};

/// 将 IO 错误映射为统一错误码，并保留原始错误作为底层原因。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> SocketError {
    let code = refine_code(kind, &error);
    SocketError::new(code)
        .with_message(format!("{}: {}", kind.message, error))
        .with_underlying(error)
}

/// 发送超时：按已写出的字节数区分 `SendTimeout` 与 `SendIncomplete`。
pub(crate) fn send_timeout_error(written: usize, total: usize) -> SocketError {
    let code = if written == 0 {
        ErrorCode::SendTimeout
    } else {
        ErrorCode::SendIncomplete
    };
    SocketError::new(code)
        .with_extra("bytes_sent", written)
        .with_extra("bytes_total", total)
}

/// IO 执行上下文未在宽限期内回执发送结果。
///
/// 调用方这一侧无从得知已写出多少字节，因此一律按 `SendTimeout` 上报，
/// `bytes_sent` 记为 `unknown`；正常情况下 IO 侧自己的截止时间会先给出精确结果。
pub(crate) fn send_reply_timeout(total: usize) -> SocketError {
    SocketError::new(ErrorCode::SendTimeout)
        .with_message("I/O context did not acknowledge the send in time")
        .with_extra("bytes_sent", "unknown")
        .with_extra("bytes_total", total)
}

/// 发送途中出现非超时的 IO 错误。
pub(crate) fn send_io_error(error: io::Error, written: usize, total: usize) -> SocketError {
    if is_timeout(&error) {
        return send_timeout_error(written, total).with_underlying(error);
    }
    map_io_error(WRITE, error)
        .with_extra("bytes_sent", written)
        .with_extra("bytes_total", total)
}

pub(crate) fn connect_timeout_error(host: &str, port: u16) -> SocketError {
    SocketError::new(ErrorCode::ConnectionTimeout)
        .with_extra("host", host)
        .with_extra("port", port)
}

pub(crate) fn connection_closed() -> SocketError {
    SocketError::new(ErrorCode::ConnectionClosed)
}

/// 连接在数据写完之前被关闭（主动断开或对端断开）。
pub(crate) fn send_aborted(total: usize) -> SocketError {
    SocketError::new(ErrorCode::SendFailed)
        .with_message("connection closed before the payload was written")
        .with_extra("bytes_total", total)
}

/// 建连途中被 `disconnect` 打断。
pub(crate) fn connect_aborted() -> SocketError {
    SocketError::new(ErrorCode::ConnectionFailed)
        .with_message("connection attempt aborted by disconnect")
}

/// IO 执行上下文意外退出（线程恐慌或通道关闭）。
pub(crate) fn io_context_gone(code: ErrorCode) -> SocketError {
    SocketError::new(code).with_message("socket I/O context stopped unexpectedly")
}

pub(crate) fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

fn refine_code(kind: OperationKind, error: &io::Error) -> ErrorCode {
    match kind.code {
        ErrorCode::ConnectionFailed if is_timeout(error) => ErrorCode::ConnectionTimeout,
        ErrorCode::SendFailed if is_timeout(error) => ErrorCode::SendTimeout,
        code => code,
    }
}
