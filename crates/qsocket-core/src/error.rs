//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 三种后端（阻塞套接字、事件轮询、托管流）各自产生的故障语义差异很大，
//!   该模块把它们收敛为同一组数值错误码，调用方只需面对一个分类空间；
//! - 错误码按区间划分类别，类别可由码值推导，无需额外存储。
//!
//! ## 设计要求（What）
//! - 1000–1999 为配置错误，2000–2999 为连接错误，3000–3999 为读写错误，
//!   4000–4999 为状态错误；
//! - 分类函数纯函数、全定义、互斥；
//! - 附带的底层错误只用于排障，不改变错误码与类别。

use std::{borrow::Cow, collections::BTreeMap, fmt};

use thiserror::Error;

/// `ErrorCause` 封装底层原因，保持 `Send + Sync` 以方便跨线程传递。
pub type ErrorCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 统一的返回值别名，默认错误类型为 [`SocketError`]。
pub type Result<T, E = SocketError> = core::result::Result<T, E>;

/// 错误所属类别。
///
/// # 契约说明（What）
/// - `Config`：调用方误用（主机/端口非法、空数据、重复连接、配置非法）；
/// - `Connection`：建立传输失败；
/// - `ReadWrite`：传输过程中读写失败；
/// - `State`：当前连接状态不允许该操作，或连接已被关闭。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Config,
    Connection,
    ReadWrite,
    State,
}

impl ErrorCategory {
    /// 类别对应的码值区间（闭区间）。
    pub const fn code_range(self) -> (i32, i32) {
        match self {
            ErrorCategory::Config => (1000, 1999),
            ErrorCategory::Connection => (2000, 2999),
            ErrorCategory::ReadWrite => (3000, 3999),
            ErrorCategory::State => (4000, 4999),
        }
    }

    /// 按码值区间推导类别；区间之外返回 `None`。
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1000..=1999 => Some(ErrorCategory::Config),
            2000..=2999 => Some(ErrorCategory::Connection),
            3000..=3999 => Some(ErrorCategory::ReadWrite),
            4000..=4999 => Some(ErrorCategory::State),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Config => "config",
            ErrorCategory::Connection => "connection",
            ErrorCategory::ReadWrite => "read_write",
            ErrorCategory::State => "state",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 稳定错误码。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 码值是对外稳定的契约：日志、告警与跨语言桥接都以整数码为准，因此以
///   `#[repr(i32)]` 固定取值，新增码值只能追加，不能改号。
///
/// ## 契约（What）
/// - 每个变体恰好落在一个类别区间内，[`ErrorCode::category`] 对所有变体全定义；
/// - [`ErrorCode::from_i32`] 与 [`ErrorCode::as_i32`] 互为逆映射。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum ErrorCode {
    /// 主机地址为空或无效。
    InvalidHost = 1000,
    /// 端口号无效。
    InvalidPort = 1001,
    /// 待发送数据为空。
    EmptyData = 1002,
    /// 已经连接或正在连接。
    AlreadyConnected = 1003,
    /// 配置文本无法解析或取值越界。
    InvalidConfiguration = 1004,

    ConnectionTimeout = 2000,
    ConnectionFailed = 2001,
    HostResolutionFailed = 2002,
    CreateSocketFailed = 2003,
    CreateStreamFailed = 2004,
    OpenStreamFailed = 2005,
    SetCallbackFailed = 2006,

    SendFailed = 3000,
    ReceiveFailed = 3001,
    /// 超时前只写出了部分数据。
    SendIncomplete = 3002,
    /// 超时前一个字节都没有写出。
    SendTimeout = 3003,
    ReadError = 3004,

    NotConnected = 4000,
    /// 对端关闭了连接。
    ConnectionClosed = 4001,
}

impl ErrorCode {
    /// 全部已定义的错误码，按码值升序排列。
    pub const ALL: [ErrorCode; 19] = [
        ErrorCode::InvalidHost,
        ErrorCode::InvalidPort,
        ErrorCode::EmptyData,
        ErrorCode::AlreadyConnected,
        ErrorCode::InvalidConfiguration,
        ErrorCode::ConnectionTimeout,
        ErrorCode::ConnectionFailed,
        ErrorCode::HostResolutionFailed,
        ErrorCode::CreateSocketFailed,
        ErrorCode::CreateStreamFailed,
        ErrorCode::OpenStreamFailed,
        ErrorCode::SetCallbackFailed,
        ErrorCode::SendFailed,
        ErrorCode::ReceiveFailed,
        ErrorCode::SendIncomplete,
        ErrorCode::SendTimeout,
        ErrorCode::ReadError,
        ErrorCode::NotConnected,
        ErrorCode::ConnectionClosed,
    ];

    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|known| known.as_i32() == code)
    }

    /// 错误码所属类别，对所有变体全定义。
    pub const fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::InvalidHost
            | ErrorCode::InvalidPort
            | ErrorCode::EmptyData
            | ErrorCode::AlreadyConnected
            | ErrorCode::InvalidConfiguration => ErrorCategory::Config,
            ErrorCode::ConnectionTimeout
            | ErrorCode::ConnectionFailed
            | ErrorCode::HostResolutionFailed
            | ErrorCode::CreateSocketFailed
            | ErrorCode::CreateStreamFailed
            | ErrorCode::OpenStreamFailed
            | ErrorCode::SetCallbackFailed => ErrorCategory::Connection,
            ErrorCode::SendFailed
            | ErrorCode::ReceiveFailed
            | ErrorCode::SendIncomplete
            | ErrorCode::SendTimeout
            | ErrorCode::ReadError => ErrorCategory::ReadWrite,
            ErrorCode::NotConnected | ErrorCode::ConnectionClosed => ErrorCategory::State,
        }
    }

    /// 面向排障人员的默认描述，保证非空。
    pub const fn description(self) -> &'static str {
        match self {
            ErrorCode::InvalidHost => "host address is empty or invalid",
            ErrorCode::InvalidPort => "port number is out of range (1-65535)",
            ErrorCode::EmptyData => "data to send is empty",
            ErrorCode::AlreadyConnected => "socket is already connected or connecting",
            ErrorCode::InvalidConfiguration => "socket configuration is invalid",
            ErrorCode::ConnectionTimeout => "connection timed out",
            ErrorCode::ConnectionFailed => "connection failed",
            ErrorCode::HostResolutionFailed => "host name resolution failed",
            ErrorCode::CreateSocketFailed => "failed to create socket",
            ErrorCode::CreateStreamFailed => "failed to create stream",
            ErrorCode::OpenStreamFailed => "failed to open stream",
            ErrorCode::SetCallbackFailed => "failed to register I/O callback",
            ErrorCode::SendFailed => "send failed",
            ErrorCode::ReceiveFailed => "receive failed",
            ErrorCode::SendIncomplete => "data was only partially sent",
            ErrorCode::SendTimeout => "send timed out",
            ErrorCode::ReadError => "error while reading data",
            ErrorCode::NotConnected => "socket is not connected",
            ErrorCode::ConnectionClosed => "connection closed by peer",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.as_i32()
    }
}

/// 未知码值的兜底描述。
pub const UNKNOWN_ERROR_DESCRIPTION: &str = "unknown socket error";

/// 按码值推导类别。
pub const fn classify(code: i32) -> Option<ErrorCategory> {
    ErrorCategory::from_code(code)
}

/// 返回码值的描述；未定义的码值返回 [`UNKNOWN_ERROR_DESCRIPTION`]。
pub fn describe(code: i32) -> &'static str {
    ErrorCode::from_i32(code)
        .map(ErrorCode::description)
        .unwrap_or(UNKNOWN_ERROR_DESCRIPTION)
}

pub const fn is_config(code: i32) -> bool {
    matches!(classify(code), Some(ErrorCategory::Config))
}

pub const fn is_connection(code: i32) -> bool {
    matches!(classify(code), Some(ErrorCategory::Connection))
}

pub const fn is_read_write(code: i32) -> bool {
    matches!(classify(code), Some(ErrorCategory::ReadWrite))
}

pub const fn is_state(code: i32) -> bool {
    matches!(classify(code), Some(ErrorCategory::State))
}

/// 对外暴露的统一错误类型。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 无论底层是 `io::Error`、Tokio 超时还是 mio 的就绪错误，调用方拿到的都是同一个结构；
/// - 以 Builder 风格叠加底层原因与附加键值，保持构造点简洁。
///
/// ## 契约（What）
/// - `code`：稳定错误码，类别由其区间推导；
/// - `message`：默认取 [`ErrorCode::description`]，可通过 [`with_message`](Self::with_message) 覆盖；
/// - `underlying`：可选底层原因，通过 `source()` 暴露；
/// - `extra`：附加的机读上下文（如主机、端口、已发送字节数）。
///
/// ## 注意事项（Trade-offs）
/// - 底层原因以 trait object 保存，因此 `SocketError` 不实现 `Clone`；需要转发给多个观察者时传引用。
#[derive(Debug, Error)]
#[error("[{code}] {message}")]
pub struct SocketError {
    code: ErrorCode,
    message: Cow<'static, str>,
    #[source]
    underlying: Option<ErrorCause>,
    extra: BTreeMap<String, String>,
}

impl SocketError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: Cow::Borrowed(code.description()),
            underlying: None,
            extra: BTreeMap::new(),
        }
    }

    /// 覆盖默认描述。
    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = message.into();
        self
    }

    /// 附带底层原因，码值与类别保持不变。
    pub fn with_underlying(
        mut self,
        underlying: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.underlying = Some(underlying.into());
        self
    }

    /// 追加一条附加信息；重复的键以最后一次为准。
    pub fn with_extra(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.extra.insert(key.into(), value.to_string());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn underlying(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.underlying.as_deref()
    }

    pub fn extra(&self) -> &BTreeMap<String, String> {
        &self.extra
    }

    pub fn extra_value(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }

    pub fn is_config(&self) -> bool {
        self.category() == ErrorCategory::Config
    }

    pub fn is_connection(&self) -> bool {
        self.category() == ErrorCategory::Connection
    }

    pub fn is_read_write(&self) -> bool {
        self.category() == ErrorCategory::ReadWrite
    }

    pub fn is_state(&self) -> bool {
        self.category() == ErrorCategory::State
    }
}

impl From<ErrorCode> for SocketError {
    fn from(code: ErrorCode) -> Self {
        SocketError::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn every_code_sits_in_its_category_range() {
        for code in ErrorCode::ALL {
            let (lo, hi) = code.category().code_range();
            assert!((lo..=hi).contains(&code.as_i32()), "{code:?} 越出类别区间");
            assert_eq!(classify(code.as_i32()), Some(code.category()));
        }
    }

    #[test]
    fn from_i32_inverts_as_i32() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::from_i32(code.as_i32()), Some(code));
        }
        assert_eq!(ErrorCode::from_i32(1999), None);
        assert_eq!(ErrorCode::from_i32(0), None);
    }

    #[test]
    fn describe_falls_back_for_unknown_codes() {
        for code in ErrorCode::ALL {
            assert!(!describe(code.as_i32()).is_empty());
            assert_ne!(describe(code.as_i32()), UNKNOWN_ERROR_DESCRIPTION);
        }
        assert_eq!(describe(42), UNKNOWN_ERROR_DESCRIPTION);
        assert_eq!(describe(1500), UNKNOWN_ERROR_DESCRIPTION);
    }

    #[test]
    fn underlying_error_is_preserved_without_touching_code() {
        let io = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = SocketError::new(ErrorCode::ConnectionFailed)
            .with_underlying(io)
            .with_extra("host", "127.0.0.1")
            .with_extra("port", 9);

        assert_eq!(err.code(), ErrorCode::ConnectionFailed);
        assert_eq!(err.category(), ErrorCategory::Connection);
        let source = err.source().expect("source 应指向底层错误");
        assert_eq!(source.to_string(), "refused");
        assert_eq!(err.underlying().map(|e| e.to_string()).as_deref(), Some("refused"));
        assert_eq!(err.extra_value("port"), Some("9"));
    }

    #[test]
    fn display_carries_numeric_code() {
        let err = SocketError::new(ErrorCode::NotConnected);
        assert_eq!(err.to_string(), "[4000] socket is not connected");
        let custom = SocketError::new(ErrorCode::SendFailed).with_message("broken pipe");
        assert_eq!(custom.to_string(), "[3000] broken pipe");
    }
}
