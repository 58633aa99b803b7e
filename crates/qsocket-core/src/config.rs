use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, Result, SocketError};

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_READ_BUFFER_SIZE: usize = 4096;
const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// 后端构造时注入的套接字级配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 各后端内部的固定超时（建连、发送）统一在此声明，构造后即不可变，
///   调用方不能逐次传入取消令牌或超时；
/// - 逐块 IO 日志由显式字段 `log_io` 控制，随配置进入每个后端，
///   不存在隐藏的全局可变状态。
///
/// ## 契约（What）
/// - `connect_timeout`：建连（含解析后的每个地址尝试）的总时限；
/// - `send_timeout`：单次 `send` 的时限，超时按已写字节数区分 `SendTimeout`/`SendIncomplete`；
/// - `read_buffer_size`：单次读取的最大字节数，即单个数据回调的上限；
/// - `nodelay`：是否设置 `TCP_NODELAY`；
/// - `log_io`：是否为每个数据块输出 `trace` 级事件。
///
/// ## 注意事项（Trade-offs）
/// - 文本配置中时长以毫秒整数表示，便于在 TOML 中书写；
/// - 所有取值在 [`validate`](Self::validate) 中检查，非法值统一报告为
///   [`ErrorCode::InvalidConfiguration`]。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    connect_timeout_ms: u64,
    send_timeout_ms: u64,
    read_buffer_size: usize,
    nodelay: bool,
    log_io: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketConfig {
    pub const fn new() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            nodelay: true,
            log_io: false,
        }
    }

    /// 从 TOML 文本解析并校验配置。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SocketConfig = toml::from_str(text).map_err(|err| {
            SocketError::new(ErrorCode::InvalidConfiguration)
                .with_message("socket configuration is not valid TOML")
                .with_underlying(err)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_to_millis(timeout);
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout_ms = duration_to_millis(timeout);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_log_io(mut self, log_io: bool) -> Self {
        self.log_io = log_io;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn log_io(&self) -> bool {
        self.log_io
    }

    /// 检查取值范围。
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(invalid("connect_timeout_ms must be greater than zero"));
        }
        if self.send_timeout_ms == 0 {
            return Err(invalid("send_timeout_ms must be greater than zero"));
        }
        if !(1..=MAX_READ_BUFFER_SIZE).contains(&self.read_buffer_size) {
            return Err(invalid("read_buffer_size must be within 1..=1048576")
                .with_extra("read_buffer_size", self.read_buffer_size));
        }
        Ok(())
    }
}

fn invalid(message: &'static str) -> SocketError {
    SocketError::new(ErrorCode::InvalidConfiguration).with_message(message)
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
