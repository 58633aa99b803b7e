//! 进程级日志安装入口。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher::{self, SetGlobalDefaultError};
use tracing_subscriber::{EnvFilter, filter::ParseError, fmt, layer::SubscriberExt};

use crate::config::LogConfig;

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 日志安装可能出现的错误。
#[derive(Debug, Error)]
pub enum LogInstallError {
    /// `install` 已成功执行过。
    #[error("qsocket logging is already installed")]
    AlreadyInstalled,
    /// 外部已经设置了全局 `tracing` Subscriber。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    /// 配置中的过滤指令无法解析。
    #[error("invalid log filter `{directive}`")]
    InvalidFilter {
        directive: String,
        #[source]
        source: ParseError,
    },
    #[error("failed to set the global tracing subscriber")]
    SetGlobalSubscriber(#[from] SetGlobalDefaultError),
}

/// 安装全局 `tracing` Subscriber：`EnvFilter` + `fmt` 层。
///
/// # 教案式说明
/// - **意图（Why）**：库本身只通过 `tracing` 宏产生事件，是否输出、输出到哪里由宿主决定；
///   本函数为不想自行拼装 Subscriber 的宿主提供一键入口。
/// - **逻辑（How）**：
///   1. 检查是否重复安装或外部已设置 Subscriber；
///   2. 过滤器优先取 `RUST_LOG`，否则使用 [`LogConfig::filter`]；
///   3. 以 `registry + EnvFilter + fmt` 组装并设置为全局默认。
/// - **契约（What）**：重复调用返回 [`LogInstallError::AlreadyInstalled`]；外部已设置 Subscriber 时返回
///   [`LogInstallError::SubscriberAlreadySet`]；过滤指令非法时返回 [`LogInstallError::InvalidFilter`]。
pub fn install(config: &LogConfig) -> Result<(), LogInstallError> {
    if INSTALLED.get().is_some() {
        return Err(LogInstallError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(LogInstallError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter(&config.filter)?)
        .with(
            fmt::layer()
                .with_target(config.with_target)
                .with_thread_names(config.with_thread_names),
        );
    tracing::subscriber::set_global_default(subscriber)?;

    INSTALLED
        .set(())
        .map_err(|_| LogInstallError::AlreadyInstalled)
}

fn build_env_filter(directive: &str) -> Result<EnvFilter, LogInstallError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(directive).map_err(|source| LogInstallError::InvalidFilter {
        directive: directive.to_owned(),
        source,
    })
}
