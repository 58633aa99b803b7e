use serde::{Deserialize, Serialize};

use qsocket_core::{ErrorCode, Result, SocketConfig, SocketError, SocketType};

/// 日志安装参数。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` 指令；设置了 `RUST_LOG` 时以环境变量为准。
    pub filter: String,
    /// 是否在每行输出中包含事件的 target。
    pub with_target: bool,
    /// 是否输出线程名，便于区分调用方线程与各后端的 IO 线程。
    pub with_thread_names: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            with_target: true,
            with_thread_names: true,
        }
    }
}

/// 门面的整体配置，可整体从一份 TOML 文件加载。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `socket_type`：后端选择器，小写名称（`raw` / `evented` / `stream`），缺省为 `stream`；
/// - `[socket]`：透传给后端的 [`SocketConfig`]；
/// - `[log]`：[`crate::logging::install`] 使用的 [`LogConfig`]；
/// - 任一字段缺省时取默认值；解析或校验失败统一报告为 `InvalidConfiguration`。
///
/// ```toml
/// socket_type = "evented"
///
/// [socket]
/// connect_timeout_ms = 3000
/// nodelay = false
///
/// [log]
/// filter = "qsocket=debug"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QsSocketConfig {
    pub socket_type: SocketType,
    pub socket: SocketConfig,
    pub log: LogConfig,
}

impl QsSocketConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: QsSocketConfig = toml::from_str(text).map_err(|err| {
            SocketError::new(ErrorCode::InvalidConfiguration)
                .with_message("qsocket configuration is not valid TOML")
                .with_underlying(err)
        })?;
        config.socket.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_document_yields_defaults() {
        let config = QsSocketConfig::from_toml_str("").expect("empty");
        assert_eq!(config, QsSocketConfig::default());
        assert_eq!(config.socket_type, SocketType::Stream);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn nested_tables_are_applied() {
        let config = QsSocketConfig::from_toml_str(
            r#"
            socket_type = "evented"

            [socket]
            connect_timeout_ms = 3000
            nodelay = false

            [log]
            filter = "qsocket=debug"
            with_target = false
            "#,
        )
        .expect("parse");
        assert_eq!(config.socket_type, SocketType::Evented);
        assert_eq!(config.socket.connect_timeout(), Duration::from_secs(3));
        assert!(!config.socket.nodelay());
        assert_eq!(config.log.filter, "qsocket=debug");
        assert!(!config.log.with_target);
        assert!(config.log.with_thread_names);
    }

    #[test]
    fn unknown_selector_is_a_configuration_error() {
        let err = QsSocketConfig::from_toml_str(r#"socket_type = "quic""#).expect_err("unknown");
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
        assert!(err.is_config());
    }

    #[test]
    fn nested_socket_table_is_validated() {
        let err = QsSocketConfig::from_toml_str("[socket]\nread_buffer_size = 0")
            .expect_err("zero buffer");
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }
}
