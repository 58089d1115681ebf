//! 分发服务错误类型

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("规则文件读取失败: {path}: {source}")]
    RulesFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("规则文件解析失败: {0}")]
    RulesParse(#[source] serde_json::Error),

    #[error("事件解析失败: {0}")]
    InvalidEvent(#[source] serde_json::Error),

    #[error("事件分发超时: 信号={signal}, 超时={timeout_ms}ms")]
    Timeout { signal: String, timeout_ms: u128 },

    #[error("分发任务异常退出: {0}")]
    TaskFailed(String),
}

impl DispatcherError {
    /// 指标标签
    pub fn status(&self) -> &'static str {
        match self {
            Self::RulesFile { .. } | Self::RulesParse(_) => "rules_error",
            Self::InvalidEvent(_) => "invalid_event",
            Self::Timeout { .. } => "timeout",
            Self::TaskFailed(_) => "task_failed",
        }
    }
}
