//! # 统一错误处理模块
//!
//! 定义 matterflow 的所有错误类型，使用 `thiserror` 派生。
//!
//! 单个候选结构 / 单个预测条目的失败不会以错误形式向上传播，
//! 而是在组件边界处转换为结果枚举或哨兵值；只有配置错误和
//! 不可恢复的 I/O 错误会终止进程。
//!
//! ## 依赖关系
//! - 被所有其他模块使用
//! - 无外部模块依赖

use thiserror::Error;

/// matterflow 统一错误类型
#[derive(Error, Debug)]
pub enum PipelineError {
    // ─────────────────────────────────────────────────────────────
    // I/O 错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ─────────────────────────────────────────────────────────────
    // 解析错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to parse {format} file: {path}\nReason: {reason}")]
    ParseError {
        format: String,
        path: String,
        reason: String,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    // ─────────────────────────────────────────────────────────────
    // 设置 / 配置错误
    // ─────────────────────────────────────────────────────────────
    #[error("Model index {index} does not resolve to a model name in column G of the settings file")]
    ModelNotFound { index: usize },

    #[error("Model name at index {index} is not a string. Please check column G.")]
    ModelNameNotString { index: usize },

    #[error("Invalid setting {field}: '{value}'")]
    InvalidSetting { field: String, value: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    // ─────────────────────────────────────────────────────────────
    // 外部模型错误
    // ─────────────────────────────────────────────────────────────
    #[error("Device placement mismatch in {model}: {reason}")]
    DeviceMismatch { model: String, reason: String },

    #[error("Calculator '{model}' failed: {reason}")]
    CalculatorError { model: String, reason: String },

    /// 服务进程退出或通信中断，之后的请求都不可能成功
    #[error("Model server '{model}' is gone: {reason}")]
    ServerGone { model: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // 外部命令错误
    // ─────────────────────────────────────────────────────────────
    #[error("External command '{command}' not found in PATH")]
    CommandNotFound { command: String },

    #[error("External command failed: {command}\n{stderr}")]
    CommandFailed { command: String, stderr: String },

    // ─────────────────────────────────────────────────────────────
    // 参数错误
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ─────────────────────────────────────────────────────────────
    // 序列化错误
    // ─────────────────────────────────────────────────────────────
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // 其他
    // ─────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// 是否为计算设备放置不一致（可重新挂载计算器后重试一次）
    pub fn is_device_mismatch(&self) -> bool {
        matches!(self, PipelineError::DeviceMismatch { .. })
    }

    /// 是否为服务进程失联（需要中止当前批次）
    pub fn is_server_gone(&self) -> bool {
        matches!(self, PipelineError::ServerGone { .. })
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, PipelineError>;
