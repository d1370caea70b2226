//! # 诊断日志
//!
//! 基于 `tracing` 的诊断输出，写到 stderr。用户可见的状态行仍由
//! `utils/output.rs` 负责，这里只记录诊断细节。
//!
//! 级别由 `-v` 次数决定（0 = warn, 1 = info, 2 = debug, 3+ = trace），
//! 环境变量 `MATTERFLOW_LOG` 存在时按 EnvFilter 语法覆盖。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `tracing-subscriber`

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// 日志级别环境变量
pub const LOG_ENV: &str = "MATTERFLOW_LOG";

pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// 安装全局 subscriber；重复调用时保留第一次的设置
pub fn setup_logging(verbosity: u8) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level_for(verbosity).into()));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for(0), LevelFilter::WARN);
        assert_eq!(level_for(1), LevelFilter::INFO);
        assert_eq!(level_for(2), LevelFilter::DEBUG);
        assert_eq!(level_for(7), LevelFilter::TRACE);
    }

    #[test]
    fn test_setup_twice_does_not_panic() {
        setup_logging(0);
        setup_logging(3);
    }
}
