//! # matterflow - 材料发现批处理流水线
//!
//! 把"生成候选结构 → 势函数弛豫 → 性质预测"三个阶段统一成单一可执行文件。
//!
//! ## 子命令
//! - `generate` - 按设置表调用扩散模型生成候选结构
//! - `relax`    - 用机器学习势批量弛豫结构，支持断点续算
//! - `predict`  - 分块并行预测性质，合并为一张结果表
//! - `run`      - 依次执行以上阶段
//!
//! ## 依赖关系
//! ```text
//! main.rs
//!   ├── cli/         (命令行参数定义)
//!   ├── commands/    (命令执行逻辑)
//!   │     ├── generation/  (设置表解析与生成器调用)
//!   │     ├── relax/       (优化器、断点账本、汇总表)
//!   │     ├── batch/       (文件收集、分块调度、worker)
//!   │     ├── calculators/ (外部模型服务)
//!   │     ├── parsers/     (CIF / POSCAR)
//!   │     └── models/      (数据模型)
//!   ├── config.rs    (配置)
//!   ├── utils/       (输出、进度条、日志)
//!   └── error.rs     (错误处理)
//! ```

mod batch;
mod calculators;
mod cli;
mod commands;
mod config;
mod error;
mod generation;
mod models;
mod parsers;
mod relax;
mod utils;

use clap::Parser;
use cli::Cli;

fn main() {
    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();
    utils::logging::setup_logging(cli.verbose);

    if let Err(e) = commands::run(cli) {
        utils::output::print_error(&format!("{}", e));
        std::process::exit(1);
    }
}
