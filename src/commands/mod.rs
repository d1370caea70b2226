//! # 命令执行模块
//!
//! 实现各子命令的业务逻辑：读取配置、应用命令行覆盖、分派到子命令。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `cli/`, `config.rs`, `generation/`, `relax/`, `batch/`, `utils/`
//! - 子模块: generate, relax, predict, worker, run

pub mod generate;
pub mod predict;
pub mod relax;
pub mod run;
pub mod worker;

use crate::cli::{Cli, Commands};
use crate::config::PipelineConfig;
use crate::error::Result;

use std::ffi::OsString;

/// 执行命令
pub fn run(cli: Cli) -> Result<()> {
    let config = configure(&cli)?;
    tracing::debug!(?config, "configuration resolved");

    match &cli.command {
        Commands::Generate(args) => generate::execute(args, &config),
        Commands::Relax(args) => relax::execute(args, &config),
        Commands::Predict(args) => predict::execute(args, &config, forwarded_args(&cli)),
        Commands::Worker(args) => worker::execute(args, &config),
        Commands::Run(args) => run::execute(args, &config, forwarded_args(&cli)),
    }
}

/// 读取配置文件并应用命令行覆盖
pub fn configure(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(cli.config.as_deref())?;

    if let Some(device) = cli.device {
        config.device = device;
    }

    match &cli.command {
        Commands::Generate(args) => {
            if let Some(settings) = &args.settings {
                config.generator.settings_file = settings.clone();
            }
            if let Some(dir) = &args.results_dir {
                config.results_dir = dir.clone();
            }
        }
        Commands::Relax(args) => {
            if let Some(dir) = &args.results_dir {
                config.results_dir = dir.clone();
            }
            if let Some(steps) = args.max_steps {
                config.relax.max_steps = steps;
            }
            if let Some(fmax) = args.fmax {
                config.relax.fmax = fmax;
            }
        }
        Commands::Predict(args) => {
            if let Some(size) = args.chunk_size {
                config.prediction.chunk_size = size;
            }
            if let Some(parallel) = args.parallel {
                config.prediction.parallel = parallel;
            }
        }
        Commands::Worker(_) => {}
        Commands::Run(args) => {
            if let Some(settings) = &args.settings {
                config.generator.settings_file = settings.clone();
            }
            if let Some(dir) = &args.results_dir {
                config.results_dir = dir.clone();
            }
            if let Some(size) = args.chunk_size {
                config.prediction.chunk_size = size;
            }
            if let Some(parallel) = args.parallel {
                config.prediction.parallel = parallel;
            }
        }
    }

    config.validate()?;
    Ok(config)
}

/// 转发给 worker 进程的全局参数
pub fn forwarded_args(cli: &Cli) -> Vec<OsString> {
    let mut args = Vec::new();
    if let Some(config) = &cli.config {
        args.push(OsString::from("--config"));
        args.push(config.clone().into_os_string());
    }
    if let Some(device) = cli.device {
        args.push(OsString::from("--device"));
        args.push(OsString::from(device.to_string()));
    }
    for _ in 0..cli.verbose {
        args.push(OsString::from("-v"));
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Device;
    use clap::Parser;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_overrides_applied() {
        let cli = Cli::parse_from([
            "matterflow",
            "relax",
            "--results-dir",
            "out",
            "--max-steps",
            "200",
            "--fmax",
            "0.05",
            "--device",
            "cpu",
        ]);
        let config = configure(&cli).unwrap();
        assert_eq!(config.results_dir, std::path::PathBuf::from("out"));
        assert_eq!(config.relax.max_steps, 200);
        assert_eq!(config.relax.fmax, 0.05);
        assert_eq!(config.device, Device::Cpu);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let cli = Cli::parse_from(["matterflow", "predict", "--chunk-size", "0"]);
        assert!(configure(&cli).is_err());
    }

    #[test]
    fn test_config_file_then_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("matterflow.toml");
        fs::write(&path, "device = \"cuda\"\n[prediction]\nchunk_size = 25\n").unwrap();

        let cli = Cli::parse_from([
            "matterflow",
            "--config",
            path.to_str().unwrap(),
            "predict",
            "-j",
            "3",
        ]);
        let config = configure(&cli).unwrap();
        assert_eq!(config.device, Device::Cuda);
        assert_eq!(config.prediction.chunk_size, 25);
        assert_eq!(config.prediction.parallel, 3);
    }

    #[test]
    fn test_forwarded_args() {
        let cli = Cli::parse_from([
            "matterflow",
            "predict",
            "--config",
            "pipe.toml",
            "--device",
            "cuda",
            "-vv",
        ]);
        let args = forwarded_args(&cli);
        let expected: Vec<OsString> = ["--config", "pipe.toml", "--device", "cuda", "-v", "-v"]
            .iter()
            .map(OsString::from)
            .collect();
        assert_eq!(args, expected);
    }
}
