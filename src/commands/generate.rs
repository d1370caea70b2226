//! # generate 子命令实现
//!
//! 读取设置表，解析生成模型与条件性质，调用外部扩散生成器。
//!
//! ## 依赖关系
//! - 使用 `cli/generate.rs` 定义的参数
//! - 使用 `generation/`
//! - 使用 `utils/output.rs`

use crate::cli::generate::GenerateArgs;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::generation::{invoker, resolve, SettingsTable};
use crate::utils::output;

/// 执行结构生成
pub fn execute(args: &GenerateArgs, config: &PipelineConfig) -> Result<()> {
    output::print_header("Structure Generation");

    let settings = &config.generator.settings_file;
    let table = SettingsTable::read(settings)?;
    let request = resolve(&table, &config.generator, &config.results_dir)?;

    output::print_success(&format!("Settings loaded from '{}'", settings.display()));
    output::print_field(
        "Model",
        &format!("({}) {}", table.row.model_index, request.model_name),
    );
    for (i, input) in table.row.inputs.iter().enumerate() {
        output::print_field(&format!("Input {}", i + 1), input);
    }
    output::print_field("Conditions", &invoker::properties_text(&request));

    invoker::prepare_output_dir(&request)?;

    let command = invoker::command_line(&request, &config.generator.program);
    output::print_command(&command);

    if args.dry_run {
        output::print_skip("Dry run, generator not started");
        return Ok(());
    }

    output::print_info("Starting generator, progress is shown below");
    let status = invoker::invoke(&command)?;
    if status.success() {
        output::print_done(&format!(
            "Generation finished, output in '{}'",
            request.output_dir.display()
        ));
    } else {
        output::print_warning(&format!("Generator exited with {}", status));
    }

    Ok(())
}
