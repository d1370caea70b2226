//! # relax 子命令实现
//!
//! 批量弛豫候选结构，写出汇总表与能量账本，并显示最低能量结构排名。
//!
//! ## 功能
//! - 在结果目录中查找生成结构目录
//! - 已弛豫的结构只重新计算能量
//! - 汇总表被占用时改写到带时间戳的文件
//!
//! ## 依赖关系
//! - 使用 `cli/relax.rs` 定义的参数
//! - 使用 `relax/`, `calculators/`, `batch/collector.rs`
//! - 使用 `utils/output.rs`, `utils/progress.rs`

use crate::batch::{find_dir_named, FileCollector};
use crate::calculators::ServerPotential;
use crate::cli::relax::RelaxArgs;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::{RelaxOutcome, SummaryRow};
use crate::relax::{summary, CheckpointLedger, RelaxPolicy, RelaxReport, RelaxationEngine};
use crate::utils::{output, progress};

use std::fs;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};

/// 排名表行
#[derive(Debug, Clone, Tabled)]
struct RankRow {
    #[tabled(rename = "Rank")]
    rank: usize,
    #[tabled(rename = "Structure")]
    structure: String,
    #[tabled(rename = "N atoms")]
    atoms: usize,
    #[tabled(rename = "E total (eV)")]
    total: String,
    #[tabled(rename = "E/atom (eV)")]
    per_atom: String,
}

/// 执行批量弛豫
pub fn execute(args: &RelaxArgs, config: &PipelineConfig) -> Result<()> {
    relax_stage(config, args.input.as_deref(), args.output.as_deref(), args.top_n).map(|_| ())
}

/// 弛豫阶段；没有候选结构时返回 `Ok(None)`
pub fn relax_stage(
    config: &PipelineConfig,
    input: Option<&Path>,
    output_dir: Option<&Path>,
    top_n: usize,
) -> Result<Option<RelaxReport>> {
    output::print_header("Structure Relaxation");

    let input_dir = match input {
        Some(dir) => Some(dir.to_path_buf()),
        None => find_dir_named(&config.results_dir, &config.relax.input_dir_name),
    };
    let Some(input_dir) = input_dir else {
        output::print_warning(&format!(
            "No '{}' folder found under '{}'. Skipping relaxation.",
            config.relax.input_dir_name,
            config.results_dir.display()
        ));
        return Ok(None);
    };
    let output_dir: PathBuf = output_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.relax_dir());

    output::print_field("Input folder", &input_dir.display().to_string());
    output::print_field("Output folder", &output_dir.display().to_string());

    let candidates = if input_dir.is_dir() {
        FileCollector::new(&input_dir)
            .with_pattern("*.cif")
            .skip_relaxed(true)
            .collect()?
    } else {
        Vec::new()
    };
    if candidates.is_empty() {
        output::print_warning(&format!(
            "No CIF files found in '{}'. Skipping relaxation.",
            input_dir.display()
        ));
        return Ok(None);
    }

    fs::create_dir_all(&output_dir).map_err(|e| PipelineError::FileWriteError {
        path: output_dir.display().to_string(),
        source: e,
    })?;

    let spinner = progress::create_spinner(&format!("Loading {}", config.potential.model));
    let quiet = !tracing::enabled!(tracing::Level::DEBUG);
    let started = ServerPotential::start(config, quiet);
    spinner.finish_and_clear();
    let mut potential = started?;
    output::print_success(&format!("Potential '{}' loaded", config.potential.model));

    let pb = progress::create_progress_bar(candidates.len() as u64, "Relaxing Structures");
    let report = {
        let mut engine = RelaxationEngine::new(
            &mut potential,
            CheckpointLedger::new(&output_dir),
            RelaxPolicy::from(&config.relax),
        );
        engine.relax_all(&candidates, |path, outcome| {
            if let RelaxOutcome::Failed { reason } = outcome {
                let name = path.file_name().unwrap_or_default().to_string_lossy();
                pb.suspend(|| output::print_error(&format!("Error relaxing {}: {}", name, reason)));
            }
            pb.inc(1);
        })
    };
    pb.finish_and_clear();

    output::print_info(&format!(
        "Relaxed {}, resumed {}, not converged {}, crashed {}",
        report.relaxed, report.resumed, report.not_converged, report.crashed
    ));
    if report.failure_count() > 0 {
        output::print_warning(&format!(
            "Number of failed relaxations: {}",
            report.failure_count()
        ));
    }

    let summary_path = output_dir.join(&config.relax.summary_file);
    let written = summary::write_summary(&summary_path, &report.rows)?;
    if written == summary_path {
        output::print_success(&format!("CSV saved successfully: {}", written.display()));
    } else {
        output::print_warning(&format!("File is open, saved as: {}", written.display()));
    }

    // 本轮未出现的旧条目保留在账本中
    let ledger_path = output_dir.join(&config.relax.ledger_file);
    let mut energies = summary::read_energy_ledger(&ledger_path)?;
    let previous = energies.len();
    energies.extend(report.energies.iter().map(|(k, v)| (k.clone(), *v)));
    tracing::debug!(previous, current = energies.len(), "energy ledger merged");
    summary::write_energy_ledger(&ledger_path, &energies)?;

    print_ranking(&report.rows, top_n);

    output::print_done(&format!(
        "{} of {} structures have energies",
        report.rows.len(),
        report.total()
    ));
    Ok(Some(report))
}

/// 按每原子能量升序排列前 `top_n` 个
fn ranking(rows: &[SummaryRow], top_n: usize) -> Vec<RankRow> {
    let mut sorted: Vec<&SummaryRow> = rows.iter().collect();
    sorted.sort_by(|a, b| a.energy_per_atom.total_cmp(&b.energy_per_atom));
    sorted
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(i, r)| RankRow {
            rank: i + 1,
            structure: r.source_filename.clone(),
            atoms: r.atom_count,
            total: format!("{:.6}", r.total_energy),
            per_atom: format!("{:.6}", r.energy_per_atom),
        })
        .collect()
}

fn print_ranking(rows: &[SummaryRow], top_n: usize) {
    let table_rows = ranking(rows, top_n);
    if table_rows.is_empty() {
        return;
    }
    output::print_header(&format!(
        "Top {} Structures by Energy per Atom",
        table_rows.len()
    ));
    println!("{}", Table::new(&table_rows));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnergyRecord;

    #[test]
    fn test_ranking_orders_by_energy_per_atom() {
        let rows = vec![
            SummaryRow::from_record("a.cif", &EnergyRecord::new(-8.0, 4).unwrap()),
            SummaryRow::from_record("b.cif", &EnergyRecord::new(-9.0, 3).unwrap()),
            SummaryRow::from_record("c.cif", &EnergyRecord::new(-5.0, 5).unwrap()),
        ];
        let ranked = ranking(&rows, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].structure, "b.cif");
        assert_eq!(ranked[0].per_atom, "-3.000000");
        assert_eq!(ranked[1].structure, "a.cif");
        assert_eq!(ranked[1].rank, 2);
    }
}
