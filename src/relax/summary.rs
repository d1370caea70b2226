//! # 弛豫汇总输出
//!
//! - 汇总表 CSV：`Filename, N atoms, E total eV, E per atom eV/atom`
//! - 能量账本 JSON：弛豫结构文件名 → 能量记录
//!
//! 汇总表被其他程序占用（写入权限被拒）时改写到带时间戳的备用文件。
//!
//! ## 依赖关系
//! - 被 `commands/relax.rs` 调用
//! - 使用 `csv`, `serde_json`, `chrono`

use crate::error::{PipelineError, Result};
use crate::models::{EnergyRecord, SummaryRow};

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const SUMMARY_HEADER: [&str; 4] = ["Filename", "N atoms", "E total eV", "E per atom eV/atom"];

/// 渲染汇总表
pub fn render_summary(rows: &[SummaryRow]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(SUMMARY_HEADER)?;
    for row in rows {
        writer.write_record([
            row.source_filename.clone(),
            row.atom_count.to_string(),
            row.total_energy.to_string(),
            row.energy_per_atom.to_string(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| PipelineError::Other(format!("Failed to flush summary table: {}", e)))
}

/// 写出汇总表，返回实际写入的路径
pub fn write_summary(path: &Path, rows: &[SummaryRow]) -> Result<PathBuf> {
    let bytes = render_summary(rows)?;
    write_with_fallback(path, |p| fs::write(p, &bytes))
}

/// 写入失败且原因是权限被拒时，改写到 `<stem>_YYYYmmdd_HHMMSS.<ext>`
pub fn write_with_fallback<F>(path: &Path, write: F) -> Result<PathBuf>
where
    F: Fn(&Path) -> io::Result<()>,
{
    match write(path) {
        Ok(()) => Ok(path.to_path_buf()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            let fallback = timestamped_path(path);
            tracing::warn!(
                locked = %path.display(),
                fallback = %fallback.display(),
                "summary file is locked, writing fallback"
            );
            write(&fallback).map_err(|e| PipelineError::FileWriteError {
                path: fallback.display().to_string(),
                source: e,
            })?;
            Ok(fallback)
        }
        Err(e) => Err(PipelineError::FileWriteError {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

fn timestamped_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    path.with_file_name(format!("{}_{}.{}", stem, stamp, ext))
}

/// 写出能量账本
pub fn write_energy_ledger(path: &Path, energies: &BTreeMap<String, EnergyRecord>) -> Result<()> {
    let text = serde_json::to_string_pretty(energies)?;
    fs::write(path, text).map_err(|e| PipelineError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}

/// 读取能量账本；文件不存在时返回空表
pub fn read_energy_ledger(path: &Path) -> Result<BTreeMap<String, EnergyRecord>> {
    if !path.is_file() {
        return Ok(BTreeMap::new());
    }
    let text = fs::read_to_string(path).map_err(|e| PipelineError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::tempdir;

    fn rows() -> Vec<SummaryRow> {
        let record = EnergyRecord::new(-10.0, 4).unwrap();
        vec![SummaryRow::from_record("gen_0.cif", &record)]
    }

    #[test]
    fn test_summary_layout() {
        let text = String::from_utf8(render_summary(&rows()).unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Filename,N atoms,E total eV,E per atom eV/atom"));
        assert_eq!(lines.next(), Some("gen_0.cif,4,-10,-2.5"));
    }

    #[test]
    fn test_locked_summary_falls_back_to_timestamp() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("relaxation_summary.csv");
        let attempts = Cell::new(0);

        let written = write_with_fallback(&target, |p| {
            attempts.set(attempts.get() + 1);
            if p == target {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
            } else {
                fs::write(p, "ok")
            }
        })
        .unwrap();

        assert_eq!(attempts.get(), 2);
        assert_ne!(written, target);
        let name = written.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("relaxation_summary_"));
        assert!(name.ends_with(".csv"));
        // relaxation_summary_YYYYmmdd_HHMMSS.csv
        assert_eq!(name.len(), "relaxation_summary_".len() + 15 + 4);
        assert!(written.is_file());
    }

    #[test]
    fn test_other_write_errors_propagate() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("missing").join("summary.csv");
        assert!(write_summary(&target, &rows()).is_err());
    }

    #[test]
    fn test_energy_ledger_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("energy_ledger.json");
        assert!(read_energy_ledger(&path).unwrap().is_empty());

        let mut energies = BTreeMap::new();
        energies.insert("gen_0_relax.cif".to_string(), EnergyRecord::new(-6.0, 3).unwrap());
        write_energy_ledger(&path, &energies).unwrap();
        assert_eq!(read_energy_ledger(&path).unwrap(), energies);
    }
}
