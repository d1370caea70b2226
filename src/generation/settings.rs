//! # 生成设置解析
//!
//! 设置表是一个无表头的 CSV：
//!
//! - 第 2 行（0 基索引 1）的 0–4 列：模型序号、输入 1、输入 2、batch size、batch 数
//! - 第 7 列（G 列）：模型名称，按模型序号（1 基）选取所在行
//!
//! 模型名称中出现的条件性质关键字按注册表顺序匹配，输入从左到右依次消费；
//! 缺失或 NA 的输入被跳过但仍占用一个位置。
//!
//! ## 依赖关系
//! - 被 `commands/generate.rs` 调用
//! - 使用 `config.rs` 中的 `GeneratorConfig`
//! - 使用 `csv` 读取设置表

use crate::config::GeneratorConfig;
use crate::error::{PipelineError, Result};

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// 模型名称所在列（G 列）
const MODEL_NAME_COLUMN: usize = 6;

/// 参数所在行
const PARAMETER_ROW: usize = 1;

/// 视为缺失的单元格文本（小写比较）
const NA_MARKERS: &[&str] = &["", "na", "n/a", "nan", "null", "none", "#n/a"];

/// 设置表中的参数行
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsRow {
    /// 模型序号（1 基）
    pub model_index: usize,
    /// 原始条件输入（未经转换）
    pub inputs: Vec<String>,
    pub batch_size: usize,
    pub num_batches: usize,
}

/// 设置表：参数行 + G 列的模型注册表
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsTable {
    pub row: SettingsRow,
    /// 每行 G 列的原始文本
    pub model_names: Vec<String>,
}

/// 条件性质取值
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    Text(String),
    Number(f64),
}

impl fmt::Display for ConditionValue {
    /// 生成器接受的字面量形式：字符串加单引号，整数值浮点保留 `.0`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionValue::Text(s) => write!(f, "'{}'", s),
            ConditionValue::Number(v) if v.fract() == 0.0 && v.abs() < 1e16 => {
                write!(f, "{:.1}", v)
            }
            ConditionValue::Number(v) => write!(f, "{}", v),
        }
    }
}

/// 一次生成调用的完整参数
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model_name: String,
    /// 规范性质名 -> 值，按注册表顺序
    pub conditions: Vec<(String, ConditionValue)>,
    pub batch_size: usize,
    pub num_batches: usize,
    pub guidance_factor: f64,
    /// `<results>/<model_name>/`
    pub output_dir: PathBuf,
}

impl SettingsTable {
    /// 读取设置表文件
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                PipelineError::FileReadError {
                    path: path.display().to_string(),
                    source: e,
                }
            }
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows: Vec<Vec<String>> = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            rows.push(record.iter().map(|c| c.trim().to_string()).collect());
        }

        let params = rows.get(PARAMETER_ROW).ok_or_else(|| PipelineError::InvalidSetting {
            field: "parameter row".to_string(),
            value: format!("{} rows", rows.len()),
        })?;
        let cell = |c: usize| params.get(c).map(String::as_str).unwrap_or("");

        let row = SettingsRow {
            model_index: parse_count("model_index", cell(0))?,
            inputs: vec![cell(1).to_string(), cell(2).to_string()],
            batch_size: parse_count("batch_size", cell(3))?,
            num_batches: parse_count("num_batches", cell(4))?,
        };

        let model_names = rows
            .iter()
            .map(|r| r.get(MODEL_NAME_COLUMN).cloned().unwrap_or_default())
            .collect();

        Ok(SettingsTable { row, model_names })
    }

    /// 按模型序号取模型名称
    pub fn model_name(&self) -> Result<&str> {
        let index = self.row.model_index;
        let name = index
            .checked_sub(1)
            .and_then(|i| self.model_names.get(i))
            .ok_or(PipelineError::ModelNotFound { index })?;
        if is_na(name) || name.parse::<f64>().is_ok() {
            return Err(PipelineError::ModelNameNotString { index });
        }
        Ok(name)
    }
}

/// 把设置表解析为生成请求
pub fn resolve(
    table: &SettingsTable,
    config: &GeneratorConfig,
    results_dir: &Path,
) -> Result<GenerationRequest> {
    let model_name = table.model_name()?.to_string();
    let inputs = &table.row.inputs;

    let mut conditions = Vec::new();
    let mut next_input = 0;
    for entry in config
        .properties
        .iter()
        .filter(|p| model_name.contains(p.keyword.as_str()))
    {
        let Some(raw) = inputs.get(next_input) else {
            break;
        };
        next_input += 1;
        if is_na(raw) {
            continue;
        }

        let value = if entry.property == config.string_property {
            ConditionValue::Text(raw.clone())
        } else {
            raw.parse::<f64>()
                .map(ConditionValue::Number)
                .map_err(|_| PipelineError::InvalidSetting {
                    field: entry.property.clone(),
                    value: raw.clone(),
                })?
        };
        conditions.push((entry.property.clone(), value));
    }

    Ok(GenerationRequest {
        output_dir: results_dir.join(&model_name),
        model_name,
        conditions,
        batch_size: table.row.batch_size,
        num_batches: table.row.num_batches,
        guidance_factor: config.guidance_factor,
    })
}

fn is_na(cell: &str) -> bool {
    let lower = cell.trim().to_lowercase();
    NA_MARKERS.contains(&lower.as_str())
}

/// 解析正整数；表格软件常把整数存为 `16.0`
fn parse_count(field: &str, cell: &str) -> Result<usize> {
    let invalid = || PipelineError::InvalidSetting {
        field: field.to_string(),
        value: cell.to_string(),
    };
    if let Ok(n) = cell.parse::<usize>() {
        return Ok(n);
    }
    let v: f64 = cell.parse().map_err(|_| invalid())?;
    if v.fract() != 0.0 || v < 0.0 {
        return Err(invalid());
    }
    Ok(v as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SETTINGS: &str = "\
model,input1,input2,batch,batches,,mattergen_base
2,3.0,NA,16,4,,dft_band_gap
,,,,,,chemical_system_energy_above_hull
,,,,,,
";

    fn table(text: &str) -> SettingsTable {
        SettingsTable::from_reader(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_band_gap_example() {
        let request = resolve(
            &table(SETTINGS),
            &GeneratorConfig::default(),
            Path::new("results"),
        )
        .unwrap();

        assert_eq!(request.model_name, "dft_band_gap");
        assert_eq!(
            request.conditions,
            vec![("dft_band_gap".to_string(), ConditionValue::Number(3.0))]
        );
        assert_eq!(request.batch_size, 16);
        assert_eq!(request.num_batches, 4);
        assert_eq!(request.guidance_factor, 2.0);
        assert_eq!(request.output_dir, PathBuf::from("results/dft_band_gap"));
    }

    #[test]
    fn test_chemical_system_stays_text() {
        let text = SETTINGS.replacen("2,3.0,NA", "3,Li-O,0.1", 1);
        let request =
            resolve(&table(&text), &GeneratorConfig::default(), Path::new("r")).unwrap();
        assert_eq!(
            request.conditions,
            vec![
                (
                    "chemical_system".to_string(),
                    ConditionValue::Text("Li-O".to_string())
                ),
                ("energy_above_hull".to_string(), ConditionValue::Number(0.1)),
            ]
        );
    }

    #[test]
    fn test_skipped_input_still_consumes_slot() {
        let text = SETTINGS.replacen("2,3.0,NA", "3,,0.1", 1);
        let request =
            resolve(&table(&text), &GeneratorConfig::default(), Path::new("r")).unwrap();
        assert_eq!(
            request.conditions,
            vec![("energy_above_hull".to_string(), ConditionValue::Number(0.1))]
        );
    }

    #[test]
    fn test_unconditioned_model() {
        let text = SETTINGS.replacen("2,3.0,NA", "1,3.0,4.0", 1);
        let request =
            resolve(&table(&text), &GeneratorConfig::default(), Path::new("r")).unwrap();
        assert_eq!(request.model_name, "mattergen_base");
        assert!(request.conditions.is_empty());
    }

    #[test]
    fn test_model_lookup_errors() {
        let text = SETTINGS.replacen("2,3.0,NA", "9,3.0,NA", 1);
        assert!(matches!(
            table(&text).model_name(),
            Err(PipelineError::ModelNotFound { index: 9 })
        ));

        let text = SETTINGS.replacen("2,3.0,NA", "4,3.0,NA", 1);
        assert!(matches!(
            table(&text).model_name(),
            Err(PipelineError::ModelNameNotString { index: 4 })
        ));

        let text = SETTINGS.replacen("2,3.0,NA", "0,3.0,NA", 1);
        assert!(matches!(
            table(&text).model_name(),
            Err(PipelineError::ModelNotFound { index: 0 })
        ));
    }

    #[test]
    fn test_non_numeric_condition_rejected() {
        let text = SETTINGS.replacen("2,3.0,NA", "2,wide,NA", 1);
        let err = resolve(&table(&text), &GeneratorConfig::default(), Path::new("r")).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSetting { .. }));
    }

    #[test]
    fn test_missing_settings_file() {
        let dir = tempdir().unwrap();
        let err = SettingsTable::read(&dir.path().join("setting.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }

    #[test]
    fn test_float_counts_accepted() {
        assert_eq!(parse_count("batch_size", "16.0").unwrap(), 16);
        assert!(parse_count("batch_size", "1.5").is_err());
    }

    #[test]
    fn test_condition_literals() {
        assert_eq!(ConditionValue::Number(3.0).to_string(), "3.0");
        assert_eq!(ConditionValue::Number(0.25).to_string(), "0.25");
        assert_eq!(ConditionValue::Text("Li-O".into()).to_string(), "'Li-O'");
    }
}
