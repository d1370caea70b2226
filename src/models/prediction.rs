//! # 性质预测结果数据模型
//!
//! 不同预测模型的返回形态各异（标量、数组、谱线）。这里统一为带标签的
//! [`PropertyValue`]，写表时再渲染为单元格文本。
//!
//! ## 依赖关系
//! - 被 `batch/worker.rs` 使用
//! - 使用 `serde_json` 表示模型原始输出

use serde_json::Value;

/// 单个模型预测失败时的哨兵值
pub const PREDICTION_ERROR: &str = "error";

/// 结构本身无法读取时的哨兵值
pub const PARSE_ERROR: &str = "parse_error";

/// 单列预测结果
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// 标量结果
    Scalar(f64),
    /// 谱线类结果，已写入旁路 JSON 文件，表中只记录文件名
    Series { side_file: String },
    /// 该模型预测失败
    Error,
    /// 结构解析失败，整行都是哨兵
    ParseError,
}

impl PropertyValue {
    /// 将模型原始输出强制转换为标量
    ///
    /// 数组类输出取第一个元素；无法转换时记为 `Error`。
    pub fn coerce_scalar(raw: &Value) -> Self {
        match scalar_of(raw) {
            Some(v) => PropertyValue::Scalar(v),
            None => PropertyValue::Error,
        }
    }

    /// 渲染为 CSV 单元格
    pub fn to_cell(&self) -> String {
        match self {
            PropertyValue::Scalar(v) => v.to_string(),
            PropertyValue::Series { side_file } => side_file.clone(),
            PropertyValue::Error => PREDICTION_ERROR.to_string(),
            PropertyValue::ParseError => PARSE_ERROR.to_string(),
        }
    }
}

fn scalar_of(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::Array(items) => items.first().and_then(scalar_of),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 分块结果表中的一行
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRow {
    /// 结构文件名（不含扩展名）
    pub file: String,
    /// 经验化学式，解析失败时为 `parse_error`
    pub formula: String,
    /// 与配置的模型列一一对应
    pub values: Vec<PropertyValue>,
}

impl ChunkRow {
    /// 解析失败行：所有列都填 `parse_error`
    pub fn parse_error(file: impl Into<String>, columns: usize) -> Self {
        ChunkRow {
            file: file.into(),
            formula: PARSE_ERROR.to_string(),
            values: vec![PropertyValue::ParseError; columns],
        }
    }

    pub fn to_record(&self) -> Vec<String> {
        let mut record = Vec::with_capacity(self.values.len() + 2);
        record.push(self.file.clone());
        record.push(self.formula.clone());
        record.extend(self.values.iter().map(PropertyValue::to_cell));
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_scalar_shapes() {
        assert_eq!(
            PropertyValue::coerce_scalar(&json!(-1.25)),
            PropertyValue::Scalar(-1.25)
        );
        assert_eq!(
            PropertyValue::coerce_scalar(&json!([0.5, 0.7])),
            PropertyValue::Scalar(0.5)
        );
        assert_eq!(
            PropertyValue::coerce_scalar(&json!([[2.0]])),
            PropertyValue::Scalar(2.0)
        );
        assert_eq!(PropertyValue::coerce_scalar(&json!([])), PropertyValue::Error);
        assert_eq!(
            PropertyValue::coerce_scalar(&json!({"a": 1})),
            PropertyValue::Error
        );
    }

    #[test]
    fn test_parse_error_row() {
        let row = ChunkRow::parse_error("bad_relax", 2);
        assert_eq!(
            row.to_record(),
            vec!["bad_relax", "parse_error", "parse_error", "parse_error"]
        );
    }

    #[test]
    fn test_cells() {
        let row = ChunkRow {
            file: "a1_relax".to_string(),
            formula: "LiO".to_string(),
            values: vec![
                PropertyValue::Scalar(0.5),
                PropertyValue::Error,
                PropertyValue::Series {
                    side_file: "pdos_a1_relax.json".to_string(),
                },
            ],
        };
        assert_eq!(
            row.to_record(),
            vec!["a1_relax", "LiO", "0.5", "error", "pdos_a1_relax.json"]
        );
    }
}
