//! # CIF 格式解析器
//!
//! 读取生成模型输出的 CIF 文件，写出弛豫后的 P1 CIF 文件。
//!
//! ## 支持的内容
//! ```text
//! data_<name>
//! _cell_length_a / _b / _c
//! _cell_angle_alpha / _beta / _gamma
//! loop_
//!  _symmetry_equiv_pos_as_xyz   (或 _space_group_symop_operation_xyz)
//! loop_
//!  _atom_site_type_symbol / _atom_site_label
//!  _atom_site_fract_x / _y / _z
//! ```
//! 数值末尾的不确定度 `4.6(2)` 会被忽略。存在对称操作时展开到 P1 并去重。
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs` 使用
//! - 使用 `models/structure.rs`

use crate::error::{PipelineError, Result};
use crate::models::{Atom, Crystal, Lattice};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// 解析 CIF 文件
pub fn parse_cif_file(path: &Path) -> Result<Crystal> {
    let content = fs::read_to_string(path).map_err(|e| PipelineError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_cif_content(
        &content,
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown"),
    )
}

/// 从字符串内容解析 CIF 格式（只读取第一个数据块）
pub fn parse_cif_content(content: &str, default_name: &str) -> Result<Crystal> {
    let parse_err = |reason: String| PipelineError::ParseError {
        format: "cif".to_string(),
        path: default_name.to_string(),
        reason,
    };

    let block = read_block(content);

    let cell = |tag: &str| -> Result<f64> {
        block
            .items
            .get(tag)
            .and_then(|v| parse_number(v))
            .ok_or_else(|| parse_err(format!("Missing or invalid {}", tag)))
    };

    let lattice = Lattice::from_parameters(
        cell("_cell_length_a")?,
        cell("_cell_length_b")?,
        cell("_cell_length_c")?,
        cell("_cell_angle_alpha")?,
        cell("_cell_angle_beta")?,
        cell("_cell_angle_gamma")?,
    );

    let sites = block
        .loops
        .iter()
        .find(|l| l.column("_atom_site_fract_x").is_some())
        .ok_or_else(|| parse_err("Missing _atom_site_fract_x loop".to_string()))?;

    let col = |tag: &str| {
        sites
            .column(tag)
            .ok_or_else(|| parse_err(format!("Missing {} column", tag)))
    };
    let (cx, cy, cz) = (
        col("_atom_site_fract_x")?,
        col("_atom_site_fract_y")?,
        col("_atom_site_fract_z")?,
    );
    let c_symbol = sites.column("_atom_site_type_symbol");
    let c_label = sites.column("_atom_site_label");
    if c_symbol.is_none() && c_label.is_none() {
        return Err(parse_err(
            "Atom sites carry neither type symbol nor label".to_string(),
        ));
    }

    let mut asym = Vec::with_capacity(sites.rows.len());
    for (i, row) in sites.rows.iter().enumerate() {
        let coord = |c: usize| {
            parse_number(&row[c])
                .ok_or_else(|| parse_err(format!("Invalid coordinate in atom site {}", i + 1)))
        };
        let position = [coord(cx)?, coord(cy)?, coord(cz)?];

        let label = c_label.map(|c| row[c].clone());
        let element = match c_symbol {
            Some(c) => element_from_symbol(&row[c]),
            None => label.as_deref().map(element_from_symbol).unwrap_or_default(),
        };
        if element.is_empty() {
            return Err(parse_err(format!("Missing element in atom site {}", i + 1)));
        }

        let atom = Atom::new(element, position);
        asym.push(match label {
            Some(label) => atom.with_label(label),
            None => atom,
        });
    }

    if asym.is_empty() {
        return Err(parse_err("No atom sites".to_string()));
    }

    let symop_loop = block.loops.iter().find_map(|l| {
        l.column("_symmetry_equiv_pos_as_xyz")
            .or_else(|| l.column("_space_group_symop_operation_xyz"))
            .map(|c| (l, c))
    });

    let ops = match symop_loop {
        Some((l, c)) => l
            .rows
            .iter()
            .map(|row| SymOp::parse(&row[c]))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| parse_err("Invalid symmetry operation".to_string()))?,
        None => Vec::new(),
    };

    let atoms = if ops.len() > 1 {
        expand_symmetry(&asym, &ops)
    } else {
        asym
    };

    let name = block
        .name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| default_name.to_string());

    let mut crystal = Crystal::new(name, lattice, atoms);
    crystal.source_format = Some("cif".to_string());
    Ok(crystal)
}

/// 将 Crystal 转换为 P1 CIF 格式字符串
pub fn to_cif_string(crystal: &Crystal) -> String {
    let (a, b, c, alpha, beta, gamma) = crystal.lattice.parameters();

    let mut result = String::new();
    result.push_str(&format!("data_{}\n", crystal.name.replace(' ', "_")));
    result.push_str("_symmetry_space_group_name_H-M    'P 1'\n");
    result.push_str("_symmetry_Int_Tables_number       1\n");
    result.push_str(&format!("_chemical_formula_sum    '{}'\n\n", crystal.formula()));

    result.push_str(&format!("_cell_length_a    {:.10}\n", a));
    result.push_str(&format!("_cell_length_b    {:.10}\n", b));
    result.push_str(&format!("_cell_length_c    {:.10}\n", c));
    result.push_str(&format!("_cell_angle_alpha {:.10}\n", alpha));
    result.push_str(&format!("_cell_angle_beta  {:.10}\n", beta));
    result.push_str(&format!("_cell_angle_gamma {:.10}\n\n", gamma));

    result.push_str("loop_\n");
    result.push_str("_symmetry_equiv_pos_as_xyz\n");
    result.push_str("  'x, y, z'\n\n");

    result.push_str("loop_\n");
    result.push_str("_atom_site_label\n");
    result.push_str("_atom_site_type_symbol\n");
    result.push_str("_atom_site_fract_x\n");
    result.push_str("_atom_site_fract_y\n");
    result.push_str("_atom_site_fract_z\n");
    result.push_str("_atom_site_occupancy\n");

    for (i, atom) in crystal.atoms.iter().enumerate() {
        let label = atom
            .label
            .clone()
            .unwrap_or_else(|| format!("{}{}", atom.element, i + 1));
        result.push_str(&format!(
            "{} {} {:.12} {:.12} {:.12} 1.0\n",
            label, atom.element, atom.position[0], atom.position[1], atom.position[2]
        ));
    }

    result
}

// ─────────────────────────────────────────────────────────────
// 词法 / 数据块
// ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct CifBlock {
    name: Option<String>,
    items: HashMap<String, String>,
    loops: Vec<CifLoop>,
}

#[derive(Default)]
struct CifLoop {
    tags: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CifLoop {
    fn column(&self, tag: &str) -> Option<usize> {
        self.tags.iter().position(|t| t.eq_ignore_ascii_case(tag))
    }
}

fn read_block(content: &str) -> CifBlock {
    let mut block = CifBlock::default();
    let mut tokens = tokenize(content).into_iter().peekable();

    while let Some(token) = tokens.next() {
        let lower = token.to_lowercase();
        if lower.starts_with("data_") {
            if block.name.is_some() {
                break;
            }
            block.name = Some(token[5..].to_string());
        } else if lower == "loop_" {
            let mut lp = CifLoop::default();
            while let Some(tag) = tokens.next_if(|t| t.starts_with('_')) {
                lp.tags.push(tag.to_lowercase());
            }
            let mut values = Vec::new();
            while let Some(value) = tokens.next_if(|t| !is_reserved(t)) {
                values.push(value);
            }
            if !lp.tags.is_empty() {
                lp.rows = values
                    .chunks(lp.tags.len())
                    .filter(|row| row.len() == lp.tags.len())
                    .map(|row| row.to_vec())
                    .collect();
            }
            block.loops.push(lp);
        } else if token.starts_with('_') {
            if let Some(value) = tokens.next_if(|t| !is_reserved(t)) {
                block.items.insert(lower, value);
            }
        }
    }

    block
}

fn is_reserved(token: &str) -> bool {
    let lower = token.to_lowercase();
    token.starts_with('_') || lower == "loop_" || lower.starts_with("data_")
}

/// 按空白切分，保留单 / 双引号字符串与 `;` 文本域
fn tokenize(content: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        if let Some(rest) = line.strip_prefix(';') {
            let mut text = rest.to_string();
            for next in lines.by_ref() {
                if next.starts_with(';') {
                    break;
                }
                text.push('\n');
                text.push_str(next);
            }
            tokens.push(text.trim().to_string());
            continue;
        }

        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let ch = chars[i];
            if ch.is_whitespace() {
                i += 1;
            } else if ch == '#' {
                break;
            } else if ch == '\'' || ch == '"' {
                let start = i + 1;
                let mut end = start;
                // 引号后必须跟空白或行尾才算结束
                while end < chars.len()
                    && !(chars[end] == ch
                        && chars.get(end + 1).map_or(true, |c| c.is_whitespace()))
                {
                    end += 1;
                }
                tokens.push(chars[start..end.min(chars.len())].iter().collect());
                i = end + 1;
            } else {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() {
                    i += 1;
                }
                tokens.push(chars[start..i].iter().collect());
            }
        }
    }

    tokens
}

/// 解析数值，忽略末尾不确定度 `1.234(5)`
fn parse_number(value: &str) -> Option<f64> {
    let trimmed = value.split('(').next()?.trim();
    trimmed.parse().ok()
}

/// 从类型符号或标签中提取元素符号（"Fe2+" -> "Fe", "O12" -> "O"）
fn element_from_symbol(symbol: &str) -> String {
    let mut chars = symbol.chars().skip_while(|c| !c.is_ascii_alphabetic());
    let mut element = String::new();
    if let Some(first) = chars.next() {
        element.push(first.to_ascii_uppercase());
        if let Some(second) = chars.next() {
            if second.is_ascii_lowercase() {
                element.push(second);
            }
        }
    }
    element
}

// ─────────────────────────────────────────────────────────────
// 对称操作
// ─────────────────────────────────────────────────────────────

/// 仿射对称操作 r' = R r + t
#[derive(Debug, Clone, PartialEq)]
struct SymOp {
    rot: [[f64; 3]; 3],
    trans: [f64; 3],
}

impl SymOp {
    /// 解析 `x, -y+1/2, z` 形式的操作
    fn parse(text: &str) -> Option<Self> {
        let parts: Vec<&str> = text.split(',').collect();
        if parts.len() != 3 {
            return None;
        }
        let mut op = SymOp {
            rot: [[0.0; 3]; 3],
            trans: [0.0; 3],
        };
        for (row, part) in parts.iter().enumerate() {
            let (coeffs, constant) = parse_component(part)?;
            op.rot[row] = coeffs;
            op.trans[row] = constant;
        }
        Some(op)
    }

    fn apply(&self, r: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (i, o) in out.iter_mut().enumerate() {
            *o = self.rot[i][0] * r[0] + self.rot[i][1] * r[1] + self.rot[i][2] * r[2]
                + self.trans[i];
        }
        out
    }
}

fn parse_component(text: &str) -> Option<([f64; 3], f64)> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact.to_lowercase();
    if compact.is_empty() {
        return None;
    }

    let mut coeffs = [0.0; 3];
    let mut constant = 0.0;

    // 以 +/- 为分隔切出各项，保留符号
    let mut terms: Vec<String> = Vec::new();
    for ch in compact.chars() {
        if (ch == '+' || ch == '-') && !terms.last().map_or(true, |t| t.is_empty()) {
            terms.push(String::new());
        }
        if terms.is_empty() {
            terms.push(String::new());
        }
        if let Some(last) = terms.last_mut() {
            last.push(ch);
        }
    }

    for term in terms {
        let (sign, body) = match term.strip_prefix('-') {
            Some(rest) => (-1.0, rest),
            None => (1.0, term.strip_prefix('+').unwrap_or(&term)),
        };
        let axis = body.chars().last().and_then(|c| match c {
            'x' => Some(0),
            'y' => Some(1),
            'z' => Some(2),
            _ => None,
        });
        match axis {
            Some(idx) => {
                let factor = &body[..body.len() - 1];
                let factor = factor.trim_end_matches('*');
                let value = if factor.is_empty() {
                    1.0
                } else {
                    parse_fraction(factor)?
                };
                coeffs[idx] += sign * value;
            }
            None => constant += sign * parse_fraction(body)?,
        }
    }

    Some((coeffs, constant))
}

fn parse_fraction(text: &str) -> Option<f64> {
    match text.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            Some(num.parse::<f64>().ok()? / den)
        }
        None => text.parse().ok(),
    }
}

fn wrap(v: f64) -> f64 {
    let w = v - v.floor();
    if (1.0 - w).abs() < 1e-8 {
        0.0
    } else {
        w
    }
}

/// 将不对称单元按对称操作展开，去掉周期意义下重合的原子
fn expand_symmetry(asym: &[Atom], ops: &[SymOp]) -> Vec<Atom> {
    const TOL: f64 = 1e-4;
    let mut atoms: Vec<Atom> = Vec::new();

    for atom in asym {
        for op in ops {
            let p = op.apply(atom.position);
            let p = [wrap(p[0]), wrap(p[1]), wrap(p[2])];
            let duplicate = atoms.iter().any(|other| {
                other.element == atom.element
                    && (0..3).all(|k| {
                        let d = (other.position[k] - p[k]).abs();
                        d.min(1.0 - d) < TOL
                    })
            });
            if !duplicate {
                let mut expanded = atom.clone();
                expanded.position = p;
                atoms.push(expanded);
            }
        }
    }

    atoms
}
