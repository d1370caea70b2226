//! # VASP POSCAR 格式解析器
//!
//! 预测阶段把弛豫结构临时转换为 POSCAR 交给性质预测模型读取；
//! 也允许弛豫输入直接是 POSCAR/CONTCAR/`.vasp` 文件。
//!
//! ## POSCAR 格式说明
//! ```text
//! Comment line (structure name)
//! 1.0                    # scaling factor
//! a1 a2 a3               # lattice vector a
//! b1 b2 b3               # lattice vector b
//! c1 c2 c3               # lattice vector c
//! Element1 Element2 ...  # element symbols (VASP 5+)
//! n1 n2 ...              # number of atoms per element
//! Selective dynamics     # optional
//! Direct/Cartesian       # coordinate type
//! x1 y1 z1               # atom positions
//! ...
//! ```
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs`, `batch/worker.rs` 使用
//! - 使用 `models/structure.rs`

use crate::error::{PipelineError, Result};
use crate::models::{Atom, Crystal, Lattice};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// 解析 POSCAR/CONTCAR 文件
pub fn parse_poscar_file(path: &Path) -> Result<Crystal> {
    let content = fs::read_to_string(path).map_err(|e| PipelineError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_poscar_content(
        &content,
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown"),
    )
}

/// 从字符串内容解析 POSCAR 格式（仅支持 VASP 5+，需要元素行）
pub fn parse_poscar_content(content: &str, default_name: &str) -> Result<Crystal> {
    let lines: Vec<&str> = content.lines().collect();
    let parse_err = |reason: String| PipelineError::ParseError {
        format: "poscar".to_string(),
        path: default_name.to_string(),
        reason,
    };

    if lines.len() < 8 {
        return Err(parse_err("File too short".to_string()));
    }

    // Line 0: Comment/name
    let name = match lines[0].trim() {
        "" => default_name.to_string(),
        n => n.to_string(),
    };

    // Line 1: Scaling factor
    let scale: f64 = lines[1]
        .trim()
        .parse()
        .map_err(|_| parse_err(format!("Invalid scaling factor '{}'", lines[1].trim())))?;

    // Lines 2-4: Lattice vectors
    let mut matrix = [[0.0; 3]; 3];
    for (i, row) in matrix.iter_mut().enumerate() {
        let parts: Vec<f64> = lines[2 + i]
            .split_whitespace()
            .filter_map(|s| s.parse().ok())
            .collect();
        if parts.len() < 3 {
            return Err(parse_err(format!("Invalid lattice vector at line {}", 3 + i)));
        }
        *row = [parts[0] * scale, parts[1] * scale, parts[2] * scale];
    }
    let lattice = Lattice::from_vectors(matrix);

    // Line 5: Element symbols, Line 6: counts
    let elements: Vec<&str> = lines[5].split_whitespace().collect();
    if elements.is_empty() || elements[0].parse::<f64>().is_ok() {
        return Err(parse_err(
            "Missing element symbol line (VASP 4 format is not supported)".to_string(),
        ));
    }
    let counts: Vec<usize> = lines[6]
        .split_whitespace()
        .map(|s| s.parse())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| parse_err("Invalid atom count line".to_string()))?;
    if counts.len() != elements.len() {
        return Err(parse_err(
            "Element and count lines have different lengths".to_string(),
        ));
    }

    // 可选 Selective dynamics 行
    let mut coord_line = 7;
    if lines[coord_line].trim().to_lowercase().starts_with('s') {
        coord_line += 1;
    }
    let coord_type = lines
        .get(coord_line)
        .ok_or_else(|| parse_err("Missing coordinate type line".to_string()))?
        .trim()
        .to_lowercase();
    let is_cartesian = coord_type.starts_with('c') || coord_type.starts_with('k');

    let total: usize = counts.iter().sum();
    let position_lines = &lines[coord_line + 1..];
    if position_lines.len() < total {
        return Err(parse_err(format!(
            "Expected {} atom positions, found {}",
            total,
            position_lines.len()
        )));
    }

    let species = elements
        .iter()
        .zip(counts.iter())
        .flat_map(|(el, &n)| std::iter::repeat(*el).take(n));

    let mut atoms = Vec::with_capacity(total);
    for (i, (element, line)) in species.zip(position_lines.iter()).enumerate() {
        let parts: Vec<f64> = line
            .split_whitespace()
            .take(3)
            .filter_map(|s| s.parse().ok())
            .collect();
        if parts.len() < 3 {
            return Err(parse_err(format!("Invalid position for atom {}", i + 1)));
        }
        let raw = [parts[0], parts[1], parts[2]];
        let position = if is_cartesian {
            let cart = [raw[0] * scale, raw[1] * scale, raw[2] * scale];
            lattice
                .to_fractional(cart)
                .ok_or_else(|| parse_err("Degenerate lattice".to_string()))?
        } else {
            raw
        };
        atoms.push(Atom::new(element, position));
    }

    let mut crystal = Crystal::new(name, lattice, atoms);
    crystal.source_format = Some("poscar".to_string());

    Ok(crystal)
}

/// 将 Crystal 转换为 POSCAR 格式字符串（VASP 5，Direct 坐标）
pub fn to_poscar_string(crystal: &Crystal) -> String {
    // 按元素首次出现顺序分组
    let mut elem_order: Vec<&str> = Vec::new();
    let mut elem_atoms: BTreeMap<&str, Vec<[f64; 3]>> = BTreeMap::new();

    for atom in &crystal.atoms {
        if !elem_order.contains(&atom.element.as_str()) {
            elem_order.push(&atom.element);
        }
        elem_atoms
            .entry(atom.element.as_str())
            .or_default()
            .push(atom.position);
    }

    let mut result = String::new();
    result.push_str(&format!("{}\n", crystal.name));
    result.push_str("1.0\n");

    for row in &crystal.lattice.matrix {
        result.push_str(&format!(
            "  {:20.12}  {:20.12}  {:20.12}\n",
            row[0], row[1], row[2]
        ));
    }

    result.push_str(&format!("   {}\n", elem_order.join("   ")));
    let counts: Vec<String> = elem_order
        .iter()
        .map(|e| elem_atoms[e].len().to_string())
        .collect();
    result.push_str(&format!("   {}\n", counts.join("   ")));

    result.push_str("Direct\n");
    for elem in &elem_order {
        for pos in &elem_atoms[elem] {
            result.push_str(&format!(
                "  {:20.12}  {:20.12}  {:20.12}\n",
                pos[0], pos[1], pos[2]
            ));
        }
    }

    result
}

/// 写出 POSCAR 文件
pub fn write_poscar_file(crystal: &Crystal, path: &Path) -> Result<()> {
    fs::write(path, to_poscar_string(crystal)).map_err(|e| PipelineError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}
