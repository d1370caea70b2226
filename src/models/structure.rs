//! # 晶体结构数据模型
//!
//! 定义统一的晶体结构表示，可以从 CIF / POSCAR 解析并写回。
//! 弛豫引擎在笛卡尔坐标下移动原子，文件中保存分数坐标。
//!
//! ## 依赖关系
//! - 被 `parsers/`、`relax/`、`calculators/` 使用
//! - 无外部模块依赖

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 晶格参数表示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    /// 晶格向量矩阵 (3x3)，行向量表示 a, b, c
    /// [[a1, a2, a3], [b1, b2, b3], [c1, c2, c3]]
    pub matrix: [[f64; 3]; 3],
}

impl Lattice {
    /// 从晶格参数 (a, b, c, alpha, beta, gamma) 创建晶格
    /// 角度单位：度
    pub fn from_parameters(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Self {
        let cos_alpha = alpha.to_radians().cos();
        let cos_beta = beta.to_radians().cos();
        let cos_gamma = gamma.to_radians().cos();
        let sin_gamma = gamma.to_radians().sin();

        let a_vec = [a, 0.0, 0.0];
        let b_vec = [b * cos_gamma, b * sin_gamma, 0.0];

        let c1 = c * cos_beta;
        let c2 = c * (cos_alpha - cos_beta * cos_gamma) / sin_gamma;
        let c3 = (c * c - c1 * c1 - c2 * c2).sqrt();

        Lattice {
            matrix: [a_vec, b_vec, [c1, c2, c3]],
        }
    }

    /// 从晶格向量矩阵创建
    pub fn from_vectors(matrix: [[f64; 3]; 3]) -> Self {
        Lattice { matrix }
    }

    /// 获取晶格参数 (a, b, c, alpha, beta, gamma)
    pub fn parameters(&self) -> (f64, f64, f64, f64, f64, f64) {
        let [a_vec, b_vec, c_vec] = self.matrix;

        let a = norm(&a_vec);
        let b = norm(&b_vec);
        let c = norm(&c_vec);

        let alpha = (dot(&b_vec, &c_vec) / (b * c)).acos().to_degrees();
        let beta = (dot(&a_vec, &c_vec) / (a * c)).acos().to_degrees();
        let gamma = (dot(&a_vec, &b_vec) / (a * b)).acos().to_degrees();

        (a, b, c, alpha, beta, gamma)
    }

    /// 计算晶格体积（带符号的行列式）
    pub fn volume(&self) -> f64 {
        let [a, b, c] = self.matrix;
        a[0] * (b[1] * c[2] - b[2] * c[1]) - a[1] * (b[0] * c[2] - b[2] * c[0])
            + a[2] * (b[0] * c[1] - b[1] * c[0])
    }

    /// 分数坐标转笛卡尔坐标
    pub fn to_cartesian(&self, frac: [f64; 3]) -> [f64; 3] {
        let m = self.matrix;
        [
            frac[0] * m[0][0] + frac[1] * m[1][0] + frac[2] * m[2][0],
            frac[0] * m[0][1] + frac[1] * m[1][1] + frac[2] * m[2][1],
            frac[0] * m[0][2] + frac[1] * m[1][2] + frac[2] * m[2][2],
        ]
    }

    /// 笛卡尔坐标转分数坐标
    ///
    /// 退化晶格（体积为 0）返回 `None`。
    pub fn to_fractional(&self, cart: [f64; 3]) -> Option<[f64; 3]> {
        let det = self.volume();
        if det.abs() < 1e-12 {
            return None;
        }
        let [a, b, c] = self.matrix;

        // 行向量矩阵 M 的逆：frac = cart · M^-1
        let inv = [
            [
                (b[1] * c[2] - b[2] * c[1]) / det,
                (a[2] * c[1] - a[1] * c[2]) / det,
                (a[1] * b[2] - a[2] * b[1]) / det,
            ],
            [
                (b[2] * c[0] - b[0] * c[2]) / det,
                (a[0] * c[2] - a[2] * c[0]) / det,
                (a[2] * b[0] - a[0] * b[2]) / det,
            ],
            [
                (b[0] * c[1] - b[1] * c[0]) / det,
                (a[1] * c[0] - a[0] * c[1]) / det,
                (a[0] * b[1] - a[1] * b[0]) / det,
            ],
        ];

        Some([
            cart[0] * inv[0][0] + cart[1] * inv[1][0] + cart[2] * inv[2][0],
            cart[0] * inv[0][1] + cart[1] * inv[1][1] + cart[2] * inv[2][1],
            cart[0] * inv[0][2] + cart[1] * inv[1][2] + cart[2] * inv[2][2],
        ])
    }
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f64; 3]) -> f64 {
    dot(v, v).sqrt()
}

/// 原子信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    /// 元素符号
    pub element: String,

    /// 分数坐标 [x, y, z]
    pub position: [f64; 3],

    /// 可选：原子标签（CIF `_atom_site_label`）
    pub label: Option<String>,
}

impl Atom {
    pub fn new(element: impl Into<String>, position: [f64; 3]) -> Self {
        Atom {
            element: element.into(),
            position,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// 晶体结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crystal {
    /// 结构名称
    pub name: String,

    /// 晶格
    pub lattice: Lattice,

    /// 原子列表
    pub atoms: Vec<Atom>,

    /// 来源文件格式
    pub source_format: Option<String>,
}

impl Crystal {
    pub fn new(name: impl Into<String>, lattice: Lattice, atoms: Vec<Atom>) -> Self {
        Crystal {
            name: name.into(),
            lattice,
            atoms,
            source_format: None,
        }
    }

    /// 原子数
    pub fn num_atoms(&self) -> usize {
        self.atoms.len()
    }

    /// 元素符号列表（与原子顺序一致）
    pub fn species(&self) -> Vec<String> {
        self.atoms.iter().map(|a| a.element.clone()).collect()
    }

    /// 所有原子的笛卡尔坐标
    pub fn cartesian_positions(&self) -> Vec<[f64; 3]> {
        self.atoms
            .iter()
            .map(|a| self.lattice.to_cartesian(a.position))
            .collect()
    }

    /// 用笛卡尔坐标更新原子位置（晶胞保持不变）
    pub fn set_cartesian_positions(&mut self, positions: &[[f64; 3]]) -> Option<()> {
        if positions.len() != self.atoms.len() {
            return None;
        }
        for (atom, cart) in self.atoms.iter_mut().zip(positions) {
            atom.position = self.lattice.to_fractional(*cart)?;
        }
        Some(())
    }

    /// 计算化学式（Hill 顺序，不约化）
    pub fn formula(&self) -> String {
        format_hill(&self.element_counts(), 1)
    }

    /// 计算经验式（Hill 顺序，各元素计数除以最大公约数）
    pub fn empirical_formula(&self) -> String {
        let counts = self.element_counts();
        let divisor = counts.values().copied().fold(0, gcd).max(1);
        format_hill(&counts, divisor)
    }

    fn element_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for atom in &self.atoms {
            *counts.entry(atom.element.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Hill 顺序：含 C 时 C、H 在前，其余按字母序；不含 C 时全部按字母序
fn format_hill(counts: &BTreeMap<&str, usize>, divisor: usize) -> String {
    let mut order: Vec<&str> = Vec::with_capacity(counts.len());
    if counts.contains_key("C") {
        order.push("C");
        if counts.contains_key("H") {
            order.push("H");
        }
    }
    for el in counts.keys() {
        if !order.contains(el) {
            order.push(el);
        }
    }

    order
        .into_iter()
        .map(|el| {
            let count = counts[el] / divisor;
            if count == 1 {
                el.to_string()
            } else {
                format!("{}{}", el, count)
            }
        })
        .collect::<Vec<_>>()
        .join("")
}
