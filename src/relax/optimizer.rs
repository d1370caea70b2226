//! # 几何优化器
//!
//! 固定晶胞、笛卡尔坐标下的拟牛顿 BFGS 优化。
//!
//! - 维护逆 Hessian，初值为 `I / initial_curvature`
//! - 曲率条件 `s·y <= 0` 时跳过更新
//! - 单步位移按原子缩放，任一原子位移不超过 `max_step`
//! - 最大单原子受力模长低于 `fmax` 即收敛
//!
//! 步数预算耗尽返回 [`OptimizeOutcome::NotConverged`]，不是错误。
//!
//! ## 依赖关系
//! - 被 `relax/engine.rs` 使用
//! - 使用 `calculators/potential.rs`

use crate::calculators::{evaluate_with_recovery, Evaluation, PotentialEvaluator};
use crate::config::RelaxConfig;
use crate::error::{PipelineError, Result};
use crate::models::Crystal;

/// 收敛与步数策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelaxPolicy {
    pub max_steps: usize,
    pub fmax: f64,
    pub max_step: f64,
    pub initial_curvature: f64,
}

impl From<&RelaxConfig> for RelaxPolicy {
    fn from(config: &RelaxConfig) -> Self {
        RelaxPolicy {
            max_steps: config.max_steps,
            fmax: config.fmax,
            max_step: config.max_step,
            initial_curvature: config.initial_curvature,
        }
    }
}

impl Default for RelaxPolicy {
    fn default() -> Self {
        RelaxPolicy::from(&RelaxConfig::default())
    }
}

/// 优化结果
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizeOutcome {
    /// 收敛；`evaluation` 为收敛构型上的能量与受力
    Converged { steps: usize, evaluation: Evaluation },
    /// 步数预算内未收敛
    NotConverged { steps: usize },
}

/// BFGS 状态
pub struct Bfgs {
    dim: usize,
    /// 逆 Hessian，行优先 dim x dim
    inv_hessian: Vec<f64>,
    previous: Option<(Vec<f64>, Vec<f64>)>,
    max_step: f64,
}

impl Bfgs {
    pub fn new(num_atoms: usize, policy: &RelaxPolicy) -> Self {
        let dim = 3 * num_atoms;
        let mut inv_hessian = vec![0.0; dim * dim];
        for i in 0..dim {
            inv_hessian[i * dim + i] = 1.0 / policy.initial_curvature;
        }
        Bfgs {
            dim,
            inv_hessian,
            previous: None,
            max_step: policy.max_step,
        }
    }

    /// 根据当前坐标与受力（均为展平的 3N 向量）返回新坐标
    pub fn step(&mut self, positions: &[f64], forces: &[f64]) -> Vec<f64> {
        debug_assert_eq!(positions.len(), self.dim);
        debug_assert_eq!(forces.len(), self.dim);

        // 梯度 g = -F
        let gradient: Vec<f64> = forces.iter().map(|f| -f).collect();

        if let Some((prev_pos, prev_grad)) = self.previous.take() {
            let s: Vec<f64> = positions.iter().zip(&prev_pos).map(|(a, b)| a - b).collect();
            let y: Vec<f64> = gradient.iter().zip(&prev_grad).map(|(a, b)| a - b).collect();
            self.update(&s, &y);
        }

        // p = -H g
        let mut direction = vec![0.0; self.dim];
        for (i, d) in direction.iter_mut().enumerate() {
            let row = &self.inv_hessian[i * self.dim..(i + 1) * self.dim];
            *d = -row.iter().zip(&gradient).map(|(h, g)| h * g).sum::<f64>();
        }

        let longest = direction
            .chunks(3)
            .map(|d| (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt())
            .fold(0.0, f64::max);
        if longest > self.max_step {
            let scale = self.max_step / longest;
            direction.iter_mut().for_each(|d| *d *= scale);
        }

        self.previous = Some((positions.to_vec(), gradient));
        positions.iter().zip(&direction).map(|(x, d)| x + d).collect()
    }

    /// 逆 Hessian 的 BFGS 更新
    ///
    /// H' = H - ρ(Hy sᵀ + s yᵀH) + (ρ² yᵀHy + ρ) s sᵀ
    fn update(&mut self, s: &[f64], y: &[f64]) {
        let sy: f64 = s.iter().zip(y).map(|(a, b)| a * b).sum();
        if sy <= 1e-12 {
            return;
        }
        let rho = 1.0 / sy;
        let n = self.dim;

        let hy: Vec<f64> = (0..n)
            .map(|i| {
                self.inv_hessian[i * n..(i + 1) * n]
                    .iter()
                    .zip(y)
                    .map(|(h, v)| h * v)
                    .sum()
            })
            .collect();
        let yhy: f64 = y.iter().zip(&hy).map(|(a, b)| a * b).sum();
        let ss_coeff = rho * rho * yhy + rho;

        for i in 0..n {
            for j in 0..n {
                self.inv_hessian[i * n + j] +=
                    -rho * (hy[i] * s[j] + s[i] * hy[j]) + ss_coeff * s[i] * s[j];
            }
        }
    }
}

/// 在步数预算内把结构弛豫到受力收敛
///
/// 成功时 `crystal` 被更新为收敛构型；未收敛时 `crystal` 保持最后一步的构型。
pub fn optimize(
    crystal: &mut Crystal,
    evaluator: &mut dyn PotentialEvaluator,
    policy: &RelaxPolicy,
) -> Result<OptimizeOutcome> {
    let mut bfgs = Bfgs::new(crystal.num_atoms(), policy);

    for steps in 0..policy.max_steps {
        let evaluation = evaluate_with_recovery(evaluator, crystal)?;
        let fmax = evaluation.fmax();
        tracing::trace!(structure = %crystal.name, steps, energy = evaluation.energy, fmax, "bfgs");

        if fmax < policy.fmax {
            return Ok(OptimizeOutcome::Converged { steps, evaluation });
        }

        let positions: Vec<f64> = crystal.cartesian_positions().concat();
        let forces: Vec<f64> = evaluation.forces.concat();
        let next = bfgs.step(&positions, &forces);

        let next: Vec<[f64; 3]> = next.chunks(3).map(|c| [c[0], c[1], c[2]]).collect();
        crystal
            .set_cartesian_positions(&next)
            .ok_or_else(|| PipelineError::InvalidArgument(format!(
                "Degenerate lattice in {}",
                crystal.name
            )))?;
    }

    Ok(OptimizeOutcome::NotConverged {
        steps: policy.max_steps,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Atom, Lattice};

    /// 各原子被拉向固定平衡位置的各向异性谐振势
    pub(crate) struct Harmonic {
        pub target: Vec<[f64; 3]>,
        pub stiffness: [f64; 3],
        pub calls: usize,
    }

    impl PotentialEvaluator for Harmonic {
        fn name(&self) -> &str {
            "harmonic"
        }

        fn evaluate(&mut self, crystal: &Crystal) -> Result<Evaluation> {
            self.calls += 1;
            let mut energy = -1.0 * crystal.num_atoms() as f64;
            let mut forces = Vec::new();
            for (r, r0) in crystal.cartesian_positions().iter().zip(&self.target) {
                let mut f = [0.0; 3];
                for k in 0..3 {
                    let d = r[k] - r0[k];
                    energy += 0.5 * self.stiffness[k] * d * d;
                    f[k] = -self.stiffness[k] * d;
                }
                forces.push(f);
            }
            Ok(Evaluation { energy, forces })
        }

        fn reattach(&mut self) -> Result<()> {
            Ok(())
        }
    }

    pub(crate) fn displaced_pair(name: &str) -> (Crystal, Vec<[f64; 3]>) {
        let lattice = Lattice::from_parameters(8.0, 8.0, 8.0, 90.0, 90.0, 90.0);
        let crystal = Crystal::new(
            name,
            lattice,
            vec![
                Atom::new("Li", [0.05, 0.0, 0.0]),
                Atom::new("O", [0.5, 0.54, 0.47]),
            ],
        );
        let target = vec![[0.0, 0.0, 0.0], [4.0, 4.0, 4.0]];
        (crystal, target)
    }

    #[test]
    fn test_bfgs_converges_on_harmonic_well() {
        let (mut crystal, target) = displaced_pair("LiO");
        let mut calc = Harmonic {
            target: target.clone(),
            stiffness: [3.0, 8.0, 15.0],
            calls: 0,
        };
        let policy = RelaxPolicy::default();

        let outcome = optimize(&mut crystal, &mut calc, &policy).unwrap();
        let OptimizeOutcome::Converged { steps, evaluation } = outcome else {
            panic!("expected convergence");
        };
        assert!(steps > 0 && steps < 200);
        assert!(evaluation.fmax() < policy.fmax);
        assert_eq!(calc.calls, steps + 1);

        for (r, r0) in crystal.cartesian_positions().iter().zip(&target) {
            for k in 0..3 {
                assert!((r[k] - r0[k]).abs() < 0.01);
            }
        }
    }

    #[test]
    fn test_step_budget_exhausted() {
        let (mut crystal, target) = displaced_pair("LiO");
        let mut calc = Harmonic {
            target,
            stiffness: [3.0, 8.0, 15.0],
            calls: 0,
        };
        let policy = RelaxPolicy {
            max_steps: 3,
            ..RelaxPolicy::default()
        };

        let outcome = optimize(&mut crystal, &mut calc, &policy).unwrap();
        assert_eq!(outcome, OptimizeOutcome::NotConverged { steps: 3 });
        assert_eq!(calc.calls, 3);
    }

    #[test]
    fn test_already_converged_takes_no_step() {
        let (mut crystal, _) = displaced_pair("LiO");
        let target = crystal.cartesian_positions();
        let mut calc = Harmonic {
            target,
            stiffness: [1.0; 3],
            calls: 0,
        };
        let outcome = optimize(&mut crystal, &mut calc, &RelaxPolicy::default()).unwrap();
        assert!(matches!(outcome, OptimizeOutcome::Converged { steps: 0, .. }));
    }

    #[test]
    fn test_step_respects_max_step() {
        let policy = RelaxPolicy::default();
        let mut bfgs = Bfgs::new(1, &policy);
        let next = bfgs.step(&[0.0, 0.0, 0.0], &[1000.0, 0.0, 0.0]);
        assert!((next[0] - policy.max_step).abs() < 1e-12);
    }
}
