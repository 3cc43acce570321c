//! Disjoint LinUCB contextual bandit
//!
//! One ridge-regression model per arm (employee): Aₐ accumulates context
//! outer products on top of λI, bₐ accumulates reward-weighted contexts.
//! Selection scores each candidate with θₐᵀx plus an exploration bonus
//! α·sqrt(xᵀAₐ⁻¹x) and takes the argmax. Because both accumulators are
//! additive, the learned state depends only on the multiset of observed
//! (context, reward) pairs, not their order.

use crate::error::{EngineError, Result};
use crate::recommender::linalg::{cholesky, solve_with_factor};
use crate::recommender::rank_by_score;
use crate::types::{ContextVector, Employee, EmployeeId, CONTEXT_DIM};
use ndarray::{Array1, Array2};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Per-arm ridge state: A = λI + Σxxᵀ, b = Σr·x
#[derive(Debug, Clone)]
pub struct ArmState {
    pub arm_id: EmployeeId,
    pub a: Array2<f64>,
    pub b: Array1<f64>,
    pub update_count: u64,
}

impl ArmState {
    /// Fresh arm with no observations
    pub fn cold(arm_id: EmployeeId, lambda: f64) -> Self {
        Self {
            arm_id,
            a: Array2::eye(CONTEXT_DIM) * lambda,
            b: Array1::zeros(CONTEXT_DIM),
            update_count: 0,
        }
    }

    /// Apply one observed reward: A ← A + xxᵀ, b ← b + r·x
    pub fn observe(&mut self, context: &ContextVector, reward: f64) {
        let x = Array1::from_iter(context.as_slice().iter().copied());
        for i in 0..CONTEXT_DIM {
            for j in 0..CONTEXT_DIM {
                self.a[[i, j]] += x[i] * x[j];
            }
        }
        self.b = &self.b + &(&x * reward);
        self.update_count += 1;
    }

    /// Serialize A as row-major little-endian bytes
    pub fn a_blob(&self) -> Vec<u8> {
        self.a.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Serialize b as little-endian bytes
    pub fn b_blob(&self) -> Vec<u8> {
        self.b.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Rebuild an arm from its persisted blobs
    pub fn from_blobs(
        arm_id: EmployeeId,
        a_blob: &[u8],
        b_blob: &[u8],
        update_count: u64,
    ) -> Result<Self> {
        let a_values = floats_from_le_bytes(a_blob)?;
        let b_values = floats_from_le_bytes(b_blob)?;

        if a_values.len() != CONTEXT_DIM * CONTEXT_DIM || b_values.len() != CONTEXT_DIM {
            return Err(EngineError::InvariantViolated(format!(
                "bandit state for arm {} has wrong shape: A={}, b={}",
                arm_id,
                a_values.len(),
                b_values.len()
            )));
        }

        let a = Array2::from_shape_vec((CONTEXT_DIM, CONTEXT_DIM), a_values)
            .map_err(|e| EngineError::InvariantViolated(e.to_string()))?;

        Ok(Self {
            arm_id,
            a,
            b: Array1::from_vec(b_values),
            update_count,
        })
    }
}

fn floats_from_le_bytes(bytes: &[u8]) -> Result<Vec<f64>> {
    if bytes.len() % 8 != 0 {
        return Err(EngineError::InvariantViolated(
            "bandit blob length not a multiple of 8".to_string(),
        ));
    }

    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let arr: [u8; 8] = chunk.try_into().unwrap();
            f64::from_le_bytes(arr)
        })
        .collect())
}

/// One candidate arm offered to the bandit
#[derive(Debug, Clone)]
pub struct ArmChoice {
    pub employee: Employee,
    pub context: ContextVector,
}

/// Upper-Confidence-Bound selection over per-arm linear models
#[derive(Debug, Clone)]
pub struct LinUcbBandit {
    alpha: f64,
    lambda: f64,
}

impl LinUcbBandit {
    pub fn new(alpha: f64, lambda: f64) -> Self {
        Self { alpha, lambda }
    }

    /// UCB(a) = θₐᵀx + α·sqrt(xᵀAₐ⁻¹x)
    ///
    /// A failed Cholesky factorization degrades the arm to cold-start for
    /// this decision only; the stored state is untouched.
    pub fn ucb_score(&self, arm: &ArmState, context: &ContextVector) -> f64 {
        let x = Array1::from_iter(context.as_slice().iter().copied());

        match cholesky(&arm.a) {
            Some(factor) => {
                let theta = solve_with_factor(&factor, &arm.b);
                let a_inv_x = solve_with_factor(&factor, &x);
                let exploit = theta.dot(&x);
                let explore = self.alpha * x.dot(&a_inv_x).max(0.0).sqrt();
                exploit + explore
            }
            None => {
                warn!(
                    arm_id = %arm.arm_id,
                    "Cholesky factorization failed, scoring arm as cold-start"
                );
                self.cold_start_score(&x)
            }
        }
    }

    /// Cold-start score: θ = 0, A = λI ⇒ UCB = (α/√λ)·‖x‖
    fn cold_start_score(&self, x: &Array1<f64>) -> f64 {
        self.alpha * (x.dot(x) / self.lambda).max(0.0).sqrt()
    }

    /// Pick the winning index among `choices`, looking up each arm's state
    /// in `arms` (missing entries are cold-start). Ties within tolerance
    /// fall back to productivity, workload, then id.
    pub fn select(
        &self,
        choices: &[ArmChoice],
        arms: &HashMap<EmployeeId, ArmState>,
    ) -> Option<usize> {
        let mut winner: Option<(usize, f64)> = None;

        for (index, choice) in choices.iter().enumerate() {
            let score = match arms.get(&choice.employee.id) {
                Some(arm) => self.ucb_score(arm, &choice.context),
                None => {
                    let x = Array1::from_iter(choice.context.as_slice().iter().copied());
                    self.cold_start_score(&x)
                }
            };

            debug!(
                employee_id = %choice.employee.id,
                score,
                "scored candidate arm"
            );

            winner = match winner {
                None => Some((index, score)),
                Some((best_index, best_score)) => {
                    let best = &choices[best_index];
                    if rank_by_score(score, &choice.employee, best_score, &best.employee)
                        == std::cmp::Ordering::Less
                    {
                        Some((index, score))
                    } else {
                        Some((best_index, best_score))
                    }
                }
            };
        }

        winner.map(|(index, _)| index)
    }
}
