//! Bijections between an integer rank and a multi-index `α ∈ ℕᵈ`.
//!
//! The rank orders the terms of a tensor-product basis. The linear rule lists
//! multi-indices by total degree `|α| = Σ αᵢ`. Within one degree the first
//! component decreases first, so in two dimensions the order is
//! `(0,0), (1,0), (0,1), (2,0), (1,1), (0,2), …`.
//!
//! The hyperbolic rule keeps the same order inside each stratum, but it
//! groups multi-indices by `⌈‖α‖_q⌉` with the q-quasi-norm
//! `‖α‖_q = (Σ αᵢ^q)^{1/q}`, `0 < q ≤ 1`. Interaction terms are pushed
//! towards later ranks, which favours sparse, low-interaction expansions.

use serde::{Deserialize, Serialize};

use crate::basis::BasisError;

/// Which ordering an [`EnumerateFunction`] follows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum EnumerateRule {
    #[default]
    Linear,
    Hyperbolic { q: f64 },
}

/// Rank ↔ multi-index bijection in a fixed dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnumerateFunction {
    dimension: usize,
    rule: EnumerateRule,
}

// Slack when comparing q-norms against integer strata.
const NORM_TOLERANCE: f64 = 1e-12;

impl EnumerateFunction {
    pub fn new(dimension: usize, rule: EnumerateRule) -> Result<Self, BasisError> {
        if dimension == 0 {
            return Err(BasisError::ZeroDimension);
        }
        if let EnumerateRule::Hyperbolic { q } = rule {
            if !(q > 0.0 && q <= 1.0) {
                return Err(BasisError::InvalidQuasiNorm(q));
            }
        }
        Ok(Self { dimension, rule })
    }

    pub fn linear(dimension: usize) -> Result<Self, BasisError> {
        Self::new(dimension, EnumerateRule::Linear)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn rule(&self) -> EnumerateRule {
        self.rule
    }

    /// The same rule in another dimension.
    pub fn restrict(&self, dimension: usize) -> Result<Self, BasisError> {
        Self::new(dimension, self.rule)
    }

    pub fn multi_index(&self, rank: usize) -> Vec<usize> {
        match self.rule {
            EnumerateRule::Linear => linear_multi_index(self.dimension, rank),
            EnumerateRule::Hyperbolic { q } => {
                let mut remaining = rank;
                let mut stratum = 0;
                loop {
                    let members = self.hyperbolic_stratum(q, stratum);
                    if remaining < members.len() {
                        return members[remaining].clone();
                    }
                    remaining -= members.len();
                    stratum += 1;
                }
            }
        }
    }

    /// The first `count` multi-indices in rank order.
    pub fn multi_indices(&self, count: usize) -> Vec<Vec<usize>> {
        match self.rule {
            EnumerateRule::Linear => (0..count)
                .map(|rank| linear_multi_index(self.dimension, rank))
                .collect(),
            EnumerateRule::Hyperbolic { q } => {
                let mut out = Vec::with_capacity(count);
                let mut stratum = 0;
                while out.len() < count {
                    let members = self.hyperbolic_stratum(q, stratum);
                    let take = (count - out.len()).min(members.len());
                    out.extend(members.into_iter().take(take));
                    stratum += 1;
                }
                out
            }
        }
    }

    /// Rank of `multi_index`.
    pub fn inverse(&self, multi_index: &[usize]) -> Result<usize, BasisError> {
        if multi_index.len() != self.dimension {
            return Err(BasisError::MultiIndexDimension {
                expected: self.dimension,
                found: multi_index.len(),
            });
        }
        match self.rule {
            EnumerateRule::Linear => Ok(linear_rank(multi_index)),
            EnumerateRule::Hyperbolic { q } => {
                let target = stratum_of(multi_index, q);
                let mut offset = 0;
                for stratum in 0..target {
                    offset += self.hyperbolic_stratum(q, stratum).len();
                }
                let members = self.hyperbolic_stratum(q, target);
                let position = members
                    .iter()
                    .position(|m| m.as_slice() == multi_index)
                    .ok_or_else(|| BasisError::MultiIndexNotEnumerated(multi_index.to_vec()))?;
                Ok(offset + position)
            }
        }
    }

    /// Number of multi-indices whose stratum is at most `degree`. For the
    /// linear rule this is `C(degree + d, d)`, the size of a total-degree basis.
    pub fn basis_size_for_degree(&self, degree: usize) -> usize {
        match self.rule {
            EnumerateRule::Linear => binomial(degree + self.dimension, self.dimension),
            EnumerateRule::Hyperbolic { q } => (0..=degree)
                .map(|s| self.hyperbolic_stratum(q, s).len())
                .sum(),
        }
    }

    /// Members of one hyperbolic stratum, sorted by linear rank.
    fn hyperbolic_stratum(&self, q: f64, stratum: usize) -> Vec<Vec<usize>> {
        let budget = (stratum as f64).powf(q) + NORM_TOLERANCE;
        let mut members = Vec::new();
        let mut current = vec![0; self.dimension];
        collect_within_budget(&mut current, 0, budget, q, &mut members);
        members.retain(|m| stratum_of(m, q) == stratum);
        members.sort_by_cached_key(|m| linear_rank(m));
        members
    }
}

// All α with Σ αᵢ^q ≤ budget, by depth-first search over the components.
fn collect_within_budget(
    current: &mut Vec<usize>,
    position: usize,
    budget: f64,
    q: f64,
    out: &mut Vec<Vec<usize>>,
) {
    if position == current.len() {
        out.push(current.clone());
        return;
    }
    let mut value = 0usize;
    loop {
        let cost = if value == 0 { 0.0 } else { (value as f64).powf(q) };
        if cost > budget {
            break;
        }
        current[position] = value;
        collect_within_budget(current, position + 1, budget - cost, q, out);
        value += 1;
    }
    current[position] = 0;
}

fn stratum_of(multi_index: &[usize], q: f64) -> usize {
    let sum: f64 = multi_index
        .iter()
        .filter(|&&a| a > 0)
        .map(|&a| (a as f64).powf(q))
        .sum();
    if sum == 0.0 {
        return 0;
    }
    (sum.powf(1.0 / q) - NORM_TOLERANCE).ceil().max(0.0) as usize
}

pub(crate) fn binomial(n: usize, k: usize) -> usize {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut acc: u128 = 1;
    for i in 0..k {
        acc = acc * (n - i) as u128 / (i + 1) as u128;
    }
    acc as usize
}

// Compositions of `total` into `slots` non-negative parts.
fn compositions(total: usize, slots: usize) -> usize {
    if slots == 0 {
        return usize::from(total == 0);
    }
    binomial(total + slots - 1, slots - 1)
}

fn linear_multi_index(dimension: usize, rank: usize) -> Vec<usize> {
    let mut degree = 0;
    while binomial(degree + dimension, dimension) <= rank {
        degree += 1;
    }
    let mut index = if degree == 0 {
        0
    } else {
        rank - binomial(degree - 1 + dimension, dimension)
    };
    let mut out = vec![0; dimension];
    let mut remaining = degree;
    for position in 0..dimension - 1 {
        let slots = dimension - position - 1;
        let mut value = remaining;
        loop {
            let count = compositions(remaining - value, slots);
            if index < count {
                break;
            }
            index -= count;
            value -= 1;
        }
        out[position] = value;
        remaining -= value;
    }
    out[dimension - 1] = remaining;
    out
}

fn linear_rank(multi_index: &[usize]) -> usize {
    let dimension = multi_index.len();
    let degree: usize = multi_index.iter().sum();
    if degree == 0 {
        return 0;
    }
    let mut rank = binomial(degree - 1 + dimension, dimension);
    let mut remaining = degree;
    for (position, &a) in multi_index.iter().enumerate().take(dimension - 1) {
        let slots = dimension - position - 1;
        for value in (a + 1..=remaining).rev() {
            rank += compositions(remaining - value, slots);
        }
        remaining -= a;
    }
    rank
}
