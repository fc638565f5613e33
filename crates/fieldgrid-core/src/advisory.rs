//! Non-fatal diagnostics on grid sizes
//!
//! FFT-based field kernels are fastest, and some platforms only accept launch
//! shapes, when every cell count is 7-smooth (all prime factors ≤ 7).

use crate::mesh::Axis;
use serde::Serialize;
use std::fmt;

/// Largest prime factor that does not trigger an advisory.
pub const SMOOTHNESS_LIMIT: usize = 7;

/// An axis whose cell count has a prime factor above [`SMOOTHNESS_LIMIT`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmoothnessAdvisory {
    pub axis: Axis,
    pub cells: usize,
    pub factors: Vec<usize>,
}

impl fmt::Display for SmoothnessAdvisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-axis is not 7-smooth: it has {} cells, with prime factors {:?}, at least one of which \
             is greater than 7; this may reduce performance or cause an invalid-value launch failure",
            self.axis, self.cells, self.factors
        )
    }
}

/// Prime factorization in ascending order; `prime_factors(1)` is `[1]` and
/// `prime_factors(0)` is `[]`.
pub fn prime_factors(mut n: usize) -> Vec<usize> {
    match n {
        0 => return Vec::new(),
        1 => return vec![1],
        _ => {}
    }

    let mut factors = Vec::new();
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            factors.push(p);
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

/// One advisory per axis whose cell count is not 7-smooth, each logged at
/// `warn`.
pub fn check_smoothness(size: [usize; 3]) -> Vec<SmoothnessAdvisory> {
    Axis::ALL
        .into_iter()
        .filter_map(|axis| {
            let cells = size[axis.index()];
            let factors = prime_factors(cells);
            let largest = factors.iter().copied().max().unwrap_or(0);
            (largest > SMOOTHNESS_LIMIT).then_some(SmoothnessAdvisory { axis, cells, factors })
        })
        .inspect(|advisory| {
            tracing::warn!(
                axis = %advisory.axis,
                cells = advisory.cells,
                factors = ?advisory.factors,
                "{advisory}"
            );
        })
        .collect()
}
