//! Pi estimation by two-level `f32` partial-sum reduction.
//!
//! The estimate is `4 * Σ term(k)` over `global_size * floats_per_item`
//! terms, where the series converges to `π/4`. Summation order is fixed:
//!
//! 1. work item `gid` sums terms `gid*fpi .. gid*fpi + fpi` in ascending order;
//! 2. each work group sums its items' contributions in ascending local id;
//! 3. the host sums the group results in ascending group index.
//!
//! `f32` addition is not associative, so any backend that wants
//! bit-identical results with [`reference_partial_sums`] must keep this
//! order. The CPU backend does.

use crate::grid::WorkGrid;
use crate::{ComputeError, ComputeResult};

/// Factor turning the quarter-circle sum into Pi.
pub const PI_QUADRANT_FACTOR: f32 = 4.0;

/// Terms summed by each work item unless configured otherwise.
pub const DEFAULT_FLOATS_PER_ITEM: usize = 4;

/// Deterministic term generator whose sum approaches `π/4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TermSeries {
    /// `(-1)^k / (2k + 1)`.
    #[default]
    Leibniz,
    /// Midpoint rule over the quarter circle: `sqrt(1 - x²) / T` with
    /// `x = (k + 0.5) / T`.
    QuarterCircle,
}

impl TermSeries {
    /// Kernel entry point computing this series.
    pub fn entry_point(&self) -> &'static str {
        match self {
            Self::Leibniz => "pi_calc",
            Self::QuarterCircle => "pi_calc_quadrant",
        }
    }

    /// Series for a kernel entry point.
    pub fn from_entry_point(entry: &str) -> Option<Self> {
        match entry {
            "pi_calc" => Some(Self::Leibniz),
            "pi_calc_quadrant" => Some(Self::QuarterCircle),
            _ => None,
        }
    }

    /// Parse a CLI name.
    pub fn parse(s: &str) -> ComputeResult<Self> {
        match s.to_lowercase().as_str() {
            "leibniz" => Ok(Self::Leibniz),
            "quadrant" | "quarter-circle" => Ok(Self::QuarterCircle),
            other => Err(ComputeError::InvalidArgument(format!("unknown series: {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Leibniz => "leibniz",
            Self::QuarterCircle => "quadrant",
        }
    }

    /// Term `k` of a series of `total_terms` terms.
    #[inline]
    pub fn term(&self, k: usize, total_terms: usize) -> f32 {
        match self {
            Self::Leibniz => {
                let sign = if k % 2 == 0 { 1.0f32 } else { -1.0f32 };
                sign / (2 * k + 1) as f32
            }
            Self::QuarterCircle => {
                let n = total_terms as f32;
                let x = (k as f32 + 0.5) / n;
                (1.0 - x * x).sqrt() / n
            }
        }
    }
}

/// Contribution of work item `gid`.
///
/// `gid` must lie inside a grid whose [`WorkGrid::total_terms`] succeeded,
/// which keeps every term index in range.
#[inline]
pub fn work_item_sum(series: TermSeries, gid: usize, floats_per_item: usize, total_terms: usize) -> f32 {
    let first = gid * floats_per_item;
    let mut sum = 0.0f32;
    for k in first..first + floats_per_item {
        sum += series.term(k, total_terms);
    }
    sum
}

/// Reduce one group's local memory in ascending local id.
#[inline]
pub fn group_reduce(local: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for &v in local {
        sum += v;
    }
    sum
}

/// Host-side reduction over group results in ascending group index.
pub fn host_reduce(partials: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for &v in partials {
        sum += v;
    }
    sum
}

/// Single-threaded partial sums in device order, one per work group.
///
/// Fails when the grid's term count overflows.
pub fn reference_partial_sums(series: TermSeries, grid: &WorkGrid, floats_per_item: usize) -> ComputeResult<Vec<f32>> {
    let total = grid.total_terms(floats_per_item)?;
    let local_size = grid.local_size;
    let mut local = vec![0.0f32; local_size];

    let partials = (0..grid.buckets())
        .map(|group| {
            for (lid, slot) in local.iter_mut().enumerate() {
                *slot = work_item_sum(series, group * local_size + lid, floats_per_item, total);
            }
            group_reduce(&local)
        })
        .collect();
    Ok(partials)
}

/// Final estimate from per-group results.
#[derive(Debug, Clone, PartialEq)]
pub struct PiEstimate {
    /// One partial sum per work group.
    pub partials: Vec<f32>,
    /// Host reduction of `partials`.
    pub sum: f32,
    /// `sum * 4`.
    pub pi: f32,
}

impl PiEstimate {
    pub fn from_partials(partials: Vec<f32>) -> Self {
        let sum = host_reduce(&partials);
        Self {
            partials,
            sum,
            pi: sum * PI_QUADRANT_FACTOR,
        }
    }

    /// Absolute error against `std::f32::consts::PI`.
    pub fn error(&self) -> f32 {
        (self.pi - std::f32::consts::PI).abs()
    }
}
