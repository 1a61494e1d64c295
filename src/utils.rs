//! Utility functions

use crate::error::{ConcatError, Result};
use crate::types::{FilenameOrder, Index3};

/// Extension of brick snapshot files
pub const SPH_EXTENSION: &str = "sph";

/// Allocate a zeroed sample buffer, reporting failure instead of aborting
pub fn alloc_samples(len: usize) -> Result<Vec<f32>> {
    let mut samples = Vec::new();
    samples
        .try_reserve_exact(len)
        .map_err(|_| ConcatError::AllocationFailure(len))?;
    samples.resize(len, 0.0);
    Ok(samples)
}

/// Product of the three axes, `None` on overflow
pub fn checked_volume(dims: Index3) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Format byte size in human-readable form
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Filename of one brick snapshot
///
/// A run with a single subdomain carries only the step number; otherwise the
/// linear cell index is added before or after it according to `order`.
pub fn sph_file_name(
    prefix: &str,
    step: i64,
    cell: usize,
    order: FilenameOrder,
    single_cell: bool,
) -> String {
    let suffix = if single_cell {
        format!("{:010}", step)
    } else {
        match order {
            FilenameOrder::StepRank => format!("{:010}_id{:06}", step, cell),
            FilenameOrder::RankStep => format!("id{:06}_{:010}", cell, step),
        }
    };
    format!("{}_{}.{}", prefix, suffix, SPH_EXTENSION)
}
