//! Per-step and run-level metadata

use crate::types::{BrickFormat, Index3, ValueRange};
use serde::{Deserialize, Serialize};

/// One declared time slice of the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeStepRecord {
    /// Simulation step number
    pub step: i64,

    /// Physical time of the step
    pub time: f64,

    /// Declared min/max per component
    pub ranges: Vec<ValueRange>,

    /// Declared min/max of the vector magnitude, multi-component fields only
    pub vector_range: Option<ValueRange>,
}

impl TimeStepRecord {
    pub fn new(step: i64, time: f64, components: usize) -> Self {
        Self {
            step,
            time,
            ranges: vec![ValueRange::default(); components],
            vector_range: if components > 1 {
                Some(ValueRange::default())
            } else {
                None
            },
        }
    }

    /// Step and time only
    pub fn unit(&self) -> StepUnit {
        StepUnit {
            step: self.step,
            time: self.time,
        }
    }
}

/// Step number and time of an assembled snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepUnit {
    pub step: i64,
    pub time: f64,
}

/// Serializable overview of a loaded decomposition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSummary {
    pub format: BrickFormat,
    pub components: usize,
    pub guide_cells: usize,
    pub global_voxel: Index3,
    pub global_division: Index3,
    pub global_origin: [f64; 3],
    pub global_region: [f64; 3],
    pub pitch: [f64; 3],
    pub bricks: usize,
    pub placeholder_bricks: usize,
    pub has_active_mask: bool,
    pub steps: Vec<StepUnit>,
    /// Size of one assembled step, human readable
    pub assembled_size: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_step_record_shape() {
        let scalar = TimeStepRecord::new(10, 0.5, 1);
        assert_eq!(scalar.ranges.len(), 1);
        assert!(scalar.vector_range.is_none());

        let vector = TimeStepRecord::new(20, 1.0, 3);
        assert_eq!(vector.ranges.len(), 3);
        assert!(vector.vector_range.is_some());
        assert_eq!(vector.unit(), StepUnit { step: 20, time: 1.0 });
    }
}
