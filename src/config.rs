//! Run configuration for concatenating a whole series of steps

use crate::error::{ConcatError, Result};
use crate::layout::GridRegion;
use crate::types::Precision;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Placeholder in the output template replaced by the step number
pub const STEP_PLACEHOLDER: &str = "%s";

/// What to assemble and where to write it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcatConfig {
    /// Index manifest of the run
    pub manifest: PathBuf,

    /// Output path containing [`STEP_PLACEHOLDER`]
    pub output_template: String,

    /// Only this simulation step, all steps when `None`
    pub step: Option<i64>,

    /// Division-grid sub-region, whole grid when `None`
    pub region: Option<GridRegion>,

    /// Precision of the written files
    pub precision: Precision,
}

impl ConcatConfig {
    pub fn new(manifest: impl Into<PathBuf>, output_template: impl Into<String>) -> Self {
        Self {
            manifest: manifest.into(),
            output_template: output_template.into(),
            step: None,
            region: None,
            precision: Precision::Single,
        }
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_region(mut self, region: GridRegion) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.output_template.contains(STEP_PLACEHOLDER) {
            return Err(ConcatError::Configuration(format!(
                "output template '{}' lacks the {} placeholder",
                self.output_template, STEP_PLACEHOLDER
            )));
        }
        Ok(())
    }

    /// Output path for `step`, zero-padded to six digits
    pub fn output_path(&self, step: i64) -> PathBuf {
        PathBuf::from(
            self.output_template
                .replacen(STEP_PLACEHOLDER, &format!("{:06}", step), 1),
        )
    }
}

/// Parse `i0,j0,k0,i1,j1,k1` into an inclusive grid region
pub fn parse_region(text: &str) -> Result<GridRegion> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ConcatError::Configuration(format!("region '{}': {}", text, e)))?;
    match values.as_slice() {
        &[i0, j0, k0, i1, j1, k1] => Ok(GridRegion::new([i0, j0, k0], [i1, j1, k1])),
        _ => Err(ConcatError::Configuration(format!(
            "region '{}' needs six comma-separated indices",
            text
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path() {
        let config = ConcatConfig::new("run/index.dfi", "out/prs_%s.sph");
        assert!(config.validate().is_ok());
        assert_eq!(config.output_path(42), PathBuf::from("out/prs_000042.sph"));
    }

    #[test]
    fn test_template_requires_placeholder() {
        let config = ConcatConfig::new("index.dfi", "out.sph");
        assert!(matches!(
            config.validate(),
            Err(ConcatError::Configuration(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = ConcatConfig::new("index.dfi", "%s.sph")
            .with_step(10)
            .with_region(GridRegion::new([0, 0, 0], [1, 1, 0]))
            .with_precision(Precision::Double);
        assert_eq!(config.step, Some(10));
        assert_eq!(config.precision, Precision::Double);
        let json = serde_json::to_string(&config).unwrap();
        let back: ConcatConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_parse_region() {
        assert_eq!(
            parse_region("0, 1, 2, 3, 4, 5").unwrap(),
            GridRegion::new([0, 1, 2], [3, 4, 5])
        );
        assert!(parse_region("0,1,2").is_err());
        assert!(parse_region("0,1,x,3,4,5").is_err());
    }
}
