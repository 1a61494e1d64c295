//! Core data types shared by the manifest, codec and assembler

use crate::error::{ConcatError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer triple in (x, y, z) order: voxel counts, voxel offsets or grid coordinates
pub type Index3 = [usize; 3];

/// Kind of field stored in a snapshot file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum FieldKind {
    /// One value per voxel
    Scalar = 1,
    /// Three values per voxel
    Vector = 2,
}

impl FieldKind {
    /// Decode the on-disk kind code
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(FieldKind::Scalar),
            2 => Ok(FieldKind::Vector),
            _ => Err(ConcatError::FormatUnsupported(format!(
                "unknown field kind code {}",
                code
            ))),
        }
    }

    /// Pick the kind able to hold `components` values per voxel
    pub fn for_components(components: usize) -> Result<Self> {
        match components {
            1 => Ok(FieldKind::Scalar),
            3 => Ok(FieldKind::Vector),
            n => Err(ConcatError::FormatUnsupported(format!(
                "{} components cannot be stored in an SPH file",
                n
            ))),
        }
    }

    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Number of values per voxel
    pub fn components(&self) -> usize {
        match self {
            FieldKind::Scalar => 1,
            FieldKind::Vector => 3,
        }
    }
}

/// Floating point precision of a snapshot file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum Precision {
    /// 32-bit floats, 32-bit header integers
    Single = 1,
    /// 64-bit floats, 64-bit header integers
    Double = 2,
}

impl Precision {
    /// Decode the on-disk precision code
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(Precision::Single),
            2 => Ok(Precision::Double),
            _ => Err(ConcatError::FormatUnsupported(format!(
                "unknown precision code {}",
                code
            ))),
        }
    }

    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Size in bytes of one header integer or one sample
    pub fn word_size(&self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Double => 8,
        }
    }
}

impl Default for Precision {
    fn default() -> Self {
        Precision::Single
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::Single => write!(f, "single"),
            Precision::Double => write!(f, "double"),
        }
    }
}

/// Field file format declared by the manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrickFormat {
    Sph,
    Plot3d,
}

impl BrickFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sph" => Some(BrickFormat::Sph),
            "plot3d" => Some(BrickFormat::Plot3d),
            _ => None,
        }
    }
}

/// Order of the step number and the rank id inside a brick filename
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilenameOrder {
    /// `{prefix}_{step}_id{rank}.sph`
    StepRank,
    /// `{prefix}_id{rank}_{step}.sph`
    RankStep,
}

impl Default for FilenameOrder {
    fn default() -> Self {
        FilenameOrder::RankStep
    }
}

/// Value range of a field component
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Smallest range covering every value, `None` for an empty input
    pub fn of<I: IntoIterator<Item = f32>>(values: I) -> Option<Self> {
        values.into_iter().fold(None, |acc, v| {
            let v = v as f64;
            Some(match acc {
                None => ValueRange::new(v, v),
                Some(r) => ValueRange::new(r.min.min(v), r.max.max(v)),
            })
        })
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

impl Default for ValueRange {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_kind_codes() {
        assert_eq!(FieldKind::from_code(1).unwrap(), FieldKind::Scalar);
        assert_eq!(FieldKind::from_code(2).unwrap().components(), 3);
        assert!(matches!(
            FieldKind::from_code(3),
            Err(ConcatError::FormatUnsupported(_))
        ));
        assert!(FieldKind::for_components(2).is_err());
    }

    #[test]
    fn test_precision_codes() {
        assert_eq!(Precision::from_code(1).unwrap().word_size(), 4);
        assert_eq!(Precision::from_code(2).unwrap().word_size(), 8);
        assert!(Precision::from_code(0).is_err());
    }

    #[test]
    fn test_brick_format_parse() {
        assert_eq!(BrickFormat::parse("sph"), Some(BrickFormat::Sph));
        assert_eq!(BrickFormat::parse("plot3d"), Some(BrickFormat::Plot3d));
        assert_eq!(BrickFormat::parse("SPH"), None);
    }

    #[test]
    fn test_value_range_of() {
        let r = ValueRange::of([3.0f32, -1.0, 2.5]).unwrap();
        assert_eq!(r, ValueRange::new(-1.0, 3.0));
        assert!(r.is_valid());
        assert!(ValueRange::of(std::iter::empty()).is_none());
    }
}
