//! sphconcat - reassemble domain-decomposed SPH snapshots
//!
//! A domain-decomposed simulation writes one SPH file per process per time
//! step, plus a pair of text manifests describing the decomposition. This crate
//! reads the manifests into a [`DomainIndex`] and rebuilds, step by step, a
//! single dense field from all subdomain bricks with [`FieldAssembler`].
//!
//! # Features
//!
//! - Index/process manifest parsing with active-subdomain reconciliation
//! - Single and double precision SPH bricks, scalar and vector fields
//! - Guide-cell stripping
//! - Sub-region assembly on the division grid
//!
//! # Example
//!
//! ```rust,no_run
//! use sphconcat::{DomainIndex, FieldAssembler};
//!
//! # fn example() -> sphconcat::Result<()> {
//! let domain = DomainIndex::load("run/index.dfi")?;
//! let mut session = FieldAssembler::bind(&domain, None)?;
//! for i in 0..session.steps().len() {
//!     session.load_step(i)?;
//!     let step = session.current_step().step;
//!     session.save(format!("out/field_{:06}.sph", step))?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod mask;
pub mod metadata;
pub mod types;
pub mod utils;

// Re-exports
pub use assembler::FieldAssembler;
pub use codec::{SphBrick, SphHeader};
pub use config::ConcatConfig;
pub use domain::DomainIndex;
pub use error::{ConcatError, Result};
pub use layout::{Brick, DivisionGrid, GridRegion};
pub use manifest::{ManifestReader, ManifestValue, TextManifest};
pub use mask::ActiveSubdomainMask;
pub use metadata::{DomainSummary, StepUnit, TimeStepRecord};
pub use types::{BrickFormat, FieldKind, FilenameOrder, Index3, Precision, ValueRange};

/// Version of the sphconcat implementation
pub const SPHCONCAT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!SPHCONCAT_VERSION.is_empty());
    }
}
