//! Active-subdomain bitmap
//!
//! Layout: a 4-byte tag, the division shape as three little-endian `i32`, then
//! one byte per division cell in x-fastest order. A non-zero byte marks a cell
//! whose process wrote output.

use crate::error::{ConcatError, Result};
use crate::layout::DivisionGrid;
use crate::types::Index3;
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

/// Which division-grid cells hold real bricks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSubdomainMask {
    grid: DivisionGrid,
    flags: Vec<u8>,
}

impl ActiveSubdomainMask {
    /// Build a mask from one flag per cell
    pub fn new(grid: DivisionGrid, flags: Vec<u8>) -> Result<Self> {
        if flags.len() != grid.cell_count() {
            return Err(ConcatError::GeometryInvariantViolated(format!(
                "mask holds {} flags for {} cells",
                flags.len(),
                grid.cell_count()
            )));
        }
        Ok(Self { grid, flags })
    }

    /// Load a mask file whose shape must equal `grid`
    ///
    /// The leading tag is read but not checked.
    pub fn load(path: impl AsRef<Path>, grid: &DivisionGrid) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ConcatError::from_read(path, e))?;
        let mut reader = BufReader::new(file);

        let _tag = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| ConcatError::from_read(path, e))?;
        let mut shape = [0i32; 3];
        reader
            .read_i32_into::<LittleEndian>(&mut shape)
            .map_err(|e| ConcatError::from_read(path, e))?;
        let expected = grid.shape();
        if shape
            .iter()
            .zip(expected.iter())
            .any(|(&got, &want)| usize::try_from(got).ok() != Some(want))
        {
            return Err(ConcatError::GeometryInvariantViolated(format!(
                "mask shape {:?} differs from division {:?}",
                shape, expected
            )));
        }

        let cells = grid.cell_count();
        let mut flags = Vec::new();
        flags
            .try_reserve_exact(cells)
            .map_err(|_| ConcatError::AllocationFailure(cells))?;
        reader
            .take(cells as u64)
            .read_to_end(&mut flags)
            .map_err(|e| ConcatError::from_read(path, e))?;
        if flags.len() < cells {
            return Err(ConcatError::FileTruncated(path.to_path_buf()));
        }
        debug!(path = %path.display(), cells = flags.len(), "loaded active subdomain mask");
        Self::new(*grid, flags)
    }

    pub fn grid(&self) -> &DivisionGrid {
        &self.grid
    }

    /// Whether the cell at `coords` produced output
    pub fn is_active(&self, coords: Index3) -> bool {
        self.grid.contains(coords) && self.flags[self.grid.linear_index(coords)] != 0
    }

    /// Flag by linear cell index
    pub fn is_active_index(&self, index: usize) -> bool {
        self.flags.get(index).is_some_and(|&f| f != 0)
    }

    pub fn active_count(&self) -> usize {
        self.flags.iter().filter(|&&f| f != 0).count()
    }

    /// Encode in the on-disk layout
    pub fn to_bytes(&self, tag: [u8; 4]) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.flags.len());
        out.extend_from_slice(&tag);
        for n in self.grid.shape() {
            out.extend_from_slice(&(n as i32).to_le_bytes());
        }
        out.extend_from_slice(&self.flags);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_mask(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let grid = DivisionGrid::new([2, 2, 1]).unwrap();
        let mask = ActiveSubdomainMask::new(grid, vec![1, 0, 1, 1]).unwrap();
        let path = write_mask(&dir, "active.bin", &mask.to_bytes(*b"SBDM"));

        let loaded = ActiveSubdomainMask::load(&path, &grid).unwrap();
        assert_eq!(loaded, mask);
        assert_eq!(loaded.active_count(), 3);
        assert!(!loaded.is_active([1, 0, 0]));
        assert!(loaded.is_active([0, 1, 0]));
        assert!(!loaded.is_active([5, 0, 0]));
    }

    #[test]
    fn test_tag_is_not_checked() {
        let dir = TempDir::new().unwrap();
        let grid = DivisionGrid::new([1, 1, 2]).unwrap();
        let mask = ActiveSubdomainMask::new(grid, vec![0, 1]).unwrap();
        let path = write_mask(&dir, "m.bin", &mask.to_bytes(*b"XXXX"));
        assert!(ActiveSubdomainMask::load(&path, &grid).is_ok());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let grid = DivisionGrid::new([2, 1, 1]).unwrap();
        let mask = ActiveSubdomainMask::new(grid, vec![1, 0]).unwrap();
        let path = write_mask(&dir, "m.bin", &mask.to_bytes(*b"SBDM"));

        let other = DivisionGrid::new([1, 2, 1]).unwrap();
        assert!(matches!(
            ActiveSubdomainMask::load(&path, &other),
            Err(ConcatError::GeometryInvariantViolated(_))
        ));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_oversized_grid_reports_allocation_failure() {
        let dir = TempDir::new().unwrap();
        let n = i32::MAX as usize;
        let grid = DivisionGrid::new([n, n, 4]).unwrap();
        let mut bytes = b"SBDM".to_vec();
        for d in [i32::MAX, i32::MAX, 4] {
            bytes.extend_from_slice(&d.to_le_bytes());
        }
        bytes.extend_from_slice(&[1, 1, 1, 1]);
        let path = write_mask(&dir, "huge.bin", &bytes);
        assert!(matches!(
            ActiveSubdomainMask::load(&path, &grid),
            Err(ConcatError::AllocationFailure(_))
        ));
    }

    #[test]
    fn test_short_file_rejected() {
        let dir = TempDir::new().unwrap();
        let grid = DivisionGrid::new([2, 2, 2]).unwrap();
        let mut bytes = ActiveSubdomainMask::new(grid, vec![1; 8])
            .unwrap()
            .to_bytes(*b"SBDM");
        bytes.truncate(bytes.len() - 3);
        let path = write_mask(&dir, "m.bin", &bytes);
        assert!(matches!(
            ActiveSubdomainMask::load(&path, &grid),
            Err(ConcatError::FileTruncated(_))
        ));
    }
}
