//! Decomposition layout - the division grid and the bricks that tile it

use crate::error::{ConcatError, Result};
use crate::types::Index3;
use crate::utils::checked_volume;
use serde::{Deserialize, Serialize};

/// One subdomain's voxel block in global voxel coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brick {
    /// Global voxel offset of the first interior voxel
    pub origin: Index3,
    /// Interior voxel counts
    pub extent: Index3,
    /// Process id, `None` for placeholders of inactive subdomains
    pub id: Option<i64>,
}

impl Brick {
    /// Brick of process `id`
    pub fn new(origin: Index3, extent: Index3, id: Option<i64>) -> Self {
        Self { origin, extent, id }
    }

    /// Placeholder for a subdomain that produced no output
    pub fn placeholder(origin: Index3, extent: Index3) -> Self {
        Self::new(origin, extent, None)
    }

    /// One past the last voxel on each axis, saturating at `usize::MAX`
    pub fn end(&self) -> Index3 {
        [
            self.origin[0].saturating_add(self.extent[0]),
            self.origin[1].saturating_add(self.extent[1]),
            self.origin[2].saturating_add(self.extent[2]),
        ]
    }

    /// [`end`](Self::end), or `None` when an axis overflows
    pub fn checked_end(&self) -> Option<Index3> {
        Some([
            self.origin[0].checked_add(self.extent[0])?,
            self.origin[1].checked_add(self.extent[1])?,
            self.origin[2].checked_add(self.extent[2])?,
        ])
    }

    /// Interior voxels of the brick, `None` on overflow
    pub fn voxel_count(&self) -> Option<usize> {
        checked_volume(self.extent)
    }

    /// Whether the brick stands in for an inactive subdomain
    pub fn is_placeholder(&self) -> bool {
        self.id.is_none()
    }
}

/// Shape of the division grid, one cell per simulation process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Index3", into = "Index3")]
pub struct DivisionGrid {
    shape: Index3,
}

impl TryFrom<Index3> for DivisionGrid {
    type Error = ConcatError;

    fn try_from(shape: Index3) -> Result<Self> {
        Self::new(shape)
    }
}

impl From<DivisionGrid> for Index3 {
    fn from(grid: DivisionGrid) -> Self {
        grid.shape
    }
}

impl DivisionGrid {
    /// Create a grid; every axis must hold at least one cell and the cell
    /// count must fit in `usize`
    pub fn new(shape: Index3) -> Result<Self> {
        match checked_volume(shape) {
            Some(cells) if cells >= 1 => Ok(Self { shape }),
            Some(_) => Err(ConcatError::GeometryInvariantViolated(format!(
                "division grid {:?} has no cells",
                shape
            ))),
            None => Err(ConcatError::GeometryInvariantViolated(format!(
                "division grid {:?} overflows the cell count",
                shape
            ))),
        }
    }

    /// Cells per axis in (x, y, z) order
    pub fn shape(&self) -> Index3 {
        self.shape
    }

    /// Total number of cells
    pub fn cell_count(&self) -> usize {
        checked_volume(self.shape).unwrap_or(0)
    }

    /// Linear cell index, x fastest: `i + nx*j + nx*ny*k`
    pub fn linear_index(&self, coords: Index3) -> usize {
        let [nx, ny, _] = self.shape;
        coords[0] + nx * coords[1] + nx * ny * coords[2]
    }

    /// Inverse of [`linear_index`](Self::linear_index)
    pub fn cell_coords(&self, index: usize) -> Index3 {
        let [nx, ny, _] = self.shape;
        [index % nx, (index / nx) % ny, index / (nx * ny)]
    }

    /// Whether `coords` names a cell of the grid
    pub fn contains(&self, coords: Index3) -> bool {
        coords.iter().zip(self.shape.iter()).all(|(&c, &n)| c < n)
    }

    /// Region covering every cell
    pub fn whole(&self) -> GridRegion {
        GridRegion {
            min: [0, 0, 0],
            max: [self.shape[0] - 1, self.shape[1] - 1, self.shape[2] - 1],
        }
    }
}

/// Inclusive box of division-grid cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridRegion {
    pub min: Index3,
    pub max: Index3,
}

impl GridRegion {
    /// Region spanning `min..=max` on each axis
    pub fn new(min: Index3, max: Index3) -> Self {
        Self { min, max }
    }

    /// Check ordering and that both corners lie inside `grid`
    pub fn validate(&self, grid: &DivisionGrid) -> Result<()> {
        if !grid.contains(self.min) || !grid.contains(self.max) {
            return Err(ConcatError::OutOfBounds(format!(
                "region {:?}..={:?} outside division grid {:?}",
                self.min,
                self.max,
                grid.shape()
            )));
        }
        if self.min.iter().zip(self.max.iter()).any(|(lo, hi)| lo > hi) {
            return Err(ConcatError::OutOfBounds(format!(
                "region min {:?} exceeds max {:?}",
                self.min, self.max
            )));
        }
        Ok(())
    }

    /// Number of cells in a validated region
    pub fn cell_count(&self) -> usize {
        (0..3).map(|a| self.max[a] - self.min[a] + 1).product()
    }

    /// Cells of the region in (z, y, x) order, x fastest
    pub fn cells(&self) -> impl Iterator<Item = Index3> + '_ {
        (self.min[2]..=self.max[2]).flat_map(move |k| {
            (self.min[1]..=self.max[1])
                .flat_map(move |j| (self.min[0]..=self.max[0]).map(move |i| [i, j, k]))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_requires_cells() {
        assert!(DivisionGrid::new([2, 0, 3]).is_err());
        let grid = DivisionGrid::new([2, 3, 4]).unwrap();
        assert_eq!(grid.cell_count(), 24);
    }

    #[test]
    fn test_linear_index_conversion() {
        let grid = DivisionGrid::new([4, 3, 2]).unwrap();
        assert_eq!(grid.linear_index([1, 0, 0]), 1);
        assert_eq!(grid.linear_index([0, 1, 0]), 4);
        assert_eq!(grid.linear_index([0, 0, 1]), 12);
        let coords = [3, 2, 1];
        assert_eq!(grid.cell_coords(grid.linear_index(coords)), coords);
    }

    #[test]
    fn test_region_validation() {
        let grid = DivisionGrid::new([2, 2, 2]).unwrap();
        assert!(grid.whole().validate(&grid).is_ok());
        assert!(GridRegion::new([0, 0, 0], [2, 0, 0]).validate(&grid).is_err());
        assert!(GridRegion::new([1, 0, 0], [0, 1, 1]).validate(&grid).is_err());
    }

    #[test]
    fn test_region_cells_order() {
        let region = GridRegion::new([0, 0, 0], [1, 1, 0]);
        let cells: Vec<_> = region.cells().collect();
        assert_eq!(cells, vec![[0, 0, 0], [1, 0, 0], [0, 1, 0], [1, 1, 0]]);
        assert_eq!(region.cell_count(), 4);
    }

    #[test]
    fn test_brick_end() {
        let brick = Brick::new([4, 0, 8], [4, 2, 1], Some(3));
        assert_eq!(brick.end(), [8, 2, 9]);
        assert_eq!(brick.voxel_count(), Some(8));
        assert!(!brick.is_placeholder());
        assert!(Brick::placeholder([0; 3], [1; 3]).is_placeholder());
    }

    #[test]
    fn test_brick_end_overflow() {
        let brick = Brick::new([usize::MAX, 0, 0], [1, 1, 1], Some(0));
        assert_eq!(brick.checked_end(), None);
        assert_eq!(brick.end(), [usize::MAX, 1, 1]);
        assert_eq!(Brick::new([0; 3], [usize::MAX, 2, 1], None).voxel_count(), None);
    }

    #[test]
    fn test_grid_deserialize_is_validated() {
        let grid: DivisionGrid = serde_json::from_str("[2, 3, 1]").unwrap();
        assert_eq!(grid.cell_count(), 6);
        assert_eq!(serde_json::to_string(&grid).unwrap(), "[2,3,1]");
        assert!(serde_json::from_str::<DivisionGrid>("[2, 0, 1]").is_err());
    }

    #[test]
    fn test_grid_cell_count_overflow() {
        let huge = 1usize << (usize::BITS / 2);
        assert!(matches!(
            DivisionGrid::new([huge, huge, 2]),
            Err(ConcatError::GeometryInvariantViolated(_))
        ));
    }
}
