//! Field assembly - main API for rebuilding one dense field per time step

use crate::codec::{self, SphHeader};
use crate::domain::DomainIndex;
use crate::error::{ConcatError, Result};
use crate::layout::{Brick, GridRegion};
use crate::metadata::StepUnit;
use crate::types::{FieldKind, Index3, Precision, ValueRange};
use crate::utils::{alloc_samples, checked_volume};
use ndarray::{s, Array3, Array4, ArrayView4, Axis};
use std::path::Path;
use tracing::{debug, info, instrument, trace};

/// Assembles the bricks of a [`DomainIndex`] into one field per step
///
/// The session borrows the index and keeps exactly one assembled step in
/// memory. A failed [`load_step`](Self::load_step) leaves the previously loaded
/// step in place.
pub struct FieldAssembler<'a> {
    domain: &'a DomainIndex,
    region: GridRegion,
    dims: Index3,
    steps: Vec<StepUnit>,
    current: usize,
    /// Samples shaped `(z, y, x, component)`
    field: Array4<f32>,
}

impl<'a> FieldAssembler<'a> {
    /// Bind to `domain`, restricted to `region` of the division grid when given,
    /// and load the first step
    ///
    /// The assembled extent is the bounding box of the selected bricks measured
    /// from the global voxel origin, so it is tight only for regions anchored at
    /// the grid origin; other regions get a buffer padded by the offset of the
    /// region's first brick.
    pub fn bind(domain: &'a DomainIndex, region: Option<GridRegion>) -> Result<Self> {
        let region = match region {
            Some(region) => {
                region.validate(&domain.grid)?;
                region
            }
            None => domain.grid.whole(),
        };

        let steps: Vec<StepUnit> = domain.time_slices.iter().map(|ts| ts.unit()).collect();
        if steps.is_empty() {
            return Err(ConcatError::invalid("/TimeSlice", "no time slices declared"));
        }

        let selected = region
            .cells()
            .map(|cell| brick_for(domain, cell))
            .collect::<Result<Vec<_>>>()?;
        let dims = bounding_extent(selected.iter().copied());
        debug!(region = ?region, dims = ?dims, "binding field assembler");

        let field = assemble_step(domain, &region, dims, steps[0].step)?;
        Ok(Self {
            domain,
            region,
            dims,
            steps,
            current: 0,
            field,
        })
    }

    /// Assemble the step at position `index` of the step list
    #[instrument(skip(self), fields(step = tracing::field::Empty))]
    pub fn load_step(&mut self, index: usize) -> Result<()> {
        let unit = *self.steps.get(index).ok_or_else(|| {
            ConcatError::OutOfBounds(format!(
                "step index {} of {} steps",
                index,
                self.steps.len()
            ))
        })?;
        tracing::Span::current().record("step", unit.step);

        self.field = assemble_step(self.domain, &self.region, self.dims, unit.step)?;
        self.current = index;
        Ok(())
    }

    /// Write the assembled step as a single-precision SPH file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.save_with(path, Precision::Single)
    }

    /// Write the assembled step as one SPH brick without guide cells
    pub fn save_with(&self, path: impl AsRef<Path>, precision: Precision) -> Result<()> {
        let path = path.as_ref();
        let pitch = self.domain.pitch();
        let reference = brick_for(self.domain, self.region.min)?.origin;
        let mut origin = self.domain.global_origin;
        for axis in 0..3 {
            origin[axis] += pitch[axis] * reference[axis] as f64;
        }

        let unit = self.current_step();
        let header = SphHeader {
            kind: FieldKind::for_components(self.domain.components)?,
            precision,
            dims: self.dims,
            origin,
            pitch,
            step: unit.step,
            time: unit.time,
        };
        codec::write(path, &header, self.field.view())?;
        info!(path = %path.display(), step = unit.step, "saved assembled field");
        Ok(())
    }

    /// Domain index the session is bound to
    pub fn domain(&self) -> &DomainIndex {
        self.domain
    }

    /// Division-grid cells being assembled
    pub fn region(&self) -> GridRegion {
        self.region
    }

    /// Assembled voxel counts in (x, y, z) order
    pub fn dims(&self) -> Index3 {
        self.dims
    }

    /// Step and time of every declared time slice
    pub fn steps(&self) -> &[StepUnit] {
        &self.steps
    }

    /// Position of the loaded step in [`steps`](Self::steps)
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Step and time of the loaded field
    pub fn current_step(&self) -> StepUnit {
        self.steps[self.current]
    }

    /// Assembled samples shaped `(z, y, x, component)`
    pub fn field(&self) -> ArrayView4<'_, f32> {
        self.field.view()
    }

    /// One component of the assembled field, shaped `(z, y, x)`
    pub fn component(&self, component: usize) -> Result<Array3<f32>> {
        self.check_component(component)?;
        Ok(self.field.index_axis(Axis(3), component).to_owned())
    }

    /// Euclidean norm of each voxel's vector
    pub fn vector_magnitude(&self) -> Result<Array3<f32>> {
        if self.domain.components != 3 {
            return Err(ConcatError::FormatUnsupported(format!(
                "vector magnitude of a {}-component field",
                self.domain.components
            )));
        }
        Ok(self
            .field
            .map_axis(Axis(3), |v| v.iter().map(|x| x * x).sum::<f32>().sqrt()))
    }

    /// Min and max of one component over the assembled field
    pub fn value_range(&self, component: usize) -> Result<Option<ValueRange>> {
        self.check_component(component)?;
        Ok(ValueRange::of(
            self.field.index_axis(Axis(3), component).iter().copied(),
        ))
    }

    fn check_component(&self, component: usize) -> Result<()> {
        if component >= self.domain.components {
            return Err(ConcatError::OutOfBounds(format!(
                "component {} of {}",
                component, self.domain.components
            )));
        }
        Ok(())
    }
}

fn brick_for(domain: &DomainIndex, cell: Index3) -> Result<&Brick> {
    domain.brick_at(cell).ok_or_else(|| {
        ConcatError::GeometryInvariantViolated(format!("no brick for division cell {:?}", cell))
    })
}

/// Component-wise maximum of brick ends
fn bounding_extent<'b>(bricks: impl Iterator<Item = &'b Brick>) -> Index3 {
    bricks.fold([0; 3], |acc, b| {
        let end = b.end();
        [acc[0].max(end[0]), acc[1].max(end[1]), acc[2].max(end[2])]
    })
}

fn assemble_step(
    domain: &DomainIndex,
    region: &GridRegion,
    dims: Index3,
    step: i64,
) -> Result<Array4<f32>> {
    if domain.prefix.is_empty() {
        return Err(ConcatError::ManifestKeyMissing("/FileInfo/Prefix".to_string()));
    }
    let components = domain.components;
    let len = checked_volume(dims)
        .and_then(|v| v.checked_mul(components))
        .filter(|&n| n > 0)
        .ok_or_else(|| {
            ConcatError::GeometryInvariantViolated(format!("cannot assemble dims {:?}", dims))
        })?;
    let [nx, ny, nz] = dims;
    let mut field = Array4::from_shape_vec((nz, ny, nx, components), alloc_samples(len)?)?;

    let reference = brick_for(domain, region.min)?.origin;
    for cell in region.cells() {
        let index = domain.grid.linear_index(cell);
        let brick = brick_for(domain, cell)?;
        if brick.is_placeholder() {
            trace!(cell = ?cell, "skipping inactive subdomain");
            continue;
        }

        let path = domain.brick_file_path(step, index);
        let sph = codec::read(&path, domain.guide_cells)?;
        if sph.header.components() != components {
            return Err(ConcatError::FormatUnsupported(format!(
                "{} holds {} components, manifest declares {}",
                path.display(),
                sph.header.components(),
                components
            )));
        }
        if sph.interior_dims() != brick.extent {
            return Err(ConcatError::GeometryInvariantViolated(format!(
                "{} interior {:?} differs from declared extent {:?}",
                path.display(),
                sph.interior_dims(),
                brick.extent
            )));
        }

        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        for axis in 0..3 {
            lo[axis] = brick.origin[axis].checked_sub(reference[axis]).ok_or_else(|| {
                ConcatError::GeometryInvariantViolated(format!(
                    "brick at {:?} lies before region origin {:?}",
                    brick.origin, reference
                ))
            })?;
            hi[axis] = lo[axis] + brick.extent[axis];
            if hi[axis] > dims[axis] {
                return Err(ConcatError::GeometryInvariantViolated(format!(
                    "brick at {:?} exceeds assembled dims {:?}",
                    brick.origin, dims
                )));
            }
        }

        field
            .slice_mut(s![lo[2]..hi[2], lo[1]..hi[1], lo[0]..hi[0], ..])
            .assign(&sph.data);
        trace!(path = %path.display(), "scattered brick");
    }

    debug!(step, dims = ?dims, "assembled step");
    Ok(field)
}
