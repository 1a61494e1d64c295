//! Domain index - decomposition descriptor built from the index and process manifests
//!
//! A run is described by two manifests. The index manifest names the field
//! files and lists the time slices; it points at a process manifest holding the
//! global geometry and one record per process. When some subdomains produced no
//! output, the process manifest lists fewer records than the division grid has
//! cells and an active-subdomain mask tells which cells are missing; those cells
//! get placeholder bricks so that every cell owns exactly one brick.

use crate::error::{ConcatError, Result};
use crate::layout::{Brick, DivisionGrid};
use crate::manifest::{required, ManifestReader, TextManifest};
use crate::mask::ActiveSubdomainMask;
use crate::metadata::{DomainSummary, TimeStepRecord};
use crate::types::{BrickFormat, FilenameOrder, Index3, ValueRange};
use crate::utils::{checked_volume, format_bytes, sph_file_name};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

const FILE_FORMAT: &str = "/FileInfo/FileFormat";
const TIME_SLICE_DIRECTORY: &str = "/FileInfo/TimeSliceDirectory";
const DIRECTORY_PATH: &str = "/FileInfo/DirectoryPath";
const PREFIX: &str = "/FileInfo/Prefix";
const FILENAME_FORMAT: &str = "/FileInfo/FieldFilenameFormat";
const GUIDE_CELL: &str = "/FileInfo/GuideCell";
/// Component count keys, newest naming first
const COMPONENT_KEYS: [&str; 2] = ["/FileInfo/Component", "/FileInfo/NumVariables"];
const PROCESS_PATH: &str = "/FilePath/Process";
const TIME_SLICE: &str = "/TimeSlice";

const GLOBAL_ORIGIN: &str = "/Domain/GlobalOrigin";
const GLOBAL_REGION: &str = "/Domain/GlobalRegion";
const GLOBAL_VOXEL: &str = "/Domain/GlobalVoxel";
const GLOBAL_DIVISION: &str = "/Domain/GlobalDivision";
const ACTIVE_SUBDOMAIN_FILE: &str = "/Domain/ActiveSubdomainFile";
const PROCESS: &str = "/Process";

/// Decomposition of one simulation run
#[derive(Debug, Clone)]
pub struct DomainIndex {
    /// Path of the index manifest
    pub path: PathBuf,
    /// Directory of the index manifest; relative paths resolve against it
    pub base_dir: PathBuf,
    pub format: BrickFormat,
    pub time_slice_directory: bool,
    pub dir_path: String,
    pub prefix: String,
    pub filename_order: FilenameOrder,
    pub guide_cells: usize,
    pub components: usize,
    pub process_path: String,

    pub global_origin: [f64; 3],
    pub global_region: [f64; 3],
    pub global_voxel: Index3,
    pub grid: DivisionGrid,
    pub active_mask: Option<ActiveSubdomainMask>,

    /// One brick per division cell in (z, y, x) order once loaded
    pub bricks: Vec<Brick>,
    pub time_slices: Vec<TimeStepRecord>,
}

impl DomainIndex {
    /// Load the index manifest at `path` and the process manifest it references
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let index = TextManifest::from_file(path)?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let process_path: String = required(PROCESS_PATH, index.get_str(PROCESS_PATH)?)?;
        if process_path.is_empty() {
            return Err(ConcatError::invalid(PROCESS_PATH, "empty path"));
        }
        let process = TextManifest::from_file(base_dir.join(&process_path))?;

        Self::from_readers(path, &index, &process)
    }

    /// Build the index from already-parsed manifests
    ///
    /// `path` locates the index manifest; the mask file and the brick files are
    /// resolved against its directory.
    pub fn from_readers(
        path: impl AsRef<Path>,
        index: &impl ManifestReader,
        process: &impl ManifestReader,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let format_name = required(FILE_FORMAT, index.get_str(FILE_FORMAT)?)?;
        let format = BrickFormat::parse(&format_name).ok_or_else(|| {
            ConcatError::invalid(FILE_FORMAT, format!("unknown format '{}'", format_name))
        })?;
        let time_slice_directory = index.get_str(TIME_SLICE_DIRECTORY)?.as_deref() == Some("on");
        let dir_path = index.get_str(DIRECTORY_PATH)?.unwrap_or_default();
        let prefix = index.get_str(PREFIX)?.unwrap_or_default();
        let filename_order = match index.get_str(FILENAME_FORMAT)?.as_deref() {
            Some("step_rank") => FilenameOrder::StepRank,
            _ => FilenameOrder::RankStep,
        };
        let guide_cells = match index.get_i64(GUIDE_CELL)? {
            None => 0,
            Some(g) => usize::try_from(g)
                .map_err(|_| ConcatError::invalid(GUIDE_CELL, format!("negative width {}", g)))?,
        };
        let components = parse_components(index)?;
        let process_path = required(PROCESS_PATH, index.get_str(PROCESS_PATH)?)?;
        let time_slices = parse_time_slices(index, components)?;

        let global_origin = required(GLOBAL_ORIGIN, process.get_vec3_f64(GLOBAL_ORIGIN)?)?;
        let global_region = required(GLOBAL_REGION, process.get_vec3_f64(GLOBAL_REGION)?)?;
        let global_voxel = to_index3(
            GLOBAL_VOXEL,
            required(GLOBAL_VOXEL, process.get_vec3_i64(GLOBAL_VOXEL)?)?,
        )?;
        match checked_volume(global_voxel) {
            Some(voxels) if voxels >= 1 => {}
            Some(_) => {
                return Err(ConcatError::GeometryInvariantViolated(format!(
                    "global voxel {:?} is empty",
                    global_voxel
                )))
            }
            None => {
                return Err(ConcatError::GeometryInvariantViolated(format!(
                    "global voxel {:?} overflows the voxel count",
                    global_voxel
                )))
            }
        }
        let grid = DivisionGrid::new(to_index3(
            GLOBAL_DIVISION,
            required(GLOBAL_DIVISION, process.get_vec3_i64(GLOBAL_DIVISION)?)?,
        )?)?;

        let active_mask = match process.get_str(ACTIVE_SUBDOMAIN_FILE)? {
            Some(file) if !file.is_empty() => {
                let mask_path = base_dir.join(&file);
                match ActiveSubdomainMask::load(&mask_path, &grid) {
                    Ok(mask) => Some(mask),
                    Err(err) => {
                        warn!(
                            path = %mask_path.display(),
                            error = %err,
                            "ignoring active subdomain file"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        let declared = parse_bricks(process)?;
        let bricks = reconcile(declared, &grid, active_mask.as_ref())?;

        let domain = Self {
            path,
            base_dir,
            format,
            time_slice_directory,
            dir_path,
            prefix,
            filename_order,
            guide_cells,
            components,
            process_path,
            global_origin,
            global_region,
            global_voxel,
            grid,
            active_mask,
            bricks,
            time_slices,
        };
        info!(
            voxel = ?domain.global_voxel,
            division = ?domain.grid.shape(),
            bricks = domain.bricks.len(),
            steps = domain.time_slices.len(),
            "loaded domain index"
        );
        Ok(domain)
    }

    /// Voxel pitch: region length over voxel count, zero on an empty axis
    pub fn pitch(&self) -> [f64; 3] {
        let mut pitch = [0.0; 3];
        for (axis, p) in pitch.iter_mut().enumerate() {
            if self.global_voxel[axis] > 0 {
                *p = self.global_region[axis] / self.global_voxel[axis] as f64;
            }
        }
        pitch
    }

    /// Brick owning the division cell at `coords`
    pub fn brick_at(&self, coords: Index3) -> Option<&Brick> {
        if !self.grid.contains(coords) {
            return None;
        }
        self.bricks.get(self.grid.linear_index(coords))
    }

    /// Number of bricks synthesized for inactive cells
    pub fn placeholder_count(&self) -> usize {
        self.bricks.iter().filter(|b| b.is_placeholder()).count()
    }

    /// Position of `step` in the time slice list
    pub fn step_position(&self, step: i64) -> Option<usize> {
        self.time_slices.iter().position(|ts| ts.step == step)
    }

    /// File holding division cell `cell` at simulation step `step`
    pub fn brick_file_path(&self, step: i64, cell: usize) -> PathBuf {
        let name = sph_file_name(
            &self.prefix,
            step,
            cell,
            self.filename_order,
            self.grid.cell_count() == 1,
        );
        self.base_dir.join(&self.dir_path).join(name)
    }

    pub fn summary(&self) -> DomainSummary {
        let voxels = checked_volume(self.global_voxel).unwrap_or(usize::MAX);
        DomainSummary {
            format: self.format,
            components: self.components,
            guide_cells: self.guide_cells,
            global_voxel: self.global_voxel,
            global_division: self.grid.shape(),
            global_origin: self.global_origin,
            global_region: self.global_region,
            pitch: self.pitch(),
            bricks: self.bricks.len(),
            placeholder_bricks: self.placeholder_count(),
            has_active_mask: self.active_mask.is_some(),
            steps: self.time_slices.iter().map(TimeStepRecord::unit).collect(),
            assembled_size: format_bytes(voxels.saturating_mul(self.components).saturating_mul(4)),
        }
    }
}

fn parse_components(index: &impl ManifestReader) -> Result<usize> {
    let key = index
        .first_present(&COMPONENT_KEYS)
        .ok_or_else(|| ConcatError::ManifestKeyMissing(COMPONENT_KEYS.join(" or ")))?;
    let value = required(key, index.get_i64(key)?)?;
    match usize::try_from(value) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConcatError::invalid(key, format!("component count {} must be positive", value))),
    }
}

fn parse_time_slices(
    index: &impl ManifestReader,
    components: usize,
) -> Result<Vec<TimeStepRecord>> {
    let count = index.count_children(TIME_SLICE);
    if count < 1 {
        return Err(ConcatError::invalid(TIME_SLICE, "no time slices declared"));
    }

    let mut slices = Vec::with_capacity(count);
    for i in 0..count {
        let base = format!("{}/Slice[{}]", TIME_SLICE, i);
        let mut record = TimeStepRecord::new(0, 0.0, components);
        if let Some(step) = index.get_i64(&format!("{}/Step", base))? {
            record.step = step;
        }
        if let Some(time) = index.get_f64(&format!("{}/Time", base))? {
            record.time = time;
        }
        for (j, range) in record.ranges.iter_mut().enumerate() {
            read_range(index, &format!("{}/MinMax[{}]", base, j), range)?;
        }
        if let Some(range) = record.vector_range.as_mut() {
            read_range(index, &format!("{}/VectorMinMax", base), range)?;
        }
        slices.push(record);
    }
    debug!(count, "parsed time slices");
    Ok(slices)
}

fn read_range(index: &impl ManifestReader, base: &str, range: &mut ValueRange) -> Result<()> {
    if let Some(min) = index.get_f64(&format!("{}/Min", base))? {
        range.min = min;
    }
    if let Some(max) = index.get_f64(&format!("{}/Max", base))? {
        range.max = max;
    }
    Ok(())
}

fn parse_bricks(process: &impl ManifestReader) -> Result<Vec<Brick>> {
    let count = process.count_children(PROCESS);
    if count < 1 {
        return Err(ConcatError::invalid(PROCESS, "no process records declared"));
    }

    let mut bricks = Vec::with_capacity(count);
    for i in 0..count {
        let base = format!("{}/Rank[{}]", PROCESS, i);
        let id = process.get_i64(&format!("{}/ID", base))?.unwrap_or(i as i64);

        let size_key = format!("{}/VoxelSize", base);
        let extent = match process.get_vec3_i64(&size_key)? {
            Some(v) => to_index3(&size_key, v)?,
            None => [0; 3],
        };

        // head indices are 1-based
        let head_key = format!("{}/HeadIndex", base);
        let origin = match process.get_vec3_i64(&head_key)? {
            Some(v) => {
                let mut zero_based = [0i64; 3];
                for (dst, &src) in zero_based.iter_mut().zip(v.iter()) {
                    *dst = src.checked_sub(1).ok_or_else(|| {
                        ConcatError::invalid(&head_key, format!("{:?} is out of range", v))
                    })?;
                }
                to_index3(&head_key, zero_based)?
            }
            None => [0; 3],
        };

        let brick = Brick::new(origin, extent, Some(id));
        if brick.checked_end().is_none() {
            return Err(ConcatError::invalid(
                &size_key,
                format!("{:?} from head {:?} overflows the voxel range", extent, origin),
            ));
        }
        bricks.push(brick);
    }
    Ok(bricks)
}

fn to_index3(key: &str, v: [i64; 3]) -> Result<Index3> {
    let mut out = [0usize; 3];
    for (o, &x) in out.iter_mut().zip(v.iter()) {
        *o = usize::try_from(x)
            .map_err(|_| ConcatError::invalid(key, format!("{:?} has a negative component", v)))?;
    }
    Ok(out)
}

/// Sorted distinct brick boundaries along each axis
pub fn breakpoints(bricks: &[Brick]) -> [Vec<usize>; 3] {
    let mut sets: [BTreeSet<usize>; 3] = Default::default();
    for brick in bricks {
        let end = brick.end();
        for (axis, set) in sets.iter_mut().enumerate() {
            set.insert(brick.origin[axis]);
            set.insert(end[axis]);
        }
    }
    sets.map(|set| set.into_iter().collect())
}

/// Give every division cell a brick
///
/// With as many records as cells the declared bricks are returned unchanged and
/// the mask is not consulted. With fewer records, active cells take the declared
/// bricks in order and inactive cells get placeholders spanning the breakpoints
/// that bound them.
pub fn reconcile(
    declared: Vec<Brick>,
    grid: &DivisionGrid,
    mask: Option<&ActiveSubdomainMask>,
) -> Result<Vec<Brick>> {
    let cells = grid.cell_count();
    match declared.len().cmp(&cells) {
        Ordering::Equal => return Ok(declared),
        Ordering::Greater => {
            return Err(ConcatError::GeometryInvariantViolated(format!(
                "{} process records for {} division cells",
                declared.len(),
                cells
            )))
        }
        Ordering::Less => {}
    }

    let mask = mask.ok_or_else(|| {
        ConcatError::ReconciliationMismatch(format!(
            "{} process records for {} division cells and no valid active subdomain mask",
            declared.len(),
            cells
        ))
    })?;

    let breaks = breakpoints(&declared);
    let shape = grid.shape();
    for axis in 0..3 {
        if shape[axis].checked_add(1) != Some(breaks[axis].len()) {
            return Err(ConcatError::ReconciliationMismatch(format!(
                "axis {} has {} distinct brick boundaries for {} cells",
                axis,
                breaks[axis].len(),
                shape[axis]
            )));
        }
    }
    if mask.active_count() != declared.len() {
        return Err(ConcatError::ReconciliationMismatch(format!(
            "mask marks {} active cells but {} process records are declared",
            mask.active_count(),
            declared.len()
        )));
    }

    let [bx, by, bz] = &breaks;
    let mut real = declared.into_iter();
    let mut bricks = Vec::with_capacity(cells);
    for index in 0..cells {
        if mask.is_active_index(index) {
            let brick = real.next().ok_or_else(|| {
                ConcatError::ReconciliationMismatch("ran out of process records".to_string())
            })?;
            bricks.push(brick);
        } else {
            let [i, j, k] = grid.cell_coords(index);
            bricks.push(Brick::placeholder(
                [bx[i], by[j], bz[k]],
                [bx[i + 1] - bx[i], by[j + 1] - by[j], bz[k + 1] - bz[k]],
            ));
        }
    }

    debug!(
        cells,
        placeholders = bricks.iter().filter(|b| b.is_placeholder()).count(),
        "reconciled bricks against active subdomain mask"
    );
    Ok(bricks)
}
