//! SPH brick snapshot codec
//!
//! An SPH file is a sequence of Fortran unformatted records, each framed by a
//! 4-byte length marker on both sides, all little-endian:
//!
//! | record | payload (single) | payload (double) |
//! |--------|------------------|------------------|
//! | kind   | `i32 kind, i32 precision` | same |
//! | dims   | `3 × i32` | `3 × i64` |
//! | origin | `3 × f32` | `3 × f64` |
//! | pitch  | `3 × f32` | `3 × f64` |
//! | time   | `i32 step, f32 time` | `i64 step, f64 time` |
//! | data   | samples, x fastest, components interleaved | same, as `f64` |
//!
//! Samples are always handed out as `f32`; double precision bodies are
//! narrowed one x-row at a time.

use crate::error::{ConcatError, Result};
use crate::types::{FieldKind, Index3, Precision};
use crate::utils::{alloc_samples, checked_volume};
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{BufMut, BytesMut};
use ndarray::{s, Array4, ArrayView4};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, trace};

/// Everything stored ahead of the sample body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SphHeader {
    pub kind: FieldKind,
    pub precision: Precision,
    /// Voxel counts including guide cells
    pub dims: Index3,
    pub origin: [f64; 3],
    pub pitch: [f64; 3],
    pub step: i64,
    pub time: f64,
}

impl SphHeader {
    pub fn components(&self) -> usize {
        self.kind.components()
    }

    /// Number of stored values, `None` on overflow
    pub fn sample_count(&self) -> Option<usize> {
        checked_volume(self.dims)?.checked_mul(self.components())
    }
}

/// A decoded brick with guide cells removed
#[derive(Debug, Clone)]
pub struct SphBrick {
    pub header: SphHeader,
    /// Samples shaped `(z, y, x, component)`
    pub data: Array4<f32>,
}

impl SphBrick {
    /// Voxel counts of `data` in (x, y, z) order
    pub fn interior_dims(&self) -> Index3 {
        let shape = self.data.shape();
        [shape[2], shape[1], shape[0]]
    }
}

/// Read only the header of an SPH file
pub fn read_header(path: impl AsRef<Path>) -> Result<SphHeader> {
    let path = path.as_ref();
    let mut reader = open(path)?;
    decode_header(&mut reader, path)
}

/// Read an SPH file, stripping `guide` cells from every face
pub fn read(path: impl AsRef<Path>, guide: usize) -> Result<SphBrick> {
    let path = path.as_ref();
    let mut reader = open(path)?;
    let header = decode_header(&mut reader, path)?;

    if guide > 0 && header.dims.iter().any(|&d| d <= 2 * guide) {
        return Err(ConcatError::GeometryInvariantViolated(format!(
            "{}: dims {:?} too small for {} guide cells",
            path.display(),
            header.dims,
            guide
        )));
    }

    let count = header
        .sample_count()
        .ok_or(ConcatError::AllocationFailure(usize::MAX))?;
    let mut samples = alloc_samples(count)?;
    let io = |e| ConcatError::from_read(path, e);
    match header.precision {
        Precision::Single => reader.read_f32_into::<LittleEndian>(&mut samples).map_err(io)?,
        Precision::Double => {
            let row = header.dims[0] * header.components();
            let mut scratch = vec![0f64; row];
            for chunk in samples.chunks_exact_mut(row) {
                reader.read_f64_into::<LittleEndian>(&mut scratch).map_err(io)?;
                for (dst, &src) in chunk.iter_mut().zip(scratch.iter()) {
                    *dst = src as f32;
                }
            }
        }
    }

    let [nx, ny, nz] = header.dims;
    let raw = Array4::from_shape_vec((nz, ny, nx, header.components()), samples)?;
    let data = if guide == 0 {
        raw
    } else {
        let g = guide;
        raw.slice(s![g..nz - g, g..ny - g, g..nx - g, ..])
            .as_standard_layout()
            .into_owned()
    };

    trace!(path = %path.display(), shape = ?data.shape(), "decoded brick");
    Ok(SphBrick { header, data })
}

/// Write `field` (shaped `(z, y, x, component)`) with the given header
///
/// `header.dims` and `header.kind` must agree with the shape of `field`.
pub fn write(path: impl AsRef<Path>, header: &SphHeader, field: ArrayView4<'_, f32>) -> Result<()> {
    let path = path.as_ref();
    let [nx, ny, nz] = header.dims;
    if field.shape() != [nz, ny, nx, header.components()] {
        return Err(ConcatError::GeometryInvariantViolated(format!(
            "field shape {:?} does not match header dims {:?} x {}",
            field.shape(),
            header.dims,
            header.components()
        )));
    }

    let w = header.precision.word_size();
    let mut buf = BytesMut::with_capacity(16 + 4 * (3 * w + 8) + 2 * w + 8 + field.len() * w);

    record(&mut buf, 8, |b| {
        b.put_i32_le(header.kind.code());
        b.put_i32_le(header.precision.code());
    });
    let mut ints = Vec::with_capacity(4);
    for d in header.dims {
        ints.push(d.to_i64().ok_or_else(|| {
            ConcatError::FormatUnsupported(format!("dimension {} too large", d))
        })?);
    }
    ints.push(header.step);
    if header.precision == Precision::Single
        && ints.iter().any(|v| v.to_i32().is_none())
    {
        return Err(ConcatError::FormatUnsupported(format!(
            "dims {:?} or step {} exceed single precision header range",
            header.dims, header.step
        )));
    }

    record(&mut buf, 3 * w, |b| {
        for &v in &ints[..3] {
            put_int(b, header.precision, v);
        }
    });
    for triple in [header.origin, header.pitch] {
        record(&mut buf, 3 * w, |b| {
            for v in triple {
                put_float(b, header.precision, v);
            }
        });
    }
    record(&mut buf, 2 * w, |b| {
        put_int(b, header.precision, header.step);
        put_float(b, header.precision, header.time);
    });
    record(&mut buf, field.len() * w, |b| {
        for &v in field.iter() {
            put_float(b, header.precision, v as f64);
        }
    });

    std::fs::write(path, &buf)?;
    debug!(path = %path.display(), bytes = buf.len(), "wrote sph file");
    Ok(())
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| ConcatError::from_read(path, e))?;
    Ok(BufReader::new(file))
}

fn decode_header<R: Read>(reader: &mut R, path: &Path) -> Result<SphHeader> {
    let io = |e| ConcatError::from_read(path, e);

    let mut head = [0u8; 16];
    reader.read_exact(&mut head).map_err(io)?;
    let kind = FieldKind::from_code(i32::from_le_bytes([head[4], head[5], head[6], head[7]]))?;
    let precision =
        Precision::from_code(i32::from_le_bytes([head[8], head[9], head[10], head[11]]))?;

    skip_marker(reader).map_err(io)?;
    let mut dims = [0usize; 3];
    for d in dims.iter_mut() {
        let raw = read_int(reader, precision).map_err(io)?;
        *d = raw.to_usize().ok_or_else(|| {
            ConcatError::GeometryInvariantViolated(format!(
                "{}: negative dimension {}",
                path.display(),
                raw
            ))
        })?;
    }
    skip_marker(reader).map_err(io)?;
    if checked_volume(dims).map_or(true, |v| v < 1) {
        return Err(ConcatError::GeometryInvariantViolated(format!(
            "{}: empty or oversized dims {:?}",
            path.display(),
            dims
        )));
    }

    let origin = read_triple(reader, precision).map_err(io)?;
    let pitch = read_triple(reader, precision).map_err(io)?;
    skip_marker(reader).map_err(io)?;
    let step = read_int(reader, precision).map_err(io)?;
    let time = read_float(reader, precision).map_err(io)?;
    skip_marker(reader).map_err(io)?;
    // leading marker of the data record
    skip_marker(reader).map_err(io)?;

    Ok(SphHeader {
        kind,
        precision,
        dims,
        origin,
        pitch,
        step,
        time,
    })
}

fn skip_marker<R: Read>(reader: &mut R) -> std::io::Result<()> {
    reader.read_u32::<LittleEndian>().map(|_| ())
}

fn read_int<R: Read>(reader: &mut R, precision: Precision) -> std::io::Result<i64> {
    match precision {
        Precision::Single => reader.read_i32::<LittleEndian>().map(i64::from),
        Precision::Double => reader.read_i64::<LittleEndian>(),
    }
}

fn read_float<R: Read>(reader: &mut R, precision: Precision) -> std::io::Result<f64> {
    match precision {
        Precision::Single => reader.read_f32::<LittleEndian>().map(f64::from),
        Precision::Double => reader.read_f64::<LittleEndian>(),
    }
}

fn read_triple<R: Read>(reader: &mut R, precision: Precision) -> std::io::Result<[f64; 3]> {
    skip_marker(reader)?;
    let v = [
        read_float(reader, precision)?,
        read_float(reader, precision)?,
        read_float(reader, precision)?,
    ];
    skip_marker(reader)?;
    Ok(v)
}

fn record(buf: &mut BytesMut, len: usize, body: impl FnOnce(&mut BytesMut)) {
    let marker = u32::try_from(len).unwrap_or(u32::MAX);
    buf.put_u32_le(marker);
    body(buf);
    buf.put_u32_le(marker);
}

fn put_int(buf: &mut BytesMut, precision: Precision, v: i64) {
    match precision {
        Precision::Single => buf.put_i32_le(v as i32),
        Precision::Double => buf.put_i64_le(v),
    }
}

fn put_float(buf: &mut BytesMut, precision: Precision, v: f64) {
    match precision {
        Precision::Single => buf.put_f32_le(v as f32),
        Precision::Double => buf.put_f64_le(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn header(kind: FieldKind, precision: Precision, dims: Index3) -> SphHeader {
        SphHeader {
            kind,
            precision,
            dims,
            origin: [0.0, 1.0, 2.0],
            pitch: [0.5, 0.5, 0.5],
            step: 120,
            time: 3.5,
        }
    }

    fn ramp(dims: Index3, components: usize) -> Array4<f32> {
        let [nx, ny, nz] = dims;
        let n = nx * ny * nz * components;
        Array4::from_shape_vec((nz, ny, nx, components), (0..n).map(|v| v as f32).collect())
            .unwrap()
    }

    #[test]
    fn test_single_precision_header_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.sph");
        let h = header(FieldKind::Scalar, Precision::Single, [2, 2, 2]);
        write(&path, &h, ramp([2, 2, 2], 1).view()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        // 16 + dims 20 + 56 of origin/pitch/time + 4 data marker, then samples
        assert_eq!(bytes.len(), 16 + 20 + 56 + 4 + 8 * 4 + 4);
        assert_eq!(&bytes[4..8], &1i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &1i32.to_le_bytes());
        assert_eq!(&bytes[96..100], &0f32.to_le_bytes());
        assert_eq!(&bytes[100..104], &1f32.to_le_bytes());

        assert_eq!(read_header(&path).unwrap(), h);
    }

    #[test]
    fn test_double_precision_header_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("d.sph");
        let h = header(FieldKind::Vector, Precision::Double, [3, 2, 1]);
        write(&path, &h, ramp([3, 2, 1], 3).view()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 16 + 32 + 88 + 4 + 18 * 8 + 4);
        assert_eq!(&bytes[12 + 4 + 4..12 + 4 + 12], &3i64.to_le_bytes());

        let brick = read(&path, 0).unwrap();
        assert_eq!(brick.header, h);
        assert_eq!(brick.data, ramp([3, 2, 1], 3));
    }

    #[test]
    fn test_guide_cells_stripped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("g.sph");
        let dims = [4, 4, 4];
        write(&path, &header(FieldKind::Scalar, Precision::Single, dims), ramp(dims, 1).view())
            .unwrap();

        let brick = read(&path, 1).unwrap();
        assert_eq!(brick.interior_dims(), [2, 2, 2]);
        let expected: Vec<f32> = [21, 22, 25, 26, 37, 38, 41, 42]
            .iter()
            .map(|&v| v as f32)
            .collect();
        assert_eq!(brick.data.as_slice().unwrap(), expected.as_slice());
    }

    #[test]
    fn test_guide_cells_too_wide() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("g.sph");
        let dims = [4, 4, 2];
        write(&path, &header(FieldKind::Scalar, Precision::Single, dims), ramp(dims, 1).view())
            .unwrap();
        assert!(matches!(
            read(&path, 1),
            Err(ConcatError::GeometryInvariantViolated(_))
        ));
    }

    #[test]
    fn test_truncated_body_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.sph");
        let dims = [2, 2, 2];
        write(&path, &header(FieldKind::Vector, Precision::Double, dims), ramp(dims, 3).view())
            .unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 40);
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(read(&path, 0), Err(ConcatError::FileTruncated(_))));
    }

    #[test]
    fn test_unknown_codes_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("u.sph");
        let dims = [1, 1, 1];
        write(&path, &header(FieldKind::Scalar, Precision::Single, dims), ramp(dims, 1).view())
            .unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4..8].copy_from_slice(&7i32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(read(&path, 0), Err(ConcatError::FormatUnsupported(_))));

        bytes[4..8].copy_from_slice(&1i32.to_le_bytes());
        bytes[8..12].copy_from_slice(&3i32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(read(&path, 0), Err(ConcatError::FormatUnsupported(_))));
    }

    #[test]
    fn test_zero_dims_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("z.sph");
        let dims = [1, 1, 1];
        write(&path, &header(FieldKind::Scalar, Precision::Single, dims), ramp(dims, 1).view())
            .unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[20..24].copy_from_slice(&0i32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            read(&path, 0),
            Err(ConcatError::GeometryInvariantViolated(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            read(dir.path().join("none.sph"), 0),
            Err(ConcatError::FileUnreadable { .. })
        ));
    }

    #[test]
    fn test_write_rejects_shape_mismatch() {
        let dir = TempDir::new().unwrap();
        let h = header(FieldKind::Vector, Precision::Single, [2, 2, 2]);
        assert!(write(dir.path().join("x.sph"), &h, ramp([2, 2, 2], 1).view()).is_err());
    }
}
