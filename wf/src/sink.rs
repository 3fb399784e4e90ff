// SPDX-License-Identifier: AGPL-3.0-only

//! Reference sample sinks for physics-evaluated points.
//!
//! - [`JsonLinesSink`]: one JSON object per point, easy to inspect.
//! - [`BinarySink`]: raw `f64` records, one header per appended batch.
//!
//! Binary batch layout (all fields little-endian):
//!
//! ```text
//!   u64 points | u64 inputs | u64 outputs | points × (inputs + outputs) f64
//! ```
//!
//! Records are point-major, inputs first.

use crate::backend::SampleSink;
use crate::compaction::cast::Real;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// One point as stored by [`JsonLinesSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub inputs: Vec<Real>,
    pub outputs: Vec<Real>,
}

/// Common length of every feature vector in a batch.
fn point_count(inputs: &[&[Real]], outputs: &[&[Real]]) -> io::Result<usize> {
    let mut lens = inputs.iter().chain(outputs).map(|v| v.len());
    let points = lens.next().unwrap_or(0);
    if lens.any(|len| len != points) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "feature vectors of one batch differ in length",
        ));
    }
    Ok(points)
}

/// Newline-delimited JSON sink.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    out: BufWriter<W>,
    records: usize,
}

impl JsonLinesSink<File> {
    /// Create (truncate) `path`.
    ///
    /// # Errors
    ///
    /// Propagates file creation errors.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: BufWriter::new(writer),
            records: 0,
        }
    }

    /// Points written so far.
    #[must_use]
    pub const fn records(&self) -> usize {
        self.records
    }

    /// Flush and hand back the inner writer.
    ///
    /// # Errors
    ///
    /// Propagates the final flush error.
    pub fn into_inner(self) -> io::Result<W> {
        self.out.into_inner().map_err(io::IntoInnerError::into_error)
    }
}

impl<W: Write + Send> SampleSink for JsonLinesSink<W> {
    fn append(&mut self, inputs: &[&[Real]], outputs: &[&[Real]]) -> io::Result<()> {
        for i in 0..point_count(inputs, outputs)? {
            let record = SampleRecord {
                inputs: inputs.iter().map(|v| v[i]).collect(),
                outputs: outputs.iter().map(|v| v[i]).collect(),
            };
            serde_json::to_writer(&mut self.out, &record)?;
            self.out.write_all(b"\n")?;
            self.records += 1;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Read back every record of a JSON-lines sample file.
///
/// # Errors
///
/// I/O errors and malformed lines (as [`io::ErrorKind::InvalidData`]).
pub fn read_json_lines(path: impl AsRef<Path>) -> io::Result<Vec<SampleRecord>> {
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(io::Error::from))
        .collect()
}

/// Header of one [`BinarySink`] batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchHeader {
    pub points: usize,
    pub inputs: usize,
    pub outputs: usize,
}

/// One batch read back from a binary sample file.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub header: BatchHeader,
    /// Point-major records, `inputs + outputs` values each.
    pub values: Vec<Real>,
}

/// Compact binary sink.
#[derive(Debug)]
pub struct BinarySink<W: Write> {
    out: BufWriter<W>,
    scratch: Vec<Real>,
    batches: usize,
}

impl BinarySink<File> {
    /// Create (truncate) `path`.
    ///
    /// # Errors
    ///
    /// Propagates file creation errors.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> BinarySink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: BufWriter::new(writer),
            scratch: Vec::new(),
            batches: 0,
        }
    }

    #[must_use]
    pub const fn batches(&self) -> usize {
        self.batches
    }

    /// Flush and hand back the inner writer.
    ///
    /// # Errors
    ///
    /// Propagates the final flush error.
    pub fn into_inner(self) -> io::Result<W> {
        self.out.into_inner().map_err(io::IntoInnerError::into_error)
    }
}

impl<W: Write + Send> SampleSink for BinarySink<W> {
    fn append(&mut self, inputs: &[&[Real]], outputs: &[&[Real]]) -> io::Result<()> {
        let points = point_count(inputs, outputs)?;
        let header = [points as u64, inputs.len() as u64, outputs.len() as u64];
        for field in header {
            self.out.write_all(&field.to_le_bytes())?;
        }

        // Stored as little-endian bit patterns so the bytes can go out in one write.
        self.scratch.clear();
        self.scratch.reserve(points * (inputs.len() + outputs.len()));
        for i in 0..points {
            self.scratch.extend(
                inputs
                    .iter()
                    .chain(outputs)
                    .map(|v| Real::from_bits(v[i].to_bits().to_le())),
            );
        }
        self.out.write_all(bytemuck::cast_slice(&self.scratch))?;
        self.batches += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

fn read_u64(reader: &mut impl Read) -> io::Result<Option<u64>> {
    let mut bytes = [0_u8; 8];
    match reader.read_exact(&mut bytes) {
        Ok(()) => Ok(Some(u64::from_le_bytes(bytes))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

fn header_field(reader: &mut impl Read) -> io::Result<usize> {
    let v = read_u64(reader)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "truncated batch header"))?;
    usize::try_from(v).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Read back every batch of a binary sample file.
///
/// # Errors
///
/// I/O errors, [`io::ErrorKind::UnexpectedEof`] for a truncated batch, or
/// [`io::ErrorKind::InvalidData`] for a header whose size overflows.
pub fn read_binary(path: impl AsRef<Path>) -> io::Result<Vec<Batch>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut batches = Vec::new();
    while let Some(points) = read_u64(&mut reader)? {
        let points = usize::try_from(points)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let inputs = header_field(&mut reader)?;
        let outputs = header_field(&mut reader)?;
        let bytes = inputs
            .checked_add(outputs)
            .and_then(|features| features.checked_mul(points))
            .and_then(|values| values.checked_mul(std::mem::size_of::<Real>()))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "batch size overflows"))?;

        // Grows with the bytes actually present, never with the header's claim.
        let mut raw = Vec::new();
        (&mut reader).take(bytes as u64).read_to_end(&mut raw)?;
        if raw.len() != bytes {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("truncated batch: header claims {bytes} bytes, {} present", raw.len()),
            ));
        }
        let values: Vec<Real> = raw
            .chunks_exact(std::mem::size_of::<Real>())
            .map(|c| Real::from_bits(u64::from_le(bytemuck::pod_read_unaligned(c))))
            .collect();
        batches.push(Batch {
            header: BatchHeader {
                points,
                inputs,
                outputs,
            },
            values,
        });
    }
    Ok(batches)
}
