//! Fixed, little-endian wire records for DOF numbering and matrix exchange.
//!
//! All multi-byte integers in these structs are **little-endian** on the wire.
//! We store them pre-LE with `.to_le()` and decode with `.from_le()`.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

use crate::linalg::dof_map::Gid;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Decode a byte buffer into owned records; the length must be a multiple
/// of the record size.
pub fn decode_records<T: Pod>(raw: &[u8]) -> Result<Vec<T>, String> {
    let width = std::mem::size_of::<T>();
    if width == 0 || raw.len() % width != 0 {
        return Err(format!(
            "buffer of {} bytes is not a multiple of the {width}-byte record",
            raw.len()
        ));
    }
    Ok(raw
        .chunks_exact(width)
        .map(bytemuck::pod_read_unaligned::<T>)
        .collect())
}

// Record widths are part of the wire format.
const_assert_eq!(std::mem::size_of::<WireCount>(), 4);
const_assert_eq!(std::mem::size_of::<WireGid>(), 8);
const_assert_eq!(std::mem::size_of::<WireNodeDofs>(), 24);
const_assert_eq!(std::mem::size_of::<WireValue>(), 16);
const_assert_eq!(std::mem::size_of::<WireEntry>(), 24);

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32, // count of following records
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// A single global id.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireGid {
    pub gid_le: i64,
}

impl WireGid {
    pub fn of(gid: Gid) -> Self {
        Self {
            gid_le: gid.to_le(),
        }
    }
    pub fn get(&self) -> Gid {
        i64::from_le(self.gid_le)
    }
}

/// First global id and dof count of one owned node.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireNodeDofs {
    pub node_le: u64,
    pub first_le: i64,
    pub count_le: u32,
    pub reserved_le: u32, // keep zero
}

impl WireNodeDofs {
    pub fn new(node: u64, first: Gid, count: usize) -> Self {
        Self {
            node_le: node.to_le(),
            first_le: first.to_le(),
            count_le: (count as u32).to_le(),
            reserved_le: 0,
        }
    }
    pub fn node(&self) -> u64 {
        u64::from_le(self.node_le)
    }
    pub fn first(&self) -> Gid {
        i64::from_le(self.first_le)
    }
    pub fn count(&self) -> usize {
        u32::from_le(self.count_le) as usize
    }
}

/// A `(gid, value)` pair of a distributed vector.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireValue {
    pub gid_le: i64,
    pub bits_le: u64,
}

impl WireValue {
    pub fn new(gid: Gid, value: f64) -> Self {
        Self {
            gid_le: gid.to_le(),
            bits_le: value.to_bits().to_le(),
        }
    }
    pub fn gid(&self) -> Gid {
        i64::from_le(self.gid_le)
    }
    pub fn value(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}

/// A `(row, col, value)` triple of a sparse matrix.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireEntry {
    pub row_le: i64,
    pub col_le: i64,
    pub bits_le: u64,
}

impl WireEntry {
    pub fn new(row: Gid, col: Gid, value: f64) -> Self {
        Self {
            row_le: row.to_le(),
            col_le: col.to_le(),
            bits_le: value.to_bits().to_le(),
        }
    }
    pub fn row(&self) -> Gid {
        i64::from_le(self.row_le)
    }
    pub fn col(&self) -> Gid {
        i64::from_le(self.col_le)
    }
    pub fn value(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}
