//! Persisted hash-table index
//!
//! A set of per-shape [`HashTableIndex`]es can be written to one flat file and
//! reopened later without rebuilding.
//!
//! # File Format
//!
//! ```text
//! IndexFileHeader (16 bytes)
//!   ├─ magic: "SEEDHIT1"
//!   ├─ version: u32
//!   └─ shape_count: u32
//! Per shape:
//!   ├─ byte_size: u64              (unpadded blob size)
//!   └─ blob, zero-padded to a multiple of 64 bytes
//!        ├─ shape_id: u32
//!        ├─ partition_bits: u32
//!        ├─ partition_count: u32
//!        ├─ reserved: u32
//!        └─ per partition:
//!             ├─ slot_count: u64
//!             ├─ entry_count: u64
//!             ├─ slots: [u64; slot_count]
//!             └─ entries: [(remainder: u32, position: u64); entry_count]
//! ```
//!
//! All integers are little-endian. Reopening memory-maps the file and decodes
//! it through a bounds-checked cursor; nothing is reinterpreted in place.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use memmap2::Mmap;
use tracing::info;

use crate::constants::{
    INDEX_BLOB_ALIGNMENT, INDEX_FORMAT_VERSION, INDEX_HEADER_BYTES, INDEX_MAGIC, MAX_PARTITION_BITS, MAX_SHAPES,
};
use crate::error::{Result, SeedError};
use crate::hash_table::{FingerprintTable, HashPartition, HashTableIndex, Slot};
use crate::sequence::PackedPosition;
use crate::sorted_list::SeedEntry;

/// Size of a blob header
const BLOB_HEADER_BYTES: usize = 16;

/// Size of a serialized entry
const ENTRY_BYTES: usize = 12;

/// Fixed file header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexFileHeader {
    /// Magic number ("SEEDHIT1")
    pub magic: [u8; 8],
    /// Format version
    pub version: u32,
    /// Number of per-shape tables that follow
    pub shape_count: u32,
}

impl IndexFileHeader {
    /// Header for `shape_count` tables in the current format
    pub fn new(shape_count: u32) -> Self {
        Self {
            magic: *INDEX_MAGIC,
            version: INDEX_FORMAT_VERSION,
            shape_count,
        }
    }

    /// Write header to a writer
    pub fn write(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.shape_count.to_le_bytes())?;
        Ok(())
    }

    /// Read and check a header
    pub fn read(reader: &mut dyn Read) -> io::Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid magic number for seed index file",
            ));
        }
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        let version = u32::from_le_bytes(buf);
        if version != INDEX_FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "unsupported index format version {} (expected {})",
                    version, INDEX_FORMAT_VERSION
                ),
            ));
        }
        reader.read_exact(&mut buf)?;
        Ok(Self {
            magic,
            version,
            shape_count: u32::from_le_bytes(buf),
        })
    }
}

/// Unpadded size of the blob of one index
pub fn blob_size(index: &HashTableIndex) -> u64 {
    let partitions: usize = index
        .partitions()
        .iter()
        .map(|p| 16 + p.table().slot_count() * 8 + p.entries().len() * ENTRY_BYTES)
        .sum();
    (BLOB_HEADER_BYTES + partitions) as u64
}

fn padding(size: u64) -> usize {
    let rem = (size % INDEX_BLOB_ALIGNMENT as u64) as usize;
    if rem == 0 {
        0
    } else {
        INDEX_BLOB_ALIGNMENT - rem
    }
}

/// Write the indexes of every shape, in shape order
pub fn write_hash_index(writer: &mut dyn Write, indexes: &[HashTableIndex]) -> io::Result<()> {
    let shape_count = u32::try_from(indexes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many shapes"))?;
    IndexFileHeader::new(shape_count).write(writer)?;
    for index in indexes {
        let size = blob_size(index);
        writer.write_all(&size.to_le_bytes())?;
        write_blob(writer, index)?;
        writer.write_all(&[0u8; INDEX_BLOB_ALIGNMENT][..padding(size)])?;
    }
    Ok(())
}

fn write_blob(writer: &mut dyn Write, index: &HashTableIndex) -> io::Result<()> {
    let shape_id = u32::try_from(index.shape_id())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "shape id overflows u32"))?;
    writer.write_all(&shape_id.to_le_bytes())?;
    writer.write_all(&index.partition_bits().to_le_bytes())?;
    writer.write_all(&(index.partitions().len() as u32).to_le_bytes())?;
    writer.write_all(&0u32.to_le_bytes())?;
    for partition in index.partitions() {
        let slots = partition.table().slots();
        let entries = partition.entries();
        writer.write_all(&(slots.len() as u64).to_le_bytes())?;
        writer.write_all(&(entries.len() as u64).to_le_bytes())?;
        for slot in slots {
            writer.write_all(&slot.raw().to_le_bytes())?;
        }
        for entry in entries {
            writer.write_all(&entry.key.to_le_bytes())?;
            writer.write_all(&entry.value.raw().to_le_bytes())?;
        }
    }
    Ok(())
}

/// Save the indexes of every shape to a file
pub fn save_hash_index(path: &Path, indexes: &[HashTableIndex]) -> Result<()> {
    let file = File::create(path).map_err(|e| SeedError::io(path, "create index", e))?;
    let mut writer = BufWriter::new(file);
    write_hash_index(&mut writer, indexes)
        .and_then(|_| writer.flush())
        .map_err(|e| SeedError::io(path, "write index", e))?;
    info!(
        "Saved hash index ({} shapes, {} entries) to {}",
        indexes.len(),
        indexes.iter().map(HashTableIndex::len).sum::<usize>(),
        path.display()
    );
    Ok(())
}

/// Reopen a persisted index, checking it holds `expected_shapes` shapes
///
/// # Errors
/// `SeedError::Format` on a bad magic number or version, a shape-count
/// mismatch, or a truncated or inconsistent blob.
pub fn open_hash_index(path: &Path, expected_shapes: usize) -> Result<Vec<HashTableIndex>> {
    let file = File::open(path).map_err(|e| SeedError::io(path, "open index", e))?;
    // SAFETY: the map is read-only and dropped before this function returns
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| SeedError::io(path, "map index", e))?;
    let indexes = decode_hash_index(&mmap, Some(expected_shapes)).map_err(|detail| SeedError::format(path, detail))?;
    info!(
        "Opened hash index with {} shapes from {}",
        indexes.len(),
        path.display()
    );
    Ok(indexes)
}

/// Decode a persisted index from memory
///
/// `expected_shapes`, when given, must match the header's shape count.
pub fn decode_hash_index(bytes: &[u8], expected_shapes: Option<usize>) -> std::result::Result<Vec<HashTableIndex>, String> {
    if bytes.len() < INDEX_HEADER_BYTES {
        return Err(format!("file holds {} bytes, shorter than the header", bytes.len()));
    }
    let mut head = &bytes[..INDEX_HEADER_BYTES];
    let header = IndexFileHeader::read(&mut head).map_err(|e| e.to_string())?;
    let shape_count = header.shape_count as usize;
    // every shape needs at least a size field and a blob header
    let room = (bytes.len() - INDEX_HEADER_BYTES) / (8 + BLOB_HEADER_BYTES);
    if shape_count > MAX_SHAPES || shape_count > room {
        return Err(format!(
            "header claims {} shapes, file has room for at most {} (maximum {})",
            shape_count,
            room.min(MAX_SHAPES),
            MAX_SHAPES
        ));
    }
    if let Some(expected) = expected_shapes {
        if expected != shape_count {
            return Err(format!(
                "index holds {} shapes, configuration has {}",
                shape_count, expected
            ));
        }
    }

    let mut cursor = ByteCursor::new(bytes, INDEX_HEADER_BYTES);
    let mut indexes = Vec::with_capacity(shape_count);
    for shape in 0..shape_count {
        let size = cursor.u64()?;
        let size = usize::try_from(size).map_err(|_| format!("shape {}: blob size {} too large", shape, size))?;
        let blob = cursor.take(size).map_err(|e| format!("shape {}: {}", shape, e))?;
        let index = decode_blob(blob).map_err(|e| format!("shape {}: {}", shape, e))?;
        if index.shape_id() != shape {
            return Err(format!("blob {} is labelled shape {}", shape, index.shape_id()));
        }
        indexes.push(index);
        cursor.take(padding(size as u64)).map_err(|e| format!("shape {} padding: {}", shape, e))?;
    }
    Ok(indexes)
}

fn decode_blob(blob: &[u8]) -> std::result::Result<HashTableIndex, String> {
    let mut cursor = ByteCursor::new(blob, 0);
    let shape_id = cursor.u32()? as usize;
    let partition_bits = cursor.u32()?;
    let partition_count = cursor.u32()? as usize;
    let _reserved = cursor.u32()?;
    if partition_bits > MAX_PARTITION_BITS || partition_count != 1usize << partition_bits {
        return Err(format!(
            "{} partitions do not match {} partition bits",
            partition_count, partition_bits
        ));
    }

    let mut partitions = Vec::with_capacity(partition_count);
    for p in 0..partition_count {
        let slot_count = cursor.len_field(8)?;
        let entry_count = cursor.len_field(ENTRY_BYTES)?;
        let slot_bytes = cursor.take(slot_count * 8).map_err(|e| format!("partition {} slots: {}", p, e))?;
        let slots: Vec<Slot> = slot_bytes
            .chunks_exact(8)
            .map(|b| Slot::from_raw(le_u64(b)))
            .collect();
        let entry_bytes = cursor
            .take(entry_count * ENTRY_BYTES)
            .map_err(|e| format!("partition {} entries: {}", p, e))?;
        let entries: Vec<SeedEntry> = entry_bytes
            .chunks_exact(ENTRY_BYTES)
            .map(|b| SeedEntry::new(le_u32(&b[..4]), PackedPosition::from_raw(le_u64(&b[4..]))))
            .collect();
        if slots.iter().any(|s| !s.is_empty() && s.value() as usize >= entries.len()) {
            return Err(format!("partition {}: slot points past the entries", p));
        }
        partitions.push(HashPartition::from_parts(FingerprintTable::from_slots(slots), entries));
    }
    if !cursor.is_at_end() {
        return Err("trailing bytes after the last partition".to_string());
    }
    Ok(HashTableIndex::from_parts(shape_id, partition_bits, partitions))
}

#[inline]
fn le_u32(b: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(b);
    u32::from_le_bytes(buf)
}

#[inline]
fn le_u64(b: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(b);
    u64::from_le_bytes(buf)
}

/// Bounds-checked reader over a byte slice
struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                format!(
                    "truncated: need {} bytes at offset {}, {} available",
                    n,
                    self.pos,
                    self.bytes.len().saturating_sub(self.pos)
                )
            })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> std::result::Result<u32, String> {
        self.take(4).map(le_u32)
    }

    fn u64(&mut self) -> std::result::Result<u64, String> {
        self.take(8).map(le_u64)
    }

    /// A count of `item_bytes`-sized items that must fit in the remaining bytes
    fn len_field(&mut self, item_bytes: usize) -> std::result::Result<usize, String> {
        let n = self.u64()?;
        let remaining = (self.bytes.len() - self.pos) as u64;
        match n.checked_mul(item_bytes as u64) {
            Some(total) if total <= remaining => Ok(n as usize),
            _ => Err(format!("count {} exceeds the remaining {} bytes", n, remaining)),
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }
}
