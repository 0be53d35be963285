//! Table descriptor decoder for the `#~`/`#-` stream.
//!
//! Decodes only the stream's fixed header, heap-width flags and per-table
//! row counts. Per-row column layout and row decoding belong to a layer
//! above this crate; this module hands that layer `tables_base`, the
//! row-count table and the heap widths, and nothing more.

use crate::bytes::ByteSliceExt;
use crate::error::{Error, Result};
use crate::metadata::headers::HeapSizes;

/// Highest table ID this format allows to be set in `valid_mask`.
pub const LAST: u8 = 0x2D;

/// The table descriptor: heap widths and the row count of every table
/// present in `valid_mask`, plus the byte offset (relative to the start of
/// the raw image) where the row data begins.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
  pub major_version: u8,
  pub minor_version: u8,
  pub heap_sizes: HeapSizes,
  pub valid_mask: u64,
  pub sorted_mask: u64,
  /// Row count indexed by table ID (`0..=63`); zero for tables not present
  /// in `valid_mask`.
  pub row_counts: [u32; 64],
  /// Offset of the first table's row data, relative to the start of
  /// `heap_tables.data`.
  pub tables_base: usize,
}

impl TableDescriptor {
  pub fn row_count(&self, table_id: u8) -> u32 {
    self.row_counts.get(table_id as usize).copied().unwrap_or(0)
  }

  pub fn is_present(&self, table_id: u8) -> bool {
    table_id < 64 && self.valid_mask & (1u64 << table_id) != 0
  }

  pub fn is_sorted(&self, table_id: u8) -> bool {
    table_id < 64 && self.sorted_mask & (1u64 << table_id) != 0
  }

  /// Parses `heap_tables.data`.
  pub fn parse(data: &[u8]) -> Result<Self> {
    let offset = &mut 0;

    let _reserved0: u32 = data.read(offset).ok_or_else(|| Error::invalid("truncated #~ header"))?;
    let major_version: u8 = data.read(offset).ok_or_else(|| Error::invalid("truncated #~ header"))?;
    let minor_version: u8 = data.read(offset).ok_or_else(|| Error::invalid("truncated #~ header"))?;
    let heap_sizes: HeapSizes = data.read(offset).ok_or_else(|| Error::invalid("truncated #~ header"))?;
    let _reserved1: u8 = data.read(offset).ok_or_else(|| Error::invalid("truncated #~ header"))?;
    let valid_mask: u64 = data.read(offset).ok_or_else(|| Error::invalid("truncated #~ header"))?;
    let sorted_mask: u64 = data.read(offset).ok_or_else(|| Error::invalid("truncated #~ header"))?;

    debug_assert_eq!(24, *offset);

    let mut row_counts = [0u32; 64];
    let mut consumed = 0usize;

    for table_id in 0..64u8 {
      if valid_mask & (1u64 << table_id) == 0 {
        continue;
      }

      if table_id > LAST {
        log::warn!("table descriptor sets out-of-range table id {table_id} in valid_mask");
        continue;
      }

      let count: u32 = data
        .read(offset)
        .ok_or_else(|| Error::invalid("truncated table row-count array"))?;
      row_counts[table_id as usize] = count;
      consumed += 1;
    }

    let expected_offset = 24 + 4 * consumed;
    if *offset != expected_offset {
      return Err(Error::invalid("table row-count cursor did not land on the expected offset"));
    }

    Ok(Self {
      major_version,
      minor_version,
      heap_sizes,
      valid_mask,
      sorted_mask,
      row_counts,
      tables_base: *offset,
    })
  }
}
