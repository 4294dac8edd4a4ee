use crate::formats::PageEntry;
use binrw::{binrw, BinReaderExt};
use std::io::Cursor;

/// COPC-style hierarchy page record: 22 bytes, full 64-bit byte ranges.
#[binrw]
#[derive(Debug, Clone)]
#[br(little)]
pub struct CopcHierarchyEntry {
    pub r#type: u8,
    pub child_mask: u8,
    pub num_points: u32,
    pub byte_offset: u64,
    pub byte_size: u64,
}

pub const BYTES_PER_NODE: usize = 22;

impl From<CopcHierarchyEntry> for PageEntry {
    fn from(e: CopcHierarchyEntry) -> Self {
        PageEntry {
            node_type: e.r#type,
            child_mask: e.child_mask,
            num_points: e.num_points,
            byte_offset: e.byte_offset,
            byte_size: e.byte_size,
        }
    }
}

/// Reads every record of one hierarchy page.
pub fn parse_page(buf: &[u8]) -> binrw::BinResult<Vec<PageEntry>> {
    let mut cursor = Cursor::new(buf);
    let num_nodes = buf.len() / BYTES_PER_NODE;
    let mut entries = Vec::with_capacity(num_nodes);
    for _ in 0..num_nodes {
        let entry: CopcHierarchyEntry = cursor.read_le()?;
        entries.push(entry.into());
    }
    Ok(entries)
}
