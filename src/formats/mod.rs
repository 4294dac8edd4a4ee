pub mod copc;
pub mod las;
pub mod potree;

use glam::DVec3;

/// A hierarchy-page record, normalized across the COPC-style and
/// Potree-style encodings. Both are 22 bytes on the wire; they differ in
/// how the byte ranges are split.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PageEntry {
    pub node_type: u8,
    pub child_mask: u8,
    pub num_points: u32,
    pub byte_offset: u64,
    pub byte_size: u64,
}

/// Tagged descriptor of a node payload's binary layout, validated once
/// against the file metadata instead of spreading byte offsets through
/// the decode paths.
#[derive(Clone, Debug)]
pub enum BinaryLayout {
    CopcFormat6(Format6Layout),
    PotreeFlat(FlatLayout),
}

/// LAS Point Data Record Format 6: 30-byte fixed records, optionally
/// followed by RGB when the record length allows.
#[derive(Clone, Debug)]
pub struct Format6Layout {
    pub record_length: u16,
    pub scale: DVec3,
    pub offset: DVec3,
    /// Byte offset of the f64 GPS time inside one record, derived from
    /// the declared PDRF (22 for format 6).
    pub gps_time_offset: usize,
    pub has_rgb: bool,
}

pub const FORMAT6_RECORD_SIZE: u16 = 30;
pub const FORMAT6_GPS_TIME_OFFSET: usize = 22;

impl Format6Layout {
    pub fn from_header(record_length: u16, scale: DVec3, offset: DVec3) -> Self {
        Self {
            record_length: record_length.max(FORMAT6_RECORD_SIZE),
            scale,
            offset,
            gps_time_offset: FORMAT6_GPS_TIME_OFFSET,
            has_rgb: record_length >= FORMAT6_RECORD_SIZE + 6,
        }
    }
}

/// One attribute's location inside a fixed-stride Potree record.
#[derive(Clone, Copy, Debug, Default)]
pub struct AttrView {
    pub offset: usize,
    pub size: usize,
}

/// Potree flat binary layout: stride is the sum of the declared attribute
/// sizes, attribute offsets are resolved once from `metadata.json`.
#[derive(Clone, Debug)]
pub struct FlatLayout {
    pub stride: usize,
    pub scale: DVec3,
    pub offset: DVec3,
    pub position: AttrView,
    pub intensity: Option<AttrView>,
    pub classification: Option<AttrView>,
    pub gps_time: Option<AttrView>,
    pub rgb: Option<AttrView>,
}
