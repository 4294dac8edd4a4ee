pub mod flat;
pub mod format6;
pub mod parallel;

use crate::color::ColorConfig;
use crate::filter::FilterSet;
use crate::formats::BinaryLayout;
use crate::octree::node::PointBlock;
use thiserror::Error;

/// GPS times outside this window (seconds since the product epoch) are
/// treated as evidence that the declared record layout is wrong.
pub const GPS_TIME_PLAUSIBLE_MIN: f64 = 1.0e8;
pub const GPS_TIME_PLAUSIBLE_MAX: f64 = 2.5e9;

#[inline]
pub fn gps_time_plausible(t: f64) -> bool {
    t.is_finite() && (GPS_TIME_PLAUSIBLE_MIN..=GPS_TIME_PLAUSIBLE_MAX).contains(&t)
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Record stride is zero")]
    ZeroStride,

    #[error("Buffer truncated: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("LAZ decompression failed: {0}")]
    Laz(#[from] laz::LasZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of decoding one node: the surviving points plus drop counters.
/// `dropped_invalid` counts NaN/out-of-range points (silent per-point
/// errors); `dropped_filtered` counts points rejected by active filters.
#[derive(Debug, Default)]
pub struct DecodedBlock {
    pub block: PointBlock,
    pub dropped_invalid: u32,
    pub dropped_filtered: u32,
    /// True when the GPS field could not be located and sequence indices
    /// were substituted as the ordering key.
    pub synthetic_gps: bool,
}

/// Decodes a node's raw (already decompressed) byte buffer according to
/// its tagged layout, applying the active filters and color mapping.
pub fn decode_node(
    raw: &[u8],
    layout: &BinaryLayout,
    filters: &FilterSet,
    color: &ColorConfig,
) -> Result<DecodedBlock, DecodeError> {
    match layout {
        BinaryLayout::CopcFormat6(l) => format6::decode(raw, l, filters, color),
        BinaryLayout::PotreeFlat(l) => flat::decode(raw, l, filters, color, 0),
    }
}

/// Inflates one COPC node chunk. Point formats 6+ use layered chunk
/// compression, so each node chunk decompresses independently of the rest
/// of the file.
pub fn decompress_copc_chunk(
    compressed: &[u8],
    laz_vlr: &laz::LazVlr,
    num_points: u32,
) -> Result<Vec<u8>, DecodeError> {
    use laz::record::{LayeredPointRecordDecompressor, RecordDecompressor};

    let point_size = laz_vlr.items_size() as usize;
    let mut out = vec![0u8; num_points as usize * point_size];
    let mut decompressor = LayeredPointRecordDecompressor::new(std::io::Cursor::new(compressed));
    decompressor.set_fields_from(laz_vlr.items())?;
    decompressor.decompress_many(&mut out)?;
    Ok(out)
}
