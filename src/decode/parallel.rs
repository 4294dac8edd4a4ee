use crate::color::ColorConfig;
use crate::decode::{flat, DecodeError};
use crate::filter::FilterSet;
use crate::formats::FlatLayout;
use crate::octree::node::PointBlock;
use bytes::Bytes;
use rayon::prelude::*;
use tracing::debug;

/// Worker-pool ceiling for flat-file decode, bounded below the typical
/// hardware concurrency of browser hosts.
pub const MAX_DECODE_WORKERS: usize = 8;

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_DECODE_WORKERS)
}

/// Merged result of a parallel flat-file decode: one block sorted
/// ascending by GPS time, with drop counters summed across workers.
#[derive(Debug, Default)]
pub struct MergedDecode {
    pub block: PointBlock,
    pub dropped_invalid: u64,
    pub dropped_filtered: u64,
}

impl MergedDecode {
    pub fn gps_time_min(&self) -> Option<f64> {
        self.block.gps_time.first().copied()
    }

    pub fn gps_time_max(&self) -> Option<f64> {
        self.block.gps_time.last().copied()
    }
}

/// Decodes a whole flat file by fanning disjoint point-index ranges of
/// one shared read-only buffer out to at most [`MAX_DECODE_WORKERS`]
/// workers. The merge is a join: it runs only after every worker result
/// resolved, because the GPS-time sort and the global min/max need the
/// complete set.
pub fn decode_flat_parallel(
    buffer: &Bytes,
    layout: &FlatLayout,
    filters: &FilterSet,
    color: &ColorConfig,
    workers: Option<usize>,
    decimation: usize,
) -> Result<MergedDecode, DecodeError> {
    if layout.stride == 0 {
        return Err(DecodeError::ZeroStride);
    }
    let total = buffer.len() / layout.stride;
    let workers = workers.unwrap_or_else(default_workers).clamp(1, MAX_DECODE_WORKERS);
    // chunk boundaries snap to the decimation stride so every worker keeps
    // the same phase
    let decimation = decimation.max(1);
    let chunk = (total.div_ceil(workers).max(1)).next_multiple_of(decimation);

    let ranges: Vec<(usize, usize)> = (0..workers)
        .map(|w| (w * chunk, ((w + 1) * chunk).min(total)))
        .filter(|(start, end)| start < end)
        .collect();
    debug!(total, workers = ranges.len(), chunk, decimation, "parallel flat decode");

    // each worker sees a non-overlapping immutable sub-range view
    let results: Vec<_> = ranges
        .par_iter()
        .map(|&(start, end)| {
            let slice = &buffer[start * layout.stride..end * layout.stride];
            flat::decode_strided(slice, layout, filters, color, start, decimation)
        })
        .collect();

    let mut merged = MergedDecode::default();
    for result in results {
        let mut decoded = result?;
        merged.dropped_invalid += decoded.dropped_invalid as u64;
        merged.dropped_filtered += decoded.dropped_filtered as u64;
        merged.block.append(&mut decoded.block);
    }
    merged.block.sort_by_gps_time();
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::flat::tests::{layout_23, synthetic_records};
    use byteorder::{ByteOrder, LittleEndian};

    #[test]
    fn merge_joins_all_workers_and_sorts_by_gps_time() {
        // descending GPS times so every worker's chunk is unordered
        // relative to the others
        let layout = layout_23();
        let count = 1000;
        let mut raw = synthetic_records(count, 7.0e8);
        for i in 0..count {
            let off = i * layout.stride + 15;
            LittleEndian::write_f64(&mut raw[off..off + 8], 7.0e8 + (count - i) as f64);
        }

        let merged = decode_flat_parallel(
            &Bytes::from(raw),
            &layout,
            &FilterSet::default(),
            &ColorConfig::default(),
            Some(4),
            1,
        )
        .unwrap();

        assert_eq!(merged.block.len(), count);
        assert!(merged.block.gps_time.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(merged.gps_time_min(), Some(7.0e8 + 1.0));
        assert_eq!(merged.gps_time_max(), Some(7.0e8 + count as f64));
    }

    #[test]
    fn single_worker_equals_many_workers() {
        let raw = Bytes::from(synthetic_records(500, 7.0e8));
        let layout = layout_23();
        let one = decode_flat_parallel(&raw, &layout, &FilterSet::default(), &ColorConfig::default(), Some(1), 1).unwrap();
        let many = decode_flat_parallel(&raw, &layout, &FilterSet::default(), &ColorConfig::default(), Some(8), 1).unwrap();
        assert_eq!(one.block.len(), many.block.len());
        assert_eq!(one.block.gps_time, many.block.gps_time);
        assert_eq!(one.block.positions, many.block.positions);
    }

    #[test]
    fn worker_count_is_clamped() {
        let raw = Bytes::from(synthetic_records(16, 7.0e8));
        let merged = decode_flat_parallel(
            &raw,
            &layout_23(),
            &FilterSet::default(),
            &ColorConfig::default(),
            Some(64),
            1,
        )
        .unwrap();
        assert_eq!(merged.block.len(), 16);
    }

    #[test]
    fn decimation_keeps_every_nth_point_across_workers() {
        let raw = Bytes::from(synthetic_records(1000, 7.0e8));
        let layout = layout_23();
        let merged = decode_flat_parallel(
            &raw,
            &layout,
            &FilterSet::default(),
            &ColorConfig::default(),
            Some(4),
            4,
        )
        .unwrap();
        assert_eq!(merged.block.len(), 250);
        // decimated output is still globally sorted
        assert!(merged.block.gps_time.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(merged.gps_time_min(), Some(7.0e8));
    }
}
