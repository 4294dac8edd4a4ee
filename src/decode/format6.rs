use crate::color::ColorConfig;
use crate::decode::{gps_time_plausible, DecodeError, DecodedBlock};
use crate::filter::FilterSet;
use crate::formats::Format6Layout;
use crate::octree::node::PointBlock;
use byteorder::{ByteOrder, LittleEndian};
use tracing::warn;

/// How many leading records the GPS-offset probe samples.
const PROBE_WINDOW: usize = 16;

/// Decodes LAS Point Data Record Format 6 records (30 bytes fixed, RGB
/// appended when the record length allows): scaled i32 x/y/z, u16
/// intensity, packed return byte, flags byte, u8 classification, u8 user
/// data, i16 scan angle, u16 source id, f64 GPS time.
pub fn decode(
    raw: &[u8],
    layout: &Format6Layout,
    filters: &FilterSet,
    color: &ColorConfig,
) -> Result<DecodedBlock, DecodeError> {
    let stride = layout.record_length as usize;
    if stride == 0 {
        return Err(DecodeError::ZeroStride);
    }
    let count = raw.len() / stride;

    let gps_offset = probe_gps_offset(raw, stride, count, layout.gps_time_offset);
    let mut out = DecodedBlock {
        synthetic_gps: gps_offset.is_none(),
        block: PointBlock::with_capacity(count),
        ..Default::default()
    };

    for i in 0..count {
        let rec = &raw[i * stride..(i + 1) * stride];

        let lon = LittleEndian::read_i32(&rec[0..4]) as f64 * layout.scale.x + layout.offset.x;
        let lat = LittleEndian::read_i32(&rec[4..8]) as f64 * layout.scale.y + layout.offset.y;
        let alt = LittleEndian::read_i32(&rec[8..12]) as f64 * layout.scale.z + layout.offset.z;
        let intensity = LittleEndian::read_u16(&rec[12..14]);
        let classification = rec[16];
        let gps_time = match gps_offset {
            Some(off) => LittleEndian::read_f64(&rec[off..off + 8]),
            // synthetic ordering key when the field cannot be located
            None => i as f64,
        };

        if !lon.is_finite()
            || !lat.is_finite()
            || !alt.is_finite()
            || !(-180.0..=180.0).contains(&lon)
            || !(-90.0..=90.0).contains(&lat)
        {
            out.dropped_invalid += 1;
            continue;
        }
        if !filters.accepts(lon, lat, alt, gps_time) {
            out.dropped_filtered += 1;
            continue;
        }

        let rgb = color.color_point(alt, intensity, classification);
        out.block.push(lon as f32, lat as f32, alt as f32, intensity, classification, gps_time, rgb);
    }

    Ok(out)
}

/// Locates the GPS time field. The configured offset comes from the
/// declared point-data-record-format; when it yields implausible values
/// across the probe window the two adjacent offsets are tried, which
/// papers over a known producer-side layout ambiguity. Any deviation from
/// the configured offset is reported as a suspected upstream bug.
pub fn probe_gps_offset(
    raw: &[u8],
    stride: usize,
    count: usize,
    configured: usize,
) -> Option<usize> {
    if count == 0 {
        return Some(configured);
    }

    let candidates = [configured, configured.saturating_sub(1), configured.saturating_sub(2)];
    for &offset in &candidates {
        if offset + 8 > stride {
            continue;
        }
        let window = count.min(PROBE_WINDOW);
        let all_plausible = (0..window).all(|i| {
            let t = LittleEndian::read_f64(&raw[i * stride + offset..i * stride + offset + 8]);
            gps_time_plausible(t)
        });
        if all_plausible {
            if offset != configured {
                warn!(
                    configured,
                    actual = offset,
                    "GPS time found at a shifted offset; the source file's declared \
                     point layout looks wrong upstream"
                );
            }
            return Some(offset);
        }
    }

    warn!(configured, "GPS time implausible at every candidate offset; using sequence index as ordering key");
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::formats::FORMAT6_GPS_TIME_OFFSET;
    use glam::DVec3;

    /// Builds `count` format-6 records on a small lon/lat grid, with
    /// GPS times ascending from `gps_base`.
    pub(crate) fn synthetic_records(count: usize, gps_base: f64, gps_offset: usize) -> Vec<u8> {
        let mut buf = vec![0u8; count * 30];
        for i in 0..count {
            let rec = &mut buf[i * 30..(i + 1) * 30];
            // raw grid units; with scale 0.001 these land in [-?]
            LittleEndian::write_i32(&mut rec[0..4], (i as i32 % 100) * 10);
            LittleEndian::write_i32(&mut rec[4..8], (i as i32 % 50) * 20);
            LittleEndian::write_i32(&mut rec[8..12], (i as i32 % 30) * 1000);
            LittleEndian::write_u16(&mut rec[12..14], (i % 4000) as u16);
            rec[16] = (i % 7) as u8;
            LittleEndian::write_f64(&mut rec[gps_offset..gps_offset + 8], gps_base + i as f64);
        }
        buf
    }

    pub(crate) fn layout() -> Format6Layout {
        Format6Layout::from_header(30, DVec3::splat(0.001), DVec3::ZERO)
    }

    #[test]
    fn thousand_point_chunk_decodes_exactly() {
        // 1000 points, 30 bytes each, millimeter scale, zero offset
        let raw = synthetic_records(1000, 7.0e8, FORMAT6_GPS_TIME_OFFSET);
        assert_eq!(raw.len(), 30_000);

        let decoded =
            decode(&raw, &layout(), &FilterSet::default(), &ColorConfig::default()).unwrap();
        assert_eq!(decoded.block.len(), 1000);
        assert_eq!(decoded.dropped_invalid, 0);
        assert!(!decoded.synthetic_gps);

        // raw int * 0.001 + 0.0, bit-exact in f32
        assert_eq!(decoded.block.positions[3], 0.01); // second point lon: 10 * 0.001
        assert_eq!(decoded.block.positions[4], 0.02); // second point lat: 20 * 0.001
        assert_eq!(decoded.block.gps_time[999], 7.0e8 + 999.0);
        assert_eq!(decoded.block.intensity[5], 5);
        assert_eq!(decoded.block.classification[3], 3);
    }

    #[test]
    fn shifted_gps_offset_is_probed() {
        let raw = synthetic_records(64, 9.0e8, 21);
        let decoded =
            decode(&raw, &layout(), &FilterSet::default(), &ColorConfig::default()).unwrap();
        assert!(!decoded.synthetic_gps);
        assert_eq!(decoded.block.gps_time[0], 9.0e8);
    }

    #[test]
    fn hopeless_gps_layout_falls_back_to_sequence_index() {
        // zero-filled GPS field everywhere: 0.0 is not a plausible time
        let mut raw = synthetic_records(16, 7.0e8, FORMAT6_GPS_TIME_OFFSET);
        for i in 0..16 {
            for b in &mut raw[i * 30 + 20..i * 30 + 30] {
                *b = 0;
            }
        }
        let decoded =
            decode(&raw, &layout(), &FilterSet::default(), &ColorConfig::default()).unwrap();
        assert!(decoded.synthetic_gps);
        assert_eq!(decoded.block.gps_time[7], 7.0);
    }

    #[test]
    fn invalid_coordinates_are_dropped_silently() {
        let mut raw = synthetic_records(10, 7.0e8, FORMAT6_GPS_TIME_OFFSET);
        // push one point past 180 degrees longitude
        LittleEndian::write_i32(&mut raw[0..4], 200_000_000);
        let decoded =
            decode(&raw, &layout(), &FilterSet::default(), &ColorConfig::default()).unwrap();
        assert_eq!(decoded.block.len(), 9);
        assert_eq!(decoded.dropped_invalid, 1);
    }

    #[test]
    fn filters_apply_during_decode() {
        let raw = synthetic_records(100, 7.0e8, FORMAT6_GPS_TIME_OFFSET);
        let filters = FilterSet {
            time: crate::filter::RangeFilter::enabled(7.0e8, 7.0e8 + 9.0),
            ..Default::default()
        };
        let decoded = decode(&raw, &layout(), &filters, &ColorConfig::default()).unwrap();
        assert_eq!(decoded.block.len(), 10);
        assert_eq!(decoded.dropped_filtered, 90);
    }
}
