use crate::color::ColorConfig;
use crate::decode::{DecodeError, DecodedBlock};
use crate::filter::FilterSet;
use crate::formats::potree::AttributeMetadata;
use crate::formats::FlatLayout;
use crate::octree::node::PointBlock;
use byteorder::{ByteOrder, LittleEndian};
use glam::DVec3;
use std::io::Read;

/// Decodes Potree flat binary: fixed-stride records, attribute offsets
/// resolved once from the metadata. `base_index` seeds the synthetic
/// ordering key when no GPS attribute is declared, so parallel workers
/// over disjoint ranges stay globally ordered.
pub fn decode(
    raw: &[u8],
    layout: &FlatLayout,
    filters: &FilterSet,
    color: &ColorConfig,
    base_index: usize,
) -> Result<DecodedBlock, DecodeError> {
    decode_strided(raw, layout, filters, color, base_index, 1)
}

/// Like [`decode`], keeping only every `decimation`-th record. This is the
/// degraded-mode path for flat-loaded files, where the stride comes from
/// the zoom buckets instead of octree pruning.
pub fn decode_strided(
    raw: &[u8],
    layout: &FlatLayout,
    filters: &FilterSet,
    color: &ColorConfig,
    base_index: usize,
    decimation: usize,
) -> Result<DecodedBlock, DecodeError> {
    if layout.stride == 0 || decimation == 0 {
        return Err(DecodeError::ZeroStride);
    }
    let count = raw.len() / layout.stride;

    let mut out = DecodedBlock {
        synthetic_gps: layout.gps_time.is_none(),
        block: PointBlock::with_capacity(count / decimation + 1),
        ..Default::default()
    };

    for i in (0..count).step_by(decimation) {
        let rec = &raw[i * layout.stride..(i + 1) * layout.stride];

        let p = layout.position.offset;
        let lon = LittleEndian::read_i32(&rec[p..p + 4]) as f64 * layout.scale.x + layout.offset.x;
        let lat =
            LittleEndian::read_i32(&rec[p + 4..p + 8]) as f64 * layout.scale.y + layout.offset.y;
        let alt =
            LittleEndian::read_i32(&rec[p + 8..p + 12]) as f64 * layout.scale.z + layout.offset.z;

        let intensity = layout
            .intensity
            .map(|v| LittleEndian::read_u16(&rec[v.offset..v.offset + 2]))
            .unwrap_or(0);
        let classification = layout.classification.map(|v| rec[v.offset]).unwrap_or(0);
        let gps_time = layout
            .gps_time
            .map(|v| LittleEndian::read_f64(&rec[v.offset..v.offset + 8]))
            .unwrap_or((base_index + i) as f64);

        push_filtered(&mut out, filters, color, lon, lat, alt, intensity, classification, gps_time);
    }

    Ok(out)
}

/// Decodes a BROTLI-encoded Potree node. Attributes are stored
/// attribute-major in the decompressed stream; positions are Morton-coded
/// as 128-bit groups and RGB as 64-bit groups regardless of their
/// declared sizes.
pub fn decode_brotli(
    compressed: &[u8],
    attributes: &[AttributeMetadata],
    scale: DVec3,
    offset: DVec3,
    num_points: usize,
    filters: &FilterSet,
    color: &ColorConfig,
) -> Result<DecodedBlock, DecodeError> {
    let mut decompressor =
        brotli_decompressor::Decompressor::new(std::io::Cursor::new(compressed), 4096);
    let mut raw = Vec::new();
    decompressor.read_to_end(&mut raw)?;

    let mut positions = vec![DVec3::ZERO; num_points];
    let mut intensity = vec![0u16; num_points];
    let mut classification = vec![0u8; num_points];
    let mut gps_time: Vec<f64> = Vec::new();

    let mut byte_offset = 0usize;
    for attribute in attributes {
        match attribute.name.to_ascii_lowercase().as_str() {
            "position" | "position_cartesian" => {
                for j in 0..num_points {
                    let bytes = &raw[byte_offset..byte_offset + 16];
                    let (x, y, z) = read_morton_128(bytes);
                    positions[j] = DVec3::new(
                        x as f64 * scale.x + offset.x,
                        y as f64 * scale.y + offset.y,
                        z as f64 * scale.z + offset.z,
                    );
                    byte_offset += 16;
                }
            }
            "rgb" | "rgba" => {
                // color is recomputed from the active ramp; skip the
                // morton-coded source color
                byte_offset += 8 * num_points;
            }
            "intensity" => {
                for j in 0..num_points {
                    intensity[j] = LittleEndian::read_u16(&raw[byte_offset..byte_offset + 2]);
                    byte_offset += attribute.size as usize;
                }
            }
            "classification" => {
                for j in 0..num_points {
                    classification[j] = raw[byte_offset];
                    byte_offset += attribute.size as usize;
                }
            }
            "gps-time" | "gps_time" | "gpstime" => {
                gps_time.reserve(num_points);
                for _ in 0..num_points {
                    gps_time.push(LittleEndian::read_f64(&raw[byte_offset..byte_offset + 8]));
                    byte_offset += attribute.size as usize;
                }
            }
            _ => {
                byte_offset += attribute.size as usize * num_points;
            }
        }
    }

    let mut out = DecodedBlock {
        synthetic_gps: gps_time.is_empty(),
        block: PointBlock::with_capacity(num_points),
        ..Default::default()
    };
    for j in 0..num_points {
        let t = gps_time.get(j).copied().unwrap_or(j as f64);
        let p = positions[j];
        push_filtered(&mut out, filters, color, p.x, p.y, p.z, intensity[j], classification[j], t);
    }

    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn push_filtered(
    out: &mut DecodedBlock,
    filters: &FilterSet,
    color: &ColorConfig,
    lon: f64,
    lat: f64,
    alt: f64,
    intensity: u16,
    classification: u8,
    gps_time: f64,
) {
    if !lon.is_finite()
        || !lat.is_finite()
        || !alt.is_finite()
        || !(-180.0..=180.0).contains(&lon)
        || !(-90.0..=90.0).contains(&lat)
    {
        out.dropped_invalid += 1;
        return;
    }
    if !filters.accepts(lon, lat, alt, gps_time) {
        out.dropped_filtered += 1;
        return;
    }
    let rgb = color.color_point(alt, intensity, classification);
    out.block.push(lon as f32, lat as f32, alt as f32, intensity, classification, gps_time, rgb);
}

fn read_morton_128(bytes: &[u8]) -> (u32, u32, u32) {
    let mc_0 = LittleEndian::read_u32(&bytes[4..8]);
    let mc_1 = LittleEndian::read_u32(&bytes[0..4]);
    let mc_2 = LittleEndian::read_u32(&bytes[12..16]);
    let mc_3 = LittleEndian::read_u32(&bytes[8..12]);

    decode_morton_128(mc_0, mc_1, mc_2, mc_3)
}

/// Keeps every third bit of a 30-bit morton group, compacting it into a
/// 10-bit lane.
fn dealign_24b(mut morton: u32) -> u32 {
    morton &= 0x09249249;

    morton = (morton | (morton >> 2)) & 0x030c30c3;
    morton = (morton | (morton >> 4)) & 0x0300f00f;
    morton = (morton | (morton >> 8)) & 0x030000ff;
    morton = (morton | (morton >> 16)) & 0x000003ff;

    morton
}

fn decode_morton_128(mc_0: u32, mc_1: u32, mc_2: u32, mc_3: u32) -> (u32, u32, u32) {
    // lower bits
    let mut x = dealign_24b(mc_3 & 0x00FFFFFF)
        | (dealign_24b((mc_3 >> 24) | (mc_2 << 8)) << 8);

    let mut y = dealign_24b((mc_3 & 0x00FFFFFF) >> 1)
        | (dealign_24b(((mc_3 >> 24) | (mc_2 << 8)) >> 1) << 8);

    let mut z = dealign_24b((mc_3 & 0x00FFFFFF) >> 2)
        | (dealign_24b(((mc_3 >> 24) | (mc_2 << 8)) >> 2) << 8);

    // upper bits, only present for deep octrees
    if mc_1 != 0 || mc_2 != 0 {
        x |= (dealign_24b(mc_1 & 0x00FFFFFF) << 16)
            | (dealign_24b((mc_1 >> 24) | (mc_0 << 8)) << 24);

        y |= (dealign_24b((mc_1 & 0x00FFFFFF) >> 1) << 16)
            | (dealign_24b(((mc_1 >> 24) | (mc_0 << 8)) >> 1) << 24);

        z |= (dealign_24b((mc_1 & 0x00FFFFFF) >> 2) << 16)
            | (dealign_24b(((mc_1 >> 24) | (mc_0 << 8)) >> 2) << 24);
    }

    (x, y, z)
}
