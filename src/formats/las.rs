use crate::octree::aabb::Aabb;
use binrw::{binrw, BinReaderExt};
use byteorder::{ByteOrder, LittleEndian};
use glam::DVec3;
use std::io::Cursor;
use thiserror::Error;

/// Minimum bytes needed to parse the fixed header fields below.
pub const LAS_HEADER_MIN_SIZE: usize = 375;

pub const COPC_USER_ID: &str = "copc";
pub const COPC_INFO_RECORD_ID: u16 = 1;
pub const LASZIP_USER_ID: &str = "laszip encoded";
pub const LASZIP_RECORD_ID: u16 = 22204;

const VLR_HEADER_SIZE: usize = 54;

#[derive(Error, Debug)]
pub enum LasError {
    #[error("Header too short: {0} bytes")]
    Truncated(usize),

    #[error("Bad signature, expected LASF")]
    BadSignature,

    #[error("Variable length records are malformed")]
    MalformedVlrs,

    #[error("Missing COPC info record")]
    MissingCopcInfo,

    #[error("Invalid binary data: {0}")]
    InvalidBinaryData(#[from] binrw::error::Error),
}

/// LAS/COPC file header, read at the fixed offsets of the 1.4 layout.
#[derive(Clone, Debug)]
pub struct LasHeader {
    pub header_size: u16,
    pub point_data_offset: u32,
    pub vlr_count: u32,
    /// Point data record format with the LAZ compression bits masked off.
    pub point_format: u8,
    pub record_length: u16,
    pub point_count: u64,
    pub scale: DVec3,
    pub offset: DVec3,
    /// From the header min/max fields (LAS stores max/min interleaved
    /// per axis).
    pub bounds: Aabb,
}

impl LasHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, LasError> {
        if buf.len() < LAS_HEADER_MIN_SIZE {
            return Err(LasError::Truncated(buf.len()));
        }
        if &buf[0..4] != b"LASF" {
            return Err(LasError::BadSignature);
        }

        let header_size = LittleEndian::read_u16(&buf[94..96]);
        let point_data_offset = LittleEndian::read_u32(&buf[96..100]);
        let vlr_count = LittleEndian::read_u32(&buf[100..104]);
        // bits 6-7 of the format byte flag LAZ compression
        let point_format = buf[104] & 0x3f;
        let record_length = LittleEndian::read_u16(&buf[105..107]);

        let legacy_count = LittleEndian::read_u32(&buf[107..111]) as u64;
        let extended_count = LittleEndian::read_u64(&buf[247..255]);
        let point_count = if legacy_count != 0 { legacy_count } else { extended_count };

        let scale = DVec3::new(
            LittleEndian::read_f64(&buf[131..139]),
            LittleEndian::read_f64(&buf[139..147]),
            LittleEndian::read_f64(&buf[147..155]),
        );
        let offset = DVec3::new(
            LittleEndian::read_f64(&buf[155..163]),
            LittleEndian::read_f64(&buf[163..171]),
            LittleEndian::read_f64(&buf[171..179]),
        );

        let max_x = LittleEndian::read_f64(&buf[179..187]);
        let min_x = LittleEndian::read_f64(&buf[187..195]);
        let max_y = LittleEndian::read_f64(&buf[195..203]);
        let min_y = LittleEndian::read_f64(&buf[203..211]);
        let max_z = LittleEndian::read_f64(&buf[211..219]);
        let min_z = LittleEndian::read_f64(&buf[219..227]);

        Ok(Self {
            header_size,
            point_data_offset,
            vlr_count,
            point_format,
            record_length,
            point_count,
            scale,
            offset,
            bounds: Aabb::new(DVec3::new(min_x, min_y, min_z), DVec3::new(max_x, max_y, max_z)),
        })
    }
}

#[derive(Clone, Debug)]
pub struct Vlr {
    pub user_id: String,
    pub record_id: u16,
    pub data: Vec<u8>,
}

/// Parses the VLR block sitting between the header and the point data.
/// `buf` must start at `header.header_size`.
pub fn parse_vlrs(buf: &[u8], vlr_count: u32) -> Result<Vec<Vlr>, LasError> {
    let mut vlrs = Vec::with_capacity(vlr_count as usize);
    let mut pos = 0usize;

    for _ in 0..vlr_count {
        let end = pos + VLR_HEADER_SIZE;
        if end > buf.len() {
            return Err(LasError::MalformedVlrs);
        }
        let user_id = String::from_utf8_lossy(&buf[pos + 2..pos + 18])
            .trim_end_matches('\0')
            .to_string();
        let record_id = LittleEndian::read_u16(&buf[pos + 18..pos + 20]);
        let data_len = LittleEndian::read_u16(&buf[pos + 20..pos + 22]) as usize;
        if end + data_len > buf.len() {
            return Err(LasError::MalformedVlrs);
        }
        vlrs.push(Vlr {
            user_id,
            record_id,
            data: buf[end..end + data_len].to_vec(),
        });
        pos = end + data_len;
    }

    Ok(vlrs)
}

pub fn find_vlr<'a>(vlrs: &'a [Vlr], user_id: &str, record_id: u16) -> Option<&'a Vlr> {
    vlrs.iter().find(|v| v.user_id == user_id && v.record_id == record_id)
}

/// COPC info block: root octree cube, spacing, and the root hierarchy
/// page location. 160-byte payload of the `copc`/1 VLR.
#[binrw]
#[derive(Clone, Debug, Default)]
#[br(little)]
pub struct CopcInfo {
    pub center_x: f64,
    pub center_y: f64,
    pub center_z: f64,
    pub halfsize: f64,
    pub spacing: f64,
    pub root_hier_offset: u64,
    pub root_hier_size: u64,
    pub gpstime_minimum: f64,
    pub gpstime_maximum: f64,
    pub reserved: [u64; 11],
}

impl CopcInfo {
    pub fn parse(data: &[u8]) -> Result<Self, LasError> {
        let mut cursor = Cursor::new(data);
        Ok(cursor.read_le()?)
    }

    /// The root octree cube as declared by the info block.
    pub fn cube(&self) -> Aabb {
        let center = DVec3::new(self.center_x, self.center_y, self.center_z);
        Aabb::new(center - DVec3::splat(self.halfsize), center + DVec3::splat(self.halfsize))
    }
}

/// Declared cubes occasionally carry garbage; anything outside geographic
/// range (or non-increasing) falls back to the header extent, which is
/// written by the producer from the actual points.
pub fn plausible_geo_cube(declared: &Aabb, header_bounds: &Aabb) -> (Aabb, bool) {
    let geo = Aabb::new(DVec3::new(-180.0, -90.0, f64::NEG_INFINITY), DVec3::new(180.0, 90.0, f64::INFINITY));
    let horizontally_sane = geo.min.x <= declared.min.x
        && declared.max.x <= geo.max.x
        && geo.min.y <= declared.min.y
        && declared.max.y <= geo.max.y;
    if declared.is_valid() && declared.max_extent() > 0.0 && horizontally_sane {
        (declared.clone(), false)
    } else {
        (header_bounds.clone(), true)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a minimal LAS 1.4 header followed by a COPC info VLR.
    pub(crate) fn synthetic_copc_header(
        point_count: u64,
        scale: DVec3,
        offset: DVec3,
        root_hier: (u64, u64),
    ) -> Vec<u8> {
        let mut buf = vec![0u8; LAS_HEADER_MIN_SIZE];
        buf[0..4].copy_from_slice(b"LASF");
        LittleEndian::write_u16(&mut buf[94..96], LAS_HEADER_MIN_SIZE as u16);
        LittleEndian::write_u32(&mut buf[100..104], 1); // one VLR
        buf[104] = 6 | 0x80; // PDRF 6 with a compression bit set
        LittleEndian::write_u16(&mut buf[105..107], 30);
        LittleEndian::write_u64(&mut buf[247..255], point_count);
        for (i, v) in [scale.x, scale.y, scale.z].iter().enumerate() {
            LittleEndian::write_f64(&mut buf[131 + i * 8..139 + i * 8], *v);
        }
        for (i, v) in [offset.x, offset.y, offset.z].iter().enumerate() {
            LittleEndian::write_f64(&mut buf[155 + i * 8..163 + i * 8], *v);
        }
        // max/min interleaved: x then y then z
        for (i, v) in [20.0, -20.0, 45.0, -45.0, 30.0, 0.0].iter().enumerate() {
            LittleEndian::write_f64(&mut buf[179 + i * 8..187 + i * 8], *v);
        }

        // COPC info VLR
        let mut vlr_header = vec![0u8; VLR_HEADER_SIZE];
        vlr_header[2..6].copy_from_slice(b"copc");
        LittleEndian::write_u16(&mut vlr_header[18..20], COPC_INFO_RECORD_ID);
        LittleEndian::write_u16(&mut vlr_header[20..22], 160);
        let mut info = vec![0u8; 160];
        for (i, v) in [0.0f64, 0.0, 15.0, 180.0, 1.0].iter().enumerate() {
            LittleEndian::write_f64(&mut info[i * 8..(i + 1) * 8], *v);
        }
        LittleEndian::write_u64(&mut info[40..48], root_hier.0);
        LittleEndian::write_u64(&mut info[48..56], root_hier.1);

        LittleEndian::write_u32(
            &mut buf[96..100],
            (LAS_HEADER_MIN_SIZE + VLR_HEADER_SIZE + 160) as u32,
        );
        buf.extend_from_slice(&vlr_header);
        buf.extend_from_slice(&info);
        buf
    }

    #[test]
    fn parses_synthetic_header() {
        let buf = synthetic_copc_header(
            1000,
            DVec3::splat(0.001),
            DVec3::ZERO,
            (4096, 22 * 3),
        );
        let header = LasHeader::parse(&buf).unwrap();
        assert_eq!(header.point_format, 6);
        assert_eq!(header.record_length, 30);
        assert_eq!(header.point_count, 1000);
        assert_eq!(header.scale, DVec3::splat(0.001));
        assert_eq!(header.bounds.min.x, -20.0);
        assert_eq!(header.bounds.max.z, 30.0);

        let vlrs = parse_vlrs(&buf[header.header_size as usize..], header.vlr_count).unwrap();
        let info_vlr = find_vlr(&vlrs, COPC_USER_ID, COPC_INFO_RECORD_ID).unwrap();
        let info = CopcInfo::parse(&info_vlr.data).unwrap();
        assert_eq!(info.halfsize, 180.0);
        assert_eq!(info.root_hier_offset, 4096);
        assert_eq!(info.root_hier_size, 66);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut buf = vec![0u8; LAS_HEADER_MIN_SIZE];
        buf[0..4].copy_from_slice(b"XXXX");
        assert!(matches!(LasHeader::parse(&buf), Err(LasError::BadSignature)));
    }

    #[test]
    fn implausible_cube_falls_back_to_header_extent() {
        let header = Aabb::new(DVec3::new(-20.0, -45.0, 0.0), DVec3::new(20.0, 45.0, 30.0));
        let silly = Aabb::new(DVec3::new(-4.0e6, -2.0e6, 0.0), DVec3::new(4.0e6, 2.0e6, 30.0));
        let (cube, recovered) = plausible_geo_cube(&silly, &header);
        assert!(recovered);
        assert_eq!(cube, header);

        let sane = Aabb::new(DVec3::new(-90.0, -45.0, 0.0), DVec3::new(90.0, 45.0, 30.0));
        let (cube, recovered) = plausible_geo_cube(&sane, &header);
        assert!(!recovered);
        assert_eq!(cube, sane);
    }
}
