use crate::formats::{AttrView, FlatLayout, PageEntry};
use crate::octree::aabb::Aabb;
use crate::octree::node::{NodeKey, OctreeNode};
use binrw::{binrw, BinReaderExt};
use glam::DVec3;
use serde::Deserialize;
use std::io::Cursor;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Invalid json: {0}")]
    Json(#[from] serde_json::error::Error),

    #[error("Metadata declares no position attribute")]
    MissingPosition,

    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),
}

/// Potree `metadata.json`.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub points: u64,
    #[serde(default)]
    pub projection: String,
    pub hierarchy: HierarchyMetadata,
    pub offset: [f64; 3],
    pub scale: [f64; 3],
    pub spacing: f64,
    pub bounding_box: BoundingBox,
    pub encoding: String,
    pub attributes: Vec<AttributeMetadata>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyMetadata {
    pub first_chunk_size: u64,
    pub step_size: u16,
    pub depth: u16,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl From<BoundingBox> for Aabb {
    fn from(b: BoundingBox) -> Aabb {
        Aabb { min: b.min.into(), max: b.max.into() }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum AttributeType {
    #[serde(rename = "int8")]
    Int8,
    #[serde(rename = "int16")]
    Int16,
    #[serde(rename = "int32")]
    Int32,
    #[serde(rename = "int64")]
    Int64,
    #[serde(rename = "uint8")]
    UInt8,
    #[serde(rename = "uint16")]
    UInt16,
    #[serde(rename = "uint32")]
    UInt32,
    #[serde(rename = "uint64")]
    UInt64,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "double")]
    Double,
    #[serde(rename = "undefined")]
    Undefined,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AttributeMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub size: u16,
    pub num_elements: u16,
    pub element_size: u16,
    pub r#type: AttributeType,
    #[serde(default)]
    pub min: Vec<f64>,
    #[serde(default)]
    pub max: Vec<f64>,
}

impl Metadata {
    /// Root node of the octree: a proxy whose first hierarchy chunk sits
    /// at offset 0 of `hierarchy.bin`.
    pub fn create_root_node(&self) -> OctreeNode {
        OctreeNode {
            key: NodeKey::ROOT,
            name: "r".to_string(),
            bounding_box: self.trusted_bounding_box(),
            spacing: self.spacing,
            node_type: 2,
            hierarchy_byte_size: self.hierarchy.first_chunk_size,
            ..Default::default()
        }
    }

    /// The top-level bounding box is known to sometimes be wrong; the
    /// `position` attribute's own min/max is the more trustworthy source.
    pub fn trusted_bounding_box(&self) -> Aabb {
        let declared: Aabb = self.bounding_box.clone().into();
        let declared_ok = declared.is_valid()
            && declared.max_extent() > 0.0
            && declared.min.x >= -180.0
            && declared.max.x <= 180.0
            && declared.min.y >= -90.0
            && declared.max.y <= 90.0;
        if declared_ok {
            return declared;
        }

        if let Some(position) = self.attribute("position") {
            if position.min.len() >= 3 && position.max.len() >= 3 {
                let recovered = Aabb::new(
                    DVec3::new(position.min[0], position.min[1], position.min[2]),
                    DVec3::new(position.max[0], position.max[1], position.max[2]),
                );
                if recovered.is_valid() && recovered.max_extent() > 0.0 {
                    warn!(
                        declared = ?declared,
                        recovered = ?recovered,
                        "metadata bounding box implausible, recovered from position attribute"
                    );
                    return recovered;
                }
            }
        }

        warn!(declared = ?declared, "metadata bounding box implausible and unrecoverable, keeping it");
        declared
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeMetadata> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name) || a.name == "POSITION_CARTESIAN" && name == "position")
    }

    /// Resolves the fixed-stride record layout once, walking the declared
    /// attribute order. Fails when no position attribute is declared.
    pub fn flat_layout(&self) -> Result<FlatLayout, MetadataError> {
        let mut stride = 0usize;
        let mut position = None;
        let mut intensity = None;
        let mut classification = None;
        let mut gps_time = None;
        let mut rgb = None;

        for attribute in &self.attributes {
            let view = AttrView { offset: stride, size: attribute.size as usize };
            match attribute.name.to_ascii_lowercase().as_str() {
                "position" | "position_cartesian" => position = Some(view),
                "intensity" => intensity = Some(view),
                "classification" => classification = Some(view),
                "gps-time" | "gps_time" | "gpstime" => gps_time = Some(view),
                "rgb" | "rgba" => rgb = Some(view),
                _ => {}
            }
            stride += attribute.size as usize;
        }

        Ok(FlatLayout {
            stride,
            scale: DVec3::from(self.scale),
            offset: DVec3::from(self.offset),
            position: position.ok_or(MetadataError::MissingPosition)?,
            intensity,
            classification,
            gps_time,
            rgb,
        })
    }
}

/// Potree-style hierarchy page record: 22 bytes, byte ranges split into
/// low/high u32 pairs.
#[binrw]
#[derive(Debug, Clone)]
#[br(little)]
pub struct PotreeHierarchyEntry {
    pub r#type: u8,
    pub child_mask: u8,
    pub num_points: u32,
    pub byte_offset_lo: u32,
    pub byte_offset_hi: u32,
    pub byte_size_lo: u32,
    pub byte_size_hi: u32,
}

pub const BYTES_PER_NODE: usize = 22;

impl From<PotreeHierarchyEntry> for PageEntry {
    fn from(e: PotreeHierarchyEntry) -> Self {
        PageEntry {
            node_type: e.r#type,
            child_mask: e.child_mask,
            num_points: e.num_points,
            byte_offset: (e.byte_offset_hi as u64) << 32 | e.byte_offset_lo as u64,
            byte_size: (e.byte_size_hi as u64) << 32 | e.byte_size_lo as u64,
        }
    }
}

pub fn parse_page(buf: &[u8]) -> binrw::BinResult<Vec<PageEntry>> {
    let mut cursor = Cursor::new(buf);
    let num_nodes = buf.len() / BYTES_PER_NODE;
    let mut entries = Vec::with_capacity(num_nodes);
    for _ in 0..num_nodes {
        let entry: PotreeHierarchyEntry = cursor.read_le()?;
        entries.push(entry.into());
    }
    Ok(entries)
}
