use crate::cache::NodeCache;
use crate::camera::CameraState;
use crate::color::ColorConfig;
use crate::decode::{self, DecodeError, DecodedBlock};
use crate::filter::{AoiPolygon, FilterSet, RangeFilter, SpatialBounds};
use crate::formats::las::{
    find_vlr, parse_vlrs, plausible_geo_cube, CopcInfo, LasError, LasHeader, COPC_INFO_RECORD_ID,
    COPC_USER_ID, LASZIP_RECORD_ID, LASZIP_USER_ID, LAS_HEADER_MIN_SIZE,
};
use crate::formats::potree::{AttributeMetadata, Metadata, MetadataError};
use crate::formats::{BinaryLayout, Format6Layout};
use crate::hierarchy::{self, HierarchyError, PageFormat};
use crate::octree::node::{NodeKey, NodeState, OctreeNode, PointBlock};
use crate::octree::{NodeId, OctreeIndex};
use crate::resource::{Resource, ResourceClient, ResourceError};
use crate::scheduler::{self, TraversalConfig, TraversalPlan};
use futures::stream::{self, StreamExt};
use glam::DVec3;
use std::collections::HashSet;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Node point fetches issued concurrently per batch.
pub const NODE_FETCH_BATCH: usize = 50;
/// Hierarchy page fetches issued concurrently per batch.
pub const PAGE_FETCH_BATCH: usize = 8;
/// Page-expansion rounds per update pass; bounds pathological hierarchies.
const MAX_PAGE_ROUNDS: usize = 8;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Error loading metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Error reading file header: {0}")]
    Las(#[from] LasError),

    #[error("Error reading LAZ record: {0}")]
    Laz(#[from] laz::LasZipError),

    #[error("Error loading hierarchy: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),
}

/// How a node's raw bytes turn into points.
enum Payload {
    /// LAZ-compressed chunks inflated per node, then read as the tagged
    /// layout.
    CopcLaz { layout: BinaryLayout, laz_vlr: laz::LazVlr },
    /// Uncompressed fixed-stride records (raw LAS payloads, Potree
    /// DEFAULT encoding).
    Raw { layout: BinaryLayout },
    /// Potree BROTLI encoding: attribute-major, morton-coded positions.
    PotreeBrotli { attributes: Vec<AttributeMetadata>, scale: DVec3, offset: DVec3 },
}

impl Payload {
    fn decode(
        &self,
        raw: &[u8],
        num_points: u32,
        filters: &FilterSet,
        color: &ColorConfig,
    ) -> Result<DecodedBlock, DecodeError> {
        match self {
            Payload::CopcLaz { layout, laz_vlr } => {
                let inflated = decode::decompress_copc_chunk(raw, laz_vlr, num_points)?;
                decode::decode_node(&inflated, layout, filters, color)
            }
            Payload::Raw { layout } => decode::decode_node(raw, layout, filters, color),
            Payload::PotreeBrotli { attributes, scale, offset } => decode::flat::decode_brotli(
                raw,
                attributes,
                *scale,
                *offset,
                num_points as usize,
                filters,
                color,
            ),
        }
    }
}

struct Source<C: ResourceClient> {
    /// Point payload bytes: the COPC file itself, or `octree.bin`.
    data: Resource<C>,
    /// Hierarchy page bytes: the COPC file itself, or `hierarchy.bin`.
    hierarchy: Resource<C>,
    page_format: PageFormat,
    payload: Payload,
}

/// Counters for one `update()` pass. Budget deferral is reported apart
/// from failures: running out of budget is expected, a fetch error is not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    pub visited: usize,
    pub pages_loaded: usize,
    pub pages_failed: usize,
    pub nodes_loaded: usize,
    pub nodes_unloaded: usize,
    pub nodes_failed: usize,
    /// Nodes whose every point was dropped as invalid or filtered.
    pub nodes_empty: usize,
    pub points_dropped_invalid: u64,
    pub budget_deferred: usize,
}

/// Aggregate engine state for status surfaces.
#[derive(Clone, Copy, Debug, Default)]
pub struct EngineStats {
    pub resident_points: u64,
    pub loaded_nodes: usize,
    pub graph_nodes: usize,
    pub point_budget: u64,
    pub last_pass: PassStats,
}

/// Merged view handed to the rendering collaborator.
#[derive(Clone, Debug, Default)]
pub struct RenderSnapshot {
    pub positions: Vec<f32>,
    pub color: Vec<u8>,
    pub loaded_nodes: usize,
    pub resident_points: u64,
}

/// The progressive streaming engine: owns the node graph, decides what to
/// load or evict on each `update()` pass, and exposes the decoded points
/// through pull accessors.
pub struct StreamingEngine<C: ResourceClient> {
    source: Source<C>,
    index: OctreeIndex,
    cache: NodeCache,
    filters: FilterSet,
    color: ColorConfig,
    config: TraversalConfig,
    camera: Option<CameraState>,
    dirty: bool,
    last_pass: PassStats,
}

impl<C: ResourceClient + Clone> StreamingEngine<C> {
    /// Opens a COPC file: parses the LAS header at its fixed offsets, the
    /// COPC info VLR for the root cube and root hierarchy page, and the
    /// LAZ VLR for the chunk decompressor.
    pub async fn open_copc(url: &str, client: C) -> Result<Self, EngineError> {
        let data = Resource::new(url, client.clone());

        let header_buf = data.get_range(0, LAS_HEADER_MIN_SIZE, None).await?;
        let header = LasHeader::parse(&header_buf)?;

        let vlr_len = (header.point_data_offset as usize).saturating_sub(header.header_size as usize);
        let vlr_buf = data.get_range(header.header_size as u64, vlr_len, None).await?;
        let vlrs = parse_vlrs(&vlr_buf, header.vlr_count)?;

        let info_vlr =
            find_vlr(&vlrs, COPC_USER_ID, COPC_INFO_RECORD_ID).ok_or(LasError::MissingCopcInfo)?;
        let info = CopcInfo::parse(&info_vlr.data)?;

        let laz_vlr = match find_vlr(&vlrs, LASZIP_USER_ID, LASZIP_RECORD_ID) {
            Some(vlr) => Some(laz::LazVlr::read_from(Cursor::new(&vlr.data[..]))?),
            None => None,
        };

        let (cube, recovered) = plausible_geo_cube(&info.cube(), &header.bounds);
        if recovered {
            warn!(url, "COPC root cube implausible, recovered from header extent");
        }

        let root = OctreeNode {
            key: NodeKey::ROOT,
            name: "r".to_string(),
            bounding_box: cube,
            spacing: info.spacing,
            node_type: 2,
            hierarchy_byte_offset: info.root_hier_offset,
            hierarchy_byte_size: info.root_hier_size,
            ..Default::default()
        };

        let layout = BinaryLayout::CopcFormat6(Format6Layout::from_header(
            header.record_length,
            header.scale,
            header.offset,
        ));
        let payload = match laz_vlr {
            Some(laz_vlr) => Payload::CopcLaz { layout, laz_vlr },
            None => Payload::Raw { layout },
        };

        info!(url, points = header.point_count, "opened COPC source");
        Ok(Self::new(
            Source {
                hierarchy: data.clone(),
                data,
                page_format: PageFormat::Copc,
                payload,
            },
            OctreeIndex::new(root),
        ))
    }

    /// Opens a Potree dataset rooted at `url`: `metadata.json`,
    /// `hierarchy.bin` and `octree.bin` live either at the flat root or
    /// nested under `pointclouds/index/`.
    pub async fn open_potree(url: &str, client: C) -> Result<Self, EngineError> {
        let flat = url.trim_end_matches('/').to_string();
        let nested = format!("{flat}/pointclouds/index");

        let mut metadata: Option<(String, Metadata)> = None;
        let mut last_error = None;
        for base in [&flat, &nested] {
            let resource = Resource::new(&format!("{base}/metadata.json"), client.clone());
            match resource.get_json::<Metadata>(None).await {
                Ok(m) => {
                    metadata = Some((base.clone(), m));
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let (base, metadata) = match metadata {
            Some(found) => found,
            None => return Err(last_error.expect("at least one metadata attempt").into()),
        };

        let payload = match metadata.encoding.as_str() {
            "DEFAULT" => Payload::Raw { layout: BinaryLayout::PotreeFlat(metadata.flat_layout()?) },
            "BROTLI" => Payload::PotreeBrotli {
                attributes: metadata.attributes.clone(),
                scale: DVec3::from(metadata.scale),
                offset: DVec3::from(metadata.offset),
            },
            other => return Err(EngineError::UnsupportedEncoding(other.to_string())),
        };

        let root = metadata.create_root_node();
        info!(url, points = metadata.points, encoding = metadata.encoding.as_str(), "opened Potree source");

        Ok(Self::new(
            Source {
                data: Resource::new(&format!("{base}/octree.bin"), client.clone()),
                hierarchy: Resource::new(&format!("{base}/hierarchy.bin"), client),
                page_format: PageFormat::Potree,
                payload,
            },
            OctreeIndex::new(root),
        ))
    }
}

impl<C: ResourceClient> StreamingEngine<C> {
    fn new(source: Source<C>, index: OctreeIndex) -> Self {
        Self {
            source,
            index,
            cache: NodeCache::new(),
            filters: FilterSet::default(),
            color: ColorConfig::default(),
            config: TraversalConfig::default(),
            camera: None,
            dirty: true,
            last_pass: PassStats::default(),
        }
    }

    // --- configuration surface (pass-through from the UI layer) ---

    /// Updates the camera snapshot; deltas below the movement epsilon are
    /// swallowed so jitter does not restart traversal.
    pub fn set_camera(&mut self, camera: CameraState) -> bool {
        let moved = self.camera.as_ref().map_or(true, |old| old.moved_beyond_epsilon(&camera));
        if moved {
            self.camera = Some(camera);
            self.dirty = true;
        }
        moved
    }

    pub fn set_point_budget(&mut self, budget: u64) {
        self.config.point_budget = budget;
        self.dirty = true;
    }

    pub fn set_depth_range(&mut self, min_depth: u8, max_depth: u8) {
        self.config.min_depth = min_depth;
        self.config.max_depth = max_depth;
        self.dirty = true;
    }

    pub fn set_frustum_culling(&mut self, enabled: bool) {
        self.config.frustum_culling = enabled;
        self.dirty = true;
    }

    /// Filter setters invalidate every loaded node: the predicate runs
    /// during decode, so resident blocks cannot be re-filtered in place.
    pub fn set_spatial_bounds(&mut self, bounds: Option<SpatialBounds>) {
        self.filters.bounds = bounds;
        self.invalidate();
    }

    pub fn set_height_filter(&mut self, height: RangeFilter) {
        self.filters.height = height;
        self.invalidate();
    }

    pub fn set_time_range(&mut self, time: RangeFilter) {
        self.filters.time = time;
        self.invalidate();
    }

    pub fn set_aoi_polygon(&mut self, polygon: Option<AoiPolygon>) {
        self.filters.polygon = polygon;
        self.invalidate();
    }

    /// Colors are baked at decode time, so appearance changes reload too.
    pub fn set_color_config(&mut self, color: ColorConfig) {
        self.color = color;
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.cache.invalidate_all(&mut self.index);
        self.dirty = true;
    }

    pub fn needs_update(&self) -> bool {
        self.dirty
    }

    // --- the traversal/load pass ---

    /// Runs one full scheduling pass: expands hierarchy pages the
    /// traversal asks for, executes evictions, then fetches and decodes
    /// the planned nodes in bounded concurrent batches. Node-local
    /// failures never abort the pass.
    pub async fn update(&mut self) -> Result<PassStats, EngineError> {
        let mut stats = PassStats::default();
        let mut attempted_pages: HashSet<usize> = HashSet::new();
        let mut rounds = 0usize;

        let plan = loop {
            let plan = scheduler::plan(&self.index, self.camera.as_ref(), &self.filters, &self.config);
            let pages: Vec<NodeId> =
                plan.page_loads().filter(|id| !attempted_pages.contains(&id.0)).collect();
            if pages.is_empty() || rounds >= MAX_PAGE_ROUNDS {
                break plan;
            }
            rounds += 1;
            self.expand_pages(&pages, &mut attempted_pages, &mut stats).await;
        };

        stats.visited = plan.visited;
        stats.budget_deferred = plan.budget_deferred;

        for id in plan.unloads() {
            self.cache.unload_node(&mut self.index, id);
            stats.nodes_unloaded += 1;
        }

        self.load_nodes(&plan, &mut stats).await;

        debug_assert!(self.cache.resident_points() <= self.config.point_budget);
        debug!(?stats, resident = self.cache.resident_points(), "update pass complete");
        self.dirty = false;
        self.last_pass = stats;
        Ok(stats)
    }

    async fn expand_pages(
        &mut self,
        pages: &[NodeId],
        attempted: &mut HashSet<usize>,
        stats: &mut PassStats,
    ) {
        for batch in pages.chunks(PAGE_FETCH_BATCH) {
            let requests: Vec<(NodeId, u64, u64)> = batch
                .iter()
                .filter_map(|&id| {
                    self.index
                        .node(id)
                        .map(|n| (id, n.hierarchy_byte_offset, n.hierarchy_byte_size))
                })
                .collect();

            let hierarchy = &self.source.hierarchy;
            // fetch concurrently; completion order is irrelevant because
            // each page parses independently
            let fetched: Vec<(NodeId, Result<Vec<u8>, ResourceError>)> = stream::iter(requests)
                .map(|(id, offset, size)| async move {
                    (id, hierarchy.get_range(offset, size as usize, None).await)
                })
                .buffer_unordered(PAGE_FETCH_BATCH)
                .collect()
                .await;

            for (id, result) in fetched {
                attempted.insert(id.0);
                match result {
                    Ok(buf) => {
                        match hierarchy::parse_fetched_page(
                            &mut self.index,
                            id,
                            self.source.page_format,
                            &buf,
                        ) {
                            Ok(_) => stats.pages_loaded += 1,
                            Err(error) => {
                                warn!(%error, "hierarchy page parse failed");
                                stats.pages_failed += 1;
                            }
                        }
                    }
                    Err(error) => {
                        // retried on a later pass only
                        warn!(%error, "hierarchy page fetch failed");
                        stats.pages_failed += 1;
                    }
                }
            }
        }
    }

    async fn load_nodes(&mut self, plan: &TraversalPlan, stats: &mut PassStats) {
        let mut pending: Vec<(NodeId, u64, u64, u64, u32)> = Vec::new();
        for id in plan.loads() {
            let Some(ticket) = self.cache.begin_load(&mut self.index, id) else { continue };
            let node = self.index.node(id).expect("planned node exists");
            pending.push((id, ticket, node.byte_offset, node.byte_size, node.num_points));
        }

        for batch in pending.chunks(NODE_FETCH_BATCH) {
            let data = &self.source.data;
            let fetched: Vec<(NodeId, u64, u32, Result<Vec<u8>, ResourceError>)> =
                stream::iter(batch.to_vec())
                    .map(|(id, ticket, offset, size, num_points)| async move {
                        (id, ticket, num_points, data.get_range(offset, size as usize, None).await)
                    })
                    .buffer_unordered(NODE_FETCH_BATCH)
                    .collect()
                    .await;

            for (id, ticket, num_points, result) in fetched {
                let buf = match result {
                    Ok(buf) => buf,
                    Err(error) => {
                        warn!(%error, "node fetch failed, will retry next pass");
                        self.cache.abort_load(&mut self.index, id);
                        stats.nodes_failed += 1;
                        continue;
                    }
                };
                match self.source.payload.decode(&buf, num_points, &self.filters, &self.color) {
                    Ok(decoded) => {
                        stats.points_dropped_invalid += decoded.dropped_invalid as u64;
                        if decoded.block.is_empty() && num_points > 0 {
                            // informational: the node exists but nothing
                            // survived validity checks and filters
                            info!(node = id.0, "node decoded to zero points");
                            stats.nodes_empty += 1;
                        }
                        if self.cache.commit(&mut self.index, id, ticket, decoded.block) {
                            stats.nodes_loaded += 1;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "node decode failed");
                        self.cache.abort_load(&mut self.index, id);
                        stats.nodes_failed += 1;
                    }
                }
            }
        }
    }

    // --- pull accessors for the rendering collaborator ---

    pub fn loaded_blocks(&self) -> impl Iterator<Item = (&OctreeNode, &PointBlock)> {
        self.index
            .iter()
            .filter(|(_, n)| n.state == NodeState::Loaded)
            .filter_map(|(_, n)| n.block.as_ref().map(|b| (n, b)))
    }

    /// Merged positions and colors across every loaded node.
    pub fn render_snapshot(&self) -> RenderSnapshot {
        let mut snapshot = RenderSnapshot {
            loaded_nodes: self.cache.loaded_nodes(),
            resident_points: self.cache.resident_points(),
            ..Default::default()
        };
        for (_, block) in self.loaded_blocks() {
            snapshot.positions.extend_from_slice(&block.positions);
            snapshot.color.extend_from_slice(&block.color);
        }
        snapshot
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            resident_points: self.cache.resident_points(),
            loaded_nodes: self.cache.loaded_nodes(),
            graph_nodes: self.index.len(),
            point_budget: self.config.point_budget,
            last_pass: self.last_pass,
        }
    }

    pub fn index(&self) -> &OctreeIndex {
        &self.index
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn camera(&self) -> Option<&CameraState> {
        self.camera.as_ref()
    }
}
