use crate::octree::aabb::Aabb;
use crate::octree::NodeId;

/// Integer octree coordinates identifying a node: depth plus the cell
/// position inside the `2^depth` grid of that depth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub depth: u8,
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl NodeKey {
    pub const ROOT: NodeKey = NodeKey { depth: 0, x: 0, y: 0, z: 0 };

    /// Key of the child in the given octant. Octant bits follow the
    /// box-split convention: bit 2 → x, bit 1 → y, bit 0 → z.
    pub fn child(&self, octant: u8) -> NodeKey {
        debug_assert!(octant < 8);
        NodeKey {
            depth: self.depth + 1,
            x: (self.x << 1) | ((octant >> 2) & 1) as u32,
            y: (self.y << 1) | ((octant >> 1) & 1) as u32,
            z: (self.z << 1) | (octant & 1) as u32,
        }
    }

    /// Potree-style node name: `"r"` for the root, one octant digit
    /// appended per level below it.
    pub fn name(&self) -> String {
        let mut name = String::with_capacity(1 + self.depth as usize);
        name.push('r');
        for level in (0..self.depth).rev() {
            let octant = (((self.x >> level) & 1) << 2)
                | (((self.y >> level) & 1) << 1)
                | ((self.z >> level) & 1);
            name.push(char::from(b'0' + octant as u8));
        }
        name
    }

    /// Inverse of [`NodeKey::name`]. `None` for malformed names.
    pub fn from_name(name: &str) -> Option<NodeKey> {
        let rest = name.strip_prefix('r')?;
        let mut key = NodeKey::ROOT;
        for c in rest.chars() {
            let octant = c.to_digit(8)? as u8;
            key = key.child(octant);
        }
        Some(key)
    }
}

/// Node residency state. `Loading` doubles as the mutual-exclusion flag
/// preventing two concurrent decodes of the same node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NodeState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
}

/// Decoded, filtered point data for one node: parallel columnar arrays.
/// All arrays share the same logical length; `color` is derived and is
/// recomputed whenever the color configuration changes.
#[derive(Clone, Debug, Default)]
pub struct PointBlock {
    /// lon, lat, alt interleaved, three entries per point.
    pub positions: Vec<f32>,
    pub intensity: Vec<u16>,
    pub classification: Vec<u8>,
    /// Seconds since the product epoch (TAI).
    pub gps_time: Vec<f64>,
    /// rgb interleaved, three entries per point.
    pub color: Vec<u8>,
}

impl PointBlock {
    pub fn with_capacity(points: usize) -> Self {
        Self {
            positions: Vec::with_capacity(points * 3),
            intensity: Vec::with_capacity(points),
            classification: Vec::with_capacity(points),
            gps_time: Vec::with_capacity(points),
            color: Vec::with_capacity(points * 3),
        }
    }

    pub fn len(&self) -> usize {
        self.gps_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gps_time.is_empty()
    }

    pub fn push(
        &mut self,
        lon: f32,
        lat: f32,
        alt: f32,
        intensity: u16,
        classification: u8,
        gps_time: f64,
        color: [u8; 3],
    ) {
        self.positions.extend_from_slice(&[lon, lat, alt]);
        self.intensity.push(intensity);
        self.classification.push(classification);
        self.gps_time.push(gps_time);
        self.color.extend_from_slice(&color);
    }

    pub fn append(&mut self, other: &mut PointBlock) {
        self.positions.append(&mut other.positions);
        self.intensity.append(&mut other.intensity);
        self.classification.append(&mut other.classification);
        self.gps_time.append(&mut other.gps_time);
        self.color.append(&mut other.color);
    }

    /// Reorders all columns ascending by GPS time. Stable, so equal
    /// timestamps keep their decode order.
    pub fn sort_by_gps_time(&mut self) {
        let n = self.len();
        debug_assert_eq!(self.positions.len(), n * 3);
        debug_assert_eq!(self.color.len(), n * 3);

        let mut order: Vec<u32> = (0..n as u32).collect();
        order.sort_by(|&a, &b| {
            self.gps_time[a as usize]
                .partial_cmp(&self.gps_time[b as usize])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut sorted = PointBlock::with_capacity(n);
        for &i in &order {
            let i = i as usize;
            sorted.push(
                self.positions[i * 3],
                self.positions[i * 3 + 1],
                self.positions[i * 3 + 2],
                self.intensity[i],
                self.classification[i],
                self.gps_time[i],
                [self.color[i * 3], self.color[i * 3 + 1], self.color[i * 3 + 2]],
            );
        }
        *self = sorted;
    }
}

/// One octree cell. Created once at hierarchy-parse time; only `state`,
/// `block` and `generation` change afterwards.
#[derive(Clone, Debug, Default)]
pub struct OctreeNode {
    pub id: Option<NodeId>,
    pub key: NodeKey,
    pub name: String,
    pub bounding_box: Aabb,
    pub spacing: f64,
    pub num_points: u32,
    pub byte_offset: u64,
    pub byte_size: u64,

    /// Entry kind from the hierarchy page. 2 marks a proxy whose children
    /// live in a separate, lazily fetched page.
    pub node_type: u8,
    pub hierarchy_byte_offset: u64,
    pub hierarchy_byte_size: u64,
    /// Set once the proxy's child page has been parsed.
    pub hierarchy_loaded: bool,

    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,

    pub state: NodeState,
    pub block: Option<PointBlock>,
    /// Filter/appearance generation the resident block was decoded under.
    pub generation: u64,
}

impl OctreeNode {
    pub fn depth(&self) -> u8 {
        self.key.depth
    }

    pub fn is_proxy(&self) -> bool {
        self.node_type == 2
    }

    /// Proxy whose child page has not been fetched yet.
    pub fn needs_hierarchy(&self) -> bool {
        self.is_proxy() && !self.hierarchy_loaded
    }
}
