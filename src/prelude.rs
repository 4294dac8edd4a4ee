pub use crate::camera::CameraState;
pub use crate::color::{ColorConfig, ColorMode, Colormap};
pub use crate::engine::{EngineStats, PassStats, RenderSnapshot, StreamingEngine};
pub use crate::filter::{AoiPolygon, FilterSet, RangeFilter, SpatialBounds};
pub use crate::octree::node::{NodeKey, NodeState, OctreeNode, PointBlock};
pub use crate::resource::{Resource, ResourceClient};
pub use crate::scheduler::TraversalConfig;

// Error types
pub use crate::decode::DecodeError;
pub use crate::engine::EngineError;
pub use crate::filter::FilterError;
pub use crate::hierarchy::HierarchyError;
pub use crate::resource::ResourceError;
