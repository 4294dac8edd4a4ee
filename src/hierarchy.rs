use crate::formats::{copc, potree, PageEntry};
use crate::octree::aabb::create_child_aabb;
use crate::octree::node::{NodeState, OctreeNode};
use crate::octree::{NodeId, OctreeIndex};
use crate::resource::{Resource, ResourceClient, ResourceError};
use thiserror::Error;
use tracing::{debug, warn};

/// Byte ranges beyond this are treated as page corruption rather than a
/// plausible node payload.
pub const BYTE_RANGE_SANITY_CEILING: u64 = 10 * 1024 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum HierarchyError {
    #[error("Page root node not found")]
    PageRootNotFound,

    #[error("Page root is not a pending hierarchy proxy")]
    NotAProxy,

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Invalid binary data: {0}")]
    InvalidBinaryData(#[from] binrw::error::Error),
}

/// Which of the two 22-byte page-record encodings a source uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageFormat {
    Copc,
    Potree,
}

/// Fetches and parses the hierarchy page referenced by a proxy node,
/// populating the index with the nodes it contains. Newly discovered
/// proxies are left for later passes. Never touches point data.
pub async fn load_page<C: ResourceClient>(
    resource: &Resource<C>,
    index: &mut OctreeIndex,
    page_root: NodeId,
    format: PageFormat,
) -> Result<usize, HierarchyError> {
    let (offset, size) = {
        let node = index.node(page_root).ok_or(HierarchyError::PageRootNotFound)?;
        if !node.needs_hierarchy() {
            return Err(HierarchyError::NotAProxy);
        }
        (node.hierarchy_byte_offset, node.hierarchy_byte_size)
    };

    let buf = resource.get_range(offset, size as usize, None).await?;
    parse_fetched_page(index, page_root, format, &buf)
}

/// Parses an already-fetched page buffer; the engine uses this after
/// batching several page fetches concurrently.
pub fn parse_fetched_page(
    index: &mut OctreeIndex,
    page_root: NodeId,
    format: PageFormat,
    buf: &[u8],
) -> Result<usize, HierarchyError> {
    let entries = match format {
        PageFormat::Copc => copc::parse_page(buf)?,
        PageFormat::Potree => potree::parse_page(buf)?,
    };
    let created = parse_page_into_index(index, page_root, &entries);
    debug!(page = index.node(page_root).map(|n| n.name.as_str()).unwrap_or("?"),
           records = entries.len(), created, "hierarchy page parsed");
    Ok(created)
}

/// Walks one page's records breadth-first from the page root, expanding
/// one child per set mask bit, and inserts the children into the index.
/// Returns the number of nodes created.
///
/// Records with `type == 2` are proxies: their byte range points at a
/// child hierarchy page instead of point data, and their own point range
/// arrives with that page's first record.
pub fn parse_page_into_index(
    index: &mut OctreeIndex,
    page_root: NodeId,
    entries: &[PageEntry],
) -> usize {
    let num_nodes = entries.len();
    if num_nodes == 0 {
        if let Some(node) = index.node_mut(page_root) {
            node.hierarchy_loaded = true;
        }
        return 0;
    }

    // every record past the first describes a child created by an earlier
    // record of the same page
    index.reserve(num_nodes.saturating_sub(1));
    let mut node_ids = Vec::with_capacity(num_nodes);
    node_ids.push(page_root);

    let mut prev_data_offset = 0u64;

    for (i, entry) in entries.iter().enumerate() {
        // pages can be truncated; stop at the last addressable record
        if i >= node_ids.len() {
            warn!(extra = num_nodes - i, "hierarchy page has more records than reachable nodes");
            break;
        }
        let current_id = node_ids[i];
        let current = index
            .node_mut(current_id)
            .expect("page node vanished mid-parse - invariant broken");

        let was_proxy = current.is_proxy();
        if was_proxy {
            // first record of a child page re-describes the proxy itself,
            // carrying its point byte range
            current.byte_offset = entry.byte_offset;
            current.byte_size = entry.byte_size;
            current.num_points = entry.num_points;
            current.hierarchy_loaded = true;
        } else if entry.node_type == 2 {
            current.hierarchy_byte_offset = entry.byte_offset;
            current.hierarchy_byte_size = entry.byte_size;
            current.num_points = entry.num_points;
        } else {
            current.byte_offset = entry.byte_offset;
            current.byte_size = entry.byte_size;
            current.num_points = entry.num_points;
        }

        if current.byte_size == 0 {
            // workaround for potree/potree#1125: inner nodes can report
            // points while their byte size is zero
            current.num_points = 0;
        }

        current.node_type = entry.node_type;

        // quarantine corrupt point ranges: loaded-with-no-data, never retried
        if current.node_type != 2 && current.byte_size > 0 {
            let end = current.byte_offset.saturating_add(current.byte_size);
            if end > BYTE_RANGE_SANITY_CEILING || current.byte_offset < prev_data_offset {
                warn!(
                    node = current.name.as_str(),
                    offset = current.byte_offset,
                    size = current.byte_size,
                    "implausible node byte range, marking loaded with no data"
                );
                current.num_points = 0;
                current.byte_size = 0;
                current.state = NodeState::Loaded;
            } else {
                prev_data_offset = current.byte_offset;
            }
        }

        if current.node_type == 2 {
            // child page parsed later; no children expanded here
            continue;
        }

        let (current_key, current_box, current_spacing) =
            (current.key, current.bounding_box.clone(), current.spacing);

        let mut children = Vec::new();
        for child_index in 0..8u8 {
            if (entry.child_mask & (1 << child_index)) == 0 {
                continue;
            }
            let child_key = current_key.child(child_index);
            let child = OctreeNode {
                key: child_key,
                name: child_key.name(),
                bounding_box: create_child_aabb(&current_box, child_index as usize),
                spacing: current_spacing / 2.0,
                parent: Some(current_id),
                ..Default::default()
            };
            let child_id = index.insert(child);
            children.push(child_id);
            node_ids.push(child_id);
        }

        index
            .node_mut(current_id)
            .expect("current node vanished mid-parse - invariant broken")
            .children = children;
    }

    node_ids.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::copc::tests::encode_entry;
    use crate::octree::aabb::Aabb;
    use crate::octree::node::NodeKey;
    use glam::DVec3;

    fn fresh_index() -> OctreeIndex {
        OctreeIndex::new(OctreeNode {
            key: NodeKey::ROOT,
            name: "r".to_string(),
            bounding_box: Aabb::new(DVec3::new(-180.0, -90.0, 0.0), DVec3::new(180.0, 270.0, 360.0)),
            spacing: 2.0,
            node_type: 2,
            hierarchy_byte_size: 3 * 22,
            ..Default::default()
        })
    }

    #[test]
    fn page_expands_children_with_names_and_boxes() {
        let mut index = fresh_index();
        let entries = vec![
            // root: children at octants 0 and 6
            PageEntry { node_type: 1, child_mask: 0b0100_0001, num_points: 500, byte_offset: 0, byte_size: 15_000 },
            PageEntry { node_type: 1, child_mask: 0, num_points: 100, byte_offset: 15_000, byte_size: 3_000 },
            PageEntry { node_type: 1, child_mask: 0, num_points: 200, byte_offset: 18_000, byte_size: 6_000 },
        ];
        let root_id = index.root_id();
        let created = parse_page_into_index(&mut index, root_id, &entries);
        assert_eq!(created, 2);

        let root = index.root();
        assert!(root.hierarchy_loaded);
        assert_eq!(root.num_points, 500);
        assert_eq!(root.children.len(), 2);

        let c0 = index.node(root.children[0]).unwrap();
        let c6 = index.node(root.children[1]).unwrap();
        assert_eq!(c0.name, "r0");
        assert_eq!(c6.name, "r6");
        assert_eq!(c6.num_points, 200);
        assert!(root.bounding_box.contains_aabb(&c0.bounding_box));
        assert!(root.bounding_box.contains_aabb(&c6.bounding_box));
        assert_eq!(c0.spacing, 1.0);
        assert_eq!(index.by_key(NodeKey::from_name("r6").unwrap()), Some(root.children[1]));
    }

    #[test]
    fn proxy_records_defer_children_to_child_pages() {
        let mut index = fresh_index();
        let entries = vec![
            PageEntry { node_type: 1, child_mask: 0b0000_0001, num_points: 10, byte_offset: 0, byte_size: 300 },
            // child is a proxy: byte range points at its hierarchy page
            PageEntry { node_type: 2, child_mask: 0, num_points: 40, byte_offset: 660, byte_size: 44 },
        ];
        let root_id = index.root_id();
        parse_page_into_index(&mut index, root_id, &entries);

        let root = index.root();
        let proxy_id = root.children[0];
        let proxy = index.node(proxy_id).unwrap();
        assert!(proxy.needs_hierarchy());
        assert_eq!(proxy.hierarchy_byte_offset, 660);
        assert_eq!(proxy.hierarchy_byte_size, 44);
        assert!(proxy.children.is_empty());

        // the child page's first record re-describes the proxy's points
        let child_page = vec![
            PageEntry { node_type: 0, child_mask: 0, num_points: 40, byte_offset: 300, byte_size: 1200 },
        ];
        parse_page_into_index(&mut index, proxy_id, &child_page);
        let proxy = index.node(proxy_id).unwrap();
        assert!(!proxy.needs_hierarchy());
        assert_eq!(proxy.byte_offset, 300);
        assert_eq!(proxy.num_points, 40);
    }

    #[test]
    fn corrupt_ranges_are_quarantined_not_fatal() {
        let mut index = fresh_index();
        let entries = vec![
            PageEntry { node_type: 1, child_mask: 0b0000_0011, num_points: 10, byte_offset: 1_000, byte_size: 300 },
            // exceeds the sanity ceiling
            PageEntry { node_type: 1, child_mask: 0, num_points: 10, byte_offset: 2_000, byte_size: 11 * 1024 * 1024 * 1024 },
            // non-monotonic offset
            PageEntry { node_type: 1, child_mask: 0, num_points: 10, byte_offset: 500, byte_size: 300 },
        ];
        let root_id = index.root_id();
        parse_page_into_index(&mut index, root_id, &entries);

        let root = index.root();
        for &child_id in &root.children {
            let child = index.node(child_id).unwrap();
            assert_eq!(child.num_points, 0, "{} should be empty", child.name);
            assert_eq!(child.state, NodeState::Loaded, "{} permanently empty", child.name);
        }
        // the healthy root record survived
        assert_eq!(root.num_points, 10);
        assert_eq!(root.state, NodeState::Unloaded);
    }

    #[test]
    fn zero_byte_size_clears_reported_points() {
        let mut index = fresh_index();
        let entries = vec![
            PageEntry { node_type: 1, child_mask: 0, num_points: 123, byte_offset: 0, byte_size: 0 },
        ];
        let root_id = index.root_id();
        parse_page_into_index(&mut index, root_id, &entries);
        assert_eq!(index.root().num_points, 0);
    }

    #[test]
    fn load_page_fetches_through_the_resource() {
        use crate::resource::memory::MemoryClient;
        use bytes::Bytes;
        use futures::executor::block_on;
        use std::collections::HashMap;

        let entries = [
            PageEntry { node_type: 1, child_mask: 0b0000_0001, num_points: 5, byte_offset: 0, byte_size: 150 },
            PageEntry { node_type: 1, child_mask: 0, num_points: 2, byte_offset: 150, byte_size: 60 },
        ];
        let mut page = Vec::new();
        for e in &entries {
            page.extend_from_slice(&encode_entry(e));
        }

        let mut files = HashMap::new();
        files.insert("mem://hierarchy".to_string(), Bytes::from(page));
        let resource = Resource::new("mem://hierarchy", MemoryClient::new(files));

        let mut index = fresh_index();
        index.root_mut().hierarchy_byte_size = 44;
        let root_id = index.root_id();
        let created =
            block_on(load_page(&resource, &mut index, root_id, PageFormat::Copc)).unwrap();
        assert_eq!(created, 1);
        assert!(!index.root().needs_hierarchy());

        // a parsed page is not a proxy anymore; loading it again is an error
        assert!(block_on(load_page(&resource, &mut index, root_id, PageFormat::Copc)).is_err());
    }

    #[test]
    fn copc_wire_records_parse_into_graph() {
        let mut index = fresh_index();
        let entries = [
            PageEntry { node_type: 1, child_mask: 0b0000_0010, num_points: 7, byte_offset: 0, byte_size: 210 },
            PageEntry { node_type: 1, child_mask: 0, num_points: 3, byte_offset: 210, byte_size: 90 },
        ];
        let mut buf = Vec::new();
        for e in &entries {
            buf.extend_from_slice(&encode_entry(e));
        }
        let parsed = crate::formats::copc::parse_page(&buf).unwrap();
        let root_id = index.root_id();
        parse_page_into_index(&mut index, root_id, &parsed);
        assert_eq!(index.len(), 2);
        assert_eq!(index.node(index.root().children[0]).unwrap().name, "r1");
    }
}
