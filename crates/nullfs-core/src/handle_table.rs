// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Open handle bookkeeping
//!
//! A handle binds to a node id when it is opened and is never re-validated
//! afterwards. If the node disappears while the handle is open, `resolve`
//! still hands back the stale id and the following node lookup reports
//! [`FsError::NotFound`].

use std::collections::HashMap;

use crate::error::{FsError, FsResult};
use crate::node_table::NodeTable;
use crate::types::{HandleId, NodeId};

#[derive(Debug, Default)]
pub struct HandleTable {
    handles: HashMap<HandleId, NodeId>,
    next_handle_id: u64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a handle on `node`, which must currently exist in `nodes`
    pub fn open(&mut self, nodes: &NodeTable, node: NodeId) -> FsResult<HandleId> {
        if !nodes.contains(node) {
            return Err(FsError::NotFound);
        }

        let handle_id = HandleId(self.next_handle_id);
        self.next_handle_id += 1;
        self.handles.insert(handle_id, node);
        Ok(handle_id)
    }

    pub fn close(&mut self, handle_id: HandleId) -> FsResult<()> {
        self.handles.remove(&handle_id).map(|_| ()).ok_or(FsError::NotFound)
    }

    pub fn resolve(&self, handle_id: HandleId) -> FsResult<NodeId> {
        self.handles.get(&handle_id).copied().ok_or(FsError::NotFound)
    }

    /// Number of currently open handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileTimes, RootMetadata, DEFAULT_BLOCK_SIZE, ROOT_NODE_ID};
    use std::ffi::{OsStr, OsString};

    fn create_test_table() -> NodeTable {
        let root = RootMetadata {
            name: OsString::from("mnt"),
            mode: libc::S_IFDIR as u32 | 0o755,
            nlink: 2,
            uid: 0,
            gid: 0,
            rdev: 0,
            size: 0,
            blksize: 4096,
            blocks: 0,
            times: FileTimes::default(),
        };
        NodeTable::with_root(&root, DEFAULT_BLOCK_SIZE).unwrap()
    }

    #[test]
    fn open_resolve_close() {
        let nodes = create_test_table();
        let mut handles = HandleTable::new();

        let fh = handles.open(&nodes, ROOT_NODE_ID).unwrap();
        assert_eq!(fh, HandleId(0));
        assert_eq!(handles.resolve(fh).unwrap(), ROOT_NODE_ID);

        handles.close(fh).unwrap();
        assert!(matches!(handles.resolve(fh), Err(FsError::NotFound)));
        assert!(matches!(handles.close(fh), Err(FsError::NotFound)));
        assert!(handles.is_empty());
    }

    #[test]
    fn handle_ids_are_sequential_and_distinct_while_open() {
        let nodes = create_test_table();
        let mut handles = HandleTable::new();

        let a = handles.open(&nodes, ROOT_NODE_ID).unwrap();
        let b = handles.open(&nodes, ROOT_NODE_ID).unwrap();
        let c = handles.open(&nodes, ROOT_NODE_ID).unwrap();
        assert_eq!((a, b, c), (HandleId(0), HandleId(1), HandleId(2)));
        assert_eq!(handles.len(), 3);

        handles.close(b).unwrap();
        assert_eq!(handles.resolve(a).unwrap(), ROOT_NODE_ID);
        assert_eq!(handles.resolve(c).unwrap(), ROOT_NODE_ID);
    }

    #[test]
    fn open_unknown_node_fails_without_allocating() {
        let nodes = create_test_table();
        let mut handles = HandleTable::new();

        assert!(matches!(handles.open(&nodes, NodeId(77)), Err(FsError::NotFound)));
        assert_eq!(handles.open(&nodes, ROOT_NODE_ID).unwrap(), HandleId(0));
    }

    #[test]
    fn handle_outlives_removed_node() {
        let mut nodes = create_test_table();
        let mut handles = HandleTable::new();

        let file = nodes
            .create_child(ROOT_NODE_ID, OsStr::new("f"), libc::S_IFREG as u32 | 0o644, 0, 0, 0)
            .unwrap()
            .id;
        let fh = handles.open(&nodes, file).unwrap();
        nodes.remove_child(ROOT_NODE_ID, OsStr::new("f")).unwrap();

        let stale = handles.resolve(fh).unwrap();
        assert_eq!(stale, file);
        assert!(matches!(nodes.get(stale), Err(FsError::NotFound)));

        handles.close(fh).unwrap();
    }
}
