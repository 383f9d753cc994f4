// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Node table: the arena that owns every filesystem node
//!
//! Nodes are stored in a flat map keyed by [`NodeId`]. Parent and child links
//! are ids, never references, so detaching a node is two index updates: drop
//! it from the parent's child list, then drop it from the map.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};

use tracing::debug;

use crate::error::{FsError, FsResult};
use crate::types::{now_ns, Attributes, FileTimes, NodeId, RootMetadata, SetAttributes, ROOT_NODE_ID};

/// Filesystem node
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    /// Name as seen by the parent directory
    pub name: OsString,
    pub attr: Attributes,
    /// `None` only for the root
    pub parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    /// Child ids in creation order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

pub struct NodeTable {
    nodes: HashMap<NodeId, Node>,
    next_node_id: u64,
    block_size: u32,
}

impl NodeTable {
    /// Empty table without a root; call [`NodeTable::init_root`] before use
    pub fn new(block_size: u32) -> Self {
        Self {
            nodes: HashMap::new(),
            next_node_id: ROOT_NODE_ID.0 + 1,
            block_size,
        }
    }

    pub fn with_root(root: &RootMetadata, block_size: u32) -> FsResult<Self> {
        let mut table = Self::new(block_size);
        table.init_root(root)?;
        Ok(table)
    }

    /// Install the root node. The root can be installed once per table.
    pub fn init_root(&mut self, root: &RootMetadata) -> FsResult<&Node> {
        if self.nodes.contains_key(&ROOT_NODE_ID) {
            return Err(FsError::AlreadyInitialized);
        }

        let node = Node {
            id: ROOT_NODE_ID,
            name: root.name.clone(),
            attr: Attributes {
                ino: ROOT_NODE_ID.0,
                mode: root.mode,
                nlink: root.nlink,
                uid: root.uid,
                gid: root.gid,
                rdev: root.rdev,
                size: root.size,
                blksize: root.blksize,
                blocks: root.blocks,
                times: FileTimes {
                    crtime_ns: 0,
                    ..root.times
                },
            },
            parent: None,
            children: Vec::new(),
        };
        self.nodes.insert(ROOT_NODE_ID, node);
        self.get(ROOT_NODE_ID)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> FsResult<&Node> {
        self.nodes.get(&id).ok_or(FsError::NotFound)
    }

    /// Child ids of `id` in creation order
    pub fn children(&self, id: NodeId) -> FsResult<&[NodeId]> {
        self.get(id).map(Node::children)
    }

    /// First child of `parent` whose name equals `name`
    pub fn get_child(&self, parent: NodeId, name: &OsStr) -> FsResult<&Node> {
        let parent_node = self.get(parent)?;
        parent_node
            .children
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .find(|child| child.name == name)
            .ok_or(FsError::NotFound)
    }

    /// Create a file or directory under `parent`.
    ///
    /// The type comes from the file type bits of `mode`. Sibling names are
    /// not checked for uniqueness: a second node with the same name is
    /// appended and shadowed by the first on lookup.
    pub fn create_child(
        &mut self,
        parent: NodeId,
        name: &OsStr,
        mode: u32,
        uid: u32,
        gid: u32,
        umask: u32,
    ) -> FsResult<&Node> {
        if !self.nodes.contains_key(&parent) {
            return Err(FsError::NotFound);
        }

        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        let mode = mode & !umask;

        let node = Node {
            id,
            name: name.to_os_string(),
            attr: Attributes {
                ino: id.0,
                mode,
                nlink: 0,
                uid,
                gid,
                rdev: 0,
                size: 0,
                blksize: self.block_size,
                blocks: 0,
                times: FileTimes::uniform(now_ns()),
            },
            parent: Some(parent),
            children: Vec::new(),
        };
        self.nodes.insert(id, node);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.push(id);
        }

        debug!(target: "nullfs::tree", %parent, child = %id, ?name, mode, "node created");
        self.get(id)
    }

    /// Detach the child called `name` from `parent` and delete it
    pub fn remove_child(&mut self, parent: NodeId, name: &OsStr) -> FsResult<NodeId> {
        let child = self.get_child(parent, name)?;
        if child.has_children() {
            return Err(FsError::NotEmpty);
        }
        let id = child.id;

        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            if let Some(pos) = parent_node.children.iter().position(|c| *c == id) {
                parent_node.children.remove(pos);
            }
        }
        self.nodes.remove(&id);

        debug!(target: "nullfs::tree", %parent, child = %id, ?name, "node removed");
        Ok(id)
    }

    /// Overwrite the attribute fields present in `update`, leave the rest alone
    pub fn apply_attribute_update(&mut self, id: NodeId, update: &SetAttributes) -> FsResult<&Node> {
        let node = self.nodes.get_mut(&id).ok_or(FsError::NotFound)?;
        let attr = &mut node.attr;

        if let Some(atime) = update.atime_ns {
            attr.times.atime_ns = atime;
        }
        if let Some(mtime) = update.mtime_ns {
            attr.times.mtime_ns = mtime;
        }
        if let Some(ctime) = update.ctime_ns {
            attr.times.ctime_ns = ctime;
        }
        if let Some(mode) = update.mode {
            attr.mode = mode;
        }
        if let Some(uid) = update.uid {
            attr.uid = uid;
        }
        if let Some(gid) = update.gid {
            attr.gid = gid;
        }
        if let Some(size) = update.size {
            attr.size = size;
        }

        self.get(id)
    }
}
