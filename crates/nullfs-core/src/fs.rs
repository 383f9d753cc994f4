// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Request handling for the write-discarding filesystem
//!
//! [`NullFs`] is the surface the FUSE adapter talks to. Both tables sit
//! behind a single lock so compound requests such as create (allocate, link,
//! open) are atomic with respect to every other request. No request blocks
//! or performs I/O while holding the lock.

use std::ffi::OsStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::config::FsConfig;
use crate::dirent::{self, DirEntry};
use crate::error::{FsError, FsResult};
use crate::handle_table::HandleTable;
use crate::node_table::NodeTable;
use crate::types::{AccessMode, Attributes, HandleId, NodeId, RootMetadata, SetAttributes};

const S_IFMT: u32 = libc::S_IFMT as u32;
const S_IFREG: u32 = libc::S_IFREG as u32;
const S_IFDIR: u32 = libc::S_IFDIR as u32;

/// Identity of the process issuing a request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Caller {
    pub uid: u32,
    pub gid: u32,
    pub umask: u32,
}

struct FsState {
    nodes: NodeTable,
    handles: HandleTable,
}

/// The filesystem core
pub struct NullFs {
    config: FsConfig,
    state: Mutex<FsState>,
}

impl NullFs {
    /// Create a filesystem whose root mirrors `root`
    pub fn new(config: FsConfig, root: &RootMetadata) -> FsResult<Self> {
        let nodes = NodeTable::with_root(root, config.block_size)?;
        Ok(Self {
            config,
            state: Mutex::new(FsState {
                nodes,
                handles: HandleTable::new(),
            }),
        })
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    // Every request validates before it mutates, so a poisoned lock never
    // guards a half-applied change.
    fn state(&self) -> MutexGuard<'_, FsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live nodes, root included
    pub fn node_count(&self) -> usize {
        self.state().nodes.len()
    }

    pub fn open_handle_count(&self) -> usize {
        self.state().handles.len()
    }

    /// Create a regular file and open it in one step
    pub fn create(
        &self,
        parent: NodeId,
        name: &OsStr,
        mode: u32,
        caller: &Caller,
    ) -> FsResult<(HandleId, Attributes)> {
        let mode = if mode & S_IFMT == 0 { mode | S_IFREG } else { mode };

        let mut state = self.state();
        let FsState { nodes, handles } = &mut *state;
        let node = nodes
            .create_child(parent, name, mode, caller.uid, caller.gid, caller.umask)
            .inspect_err(|err| debug!(target: "nullfs::ops", %parent, ?name, %err, "create failed"))?;
        let (id, attr) = (node.id, node.attr.clone());
        let fh = handles.open(nodes, id)?;

        debug!(target: "nullfs::ops", %parent, ?name, ino = attr.ino, %fh, "created file");
        Ok((fh, attr))
    }

    /// Open an existing node. Only write-only access is granted.
    pub fn open(&self, node: NodeId, flags: i32) -> FsResult<HandleId> {
        let mut state = self.state();
        let FsState { nodes, handles } = &mut *state;

        if !nodes.contains(node) {
            debug!(target: "nullfs::ops", %node, "open of unknown node");
            return Err(FsError::NotFound);
        }
        let access = AccessMode::from_flags(flags);
        if access != AccessMode::WriteOnly {
            debug!(target: "nullfs::ops", %node, ?access, "open refused, write-only access required");
            return Err(FsError::PermissionDenied);
        }

        let fh = handles.open(nodes, node)?;
        debug!(target: "nullfs::ops", %node, %fh, "opened");
        Ok(fh)
    }

    /// Open a directory for listing
    pub fn opendir(&self, node: NodeId) -> FsResult<HandleId> {
        let mut state = self.state();
        let FsState { nodes, handles } = &mut *state;
        let fh = handles.open(nodes, node)?;
        debug!(target: "nullfs::ops", %node, %fh, "opened directory");
        Ok(fh)
    }

    /// Accept and drop `data`. The node's size is left untouched.
    pub fn write(&self, fh: HandleId, data: &[u8]) -> FsResult<usize> {
        let node = self.state().handles.resolve(fh)?;
        debug!(target: "nullfs::ops", %fh, %node, len = data.len(), "discarded write");
        Ok(data.len())
    }

    pub fn getattr(&self, node: NodeId) -> FsResult<Attributes> {
        debug!(target: "nullfs::ops", %node, "getattr");
        self.state().nodes.get(node).map(|n| n.attr.clone())
    }

    pub fn lookup(&self, parent: NodeId, name: &OsStr) -> FsResult<Attributes> {
        debug!(target: "nullfs::ops", %parent, ?name, "lookup");
        self.state().nodes.get_child(parent, name).map(|n| n.attr.clone())
    }

    pub fn mkdir(&self, parent: NodeId, name: &OsStr, mode: u32, caller: &Caller) -> FsResult<Attributes> {
        let mode = (mode & !S_IFMT) | S_IFDIR;
        let mut state = self.state();
        let attr = state
            .nodes
            .create_child(parent, name, mode, caller.uid, caller.gid, caller.umask)
            .inspect_err(|err| debug!(target: "nullfs::ops", %parent, ?name, %err, "mkdir failed"))?
            .attr
            .clone();
        debug!(target: "nullfs::ops", %parent, ?name, ino = attr.ino, "created directory");
        Ok(attr)
    }

    pub fn setattr(&self, node: NodeId, update: &SetAttributes) -> FsResult<Attributes> {
        let mut state = self.state();
        let attr = state.nodes.apply_attribute_update(node, update)?.attr.clone();
        debug!(target: "nullfs::ops", %node, ?update, "attributes updated");
        Ok(attr)
    }

    /// List the directory behind `fh` from `offset`, offering entries to
    /// `accept` until it refuses one. Returns the offset to resume from.
    pub fn readdir<F>(&self, fh: HandleId, offset: u64, accept: F) -> FsResult<u64>
    where
        F: FnMut(&DirEntry<'_>) -> bool,
    {
        let state = self.state();
        let node = state.handles.resolve(fh)?;
        let resume = dirent::entries(&state.nodes, node, offset)?.feed(accept);
        debug!(target: "nullfs::ops", %fh, %node, offset, resume, "listed directory");
        Ok(resume)
    }

    pub fn unlink(&self, parent: NodeId, name: &OsStr) -> FsResult<()> {
        self.remove(parent, name)
    }

    pub fn rmdir(&self, parent: NodeId, name: &OsStr) -> FsResult<()> {
        self.remove(parent, name)
    }

    fn remove(&self, parent: NodeId, name: &OsStr) -> FsResult<()> {
        self.state()
            .nodes
            .remove_child(parent, name)
            .map(|_| ())
            .inspect_err(|err| debug!(target: "nullfs::ops", %parent, ?name, %err, "remove failed"))
    }

    pub fn release(&self, fh: HandleId) -> FsResult<()> {
        debug!(target: "nullfs::ops", %fh, "release");
        self.state().handles.close(fh)
    }

    pub fn releasedir(&self, fh: HandleId) -> FsResult<()> {
        debug!(target: "nullfs::ops", %fh, "releasedir");
        self.state().handles.close(fh)
    }

    /// Nothing is buffered, so there is nothing to flush
    pub fn flush(&self, fh: HandleId) -> FsResult<()> {
        debug!(target: "nullfs::ops", %fh, "flush");
        Ok(())
    }

    /// Lookup counts are not tracked; nodes live until removed
    pub fn forget(&self, node: NodeId, nlookup: u64) {
        debug!(target: "nullfs::ops", %node, nlookup, "forget");
    }

    pub fn getxattr(&self, node: NodeId, name: &OsStr) -> FsResult<Vec<u8>> {
        debug!(target: "nullfs::ops", %node, ?name, "extended attributes are not supported");
        Err(FsError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileTimes, ROOT_NODE_ID};
    use std::ffi::OsString;

    const CALLER: Caller = Caller {
        uid: 1000,
        gid: 1000,
        umask: 0o022,
    };

    fn create_test_fs() -> NullFs {
        let root = RootMetadata {
            name: OsString::from("mnt"),
            mode: S_IFDIR | 0o755,
            nlink: 2,
            uid: 1000,
            gid: 1000,
            rdev: 0,
            size: 4096,
            blksize: 4096,
            blocks: 8,
            times: FileTimes::uniform(1_700_000_000_000_000_000),
        };
        NullFs::new(FsConfig::default(), &root).unwrap()
    }

    fn mkdir(fs: &NullFs, parent: NodeId, name: &str) -> NodeId {
        NodeId(fs.mkdir(parent, OsStr::new(name), 0o755, &CALLER).unwrap().ino)
    }

    #[test]
    fn fresh_fs_has_root_only() {
        let fs = create_test_fs();
        assert_eq!(fs.node_count(), 1);
        assert!(fs.getattr(ROOT_NODE_ID).unwrap().is_dir());
        assert_eq!(fs.open_handle_count(), 0);
    }

    #[test]
    fn create_returns_open_handle_and_attributes() {
        let fs = create_test_fs();
        let (fh, attr) = fs.create(ROOT_NODE_ID, OsStr::new("file"), S_IFREG | 0o666, &CALLER).unwrap();

        assert_eq!(attr.mode, S_IFREG | 0o644);
        assert_eq!(attr.uid, 1000);
        assert_eq!(fs.open_handle_count(), 1);
        assert_eq!(fs.write(fh, b"abc").unwrap(), 3);
        assert_eq!(fs.lookup(ROOT_NODE_ID, OsStr::new("file")).unwrap(), attr);
        fs.release(fh).unwrap();
    }

    #[test]
    fn create_without_type_bits_makes_regular_file() {
        let fs = create_test_fs();
        let (_, attr) = fs.create(ROOT_NODE_ID, OsStr::new("f"), 0o600, &CALLER).unwrap();
        assert_eq!(attr.file_type_bits(), S_IFREG);
    }

    #[test]
    fn create_under_unknown_parent_fails_cleanly() {
        let fs = create_test_fs();
        assert!(matches!(
            fs.create(NodeId(9), OsStr::new("f"), S_IFREG | 0o644, &CALLER),
            Err(FsError::NotFound)
        ));
        assert_eq!(fs.node_count(), 1);
        assert_eq!(fs.open_handle_count(), 0);
    }

    #[test]
    fn write_does_not_change_size() {
        let fs = create_test_fs();
        let (fh, attr) = fs.create(ROOT_NODE_ID, OsStr::new("f"), S_IFREG | 0o644, &CALLER).unwrap();
        let payload = vec![0xAB; 8192];

        assert_eq!(fs.write(fh, &payload).unwrap(), payload.len());
        assert_eq!(fs.getattr(NodeId(attr.ino)).unwrap().size, 0);
    }

    #[test]
    fn write_on_closed_handle_fails() {
        let fs = create_test_fs();
        let (fh, _) = fs.create(ROOT_NODE_ID, OsStr::new("f"), S_IFREG | 0o644, &CALLER).unwrap();
        fs.release(fh).unwrap();
        assert!(matches!(fs.write(fh, b"x"), Err(FsError::NotFound)));
        assert!(matches!(fs.release(fh), Err(FsError::NotFound)));
    }

    #[test]
    fn open_requires_write_only_access() {
        let fs = create_test_fs();
        let (fh, attr) = fs.create(ROOT_NODE_ID, OsStr::new("f"), S_IFREG | 0o644, &CALLER).unwrap();
        fs.release(fh).unwrap();
        let node = NodeId(attr.ino);

        assert!(matches!(fs.open(node, libc::O_RDONLY), Err(FsError::PermissionDenied)));
        assert!(matches!(fs.open(node, libc::O_RDWR), Err(FsError::PermissionDenied)));
        assert_eq!(fs.open_handle_count(), 0);

        let fh = fs.open(node, libc::O_WRONLY | libc::O_TRUNC).unwrap();
        assert_eq!(fs.write(fh, b"hello").unwrap(), 5);
        fs.release(fh).unwrap();
    }

    #[test]
    fn open_unknown_node_is_not_found() {
        let fs = create_test_fs();
        assert!(matches!(fs.open(NodeId(123), libc::O_WRONLY), Err(FsError::NotFound)));
        assert!(matches!(fs.opendir(NodeId(123)), Err(FsError::NotFound)));
    }

    #[test]
    fn open_checks_existence_before_access_mode() {
        let fs = create_test_fs();
        assert!(matches!(fs.open(NodeId(123), libc::O_RDONLY), Err(FsError::NotFound)));
        assert!(matches!(fs.open(NodeId(123), libc::O_RDWR), Err(FsError::NotFound)));
        assert!(matches!(
            fs.open(ROOT_NODE_ID, libc::O_WRONLY | libc::O_RDWR),
            Err(FsError::PermissionDenied)
        ));
        assert_eq!(fs.open_handle_count(), 0);
    }

    #[test]
    fn lookup_and_getattr_missing_entries() {
        let fs = create_test_fs();
        assert!(matches!(fs.lookup(ROOT_NODE_ID, OsStr::new("nope")), Err(FsError::NotFound)));
        assert!(matches!(fs.getattr(NodeId(2)), Err(FsError::NotFound)));
    }

    #[test]
    fn mkdir_sets_directory_type() {
        let fs = create_test_fs();
        let attr = fs.mkdir(ROOT_NODE_ID, OsStr::new("dir"), 0o777, &CALLER).unwrap();
        assert!(attr.is_dir());
        assert_eq!(attr.permissions(), 0o755);
    }

    #[test]
    fn setattr_overwrites_selected_fields() {
        let fs = create_test_fs();
        let (_, attr) = fs.create(ROOT_NODE_ID, OsStr::new("f"), S_IFREG | 0o644, &CALLER).unwrap();
        let node = NodeId(attr.ino);

        let updated = fs
            .setattr(
                node,
                &SetAttributes {
                    mode: Some(S_IFREG | 0o600),
                    gid: Some(5),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.mode, S_IFREG | 0o600);
        assert_eq!(updated.gid, 5);
        assert_eq!(updated.uid, attr.uid);
        assert_eq!(updated.times, attr.times);

        assert!(matches!(
            fs.setattr(NodeId(77), &SetAttributes::default()),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn readdir_paginates() {
        let fs = create_test_fs();
        for name in ["A", "B", "C"] {
            fs.create(ROOT_NODE_ID, OsStr::new(name), S_IFREG | 0o644, &CALLER).unwrap();
        }
        let dh = fs.opendir(ROOT_NODE_ID).unwrap();

        let mut first = Vec::new();
        let resume = fs
            .readdir(dh, 0, |entry| {
                if first.is_empty() {
                    first.push(entry.name.to_os_string());
                    true
                } else {
                    false
                }
            })
            .unwrap();
        assert_eq!(first, vec![OsString::from("A")]);
        assert_eq!(resume, 1);

        let mut rest = Vec::new();
        let resume = fs
            .readdir(dh, resume, |entry| {
                rest.push((entry.name.to_os_string(), entry.next_offset));
                true
            })
            .unwrap();
        assert_eq!(
            rest,
            vec![(OsString::from("B"), 2), (OsString::from("C"), 3)]
        );
        assert_eq!(resume, 3);

        let mut past_end = 0;
        fs.readdir(dh, 5, |_| {
            past_end += 1;
            true
        })
        .unwrap();
        assert_eq!(past_end, 0);

        fs.releasedir(dh).unwrap();
        assert!(matches!(fs.readdir(dh, 0, |_| true), Err(FsError::NotFound)));
    }

    #[test]
    fn readdir_after_directory_removed_is_not_found() {
        let fs = create_test_fs();
        let dir = mkdir(&fs, ROOT_NODE_ID, "dir");
        let dh = fs.opendir(dir).unwrap();
        fs.rmdir(ROOT_NODE_ID, OsStr::new("dir")).unwrap();

        assert!(matches!(fs.readdir(dh, 0, |_| true), Err(FsError::NotFound)));
        fs.releasedir(dh).unwrap();
    }

    #[test]
    fn write_through_handle_of_removed_file_still_succeeds() {
        let fs = create_test_fs();
        let (fh, attr) = fs.create(ROOT_NODE_ID, OsStr::new("f"), S_IFREG | 0o644, &CALLER).unwrap();
        fs.unlink(ROOT_NODE_ID, OsStr::new("f")).unwrap();

        assert_eq!(fs.write(fh, b"late").unwrap(), 4);
        assert!(matches!(fs.getattr(NodeId(attr.ino)), Err(FsError::NotFound)));
        fs.release(fh).unwrap();
    }

    #[test]
    fn create_write_remove_round_trip() {
        let fs = create_test_fs();
        let (fh, _) = fs.create(ROOT_NODE_ID, OsStr::new("file"), S_IFREG | 0o644, &CALLER).unwrap();
        fs.write(fh, b"Hello, World!\n").unwrap();
        fs.flush(fh).unwrap();
        fs.release(fh).unwrap();

        fs.unlink(ROOT_NODE_ID, OsStr::new("file")).unwrap();
        assert!(matches!(fs.lookup(ROOT_NODE_ID, OsStr::new("file")), Err(FsError::NotFound)));
        assert!(matches!(fs.unlink(ROOT_NODE_ID, OsStr::new("file")), Err(FsError::NotFound)));
    }

    #[test]
    fn nested_tree_removal_order() {
        let fs = create_test_fs();
        let d1 = mkdir(&fs, ROOT_NODE_ID, "d1");
        let d2 = mkdir(&fs, d1, "d2");
        let d3 = mkdir(&fs, d2, "d3");
        let (fh, _) = fs.create(d3, OsStr::new("file.txt"), S_IFREG | 0o644, &CALLER).unwrap();
        fs.write(fh, b"Hello, World!\n").unwrap();
        fs.release(fh).unwrap();

        assert!(matches!(fs.rmdir(ROOT_NODE_ID, OsStr::new("d1")), Err(FsError::NotEmpty)));
        assert_eq!(fs.node_count(), 5);

        fs.unlink(d3, OsStr::new("file.txt")).unwrap();
        fs.rmdir(d2, OsStr::new("d3")).unwrap();
        fs.rmdir(d1, OsStr::new("d2")).unwrap();
        fs.rmdir(ROOT_NODE_ID, OsStr::new("d1")).unwrap();
        assert_eq!(fs.node_count(), 1);
    }

    #[test]
    fn no_op_requests_always_succeed() {
        let fs = create_test_fs();
        fs.flush(HandleId(999)).unwrap();
        fs.forget(NodeId(999), 3);
    }

    #[test]
    fn getxattr_is_unsupported() {
        let fs = create_test_fs();
        assert!(matches!(
            fs.getxattr(ROOT_NODE_ID, OsStr::new("security.selinux")),
            Err(FsError::Unsupported)
        ));
    }

    #[test]
    fn requests_from_several_threads_are_serialized() {
        let fs = std::sync::Arc::new(create_test_fs());
        let workers: Vec<_> = (0..4)
            .map(|t| {
                let fs = std::sync::Arc::clone(&fs);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let name = format!("t{t}-{i}");
                        let (fh, _) = fs
                            .create(ROOT_NODE_ID, OsStr::new(&name), S_IFREG | 0o644, &CALLER)
                            .unwrap();
                        fs.release(fh).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(fs.node_count(), 101);
        let dh = fs.opendir(ROOT_NODE_ID).unwrap();
        let listed = fs.readdir(dh, 0, |_| true).unwrap();
        assert_eq!(listed, 100);
    }
}
