// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Resumable directory listings
//!
//! A listing is addressed by an offset into the directory's child list.
//! Every entry carries the offset that resumes the listing right after it,
//! so a caller that runs out of buffer space can come back later with the
//! offset of the last entry it kept. Offsets past the end yield nothing.
//!
//! The child list is read live. Creating or removing siblings between two
//! calls of the same listing shifts later offsets.

use std::ffi::OsStr;

use crate::error::FsResult;
use crate::node_table::NodeTable;
use crate::types::{Attributes, NodeId};

/// One entry of a directory listing
#[derive(Clone, Copy, Debug)]
pub struct DirEntry<'a> {
    pub id: NodeId,
    pub name: &'a OsStr,
    pub attr: &'a Attributes,
    /// Offset to pass back to resume after this entry
    pub next_offset: u64,
}

/// Lazy listing over a directory's children starting at a given offset
pub struct DirEntries<'a> {
    nodes: &'a NodeTable,
    children: &'a [NodeId],
    index: usize,
}

/// List the children of `dir` starting at `offset`
pub fn entries(nodes: &NodeTable, dir: NodeId, offset: u64) -> FsResult<DirEntries<'_>> {
    let children = nodes.children(dir)?;
    let index = usize::try_from(offset).unwrap_or(usize::MAX).min(children.len());
    Ok(DirEntries {
        nodes,
        children,
        index,
    })
}

impl<'a> DirEntries<'a> {
    /// Hand entries to `accept` until it refuses one or the listing ends.
    ///
    /// Returns the offset to resume from: the `next_offset` of the last
    /// accepted entry, or the starting offset if nothing was accepted.
    pub fn feed<F>(self, mut accept: F) -> u64
    where
        F: FnMut(&DirEntry<'a>) -> bool,
    {
        let mut resume = self.index as u64;
        for entry in self {
            if !accept(&entry) {
                break;
            }
            resume = entry.next_offset;
        }
        resume
    }
}

impl<'a> Iterator for DirEntries<'a> {
    type Item = DirEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(&id) = self.children.get(self.index) {
            self.index += 1;
            if let Ok(node) = self.nodes.get(id) {
                return Some(DirEntry {
                    id,
                    name: &node.name,
                    attr: &node.attr,
                    next_offset: self.index as u64,
                });
            }
        }
        None
    }
}
