// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! nullfs FUSE adapter implementation
//!
//! Maps FUSE operations to nullfs Core calls. Inode numbers are node ids and
//! file handles are handle ids, so no translation tables are needed here.

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
compile_error!("This module requires the 'fuse' feature on Linux");

use fuser::{
    FileAttr, FileType, ReplyAttr, ReplyCreate, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen,
    ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use libc::c_int;
use nullfs_core::{
    now_ns, Attributes, Caller, FsConfig, FsResult, HandleId, NodeId, NullFs, RootMetadata,
    SetAttributes,
};
use std::ffi::OsStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// nullfs FUSE filesystem adapter
pub struct NullFsFuse {
    core: NullFs,
    /// TTL for attribute cache responses
    attr_ttl: Duration,
    /// TTL for directory entry cache responses
    entry_ttl: Duration,
}

impl NullFsFuse {
    /// Create a new FUSE adapter whose root mirrors `root`
    pub fn new(config: FsConfig, root: &RootMetadata) -> FsResult<Self> {
        let attr_ttl = Duration::from_millis(u64::from(config.cache.attr_ttl_ms));
        let entry_ttl = Duration::from_millis(u64::from(config.cache.entry_ttl_ms));
        Ok(Self {
            core: NullFs::new(config, root)?,
            attr_ttl,
            entry_ttl,
        })
    }

    fn caller(req: &Request, umask: u32) -> Caller {
        Caller {
            uid: req.uid(),
            gid: req.gid(),
            umask,
        }
    }
}

/// Convert a core attribute snapshot to a FUSE FileAttr
pub(crate) fn attr_to_fuse(attr: &Attributes) -> FileAttr {
    FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: system_time(attr.times.atime_ns),
        mtime: system_time(attr.times.mtime_ns),
        ctime: system_time(attr.times.ctime_ns),
        crtime: system_time(attr.times.crtime_ns),
        kind: file_type(attr.mode),
        perm: attr.permissions() as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev.try_into().unwrap_or(u32::MAX),
        blksize: attr.blksize,
        flags: 0, // macOS specific
    }
}

fn file_type(mode: u32) -> FileType {
    match mode & (libc::S_IFMT as u32) {
        m if m == libc::S_IFDIR as u32 => FileType::Directory,
        m if m == libc::S_IFLNK as u32 => FileType::Symlink,
        m if m == libc::S_IFCHR as u32 => FileType::CharDevice,
        m if m == libc::S_IFBLK as u32 => FileType::BlockDevice,
        m if m == libc::S_IFIFO as u32 => FileType::NamedPipe,
        m if m == libc::S_IFSOCK as u32 => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn system_time(ns: i64) -> SystemTime {
    if ns >= 0 {
        UNIX_EPOCH + Duration::from_nanos(ns as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(ns.unsigned_abs())
    }
}

fn system_time_ns(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos()).map(|ns| -ns).unwrap_or(i64::MIN),
    }
}

fn time_or_now_ns(time: TimeOrNow) -> i64 {
    match time {
        TimeOrNow::Now => now_ns(),
        TimeOrNow::SpecificTime(t) => system_time_ns(t),
    }
}

fn reply_write_count(written: usize) -> u32 {
    u32::try_from(written).unwrap_or(u32::MAX)
}

impl fuser::Filesystem for NullFsFuse {
    fn init(&mut self, _req: &Request, _config: &mut fuser::KernelConfig) -> Result<(), c_int> {
        info!(
            fs_name = %self.core.config().fs_name,
            attr_ttl_ms = self.attr_ttl.as_millis() as u64,
            entry_ttl_ms = self.entry_ttl.as_millis() as u64,
            "nullfs FUSE adapter initialized"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        info!(
            nodes = self.core.node_count(),
            open_handles = self.core.open_handle_count(),
            "nullfs FUSE adapter destroyed"
        );
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        self.core.forget(NodeId(ino), nlookup);
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.core.lookup(NodeId(parent), name) {
            Ok(attr) => reply.entry(&self.entry_ttl, &attr_to_fuse(&attr), 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.core.getattr(NodeId(ino)) {
            Ok(attr) => reply.attr(&self.attr_ttl, &attr_to_fuse(&attr)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let update = SetAttributes {
            atime_ns: atime.map(time_or_now_ns),
            mtime_ns: mtime.map(time_or_now_ns),
            ctime_ns: ctime.map(system_time_ns),
            mode,
            uid,
            gid,
            size,
        };

        match self.core.setattr(NodeId(ino), &update) {
            Ok(attr) => reply.attr(&self.attr_ttl, &attr_to_fuse(&attr)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let caller = Self::caller(req, umask);
        match self.core.mkdir(NodeId(parent), name, mode, &caller) {
            Ok(attr) => reply.entry(&self.entry_ttl, &attr_to_fuse(&attr), 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.core.unlink(NodeId(parent), name) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.core.rmdir(NodeId(parent), name) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.core.open(NodeId(ino), flags) {
            Ok(fh) => reply.opened(fh.0, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(target: "nullfs::fuse", ino, fh, offset, size = data.len(), "write");
        match self.core.write(HandleId(fh), data) {
            Ok(written) => reply.written(reply_write_count(written)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.core.flush(HandleId(fh)) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.core.release(HandleId(fh)) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.core.opendir(NodeId(ino)) {
            Ok(fh) => reply.opened(fh.0, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let offset = u64::try_from(offset).unwrap_or(0);
        // `add` returns true once the reply buffer is full.
        let result = self.core.readdir(HandleId(fh), offset, |entry| {
            !reply.add(
                entry.attr.ino,
                entry.next_offset as i64,
                file_type(entry.attr.mode),
                entry.name,
            )
        });

        match result {
            Ok(_) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn releasedir(&mut self, _req: &Request, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        match self.core.releasedir(HandleId(fh)) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn getxattr(&mut self, _req: &Request, ino: u64, name: &OsStr, _size: u32, reply: ReplyXattr) {
        match self.core.getxattr(NodeId(ino), name) {
            Ok(value) => reply.data(&value),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn create(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let caller = Self::caller(req, umask);
        match self.core.create(NodeId(parent), name, mode, &caller) {
            Ok((fh, attr)) => reply.created(&self.entry_ttl, &attr_to_fuse(&attr), 0, fh.0, 0),
            Err(err) => reply.error(err.errno()),
        }
    }
}
