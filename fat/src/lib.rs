#![no_std]

extern crate alloc;

mod cluster;
mod control;
mod dir;
mod drive;
mod inode;
mod lock;
mod name;
mod sector;
mod util;
pub mod volume;

pub use self::{
    cluster::{ClusterId, ClusterKind, FatKind},
    control::{FatFileSystem, FsConfig},
    dir::DirPos,
    drive::{DriveId, Geometry},
    inode::{Inode, InodeHandle, InodeKey, InodeMeta},
    lock::{ExclusiveGuard, LockObj, SharedGuard},
    sector::{IoChan, SectorId},
};
