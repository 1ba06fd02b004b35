//! 打开文件的登记处
//!
//! FAT没有真正的inode，能当身份用的只有目录项的磁盘位置。
//! 登记处以(驱动器, 目录项位置)为键，同一文件不论打开多少次
//! 都共享同一个[`Inode`]；强引用计数就是打开计数，
//! 归零后弱引用自然失效，下次开销时顺手清掉。

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;
use vfs::{DirEntryType, Error};

use crate::cluster::ClusterId;
use crate::dir::DirPos;
use crate::drive::DriveId;
use crate::lock::LockObj;
use crate::sector::SectorId;
use crate::volume::data::{AttrFlag, ShortDirEntry};

/// 根目录没有目录项，用这个槽号占位。
pub const ROOT_SLOT: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InodeKey {
    pub drive: DriveId,
    /// 短目录项的位置
    pub pos: DirPos,
}

impl InodeKey {
    pub const fn root(drive: DriveId) -> Self {
        Self {
            drive,
            pos: DirPos {
                sector: SectorId::new(0),
                slot: ROOT_SLOT,
            },
        }
    }

    pub const fn is_root(&self) -> bool {
        self.pos.slot == ROOT_SLOT
    }
}

/// 随目录项变动的元数据，改动后由调用方写回磁盘。
#[derive(Debug)]
pub struct InodeMeta {
    pub short: ShortDirEntry,
    /// 长目录项的位置，按磁盘顺序
    pub run: Vec<DirPos>,
}

impl InodeMeta {
    /// 根目录的合成元数据。FAT12/16传[`ClusterId::FREE`]。
    pub fn root(start: ClusterId) -> Self {
        let mut short = ShortDirEntry::new([b' '; 11], AttrFlag::Directory.into());
        short.set_cluster_id(start);
        Self {
            short,
            run: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct Inode {
    key: InodeKey,
    /// 文件内容锁
    pub lock: LockObj,
    pub meta: Mutex<InodeMeta>,
}

pub type InodeHandle = Arc<Inode>;

impl Inode {
    pub const fn key(&self) -> InodeKey {
        self.key
    }

    pub const fn is_root(&self) -> bool {
        self.key.is_root()
    }

    pub fn kind(&self) -> DirEntryType {
        if self.meta.lock().short.is_directory() {
            DirEntryType::Directory
        } else {
            DirEntryType::Regular
        }
    }

    /// 起始簇号权充inode编号
    pub fn ino(&self) -> u64 {
        self.meta.lock().short.cluster_id().raw() as u64
    }

    pub fn start(&self) -> ClusterId {
        self.meta.lock().short.cluster_id()
    }
}

#[derive(Debug)]
pub struct InodeRegistry {
    capacity: usize,
    map: Mutex<Vec<(InodeKey, Weak<Inode>)>>,
}

impl InodeRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: Mutex::new(Vec::new()),
        }
    }

    /// 打开`key`处的inode；不在场就用`make`造一个。
    pub fn open(
        &self,
        key: InodeKey,
        make: impl FnOnce() -> InodeMeta,
    ) -> Result<InodeHandle, Error> {
        let mut map = self.map.lock();
        map.retain(|(_, weak)| weak.strong_count() > 0);

        if let Some(live) = map
            .iter()
            .find_map(|(k, weak)| (*k == key).then(|| weak.upgrade()))
        {
            // retain后的弱引用必然还活着
            return live.ok_or(Error::NoInode);
        }

        if map.len() == self.capacity {
            log::warn!("inode registry full ({} slots)", self.capacity);
            return Err(Error::NoInode);
        }

        let inode = Arc::new(Inode {
            key,
            lock: LockObj::new(),
            meta: Mutex::new(make()),
        });
        map.push((key, Arc::downgrade(&inode)));
        Ok(inode)
    }

    /// `key`处是否有打开着的活句柄。
    pub fn is_live(&self, key: InodeKey) -> bool {
        self.map
            .lock()
            .iter()
            .any(|(k, weak)| *k == key && weak.strong_count() > 0)
    }

    /// 某驱动器上活着的句柄数，卸载前的忙检查。
    pub fn live_on(&self, drive: DriveId) -> usize {
        self.map
            .lock()
            .iter()
            .filter(|(k, weak)| k.drive == drive && weak.strong_count() > 0)
            .count()
    }

    /// 清掉某驱动器的全部登记（活的死的一起）。
    pub fn purge_drive(&self, drive: DriveId) {
        self.map.lock().retain(|(k, _)| k.drive != drive);
    }
}
