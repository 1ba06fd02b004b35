//! 已挂载的驱动器
//!
//! 每个已挂载卷对应一个[`Drive`]：几何参数、I/O通道、
//! FAT表、驱动器结构锁与工作目录。编号即挂载表下标。

use alloc::sync::Arc;
use alloc::vec::Vec;

use derive_more::{From, Into};
use spin::Mutex;
use vfs::Error;

use crate::cluster::{ClusterId, FatKind};
use crate::inode::InodeHandle;
use crate::lock::LockObj;
use crate::sector::{IoChan, SectorId};
use crate::volume::fat::FatTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Into)]
#[repr(transparent)]
pub struct DriveId(u16);

impl core::fmt::Display for DriveId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:", self.0)
    }
}

impl DriveId {
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// 卷的布局参数，挂载时从BPB一次性算出，之后只读。
#[derive(Debug, Clone)]
pub struct Geometry {
    pub sector_bytes: usize,
    pub cluster_sectors: usize,
    /// 首份FAT的起始扇区
    pub fat_area: SectorId,
    /// 单份FAT占用的扇区数
    pub fat_sectors: usize,
    pub fat_count: usize,
    /// FAT12/16固定根目录的起始扇区与长度；FAT32为0
    pub root_area: SectorId,
    pub root_sectors: usize,
    pub data_area: SectorId,
    /// 卷上最大的合法簇编号（簇总数+1）
    pub max_index: u32,
    pub total_sectors: usize,
    /// FAT32根目录的起始簇；FAT12/16为[`ClusterId::FREE`]
    pub root_cluster: ClusterId,
}

impl Geometry {
    /// 簇的第一个扇区
    pub fn cluster_sector(&self, id: ClusterId) -> SectorId {
        debug_assert!(id >= ClusterId::MIN);
        self.data_area + (id.index() - 2) * self.cluster_sectors
    }

    pub const fn cluster_bytes(&self) -> usize {
        self.cluster_sectors * self.sector_bytes
    }

    pub const fn cluster_count(&self) -> u32 {
        self.max_index - 1
    }
}

#[derive(Debug)]
pub struct Drive {
    pub id: DriveId,
    pub kind: FatKind,
    pub geo: Geometry,
    pub chan: Arc<IoChan>,
    /// 驱动器结构锁：目录树操作的独占/共享界限
    pub lock: LockObj,
    pub table: Mutex<FatTable>,
    /// 工作目录：自根起的祖先句柄栈
    pub cwd: Mutex<Vec<InodeHandle>>,
}

impl Drive {
    /// 根目录所在的区域
    pub fn root_span(&self) -> DirSpan {
        match self.kind {
            FatKind::T12 | FatKind::T16 => DirSpan::Root {
                start: self.geo.root_area,
                sectors: self.geo.root_sectors,
            },
            FatKind::T32 => DirSpan::Chain(self.geo.root_cluster),
        }
    }

    /// 由目录的起始簇得到其扇区区域。
    /// `start`为[`ClusterId::FREE`]表示根目录。
    pub fn dir_span(&self, start: ClusterId) -> DirSpan {
        if start == ClusterId::FREE {
            self.root_span()
        } else {
            DirSpan::Chain(start)
        }
    }
}

/// 目录占据的扇区区域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirSpan {
    /// FAT12/16的固定根目录，不可伸长
    Root { start: SectorId, sectors: usize },
    /// 簇链上的目录
    Chain(ClusterId),
}

/// 沿[`DirSpan`]逐扇区推进的游标。
///
/// 链式区域每跨一个簇就查一次FAT。
#[derive(Debug)]
pub struct SpanCursor {
    span: DirSpan,
    /// 区域内的簇游标，仅链式区域使用
    cluster: Option<ClusterId>,
    /// 当前簇（或固定根目录）内的扇区下标
    nth: usize,
}

impl SpanCursor {
    pub fn new(span: DirSpan) -> Self {
        let cluster = match span {
            DirSpan::Root { .. } => None,
            DirSpan::Chain(start) => Some(start),
        };
        Self {
            span,
            cluster,
            nth: 0,
        }
    }

    /// 游标当前所处的簇
    pub fn cluster(&self) -> Option<ClusterId> {
        self.cluster
    }

    pub fn next(&mut self, drive: &Drive) -> Result<Option<SectorId>, Error> {
        match self.span {
            DirSpan::Root { start, sectors } => {
                if self.nth == sectors {
                    return Ok(None);
                }
                let sid = start + self.nth;
                self.nth += 1;
                Ok(Some(sid))
            }
            DirSpan::Chain(_) => {
                let Some(mut cluster) = self.cluster else {
                    return Ok(None);
                };

                if self.nth == drive.geo.cluster_sectors {
                    match drive.table.lock().next(cluster)? {
                        Some(next) => {
                            cluster = next;
                            self.cluster = Some(next);
                            self.nth = 0;
                        }
                        None => {
                            self.cluster = None;
                            return Ok(None);
                        }
                    }
                }

                let sid = drive.geo.cluster_sector(cluster) + self.nth;
                self.nth += 1;
                Ok(Some(sid))
            }
        }
    }
}
