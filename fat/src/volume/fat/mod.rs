//! FAT区：簇链表引擎
//!
//! 小表整张驻留内存（FAT12必须如此，条目跨扇区），
//! 大表走[`FatSwap`]交换缓存。两种模式下改动都先记在内存，
//! [`FatTable::flush`]时写到每一份FAT拷贝，再回写FSINFO。

mod alloc_chain;
mod pack12;
mod swap;

pub use self::pack12::{pack12, unpack12};
pub use self::swap::{FatSwap, SwapIo};

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use vfs::Error;

use crate::cluster::{classify, ClusterId, ClusterKind, FatKind};
use crate::sector::{IoChan, SectorId};
use crate::util::{le16, le32, put16, put32};
use crate::volume::reserved::{Bpb, FsInfo, UNKNOWN};

#[derive(Debug)]
enum TableMode {
    /// 整张表在内存里，脏标记按扇区记
    Resident { image: Vec<u8>, dirty: Vec<bool> },
    Swapped(FatSwap),
}

#[derive(Debug)]
pub struct FatTable {
    kind: FatKind,
    chan: Arc<IoChan>,
    /// 首份FAT的起始扇区
    start: SectorId,
    /// 单份FAT的扇区数
    fat_sectors: usize,
    copies: usize,
    sector_bytes: usize,
    /// 卷上最大的合法簇编号
    max_index: u32,
    mode: TableMode,
    /// FSINFO所在扇区，仅FAT32
    fsinfo: Option<SectorId>,
    /// 从这里开始找空闲簇
    free_hint: ClusterId,
    /// 空闲簇计数缓存，未统计过则为[`None`]
    free_count: Option<u32>,
}

impl FatTable {
    pub fn mount(chan: Arc<IoChan>, bpb: &Bpb, swap_slots: usize) -> Result<Self, Error> {
        let kind = bpb.fat_kind();
        let sector_bytes = bpb.sector_bytes();
        let fat_sectors = bpb.fat_sectors();
        let start = bpb.fat_area();

        // FAT12条目跨扇区，必须整张驻留
        let mode = if kind == FatKind::T12 || fat_sectors <= swap_slots {
            let mut image = vec![0u8; fat_sectors * sector_bytes];
            for (i, window) in image.chunks_mut(sector_bytes).enumerate() {
                chan.read(start + i, window)?;
            }
            TableMode::Resident {
                image,
                dirty: vec![false; fat_sectors],
            }
        } else {
            TableMode::Swapped(FatSwap::new(sector_bytes, swap_slots))
        };

        let mut table = Self {
            kind,
            chan,
            start,
            fat_sectors,
            copies: bpb.fat_count(),
            sector_bytes,
            max_index: bpb.cluster_count() + 1,
            mode,
            fsinfo: bpb.fs_info(),
            free_hint: ClusterId::MIN,
            free_count: None,
        };
        table.adopt_fs_info()?;
        Ok(table)
    }

    pub const fn kind(&self) -> FatKind {
        self.kind
    }

    pub const fn max_index(&self) -> u32 {
        self.max_index
    }

    /// 读取FSINFO的两个提示，存疑就丢弃。
    fn adopt_fs_info(&mut self) -> Result<(), Error> {
        let Some(sid) = self.fsinfo else {
            return Ok(());
        };

        let mut raw = vec![0u8; self.sector_bytes];
        self.chan.read(sid, &mut raw)?;
        let Some(info) = FsInfo::decode(&raw) else {
            log::warn!("fsinfo signatures corrupt, ignoring");
            return Ok(());
        };

        if info.free_count != UNKNOWN && info.free_count <= self.max_index - 1 {
            self.free_count = Some(info.free_count);
        }
        if (2..=self.max_index).contains(&info.next_free) {
            self.free_hint = ClusterId::new(info.next_free);
        }
        Ok(())
    }

    /// 裁决`id`的FAT条目。
    pub fn entry(&mut self, id: ClusterId) -> Result<ClusterKind, Error> {
        let raw = self.raw_entry(id)?;
        Ok(classify(self.kind, raw, self.max_index))
    }

    /// 获取下一个簇编号。
    /// `Ok(None)`表示`id`为链表上最后一个簇。
    pub fn next(&mut self, id: ClusterId) -> Result<Option<ClusterId>, Error> {
        match self.entry(id)? {
            ClusterKind::Next(next) => Ok(Some(next)),
            ClusterKind::Eoc => Ok(None),
            ClusterKind::Bad => Err(Error::BadCluster),
            verdict => {
                log::error!("chain through {id} hits {verdict:?}");
                Err(Error::BadCluster)
            }
        }
    }

    /// 链表的最后一个簇。
    pub fn last(&mut self, start: ClusterId) -> Result<ClusterId, Error> {
        let mut id = start;
        while let Some(next) = self.next(id)? {
            id = next;
        }
        Ok(id)
    }

    pub fn chain_len(&mut self, start: ClusterId) -> Result<usize, Error> {
        if start == ClusterId::FREE {
            return Ok(0);
        }
        let mut len = 1;
        let mut id = start;
        while let Some(next) = self.next(id)? {
            id = next;
            len += 1;
        }
        Ok(len)
    }

    /// 链表上自`start`起第`n`个簇。
    pub fn nth(&mut self, start: ClusterId, n: usize) -> Result<Option<ClusterId>, Error> {
        let mut id = start;
        for _ in 0..n {
            match self.next(id)? {
                Some(next) => id = next,
                None => return Ok(None),
            }
        }
        Ok(Some(id))
    }

    pub fn link(&mut self, from: ClusterId, to: ClusterId) -> Result<(), Error> {
        self.set_raw(from, to.raw())
    }

    pub fn terminate(&mut self, id: ClusterId) -> Result<(), Error> {
        self.set_raw(id, self.kind.eoc())
    }

    /// 把全部脏扇区写到每份FAT拷贝，然后回写FSINFO。
    /// 出错的扇区保持脏标记。
    pub fn flush(&mut self) -> Result<(), Error> {
        let chan = Arc::clone(&self.chan);

        match &mut self.mode {
            TableMode::Resident { image, dirty } => {
                for (i, flag) in dirty.iter_mut().enumerate() {
                    if !*flag {
                        continue;
                    }
                    let window = &image[i * self.sector_bytes..(i + 1) * self.sector_bytes];
                    for copy in 0..self.copies {
                        chan.write(self.start + (copy * self.fat_sectors + i), window)?;
                    }
                    *flag = false;
                }
            }
            TableMode::Swapped(swap) => {
                swap.flush(SwapIo {
                    chan: &chan,
                    start: self.start,
                    fat_sectors: self.fat_sectors,
                    copies: self.copies,
                })?;
            }
        }

        self.write_fs_info()
    }

    fn write_fs_info(&mut self) -> Result<(), Error> {
        let Some(sid) = self.fsinfo else {
            return Ok(());
        };

        let info = FsInfo {
            free_count: self.free_count.unwrap_or(UNKNOWN),
            next_free: self.free_hint.raw(),
        };
        let mut raw = vec![0u8; self.sector_bytes];
        info.encode(&mut raw);
        self.chan.write(sid, &raw)
    }
}

/* 条目的原始读写 */

impl FatTable {
    fn check_bounds(&self, id: ClusterId) -> Result<(), Error> {
        if (2..=self.max_index).contains(&id.raw()) {
            Ok(())
        } else {
            log::error!("cluster {id} out of volume bounds");
            Err(Error::BadCluster)
        }
    }

    fn raw_entry(&mut self, id: ClusterId) -> Result<u32, Error> {
        self.check_bounds(id)?;
        let chan = Arc::clone(&self.chan);

        match &mut self.mode {
            TableMode::Resident { image, .. } => Ok(match self.kind {
                FatKind::T12 => unpack12(image, id.raw()) as u32,
                FatKind::T16 => le16(image, id.index() * 2) as u32,
                FatKind::T32 => le32(image, id.index() * 4),
            }),
            TableMode::Swapped(swap) => {
                let entry_bytes = if self.kind == FatKind::T16 { 2 } else { 4 };
                let offset = id.index() * entry_bytes;
                let slot = swap.slot_of(
                    SwapIo {
                        chan: &chan,
                        start: self.start,
                        fat_sectors: self.fat_sectors,
                        copies: self.copies,
                    },
                    offset / self.sector_bytes,
                )?;
                let within = offset % self.sector_bytes;
                let window = swap.data(slot);
                Ok(if entry_bytes == 2 {
                    le16(window, within) as u32
                } else {
                    le32(window, within)
                })
            }
        }
    }

    fn set_raw(&mut self, id: ClusterId, value: u32) -> Result<(), Error> {
        self.check_bounds(id)?;
        let chan = Arc::clone(&self.chan);

        match &mut self.mode {
            TableMode::Resident { image, dirty } => {
                match self.kind {
                    FatKind::T12 => {
                        pack12(image, id.raw(), (value & 0xFFF) as u16);
                        let (lo, hi) = pack12::byte_span(id.raw());
                        dirty[lo / self.sector_bytes] = true;
                        dirty[hi / self.sector_bytes] = true;
                    }
                    FatKind::T16 => {
                        put16(image, id.index() * 2, value as u16);
                        dirty[id.index() * 2 / self.sector_bytes] = true;
                    }
                    FatKind::T32 => {
                        // 高4位保留，写入时原样保留
                        let off = id.index() * 4;
                        let old = le32(image, off);
                        put32(image, off, (old & 0xF000_0000) | (value & 0x0FFF_FFFF));
                        dirty[off / self.sector_bytes] = true;
                    }
                }
                Ok(())
            }
            TableMode::Swapped(swap) => {
                let entry_bytes = if self.kind == FatKind::T16 { 2 } else { 4 };
                let offset = id.index() * entry_bytes;
                let slot = swap.slot_of(
                    SwapIo {
                        chan: &chan,
                        start: self.start,
                        fat_sectors: self.fat_sectors,
                        copies: self.copies,
                    },
                    offset / self.sector_bytes,
                )?;
                let within = offset % self.sector_bytes;
                let window = swap.data_mut(slot);
                if entry_bytes == 2 {
                    put16(window, within, value as u16);
                } else {
                    let old = le32(window, within);
                    put32(
                        window,
                        within,
                        (old & 0xF000_0000) | (value & 0x0FFF_FFFF),
                    );
                }
                Ok(())
            }
        }
    }
}
