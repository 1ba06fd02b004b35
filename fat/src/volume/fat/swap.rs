//! FAT表的交换缓存
//!
//! 整张FAT驻留不下时启用：固定几个扇区大小的槽位，
//! 0号槽钉死FAT首扇区（分配热点），其余槽位轮转复用。
//! 脏槽在被换出或显式刷写时写到**每一份**FAT拷贝。

use alloc::vec;
use alloc::vec::Vec;

use vfs::Error;

use crate::sector::{IoChan, SectorId};

/// 一次交换所需的卷参数，由表引擎转交。
#[derive(Debug, Clone, Copy)]
pub struct SwapIo<'a> {
    pub chan: &'a IoChan,
    /// 首份FAT的起始扇区
    pub start: SectorId,
    /// 单份FAT的扇区数
    pub fat_sectors: usize,
    pub copies: usize,
}

#[derive(Debug)]
pub struct FatSwap {
    sector_bytes: usize,
    slots: usize,
    buf: Vec<u8>,
    /// 槽位占用表：FAT扇区下标+1，0表示空槽
    map: Vec<u32>,
    dirty: Vec<bool>,
    /// 轮转逐出游标，永不停在0号槽
    n_to_swap: usize,
}

impl FatSwap {
    pub fn new(sector_bytes: usize, slots: usize) -> Self {
        debug_assert!(slots >= 2);
        Self {
            sector_bytes,
            slots,
            buf: vec![0; sector_bytes * slots],
            map: vec![0; slots],
            dirty: vec![false; slots],
            n_to_swap: 0,
        }
    }

    fn window(&self, slot: usize) -> &[u8] {
        &self.buf[slot * self.sector_bytes..(slot + 1) * self.sector_bytes]
    }

    fn window_mut(&mut self, slot: usize) -> &mut [u8] {
        &mut self.buf[slot * self.sector_bytes..(slot + 1) * self.sector_bytes]
    }

    /// 把FAT的`index`号扇区弄进缓存，返回槽号。
    pub fn slot_of(&mut self, io: SwapIo<'_>, index: usize) -> Result<usize, Error> {
        debug_assert!(index < io.fat_sectors);

        // 0号扇区只住0号槽
        if index == 0 {
            if self.map[0] == 0 {
                self.load(io, 0, 0)?;
            }
            return Ok(0);
        }

        if let Some(slot) = (1..self.slots).find(|&slot| self.map[slot] == index as u32 + 1) {
            return Ok(slot);
        }

        // 轮转挑一个受害者
        self.n_to_swap += 1;
        if self.n_to_swap == self.slots {
            self.n_to_swap = 1;
        }
        let victim = self.n_to_swap;

        if self.dirty[victim] {
            self.write_out(io, victim)?;
        }
        self.load(io, victim, index)?;
        Ok(victim)
    }

    pub fn data(&self, slot: usize) -> &[u8] {
        debug_assert!(self.map[slot] != 0);
        self.window(slot)
    }

    pub fn data_mut(&mut self, slot: usize) -> &mut [u8] {
        debug_assert!(self.map[slot] != 0);
        self.dirty[slot] = true;
        self.window_mut(slot)
    }

    /// 把全部脏槽写到每份FAT拷贝。
    /// 失败的槽保持脏标记，之后还能重试。
    pub fn flush(&mut self, io: SwapIo<'_>) -> Result<(), Error> {
        for slot in 0..self.slots {
            if self.dirty[slot] {
                self.write_out(io, slot)?;
            }
        }
        Ok(())
    }

    fn load(&mut self, io: SwapIo<'_>, slot: usize, index: usize) -> Result<(), Error> {
        let sid = io.start + index;
        let window = &mut self.buf[slot * self.sector_bytes..(slot + 1) * self.sector_bytes];
        io.chan.read(sid, window)?;
        self.map[slot] = index as u32 + 1;
        self.dirty[slot] = false;
        Ok(())
    }

    fn write_out(&mut self, io: SwapIo<'_>, slot: usize) -> Result<(), Error> {
        let index = self.map[slot] as usize - 1;
        for copy in 0..io.copies {
            let sid = io.start + (copy * io.fat_sectors + index);
            io.chan.write(sid, self.window(slot))?;
        }
        // 全部拷贝落盘后才算干净
        self.dirty[slot] = false;
        Ok(())
    }
}
