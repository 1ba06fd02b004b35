//! 扇区与块缓冲池
//!
//! [`IoChan`]把“卷内扇区号”翻译成设备块号并串行化传输；
//! [`BufferPool`]是所有已挂载卷共享的扇区缓冲，
//! 以(驱动器, 扇区)为键，LRU逐出闲置块。
//!
//! 缓冲奉行写穿策略：修改方在持有扇区锁时就地[`Sector::sync`]，
//! 逐出时缓冲应当是干净的。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use block_dev::{BlockDevice, BLOCK_SIZE};
use derive_more::{Add, From, Into};
use spin::Mutex;
use vfs::Error;

use crate::drive::DriveId;
use crate::lock::LockObj;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Add, From, Into)]
#[repr(transparent)]
pub struct SectorId(usize);

impl core::ops::Add<usize> for SectorId {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        self + Self(rhs)
    }
}

impl core::fmt::Display for SectorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SectorId {
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// 一个卷通往底层设备的通道。
///
/// `base`是卷在设备上的起始块号（分区偏移），
/// 通道内的扇区号一律相对于卷。
pub struct IoChan {
    dev: Arc<dyn BlockDevice>,
    base: usize,
    sector_bytes: usize,
    /// 串行化原始传输
    lock: LockObj,
}

impl core::fmt::Debug for IoChan {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IoChan")
            .field("base", &self.base)
            .field("sector_bytes", &self.sector_bytes)
            .finish_non_exhaustive()
    }
}

impl IoChan {
    pub fn new(dev: Arc<dyn BlockDevice>, base: usize, sector_bytes: usize) -> Arc<Self> {
        debug_assert_eq!(0, sector_bytes % BLOCK_SIZE);
        Arc::new(Self {
            dev,
            base,
            sector_bytes,
            lock: LockObj::new(),
        })
    }

    pub const fn sector_bytes(&self) -> usize {
        self.sector_bytes
    }

    /// 拉伸扇区号至设备块号
    fn first_block(&self, id: SectorId) -> usize {
        self.base + id.index() * (self.sector_bytes / BLOCK_SIZE)
    }

    pub fn read(&self, id: SectorId, buf: &mut [u8]) -> Result<(), Error> {
        let _io = self.lock.exclusive();
        self.dev
            .read_blocks(self.first_block(id), buf)
            .map_err(|e| {
                log::error!("read sector {id} failed: {e}");
                Error::Io
            })
    }

    pub fn write(&self, id: SectorId, buf: &[u8]) -> Result<(), Error> {
        let _io = self.lock.exclusive();
        self.dev
            .write_blocks(self.first_block(id), buf)
            .map_err(|e| {
                log::error!("write sector {id} failed: {e}");
                Error::Io
            })
    }
}

/// 内存中的扇区
#[derive(Debug)]
pub struct Sector {
    /// 缓存的数据
    data: Box<[u8]>,
    id: SectorId,
    chan: Arc<IoChan>,
    /// 是否为脏块
    modified: bool,
}

impl Sector {
    fn load(chan: Arc<IoChan>, id: SectorId) -> Result<Self, Error> {
        let mut data = vec![0; chan.sector_bytes()];
        chan.read(id, &mut data)?;

        Ok(Self {
            data: data.into(),
            id,
            chan,
            modified: false,
        })
    }

    /// 不读介质，直接以全零内容入驻。
    /// 供新分配的簇使用，介质上的旧内容无意义。
    fn zeroed(chan: Arc<IoChan>, id: SectorId) -> Self {
        Self {
            data: vec![0; chan.sector_bytes()].into(),
            id,
            chan,
            modified: true,
        }
    }

    pub const fn id(&self) -> SectorId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.modified = true;
        &mut self.data
    }

    pub fn zeroize(&mut self) {
        self.data.fill(0);
        self.modified = true;
    }

    pub fn sync(&mut self) -> Result<(), Error> {
        if self.modified {
            self.chan.write(self.id, &self.data)?;
            self.modified = false;
        }
        Ok(())
    }
}

impl Drop for Sector {
    fn drop(&mut self) {
        // 写穿策略下不应走到这里
        if self.modified {
            log::warn!("sector {} dropped dirty, writing back", self.id);
            let _ = self.chan.write(self.id, &self.data);
        }
    }
}

#[derive(Debug)]
struct Slot {
    drive: DriveId,
    id: SectorId,
    cache: Arc<Mutex<Sector>>,
    last_use: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    slots: Vec<Slot>,
    /// LRU时间戳，单调递增，逼近上限时整体归一
    stamp: u64,
}

/// 时间戳超过此值就重排归一，绝无回绕歧义。
const STAMP_CEILING: u64 = u64::MAX / 2;

impl PoolState {
    /// 按新旧次序把时间戳压回`1..`，保持相对顺序。
    fn normalize(&mut self) {
        self.slots.sort_by_key(|slot| slot.last_use);
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.last_use = i as u64 + 1;
        }
        self.stamp = self.slots.len() as u64;
    }
}

/// 全体驱动器共享的扇区缓冲池
#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    state: Mutex<PoolState>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            capacity,
            state: Mutex::default(),
        }
    }

    pub fn get(
        &self,
        drive: DriveId,
        chan: &Arc<IoChan>,
        id: SectorId,
    ) -> Result<Arc<Mutex<Sector>>, Error> {
        self.install(drive, chan, id, false)
    }

    /// 取一个全零入驻的扇区，跳过介质读取。
    pub fn get_zeroed(
        &self,
        drive: DriveId,
        chan: &Arc<IoChan>,
        id: SectorId,
    ) -> Result<Arc<Mutex<Sector>>, Error> {
        self.install(drive, chan, id, true)
    }

    fn install(
        &self,
        drive: DriveId,
        chan: &Arc<IoChan>,
        id: SectorId,
        zeroed: bool,
    ) -> Result<Arc<Mutex<Sector>>, Error> {
        if let Some(cache) = self.lookup(drive, id, zeroed) {
            return Ok(cache);
        }

        // 介质读在池锁之外进行，一个传输不许拖住其它驱动器
        let sector = if zeroed {
            Sector::zeroed(Arc::clone(chan), id)
        } else {
            Sector::load(Arc::clone(chan), id)?
        };
        let cache = Arc::new(Mutex::new(sector));

        let victim = {
            let mut state = self.state.lock();
            state.stamp += 1;
            let stamp = state.stamp;

            if let Some(slot) = state
                .slots
                .iter_mut()
                .find(|slot| slot.drive == drive && slot.id == id)
            {
                // 读介质期间被人抢先入驻，弃掉本地副本
                slot.last_use = stamp;
                let winner = Arc::clone(&slot.cache);
                drop(state);
                if zeroed {
                    winner.lock().zeroize();
                }
                cache.lock().modified = false;
                return Ok(winner);
            }

            let victim = if state.slots.len() == self.capacity {
                match Self::evict(&mut state) {
                    Ok(victim) => Some(victim),
                    Err(e) => {
                        drop(state);
                        // 入驻失败的副本不许在Drop里写回
                        cache.lock().modified = false;
                        return Err(e);
                    }
                }
            } else {
                None
            };
            state.slots.push(Slot {
                drive,
                id,
                cache: Arc::clone(&cache),
                last_use: stamp,
            });
            victim
        };

        if let Some(victim) = victim {
            // 写穿之下本应干净；万一是脏块，也在池锁之外写回
            victim.lock().sync()?;
        }
        Ok(cache)
    }

    /// 池内查命中，顺带推进时间戳。
    fn lookup(&self, drive: DriveId, id: SectorId, zeroed: bool) -> Option<Arc<Mutex<Sector>>> {
        let mut state = self.state.lock();
        if state.stamp >= STAMP_CEILING {
            state.normalize();
        }
        state.stamp += 1;
        let stamp = state.stamp;

        let slot = state
            .slots
            .iter_mut()
            .find(|slot| slot.drive == drive && slot.id == id)?;
        slot.last_use = stamp;
        let cache = Arc::clone(&slot.cache);
        drop(state);

        if zeroed {
            // 命中的旧内容属于上一个住户，同样得清
            cache.lock().zeroize();
        }
        Some(cache)
    }

    // 缓冲调度策略：摘下最久未用的闲置块，写回由调用方在池锁外做
    fn evict(state: &mut PoolState) -> Result<Arc<Mutex<Sector>>, Error> {
        let index = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| Arc::strong_count(&slot.cache) == 1) // 没有其它引用的才能踢
            .min_by_key(|(_, slot)| slot.last_use)
            .map(|(i, _)| i)
            .ok_or(Error::NoBuffer)?;

        Ok(state.slots.remove(index).cache)
    }

    /// 把某驱动器的所有脏缓冲写回介质。
    pub fn sync_drive(&self, drive: DriveId) -> Result<(), Error> {
        let state = self.state.lock();
        for slot in state.slots.iter().filter(|slot| slot.drive == drive) {
            slot.cache.lock().sync()?;
        }
        Ok(())
    }

    /// 丢弃某驱动器的全部缓冲，供卸载使用。
    /// 调用前必须先[`BufferPool::sync_drive`]。
    pub fn discard_drive(&self, drive: DriveId) {
        let mut state = self.state.lock();
        state.slots.retain(|slot| slot.drive != drive);
    }
}
