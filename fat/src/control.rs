//! 文件系统总控
//!
//! [`FatFileSystem`]持有缓冲池、挂载表、inode登记处这些
//! 全局只此一份的资源；所有对外操作从这里进出。
//!
//! 锁的层级（按获取顺序）：
//! 粗粒度锁 → 驱动器锁 → inode锁 → FAT锁 → I/O锁。
//! 目录树操作拿驱动器独占，文件数据操作拿驱动器共享+inode独占。

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use enumflags2::BitFlags;
use spin::Mutex;
use vfs::{Codepage, DirEntryType, Error, Stat};

use crate::cluster::{ClusterId, FatKind};
use crate::dir::{self, DirPos};
use crate::drive::{Drive, DirSpan, DriveId};
use crate::inode::{InodeHandle, InodeKey, InodeMeta, InodeRegistry};
use crate::lock::{ExclusiveGuard, LockObj};
use crate::name;
use crate::sector::{BufferPool, IoChan, SectorId};
use crate::util::put32;
use crate::volume::data::{AttrFlag, LongDirEntry, ShortDirEntry};
use crate::volume::fat::FatTable;
use crate::volume::partition::{self, PartitionRecord};
use crate::volume::reserved::{Bpb, FsInfo};

#[derive(Debug, Clone)]
pub struct FsConfig {
    /// 共享扇区缓冲的个数
    pub pool_buffers: usize,
    /// 可同时打开的inode上限
    pub inode_capacity: usize,
    /// FAT交换缓存的槽数；整张FAT放得进去就直接驻留
    pub fat_buf_sectors: usize,
    /// 代短名撞车时的最大探测次数
    pub sfn_probes: u32,
    /// 启用后所有操作互斥，留给不敢要细粒度锁的宿主
    pub coarse_lock: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            pool_buffers: 16,
            inode_capacity: 64,
            fat_buf_sectors: 8,
            sfn_probes: 64,
            coarse_lock: false,
        }
    }
}

pub struct FatFileSystem {
    cfg: FsConfig,
    pool: BufferPool,
    drives: Mutex<Vec<Option<Arc<Drive>>>>,
    registry: InodeRegistry,
    cp: Arc<dyn Codepage>,
    coarse: Option<LockObj>,
}

impl FatFileSystem {
    pub fn new(cfg: FsConfig, cp: Arc<dyn Codepage>) -> Self {
        Self {
            pool: BufferPool::new(cfg.pool_buffers),
            registry: InodeRegistry::new(cfg.inode_capacity),
            coarse: cfg.coarse_lock.then(LockObj::new),
            cfg,
            cp,
            drives: Mutex::new(Vec::new()),
        }
    }

    fn guard(&self) -> Option<ExclusiveGuard<'_>> {
        self.coarse.as_ref().map(LockObj::exclusive)
    }

    fn drive(&self, id: DriveId) -> Result<Arc<Drive>, Error> {
        self.drives
            .lock()
            .get(id.index())
            .and_then(|slot| slot.clone())
            .ok_or(Error::InvalidHandle)
    }
}

/* 挂载与卸载 */

impl FatFileSystem {
    pub fn mount(&self, dev: Arc<dyn BlockDevice>) -> Result<DriveId, Error> {
        let _g = self.guard();

        let base = partition::locate(&dev)?;

        // BPB必在首512字节内
        let mut raw = vec![0u8; 512];
        dev.read_blocks(base, &mut raw).map_err(|_| Error::Io)?;
        let bpb = Bpb::decode(&raw)?;

        let chan = IoChan::new(dev, base, bpb.sector_bytes());
        let table = FatTable::mount(Arc::clone(&chan), &bpb, self.cfg.fat_buf_sectors)?;
        let kind = bpb.fat_kind();
        let geo = bpb.geometry();

        let id = {
            let mut drives = self.drives.lock();
            let index = drives
                .iter()
                .position(Option::is_none)
                .unwrap_or_else(|| {
                    drives.push(None);
                    drives.len() - 1
                });
            let id = DriveId::new(index as u16);
            drives[index] = Some(Arc::new(Drive {
                id,
                kind,
                geo,
                chan,
                lock: LockObj::new(),
                table: Mutex::new(table),
                cwd: Mutex::new(Vec::new()),
            }));
            id
        };

        // 工作目录从根起步
        let root = self.root(id)?;
        self.drive(id)?.cwd.lock().push(root);

        log::info!(
            "mounted {id} as {kind:?}, {} clusters",
            self.drive(id)?.geo.cluster_count()
        );
        Ok(id)
    }

    /// 卸载：刷干净所有状态再撤表项。
    /// 还有打开的inode时拒绝，报[`Error::Busy`]。
    pub fn unmount(&self, id: DriveId) -> Result<(), Error> {
        let _g = self.guard();
        let drive = self.drive(id)?;
        let _d = drive.lock.exclusive();

        // 工作目录栈也是活句柄，先放掉
        drive.cwd.lock().clear();
        if self.registry.live_on(id) > 0 {
            return Err(Error::Busy);
        }

        drive.table.lock().flush()?;
        self.pool.sync_drive(id)?;
        self.pool.discard_drive(id);
        self.registry.purge_drive(id);

        self.drives.lock()[id.index()] = None;
        log::info!("unmounted {id}");
        Ok(())
    }

    /// 根目录的句柄
    pub fn root(&self, id: DriveId) -> Result<InodeHandle, Error> {
        let drive = self.drive(id)?;
        self.registry
            .open(InodeKey::root(id), || InodeMeta::root(drive.geo.root_cluster))
    }
}

/* 格式化 */

impl FatFileSystem {
    /// 把裸介质格式化成空FAT卷（superfloppy，无分区表）。
    /// 与挂载无关，不占驱动器号。
    pub fn format(dev: &Arc<dyn BlockDevice>, total_sectors: usize) -> Result<(), Error> {
        Self::format_at(dev, 0, total_sectors)
    }

    /// 写一张单分区MBR，再把分区格式化成FAT卷。
    pub fn format_partitioned(
        dev: &Arc<dyn BlockDevice>,
        total_sectors: usize,
    ) -> Result<(), Error> {
        // 1 MiB对齐
        const ALIGN: usize = 2048;
        if total_sectors <= ALIGN {
            return Err(Error::BadVolume);
        }
        let part_sectors = total_sectors - ALIGN;

        let kind = Bpb::build(part_sectors)?.fat_kind();
        let record = PartitionRecord {
            boot: 0,
            ty: PartitionRecord::type_id(kind, part_sectors as u32),
            start: ALIGN as u32,
            sectors: part_sectors as u32,
        };
        let mut mbr = vec![0u8; 512];
        partition::encode_table(&record, &mut mbr);
        dev.write_blocks(0, &mbr).map_err(|_| Error::Io)?;

        Self::format_at(dev, ALIGN, part_sectors)
    }

    fn format_at(
        dev: &Arc<dyn BlockDevice>,
        base: usize,
        total_sectors: usize,
    ) -> Result<(), Error> {
        let bpb = Bpb::build(total_sectors)?;
        let kind = bpb.fat_kind();
        let geo = bpb.geometry();
        let chan = IoChan::new(Arc::clone(dev), base, geo.sector_bytes);

        let mut sector = vec![0u8; geo.sector_bytes];
        bpb.encode(&mut sector);
        chan.write(SectorId::new(0), &sector)?;
        if kind == FatKind::T32 {
            chan.write(SectorId::new(6), &sector)?;
        }

        // FAT区清零，再落首扇区的保留条目
        let zero = vec![0u8; geo.sector_bytes];
        for copy in 0..geo.fat_count {
            for i in 0..geo.fat_sectors {
                chan.write(geo.fat_area + (copy * geo.fat_sectors + i), &zero)?;
            }
        }
        let mut head = vec![0u8; geo.sector_bytes];
        match kind {
            // 0号条目带媒介字节，1号条目全1
            FatKind::T12 => head[..3].copy_from_slice(&[0xF8, 0xFF, 0xFF]),
            FatKind::T16 => head[..4].copy_from_slice(&[0xF8, 0xFF, 0xFF, 0xFF]),
            FatKind::T32 => {
                put32(&mut head, 0, 0x0FFF_FFF8);
                put32(&mut head, 4, 0x0FFF_FFFF);
                // 根目录占2号簇
                put32(&mut head, 8, 0x0FFF_FFFF);
            }
        }
        for copy in 0..geo.fat_count {
            chan.write(geo.fat_area + copy * geo.fat_sectors, &head)?;
        }

        // 根目录清零
        match kind {
            FatKind::T12 | FatKind::T16 => {
                for i in 0..geo.root_sectors {
                    chan.write(geo.root_area + i, &zero)?;
                }
            }
            FatKind::T32 => {
                for i in 0..geo.cluster_sectors {
                    chan.write(geo.data_area + i, &zero)?;
                }
            }
        }

        if let Some(sid) = bpb.fs_info() {
            let info = FsInfo {
                free_count: geo.cluster_count() - 1,
                next_free: 3,
            };
            let mut raw = vec![0u8; geo.sector_bytes];
            info.encode(&mut raw);
            chan.write(sid, &raw)?;
        }

        log::info!("formatted {total_sectors} sectors as {kind:?}");
        Ok(())
    }
}

/* 路径解析 */

impl FatFileSystem {
    /// 沿路径走出一条自根（或工作目录）起的祖先句柄栈。
    /// `..`靠弹栈实现，永远不会弹空。
    fn walk(&self, drive: &Arc<Drive>, path: &str) -> Result<Vec<InodeHandle>, Error> {
        let mut stack = if path.starts_with('/') {
            vec![self.root(drive.id)?]
        } else {
            let cwd = drive.cwd.lock().clone();
            if cwd.is_empty() {
                vec![self.root(drive.id)?]
            } else {
                cwd
            }
        };

        for cmp in path.split('/') {
            match cmp {
                "" | "." => {}
                ".." => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                }
                cmp => {
                    let cur = stack.last().unwrap();
                    if cur.kind() != DirEntryType::Directory {
                        return Err(Error::NotADirectory);
                    }
                    let span = drive.dir_span(cur.start());
                    let entry = dir::find(&self.pool, drive, span, cmp, self.cp.as_ref())?
                        .ok_or(Error::NotFound)?;
                    let key = InodeKey {
                        drive: drive.id,
                        pos: entry.pos,
                    };
                    stack.push(self.registry.open(key, || InodeMeta {
                        short: entry.short,
                        run: entry.run,
                    })?);
                }
            }
        }

        Ok(stack)
    }

    /// 拆出父目录与末段名字，供建删操作使用。
    fn walk_parent<'p>(
        &self,
        drive: &Arc<Drive>,
        path: &'p str,
    ) -> Result<(InodeHandle, &'p str), Error> {
        let trimmed = path.trim_end_matches('/');
        let (dir_part, base) = match trimmed.rfind('/') {
            Some(i) => (&trimmed[..i + 1], &trimmed[i + 1..]),
            None => ("", trimmed),
        };
        if base.is_empty() || base == "." || base == ".." {
            return Err(Error::InvalidPath);
        }

        let stack = self.walk(drive, dir_part)?;
        let parent = stack.last().unwrap().clone();
        if parent.kind() != DirEntryType::Directory {
            return Err(Error::NotADirectory);
        }
        Ok((parent, base))
    }

    pub fn resolve(&self, id: DriveId, path: &str) -> Result<InodeHandle, Error> {
        let _g = self.guard();
        let drive = self.drive(id)?;
        let _d = drive.lock.shared();
        Ok(self.walk(&drive, path)?.last().unwrap().clone())
    }

    /// 换工作目录。整条祖先栈留在登记处里撑着。
    pub fn set_cwd(&self, id: DriveId, path: &str) -> Result<(), Error> {
        let _g = self.guard();
        let drive = self.drive(id)?;
        let _d = drive.lock.shared();

        let stack = self.walk(&drive, path)?;
        if stack.last().unwrap().kind() != DirEntryType::Directory {
            return Err(Error::NotADirectory);
        }
        *drive.cwd.lock() = stack;
        Ok(())
    }

    /// 当前工作目录的句柄
    pub fn cwd(&self, id: DriveId) -> Result<InodeHandle, Error> {
        let _g = self.guard();
        let drive = self.drive(id)?;
        let _d = drive.lock.shared();

        let cur = drive.cwd.lock().last().cloned();
        match cur {
            Some(handle) => Ok(handle),
            None => self.root(id),
        }
    }
}

/* 目录树操作 */

impl FatFileSystem {
    /// 为`name`备好短目录项与长目录项（磁盘顺序）。
    fn make_dirents(
        &self,
        drive: &Drive,
        span: DirSpan,
        name: &str,
        attr: BitFlags<AttrFlag>,
    ) -> Result<(ShortDirEntry, Vec<LongDirEntry>), Error> {
        name::validate(name)?;
        let (basis, exact) = name::basis_name(name, self.cp.as_ref())?;

        // 无损放进8.3就不写长目录项
        if exact {
            return Ok((ShortDirEntry::new(basis, attr), Vec::new()));
        }

        // 先按规矩试`~1`、`~2`…的数字尾巴，都被占了再换散列段
        let mut name83 = None;
        for n in 1..=self.cfg.sfn_probes {
            let cand = name::numeric_tail(&basis, n);
            if !dir::basis_taken(&self.pool, drive, span, &cand)? {
                name83 = Some(cand);
                break;
            }
        }
        if name83.is_none() {
            for probe in 0..self.cfg.sfn_probes {
                let cand = name::gen_sfn(name, &basis, probe);
                if !dir::basis_taken(&self.pool, drive, span, &cand)? {
                    name83 = Some(cand);
                    break;
                }
            }
        }
        let Some(name83) = name83 else {
            log::warn!("no free alias for '{name}' after {} probes", self.cfg.sfn_probes * 2);
            return Err(Error::DirectoryFull);
        };

        let short = ShortDirEntry::new(name83, attr);
        let chksum = short.checksum();
        let mut longs: Vec<LongDirEntry> = name::lfn_units(name)
            .into_iter()
            .enumerate()
            .map(|(i, units)| LongDirEntry {
                ord: (i + 1) as u8,
                chksum,
                units,
            })
            .rev()
            .collect();
        longs[0].ord |= LongDirEntry::LAST_MASK;

        Ok((short, longs))
    }

    fn open_at(&self, id: DriveId, pos: DirPos, meta: InodeMeta) -> Result<InodeHandle, Error> {
        self.registry.open(InodeKey { drive: id, pos }, || meta)
    }

    pub fn create_file(&self, id: DriveId, path: &str) -> Result<InodeHandle, Error> {
        let _g = self.guard();
        let drive = self.drive(id)?;
        let _d = drive.lock.exclusive();

        let (parent, base) = self.walk_parent(&drive, path)?;
        let span = drive.dir_span(parent.start());
        if dir::find(&self.pool, &drive, span, base, self.cp.as_ref())?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let (short, longs) = self.make_dirents(&drive, span, base, AttrFlag::Archive.into())?;
        let (pos, run) = dir::insert(&self.pool, &drive, span, &short, &longs)?;
        drive.table.lock().flush()?;

        log::debug!("created '{path}' at ({}, {})", pos.sector, pos.slot);
        self.open_at(id, pos, InodeMeta { short, run })
    }

    pub fn mkdir(&self, id: DriveId, path: &str) -> Result<InodeHandle, Error> {
        let _g = self.guard();
        let drive = self.drive(id)?;
        let _d = drive.lock.exclusive();

        let (parent, base) = self.walk_parent(&drive, path)?;
        let span = drive.dir_span(parent.start());
        if dir::find(&self.pool, &drive, span, base, self.cp.as_ref())?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let (mut short, longs) =
            self.make_dirents(&drive, span, base, AttrFlag::Directory.into())?;

        let ncid = drive.table.lock().alloc_chain(None, 1)?.0;
        short.set_cluster_id(ncid);

        // `..`指向根时按规矩写0
        let parent_start = if parent.is_root() {
            ClusterId::FREE
        } else {
            parent.start()
        };
        let built = dir::init_dir_cluster(&self.pool, &drive, ncid, &short, parent_start)
            .and_then(|()| dir::insert(&self.pool, &drive, span, &short, &longs));
        let (pos, run) = match built {
            Ok(v) => v,
            Err(e) => {
                // 目录项没落成，把刚要到的簇吐回去
                let _ = drive.table.lock().release_chain(ncid);
                drive.table.lock().flush()?;
                return Err(e);
            }
        };
        drive.table.lock().flush()?;

        self.open_at(id, pos, InodeMeta { short, run })
    }

    pub fn unlink(&self, id: DriveId, path: &str) -> Result<(), Error> {
        let _g = self.guard();
        let drive = self.drive(id)?;
        let _d = drive.lock.exclusive();

        let (parent, base) = self.walk_parent(&drive, path)?;
        let span = drive.dir_span(parent.start());
        let entry = dir::find(&self.pool, &drive, span, base, self.cp.as_ref())?
            .ok_or(Error::NotFound)?;

        if entry.short.is_directory() {
            return Err(Error::IsADirectory);
        }
        let key = InodeKey {
            drive: id,
            pos: entry.pos,
        };
        if self.registry.is_live(key) {
            return Err(Error::Busy);
        }

        if entry.short.cluster_id() != ClusterId::FREE {
            drive.table.lock().release_chain(entry.short.cluster_id())?;
        }
        dir::remove(&self.pool, &drive, entry.pos, &entry.run)?;
        // 尾表达式的临时守卫活得比drive久，得先落地
        let flushed = drive.table.lock().flush();
        flushed
    }

    pub fn rmdir(&self, id: DriveId, path: &str) -> Result<(), Error> {
        let _g = self.guard();
        let drive = self.drive(id)?;
        let _d = drive.lock.exclusive();

        let (parent, base) = self.walk_parent(&drive, path)?;
        let span = drive.dir_span(parent.start());
        let entry = dir::find(&self.pool, &drive, span, base, self.cp.as_ref())?
            .ok_or(Error::NotFound)?;

        if !entry.short.is_directory() {
            return Err(Error::NotADirectory);
        }
        let own = drive.dir_span(entry.short.cluster_id());
        if !dir::is_empty(&self.pool, &drive, own, self.cp.as_ref())? {
            return Err(Error::DirectoryNotEmpty);
        }
        let key = InodeKey {
            drive: id,
            pos: entry.pos,
        };
        if self.registry.is_live(key) {
            return Err(Error::Busy);
        }

        drive.table.lock().release_chain(entry.short.cluster_id())?;
        dir::remove(&self.pool, &drive, entry.pos, &entry.run)?;
        let flushed = drive.table.lock().flush();
        flushed
    }

    /// 改名/挪窝。
    ///
    /// NOTE: 先插新项再摘旧项，不是原子操作；
    /// 中途断电会留下两个名字指向同一条簇链，fsck类工具可辨。
    pub fn rename(&self, id: DriveId, old_path: &str, new_path: &str) -> Result<(), Error> {
        let _g = self.guard();
        let drive = self.drive(id)?;
        let _d = drive.lock.exclusive();

        let (old_parent, old_base) = self.walk_parent(&drive, old_path)?;
        let old_span = drive.dir_span(old_parent.start());
        let entry = dir::find(&self.pool, &drive, old_span, old_base, self.cp.as_ref())?
            .ok_or(Error::NotFound)?;

        let key = InodeKey {
            drive: id,
            pos: entry.pos,
        };
        if self.registry.is_live(key) {
            return Err(Error::Busy);
        }

        let (new_parent, new_base) = self.walk_parent(&drive, new_path)?;
        let new_span = drive.dir_span(new_parent.start());
        if dir::find(&self.pool, &drive, new_span, new_base, self.cp.as_ref())?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let attr = entry.short.attr;
        let (mut short, longs) = self.make_dirents(&drive, new_span, new_base, attr)?;
        short.set_cluster_id(entry.short.cluster_id());
        short.resize(entry.short.size());

        dir::insert(&self.pool, &drive, new_span, &short, &longs)?;
        dir::remove(&self.pool, &drive, entry.pos, &entry.run)?;

        // 挪了窝的目录要改`..`
        if short.is_directory() && old_parent.start() != new_parent.start() {
            let parent_start = if new_parent.is_root() {
                ClusterId::FREE
            } else {
                new_parent.start()
            };
            let first = drive.geo.cluster_sector(short.cluster_id());
            let parent_entry = ShortDirEntry::new_parent(parent_start);
            let cache = self.pool.get(id, &drive.chan, first)?;
            let mut sector = cache.lock();
            parent_entry.encode(&mut sector.data_mut()[32..64]);
            sector.sync()?;
        }

        let flushed = drive.table.lock().flush();
        flushed
    }

    pub fn ls(
        &self,
        handle: &InodeHandle,
        at: usize,
        count: usize,
    ) -> Result<Vec<vfs::DirEntry>, Error> {
        let _g = self.guard();
        let drive = self.drive(handle.key().drive)?;
        let _d = drive.lock.shared();

        if handle.kind() != DirEntryType::Directory {
            return Err(Error::NotADirectory);
        }
        let span = drive.dir_span(handle.start());
        dir::list(&self.pool, &drive, span, self.cp.as_ref(), at, count)
    }

    pub fn stat(&self, handle: &InodeHandle) -> Result<Stat, Error> {
        let _g = self.guard();
        let drive = self.drive(handle.key().drive)?;
        let _d = drive.lock.shared();

        let (start, size, mode) = {
            let meta = handle.meta.lock();
            (
                meta.short.cluster_id(),
                meta.short.size(),
                if meta.short.is_directory() {
                    DirEntryType::Directory
                } else {
                    DirEntryType::Regular
                },
            )
        };

        let sectors = if handle.is_root() && drive.geo.root_sectors > 0 {
            drive.geo.root_sectors
        } else if start == ClusterId::FREE {
            0
        } else {
            drive.table.lock().chain_len(start)? * drive.geo.cluster_sectors
        };

        Ok(Stat {
            mode,
            block_size: drive.geo.sector_bytes as u64,
            blocks: sectors as u64,
            size: size as u64,
        })
    }

    /// 把一个驱动器的所有脏状态压到介质上。
    pub fn flush(&self, id: DriveId) -> Result<(), Error> {
        let _g = self.guard();
        let drive = self.drive(id)?;
        let _d = drive.lock.shared();

        drive.table.lock().flush()?;
        self.pool.sync_drive(id)
    }

    /// 空闲簇数。FSINFO提示有效时直接取用，否则全卷扫描一次。
    pub fn free_clusters(&self, id: DriveId) -> Result<u32, Error> {
        let _g = self.guard();
        let drive = self.drive(id)?;
        let _d = drive.lock.shared();

        let count = drive.table.lock().free_clusters();
        count
    }

    /// 剩余空间，字节数。
    pub fn free_space(&self, id: DriveId) -> Result<u64, Error> {
        let _g = self.guard();
        let drive = self.drive(id)?;
        let _d = drive.lock.shared();

        let free = drive.table.lock().free_clusters()?;
        Ok(free as u64 * drive.geo.cluster_bytes() as u64)
    }
}

/* 文件数据操作 */

impl FatFileSystem {
    pub fn read_at(
        &self,
        handle: &InodeHandle,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let _g = self.guard();
        let drive = self.drive(handle.key().drive)?;
        let _d = drive.lock.shared();
        let _f = handle.lock.shared();

        if handle.kind() != DirEntryType::Regular {
            return Err(Error::IsADirectory);
        }

        let (start, size) = {
            let meta = handle.meta.lock();
            (meta.short.cluster_id(), meta.short.size() as usize)
        };

        let end = (offset + buf.len()).min(size);
        if offset >= end {
            return Ok(0);
        }
        // 尺寸非零却没有起始簇，目录项已坏
        if start == ClusterId::FREE {
            return Err(Error::BadCluster);
        }

        let cb = drive.geo.cluster_bytes();
        let sb = drive.geo.sector_bytes;

        let mut cluster = drive
            .table
            .lock()
            .nth(start, offset / cb)?
            .ok_or(Error::BadCluster)?;
        let mut pos = offset;
        let mut read = 0;

        while pos < end {
            let sector_idx = pos % cb / sb;
            let within = pos % sb;
            let n = (sb - within).min(end - pos);

            let sid = drive.geo.cluster_sector(cluster) + sector_idx;
            let cache = self.pool.get(drive.id, &drive.chan, sid)?;
            buf[read..read + n]
                .copy_from_slice(&cache.lock().data()[within..within + n]);

            pos += n;
            read += n;
            if pos < end && pos % cb == 0 {
                cluster = drive
                    .table
                    .lock()
                    .next(cluster)?
                    .ok_or(Error::BadCluster)?;
            }
        }

        Ok(read)
    }

    pub fn write_at(
        &self,
        handle: &InodeHandle,
        offset: usize,
        buf: &[u8],
    ) -> Result<usize, Error> {
        let _g = self.guard();
        let drive = self.drive(handle.key().drive)?;
        let _d = drive.lock.shared();
        let _f = handle.lock.exclusive();

        if handle.kind() != DirEntryType::Regular {
            return Err(Error::IsADirectory);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let end = offset + buf.len();
        let start = self.grow_to(&drive, handle, end)?;

        let cb = drive.geo.cluster_bytes();
        let sb = drive.geo.sector_bytes;

        let mut cluster = drive
            .table
            .lock()
            .nth(start, offset / cb)?
            .ok_or(Error::BadCluster)?;
        let mut pos = offset;
        let mut wrote = 0;

        while pos < end {
            let sector_idx = pos % cb / sb;
            let within = pos % sb;
            let n = (sb - within).min(end - pos);

            let sid = drive.geo.cluster_sector(cluster) + sector_idx;
            let cache = self.pool.get(drive.id, &drive.chan, sid)?;
            {
                let mut sector = cache.lock();
                sector.data_mut()[within..within + n]
                    .copy_from_slice(&buf[wrote..wrote + n]);
                sector.sync()?;
            }

            pos += n;
            wrote += n;
            if pos < end && pos % cb == 0 {
                cluster = drive
                    .table
                    .lock()
                    .next(cluster)?
                    .ok_or(Error::BadCluster)?;
            }
        }

        // 尺寸变了才动目录项
        let resized = {
            let mut meta = handle.meta.lock();
            if end > meta.short.size() as usize {
                meta.short.resize(end as u32);
                true
            } else {
                false
            }
        };
        if resized {
            self.store_meta(&drive, handle)?;
        }
        drive.table.lock().flush()?;

        Ok(wrote)
    }

    pub fn truncate(&self, handle: &InodeHandle, new_size: usize) -> Result<(), Error> {
        let _g = self.guard();
        let drive = self.drive(handle.key().drive)?;
        let _d = drive.lock.shared();
        let _f = handle.lock.exclusive();

        if handle.kind() != DirEntryType::Regular {
            return Err(Error::IsADirectory);
        }

        let (start, size) = {
            let meta = handle.meta.lock();
            (meta.short.cluster_id(), meta.short.size() as usize)
        };
        if new_size == size {
            return Ok(());
        }

        let cb = drive.geo.cluster_bytes();

        if new_size > size {
            self.grow_to(&drive, handle, new_size)?;
        } else if new_size == 0 {
            if start != ClusterId::FREE {
                drive.table.lock().release_chain(start)?;
            }
            handle.meta.lock().short.set_cluster_id(ClusterId::FREE);
        } else {
            let keep = new_size.div_ceil(cb);
            let mut table = drive.table.lock();
            let last = table.nth(start, keep - 1)?.ok_or(Error::BadCluster)?;
            table.truncate_chain(last)?;
        }

        handle.meta.lock().short.resize(new_size as u32);
        self.store_meta(&drive, handle)?;
        let flushed = drive.table.lock().flush();
        flushed
    }
}

impl FatFileSystem {
    /// 保证文件的簇链够盖住`end`字节，不够就续。
    /// 新簇整簇清零，旧尺寸到新数据之间的空洞读出来是0。
    /// 中途失败把续上的半成品链吐回去。
    /// 返回（可能刚赋予的）起始簇。
    fn grow_to(
        &self,
        drive: &Arc<Drive>,
        handle: &InodeHandle,
        end: usize,
    ) -> Result<ClusterId, Error> {
        let orig = handle.start();
        let cb = drive.geo.cluster_bytes();
        let need = end.div_ceil(cb).max(1);

        // (链尾快照, 新段)，失败时照此回滚
        let mut old_last = None;
        let mut fresh: Vec<(ClusterId, usize)> = Vec::new();

        let grown = (|| -> Result<ClusterId, Error> {
            let mut table = drive.table.lock();

            let (start, mut have) = if orig == ClusterId::FREE {
                let (first, got) = table.alloc_chain(None, need)?;
                fresh.push((first, got));
                (first, got)
            } else {
                let len = table.chain_len(orig)?;
                if len < need {
                    old_last = Some(table.last(orig)?);
                }
                (orig, len)
            };

            while have < need {
                let last = table.last(start)?;
                let (first, got) = table.alloc_chain(Some(last), need - have)?;
                fresh.push((first, got));
                have += got;
            }
            drop(table);

            for &(first, got) in &fresh {
                for i in 0..got {
                    dir::zero_cluster(&self.pool, drive, first.step(i as u32))?;
                }
            }
            Ok(start)
        })();

        let start = match grown {
            Ok(start) => start,
            Err(e) => {
                if !fresh.is_empty() {
                    let mut table = drive.table.lock();
                    match old_last {
                        // 老文件截回原来的链尾
                        Some(last) => {
                            let _ = table.truncate_chain(last);
                        }
                        // 新文件的链整条吐回
                        None => {
                            let _ = table.release_chain(fresh[0].0);
                        }
                    }
                }
                return Err(e);
            }
        };

        // 空文件第一次落簇，目录项跟着改
        if orig == ClusterId::FREE {
            handle.meta.lock().short.set_cluster_id(start);
            self.store_meta(drive, handle)?;
        }

        Ok(start)
    }

    /// 把inode的短目录项写回它的槽位。根目录没有槽位，跳过。
    fn store_meta(&self, drive: &Arc<Drive>, handle: &InodeHandle) -> Result<(), Error> {
        if handle.is_root() {
            return Ok(());
        }
        let short = handle.meta.lock().short;
        dir::write_short(&self.pool, drive, handle.key().pos, &short)
    }
}

impl core::fmt::Debug for FatFileSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FatFileSystem")
            .field("cfg", &self.cfg)
            .field("drives", &self.drives.lock().len())
            .finish()
    }
}
