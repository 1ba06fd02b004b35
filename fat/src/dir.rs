//! 目录的扫描、查找与改写
//!
//! 长目录项以**倒序**躺在短目录项之前，扫描器边走边收集
//! 成一条“长名串”。串必须序号连续、校验和一致、紧贴短项；
//! 任何断裂（坏序号、坏校验和、中途被删）都静默丢弃整串，
//! 退回8.3短名，绝不让损坏的长名冒充文件名。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;
use vfs::{Codepage, Error};

use crate::cluster::ClusterId;
use crate::drive::{DirSpan, Drive, SpanCursor};
use crate::name;
use crate::sector::{BufferPool, Sector, SectorId};
use crate::volume::data::{
    is_long, status_of, DirEntryStatus, LongDirEntry, ShortDirEntry, DIRENT_SIZE,
};

/// 目录项在卷上的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirPos {
    pub sector: SectorId,
    /// 扇区内的槽号
    pub slot: usize,
}

/// 一次扫描命中的完整目录项
#[derive(Debug)]
pub struct FoundEntry {
    pub short: ShortDirEntry,
    /// 短目录项的位置
    pub pos: DirPos,
    /// 长目录项的位置，按磁盘顺序
    pub run: Vec<DirPos>,
    /// 展示名：长名，或退化的8.3名
    pub name: String,
}

/// 收集中的长名串
#[derive(Debug)]
struct LongRun {
    positions: Vec<DirPos>,
    /// 磁盘顺序（即名字的倒序）收集的单元块
    units: Vec<[u16; LongDirEntry::CAP]>,
    chksum: u8,
    /// 下一项应有的序号
    expect: u8,
}

impl LongRun {
    fn start(pos: DirPos, long: &LongDirEntry) -> Option<Self> {
        (long.is_last() && long.seq() >= 1).then(|| Self {
            positions: alloc::vec![pos],
            units: alloc::vec![long.units],
            chksum: long.chksum,
            expect: long.seq().wrapping_sub(1),
        })
    }

    /// 串是否完整收尾，且与短项的校验和咬合。
    fn seals(&self, short: &ShortDirEntry) -> bool {
        self.expect == 0 && self.chksum == short.checksum()
    }
}

pub struct DirScanner<'a> {
    pool: &'a BufferPool,
    drive: &'a Drive,
    cursor: SpanCursor,
    sector: Option<(SectorId, Arc<Mutex<Sector>>)>,
    slot: usize,
    run: Option<LongRun>,
    done: bool,
}

impl<'a> DirScanner<'a> {
    pub fn new(pool: &'a BufferPool, drive: &'a Drive, span: DirSpan) -> Self {
        Self {
            pool,
            drive,
            cursor: SpanCursor::new(span),
            sector: None,
            slot: 0,
            run: None,
            done: false,
        }
    }

    fn slots_per_sector(&self) -> usize {
        self.drive.geo.sector_bytes / DIRENT_SIZE
    }

    /// 下一个32字节槽的内容（原始字节拷贝）。
    fn next_raw(&mut self) -> Result<Option<(DirPos, [u8; DIRENT_SIZE])>, Error> {
        loop {
            if let Some((sid, cache)) = &self.sector {
                if self.slot < self.slots_per_sector() {
                    let pos = DirPos {
                        sector: *sid,
                        slot: self.slot,
                    };
                    let mut raw = [0u8; DIRENT_SIZE];
                    {
                        let sector = cache.lock();
                        let off = self.slot * DIRENT_SIZE;
                        raw.copy_from_slice(&sector.data()[off..off + DIRENT_SIZE]);
                    }
                    self.slot += 1;
                    return Ok(Some((pos, raw)));
                }
            }

            match self.cursor.next(self.drive)? {
                Some(sid) => {
                    let cache = self.pool.get(self.drive.id, &self.drive.chan, sid)?;
                    self.sector = Some((sid, cache));
                    self.slot = 0;
                }
                None => return Ok(None),
            }
        }
    }

    /// 下一个在用的目录项，连同修好的长名。
    /// 卷标签项被跳过，`.`/`..`照常返回，由调用方甄别。
    pub fn next_entry(&mut self, cp: &dyn Codepage) -> Result<Option<FoundEntry>, Error> {
        if self.done {
            return Ok(None);
        }

        while let Some((pos, raw)) = self.next_raw()? {
            match status_of(&raw) {
                DirEntryStatus::TailFree => {
                    self.done = true;
                    return Ok(None);
                }
                DirEntryStatus::Free => {
                    // 串中途被删，整串作废
                    self.run = None;
                    continue;
                }
                DirEntryStatus::Occupied => {}
            }

            if is_long(&raw) {
                let long = LongDirEntry::decode(&raw);
                match &mut self.run {
                    Some(run)
                        if long.seq() == run.expect
                            && long.chksum == run.chksum
                            && !long.is_last() =>
                    {
                        run.positions.push(pos);
                        run.units.push(long.units);
                        run.expect -= 1;
                    }
                    _ => {
                        // 断串丢弃，带LAST标记的另起一串
                        self.run = LongRun::start(pos, &long);
                    }
                }
                continue;
            }

            let short = ShortDirEntry::decode(&raw);
            let run = self.run.take();

            if short.is_volume_label() {
                continue;
            }

            let long_name = run.filter(|run| run.seals(&short)).and_then(|run| {
                // 收集顺序是倒的，正过来再拼
                let forward: Vec<_> = run.units.iter().rev().copied().collect();
                name::assemble(&forward).map(|n| (run.positions, n))
            });

            let (run_positions, display) = match long_name {
                Some((positions, n)) => (positions, n),
                None => (Vec::new(), name::short_display(&short.name, cp)?),
            };

            return Ok(Some(FoundEntry {
                short,
                pos,
                run: run_positions,
                name: display,
            }));
        }

        Ok(None)
    }

    /// 扫描停下时所处的簇
    pub fn cluster(&self) -> Option<ClusterId> {
        self.cursor.cluster()
    }
}

/// 在目录里按名字找一项。长名不区分ASCII大小写，
/// 8.3形式的名字也能命中带长名的项。
pub fn find(
    pool: &BufferPool,
    drive: &Drive,
    span: DirSpan,
    target: &str,
    cp: &dyn Codepage,
) -> Result<Option<FoundEntry>, Error> {
    let mut scanner = DirScanner::new(pool, drive, span);
    while let Some(entry) = scanner.next_entry(cp)? {
        if name::eq_ignore_case(&entry.name, target)
            || name::eq_ignore_case(&name::short_display(&entry.short.name, cp)?, target)
        {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

/// 8.3短名是否已被占用（代短名去重用）。
pub fn basis_taken(
    pool: &BufferPool,
    drive: &Drive,
    span: DirSpan,
    name83: &[u8; 11],
) -> Result<bool, Error> {
    let mut scanner = DirScanner::new(pool, drive, span);
    loop {
        match scanner.next_raw()? {
            Some((_, raw)) => {
                if status_of(&raw) == DirEntryStatus::TailFree {
                    return Ok(false);
                }
                if status_of(&raw) == DirEntryStatus::Occupied
                    && !is_long(&raw)
                    && raw[..11] == name83[..]
                {
                    return Ok(true);
                }
            }
            None => return Ok(false),
        }
    }
}

/// 列出目录项，跳过`.`与`..`，从第`at`项起最多`count`项。
pub fn list(
    pool: &BufferPool,
    drive: &Drive,
    span: DirSpan,
    cp: &dyn Codepage,
    at: usize,
    count: usize,
) -> Result<Vec<vfs::DirEntry>, Error> {
    let mut buf = Vec::with_capacity(count.min(64));
    let mut skipped = 0;

    let mut scanner = DirScanner::new(pool, drive, span);
    while let Some(entry) = scanner.next_entry(cp)? {
        if entry.short.is_relative() {
            continue;
        }
        if skipped < at {
            skipped += 1;
            continue;
        }
        if buf.len() == count {
            break;
        }
        buf.push(vfs::DirEntry {
            inode: entry.short.cluster_id().raw() as u64,
            ty: if entry.short.is_directory() {
                vfs::DirEntryType::Directory
            } else {
                vfs::DirEntryType::Regular
            },
            name: entry.name,
        });
    }

    Ok(buf)
}

/// 目录里除了`.`和`..`还有没有别的。
pub fn is_empty(
    pool: &BufferPool,
    drive: &Drive,
    span: DirSpan,
    cp: &dyn Codepage,
) -> Result<bool, Error> {
    let mut scanner = DirScanner::new(pool, drive, span);
    while let Some(entry) = scanner.next_entry(cp)? {
        if !entry.short.is_relative() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// 把一组目录项（长项在前短项殿后）写进目录。
///
/// 找一段足够长的连续空槽；链式目录不够就伸长一簇重扫，
/// 固定根目录满了就是[`Error::DirectoryFull`]。
///
/// # 返回
///
/// 短项位置与长项位置（磁盘顺序）。
pub fn insert(
    pool: &BufferPool,
    drive: &Drive,
    span: DirSpan,
    short: &ShortDirEntry,
    longs: &[LongDirEntry],
) -> Result<(DirPos, Vec<DirPos>), Error> {
    let need = longs.len() + 1;

    loop {
        if let Some(positions) = collect_free_run(pool, drive, span, need)? {
            let (pos, run) = positions.split_last().unwrap();
            for (long, lpos) in longs.iter().zip(run) {
                write_slot(pool, drive, *lpos, |out| long.encode(out))?;
            }
            write_slot(pool, drive, *pos, |out| short.encode(out))?;
            return Ok((*pos, run.to_vec()));
        }

        match span {
            DirSpan::Root { .. } => return Err(Error::DirectoryFull),
            DirSpan::Chain(start) => extend(pool, drive, start)?,
        }
    }
}

/// 找一段`need`个连续空槽（可跨扇区、可伸进尾空区）。
fn collect_free_run(
    pool: &BufferPool,
    drive: &Drive,
    span: DirSpan,
    need: usize,
) -> Result<Option<Vec<DirPos>>, Error> {
    let mut scanner = DirScanner::new(pool, drive, span);
    let mut run: Vec<DirPos> = Vec::new();

    loop {
        match scanner.next_raw()? {
            Some((pos, raw)) => {
                match status_of(&raw) {
                    // 尾空区里的槽跟空洞一样能用
                    DirEntryStatus::Free | DirEntryStatus::TailFree => run.push(pos),
                    DirEntryStatus::Occupied => run.clear(),
                }
                if run.len() == need {
                    return Ok(Some(run));
                }
            }
            None => return Ok(None),
        }
    }
}

/// 给链式目录续一个清零的簇。
fn extend(pool: &BufferPool, drive: &Drive, start: ClusterId) -> Result<(), Error> {
    let ncid = {
        let mut table = drive.table.lock();
        let last = table.last(start)?;
        let (ncid, _) = table.alloc_chain(Some(last), 1)?;
        ncid
    };
    zero_cluster(pool, drive, ncid)
}

/// 新簇整簇清零，目录项全部呈尾空状态。
pub fn zero_cluster(pool: &BufferPool, drive: &Drive, id: ClusterId) -> Result<(), Error> {
    let first = drive.geo.cluster_sector(id);
    for i in 0..drive.geo.cluster_sectors {
        let cache = pool.get_zeroed(drive.id, &drive.chan, first + i)?;
        cache.lock().sync()?;
    }
    Ok(())
}

/// 新目录簇的头两项：`.`与`..`。
pub fn init_dir_cluster(
    pool: &BufferPool,
    drive: &Drive,
    id: ClusterId,
    own: &ShortDirEntry,
    parent_start: ClusterId,
) -> Result<(), Error> {
    zero_cluster(pool, drive, id)?;

    let first = drive.geo.cluster_sector(id);
    let cwd = own.as_cwd();
    let parent = ShortDirEntry::new_parent(parent_start);

    let cache = pool.get(drive.id, &drive.chan, first)?;
    let mut sector = cache.lock();
    cwd.encode(&mut sector.data_mut()[..DIRENT_SIZE]);
    parent.encode(&mut sector.data_mut()[DIRENT_SIZE..2 * DIRENT_SIZE]);
    sector.sync()
}

/// 摘除一整条目录项（长项+短项）：统统打上0xE5。
pub fn remove(
    pool: &BufferPool,
    drive: &Drive,
    pos: DirPos,
    run: &[DirPos],
) -> Result<(), Error> {
    for p in run.iter().chain(core::iter::once(&pos)) {
        write_slot(pool, drive, *p, |out| out[0] = 0xE5)?;
    }
    Ok(())
}

/// 把短目录项改写回它的槽位（尺寸、起始簇等元数据落盘）。
pub fn write_short(
    pool: &BufferPool,
    drive: &Drive,
    pos: DirPos,
    short: &ShortDirEntry,
) -> Result<(), Error> {
    write_slot(pool, drive, pos, |out| short.encode(out))
}

fn write_slot(
    pool: &BufferPool,
    drive: &Drive,
    pos: DirPos,
    f: impl FnOnce(&mut [u8]),
) -> Result<(), Error> {
    let cache = pool.get(drive.id, &drive.chan, pos.sector)?;
    let mut sector = cache.lock();
    let off = pos.slot * DIRENT_SIZE;
    f(&mut sector.data_mut()[off..off + DIRENT_SIZE]);
    sector.sync()
}
