//! 数据区，存放目录项的区域，使用**簇编号**索引。
//!
//! 因为FAT条目存放着下一个簇的编号，
//! 其中`0`表示簇未分配，`1`保留，
//! 所以数据区第一个可用的簇编号一般为2。
//!
//! 目录项一律32字节，解码成自有结构再用，
//! 不在磁盘字节上就地取值。

use enumflags2::{bitflags, BitFlags};

use crate::cluster::ClusterId;
use crate::util::{le16, le32, put16, put32};

pub const DIRENT_SIZE: usize = 32;

/// 固定的创建/修改时间戳。
/// 引擎不带时钟协作者，写死一个纪元日期。
const STAMP_DATE: u16 = (45 << 9) | (1 << 5) | 1; // 2025-01-01
const STAMP_TIME: u16 = 12 << 11; // 12:00:00

static CWD_NAME: [u8; 11] = {
    let mut arr = [b' '; 11];
    arr[0] = b'.';
    arr
};

static PARENT_NAME: [u8; 11] = {
    let mut arr = [b' '; 11];
    arr[0] = b'.';
    arr[1] = b'.';
    arr
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[bitflags]
#[repr(u8)]
pub enum AttrFlag {
    ReadOnly = 0b0000_0001,
    Hidden = 0b0000_0010,
    /// The corresponding file is tagged as a component of the operating system
    System = 0b0000_0100,
    /// The corresponding entry contains the volume label
    VolumeID = 0b0000_1000,
    Directory = 0b0001_0000,
    /// Indicates that properties of the associated file have been modified
    Archive = 0b0010_0000,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DirEntryStatus {
    /// name[0] == 0xE5
    Free,
    /// name[0] == 0，此条目后的条目皆为[`DirEntryStatus::TailFree`]
    TailFree,
    /// 已被使用
    Occupied,
}

/// 只看首字节，长短目录项通用。
pub fn status_of(raw: &[u8]) -> DirEntryStatus {
    match raw[0] {
        0xE5 => DirEntryStatus::Free,
        0x00 => DirEntryStatus::TailFree,
        _ => DirEntryStatus::Occupied,
    }
}

/// 长目录项的判别：属性字节低6位全部置位。
pub fn is_long(raw: &[u8]) -> bool {
    raw[11] & 0x3F == 0x0F
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ShortDirEntry {
    pub name: [u8; 11],
    pub attr: BitFlags<AttrFlag>,
    /// Reserved, must be 0
    ntres: u8,
    crt_time_tenth: u8,
    crt_time: u16,
    crt_date: u16,
    lst_acc_date: u16,
    wrt_time: u16,
    wrt_date: u16,
    start: ClusterId,
    size: u32,
}

impl ShortDirEntry {
    pub fn decode(raw: &[u8]) -> Self {
        debug_assert!(raw.len() >= DIRENT_SIZE);
        Self {
            name: raw[..11].try_into().unwrap(),
            attr: BitFlags::from_bits_truncate(raw[11]),
            ntres: raw[12],
            crt_time_tenth: raw[13],
            crt_time: le16(raw, 14),
            crt_date: le16(raw, 16),
            lst_acc_date: le16(raw, 18),
            wrt_time: le16(raw, 22),
            wrt_date: le16(raw, 24),
            start: ClusterId::join(le16(raw, 26), le16(raw, 20)),
            size: le32(raw, 28),
        }
    }

    pub fn encode(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= DIRENT_SIZE);
        out[..11].copy_from_slice(&self.name);
        out[11] = self.attr.bits();
        out[12] = self.ntres;
        out[13] = self.crt_time_tenth;
        put16(out, 14, self.crt_time);
        put16(out, 16, self.crt_date);
        put16(out, 18, self.lst_acc_date);
        let (lo, hi) = self.start.split();
        put16(out, 20, hi);
        put16(out, 22, self.wrt_time);
        put16(out, 24, self.wrt_date);
        put16(out, 26, lo);
        put32(out, 28, self.size);
    }

    pub fn new(name: [u8; 11], attr: BitFlags<AttrFlag>) -> Self {
        Self {
            name,
            attr,
            crt_time: STAMP_TIME,
            crt_date: STAMP_DATE,
            lst_acc_date: STAMP_DATE,
            wrt_time: STAMP_TIME,
            wrt_date: STAMP_DATE,
            ..Default::default()
        }
    }

    pub fn status(&self) -> DirEntryStatus {
        match self.name[0] {
            0xE5 => DirEntryStatus::Free,
            0x00 => DirEntryStatus::TailFree,
            _ => DirEntryStatus::Occupied,
        }
    }

    pub const fn cluster_id(&self) -> ClusterId {
        self.start
    }

    pub fn set_cluster_id(&mut self, id: ClusterId) {
        self.start = id;
    }

    pub const fn size(&self) -> u32 {
        self.size
    }

    pub fn resize(&mut self, size: u32) {
        self.size = size;
        self.wrt_time = STAMP_TIME;
        self.wrt_date = STAMP_DATE;
    }

    pub fn is_directory(&self) -> bool {
        self.attr.contains(AttrFlag::Directory)
    }

    pub fn is_volume_label(&self) -> bool {
        self.attr.contains(AttrFlag::VolumeID)
    }

    pub fn is_relative(&self) -> bool {
        self.name == CWD_NAME || self.name == PARENT_NAME
    }

    /// 由此目录项派生它目录里的`.`项。
    pub fn as_cwd(&self) -> Self {
        let mut cwd = *self;
        cwd.name = CWD_NAME;
        cwd
    }

    /// 构造`..`项。父目录为根时调用方传[`ClusterId::FREE`]。
    pub fn new_parent(pid: ClusterId) -> Self {
        let mut dirent = Self::new(PARENT_NAME, AttrFlag::Directory.into());
        dirent.set_cluster_id(pid);
        dirent
    }

    pub fn checksum(&self) -> u8 {
        Self::checksum_from(&self.name)
    }

    pub fn checksum_from(name: &[u8; 11]) -> u8 {
        name.iter().fold(0, |sum, &b| {
            // NOTE: The operation is an unsigned char rotate right
            (if sum & 1 != 0 { 0x80 } else { 0u8 })
                .wrapping_add(sum >> 1)
                .wrapping_add(b)
        })
    }
}

/// 可容纳名字的13个UTF-16单元。
///
/// 目录项名称最长为255个单元，所以最多用到20个长目录项。
#[derive(Debug, Clone, Copy)]
pub struct LongDirEntry {
    /// 序号（1起），最后一项带[`LongDirEntry::LAST_MASK`]
    pub ord: u8,
    /// 此项跟随的短名称目录项的校验和。
    /// 若不一致则说明发生了错误
    pub chksum: u8,
    pub units: [u16; 13],
}

impl LongDirEntry {
    pub const LAST_MASK: u8 = 0b0100_0000;

    /// 每项容纳的UTF-16单元数
    pub const CAP: usize = 13;

    pub fn decode(raw: &[u8]) -> Self {
        debug_assert!(raw.len() >= DIRENT_SIZE && is_long(raw));
        let mut units = [0u16; 13];
        // 名字掰成5+6+2三段塞
        for (i, unit) in units.iter_mut().enumerate() {
            let off = match i {
                0..=4 => 1 + i * 2,
                5..=10 => 14 + (i - 5) * 2,
                _ => 28 + (i - 11) * 2,
            };
            *unit = le16(raw, off);
        }
        Self {
            ord: raw[0],
            chksum: raw[13],
            units,
        }
    }

    pub fn encode(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= DIRENT_SIZE);
        out[..DIRENT_SIZE].fill(0);
        out[0] = self.ord;
        out[11] = 0x0F;
        out[13] = self.chksum;
        for (i, unit) in self.units.iter().enumerate() {
            let off = match i {
                0..=4 => 1 + i * 2,
                5..=10 => 14 + (i - 5) * 2,
                _ => 28 + (i - 11) * 2,
            };
            put16(out, off, *unit);
        }
    }

    pub const fn seq(&self) -> u8 {
        self.ord & !Self::LAST_MASK
    }

    pub const fn is_last(&self) -> bool {
        self.ord & Self::LAST_MASK != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_codec_round_trip() {
        let mut dirent = ShortDirEntry::new(*b"README  TXT", AttrFlag::Archive.into());
        dirent.set_cluster_id(ClusterId::new(0x0004_0003));
        dirent.resize(1234);

        let mut raw = [0u8; DIRENT_SIZE];
        dirent.encode(&mut raw);

        let back = ShortDirEntry::decode(&raw);
        assert_eq!(*b"README  TXT", back.name);
        assert_eq!(ClusterId::new(0x0004_0003), back.cluster_id());
        assert_eq!(1234, back.size());
        assert!(!back.is_directory());
        assert!(!is_long(&raw));
    }

    #[test]
    fn long_codec_round_trip() {
        let mut units = [0xFFFF_u16; 13];
        for (i, u) in "hello.txt\0".encode_utf16().enumerate() {
            units[i] = u;
        }
        let long = LongDirEntry {
            ord: 1 | LongDirEntry::LAST_MASK,
            chksum: 0xB3,
            units,
        };

        let mut raw = [0u8; DIRENT_SIZE];
        long.encode(&mut raw);
        assert!(is_long(&raw));

        let back = LongDirEntry::decode(&raw);
        assert_eq!(1, back.seq());
        assert!(back.is_last());
        assert_eq!(0xB3, back.chksum);
        assert_eq!(units, back.units);
    }

    #[test]
    fn checksum_is_rotate_fold() {
        // 微软规格书里给出的算法对"README  TXT"应得一个稳定值
        let sum = ShortDirEntry::checksum_from(b"README  TXT");
        let mut expect: u8 = 0;
        for &b in b"README  TXT" {
            expect = expect.rotate_right(1).wrapping_add(b);
        }
        assert_eq!(expect, sum);
    }

    #[test]
    fn relative_entries() {
        let parent = ShortDirEntry::new_parent(ClusterId::FREE);
        assert!(parent.is_relative());
        assert!(parent.is_directory());

        let dir = ShortDirEntry::new(*b"DOCS       ", AttrFlag::Directory.into());
        assert!(dir.as_cwd().is_relative());
        assert!(!dir.is_relative());
    }
}
