//! BIOS Parameter Block BIOS参数块
//!
//! 位于保留区的第一扇区，该扇区又名启动扇区。
//! 磁盘上的布局不对齐，解码/编码都显式按偏移进行。

use vfs::Error;

use crate::cluster::{ClusterId, FatKind};
use crate::drive::Geometry;
use crate::sector::SectorId;
use crate::util::{le16, le32, put16, put32};

/// 启动扇区末尾的签名 [0x55, 0xAA]
pub const SIGNATURE: u16 = 0xAA55;

#[derive(Debug, Clone)]
pub struct Bpb {
    /// 一般用于记录什么系统格式化此卷
    oem: [u8; 8],

    /// 一个扇区的字节量
    sector_bytes: u16,

    /// 一个簇的扇区数
    cluster_sectors: u8,

    /// 保留区的扇区数
    reserved_sectors: u16,

    /// 此卷的文件分配表(FAT)数量，建议为2
    fat_count: u8,

    /// 固定根目录的目录项容量
    /// - FAT32: 0
    root_entries: u16,

    /// - FAT32: 0
    total_sectors_16: u16,

    /// 物理媒介的类型，0xF8固定、0xF0可移动
    media: u8,

    /// - FAT32: 0
    fat_sectors_16: u16,

    /// 中断0x13模式下使用
    sectors_per_track: u16,
    heads: u16,
    hidden_sectors: u32,

    total_sectors_32: u32,

    /*
     * Extended BPB fields for FAT32 volume
     */
    fat_sectors_32: u32,

    /// Bit 7 -- 0 means the FAT is mirrored at runtime into all FATs
    ext_flags: u16,

    /// 卷版本号，为0x0
    fs_version: u16,

    /// 根目录首个簇的编号，
    /// 应该为2，或首个可用的簇编号
    root_cluster: u32,

    /// FSINFO所在扇区号（此扇区位于保留区），通常为1
    fs_info: u16,

    /// 非0时，表示boot备份所在扇区号（此扇区位于保留区，恒为6号）
    backup_boot: u16,

    /// 供移动介质使用
    volume_id: u32,

    /// 卷标签，与根目录记录的卷标签一致
    /// NOTE: 若不设卷标签，则值为"NO NAME    "
    volume_label: [u8; 11],
}

impl Bpb {
    /// 快速判别：一个扇区看起来像不像启动扇区。
    /// 供分区探测使用，不做完整校验。
    pub fn probe(raw: &[u8]) -> bool {
        raw.len() >= 512
            && le16(raw, 510) == SIGNATURE
            && (raw[0] == 0xEB || raw[0] == 0xE9)
            && matches!(le16(raw, 11), 512 | 1024 | 2048 | 4096)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() < 512 || le16(raw, 510) != SIGNATURE {
            return Err(Error::BadVolume);
        }

        let bpb = Self {
            oem: raw[3..11].try_into().unwrap(),
            sector_bytes: le16(raw, 11),
            cluster_sectors: raw[13],
            reserved_sectors: le16(raw, 14),
            fat_count: raw[16],
            root_entries: le16(raw, 17),
            total_sectors_16: le16(raw, 19),
            media: raw[21],
            fat_sectors_16: le16(raw, 22),
            sectors_per_track: le16(raw, 24),
            heads: le16(raw, 26),
            hidden_sectors: le32(raw, 28),
            total_sectors_32: le32(raw, 32),
            fat_sectors_32: le32(raw, 36),
            ext_flags: le16(raw, 40),
            fs_version: le16(raw, 42),
            root_cluster: le32(raw, 44),
            fs_info: le16(raw, 48),
            backup_boot: le16(raw, 50),
            volume_id: 0,
            volume_label: *b"NO NAME    ",
        };
        bpb.validate()?;

        let mut bpb = bpb;
        // 扩展引导字段的位置随格式而变
        let ext = if bpb.fat_sectors_16 == 0 { 64 } else { 36 };
        if raw[ext + 2] == 0x29 {
            bpb.volume_id = le32(raw, ext + 3);
            bpb.volume_label = raw[ext + 7..ext + 18].try_into().unwrap();
        }

        Ok(bpb)
    }

    fn validate(&self) -> Result<(), Error> {
        let ok = matches!(self.sector_bytes, 512 | 1024 | 2048 | 4096)
            && self.cluster_sectors.is_power_of_two()
            && self.reserved_sectors > 0
            && (1..=2).contains(&self.fat_count)
            && self.total_sectors() > 0
            && self.fat_sectors() > 0
            && self.total_sectors()
                > self.data_area().index()
            // FAT32没有固定根目录
            && (self.fat_sectors_16 != 0 || (self.root_entries == 0 && self.fs_version == 0));

        if ok {
            Ok(())
        } else {
            log::error!("boot sector fails validation");
            Err(Error::BadVolume)
        }
    }

    pub fn encode(&self, out: &mut [u8]) {
        out[..512].fill(0);

        let is32 = self.fat_sectors_16 == 0;
        out[0] = 0xEB;
        out[1] = if is32 { 0x58 } else { 0x3C };
        out[2] = 0x90;
        out[3..11].copy_from_slice(&self.oem);
        put16(out, 11, self.sector_bytes);
        out[13] = self.cluster_sectors;
        put16(out, 14, self.reserved_sectors);
        out[16] = self.fat_count;
        put16(out, 17, self.root_entries);
        put16(out, 19, self.total_sectors_16);
        out[21] = self.media;
        put16(out, 22, self.fat_sectors_16);
        put16(out, 24, self.sectors_per_track);
        put16(out, 26, self.heads);
        put32(out, 28, self.hidden_sectors);
        put32(out, 32, self.total_sectors_32);

        let ext = if is32 {
            put32(out, 36, self.fat_sectors_32);
            put16(out, 40, self.ext_flags);
            put16(out, 42, self.fs_version);
            put32(out, 44, self.root_cluster);
            put16(out, 48, self.fs_info);
            put16(out, 50, self.backup_boot);
            64
        } else {
            36
        };
        out[ext + 2] = 0x29;
        put32(out, ext + 3, self.volume_id);
        out[ext + 7..ext + 18].copy_from_slice(&self.volume_label);
        out[ext + 18..ext + 26].copy_from_slice(self.fat_kind().label());

        put16(out, 510, SIGNATURE);
    }
}

impl Bpb {
    pub const fn sector_bytes(&self) -> usize {
        self.sector_bytes as usize
    }

    pub const fn cluster_sectors(&self) -> usize {
        self.cluster_sectors as usize
    }

    pub const fn fat_area(&self) -> SectorId {
        SectorId::new(self.reserved_sectors as usize)
    }

    pub const fn fat_count(&self) -> usize {
        self.fat_count as usize
    }

    /// 单份FAT占用的扇区数
    pub const fn fat_sectors(&self) -> usize {
        if self.fat_sectors_16 > 0 {
            self.fat_sectors_16 as usize
        } else {
            self.fat_sectors_32 as usize
        }
    }

    pub const fn total_sectors(&self) -> usize {
        if self.total_sectors_16 > 0 {
            self.total_sectors_16 as usize
        } else {
            self.total_sectors_32 as usize
        }
    }

    /// 固定根目录占用的扇区数
    ///
    /// - FAT32: 0
    pub const fn root_dir_sectors(&self) -> usize {
        (self.root_entries as usize * 32 + self.sector_bytes as usize - 1)
            / self.sector_bytes as usize
    }

    pub const fn root_area(&self) -> SectorId {
        SectorId::new(
            self.reserved_sectors as usize + self.fat_count as usize * self.fat_sectors(),
        )
    }

    pub const fn data_area(&self) -> SectorId {
        SectorId::new(self.root_area().index() + self.root_dir_sectors())
    }

    pub const fn cluster_count(&self) -> u32 {
        ((self.total_sectors() - self.data_area().index()) / self.cluster_sectors as usize) as u32
    }

    pub fn fat_kind(&self) -> FatKind {
        FatKind::from_cluster_count(self.cluster_count())
    }

    /// FSINFO所在扇区，仅FAT32有效。
    pub fn fs_info(&self) -> Option<SectorId> {
        (self.fat_sectors_16 == 0 && (1..self.reserved_sectors).contains(&self.fs_info))
            .then(|| SectorId::new(self.fs_info as usize))
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            sector_bytes: self.sector_bytes(),
            cluster_sectors: self.cluster_sectors(),
            fat_area: self.fat_area(),
            fat_sectors: self.fat_sectors(),
            fat_count: self.fat_count(),
            root_area: self.root_area(),
            root_sectors: self.root_dir_sectors(),
            data_area: self.data_area(),
            max_index: self.cluster_count() + 1,
            total_sectors: self.total_sectors(),
            root_cluster: if self.fat_sectors_16 == 0 {
                ClusterId::new(self.root_cluster)
            } else {
                ClusterId::FREE
            },
        }
    }
}

/* 格式化 */

#[rustfmt::skip]
static T32_SPC: [(usize, u8); 4] = [
    (0x0100_0000, 8),   // <= 8  GiB => 4k  cluster
    (0x0200_0000, 16),  // <= 16 GiB => 8k  cluster
    (0x0400_0000, 32),  // <= 32 GiB => 16k cluster
    (usize::MAX,  64),  // >  32 GiB => 32k cluster
];

impl Bpb {
    /// 为一块裸介质构造BPB。
    /// 扇区固定512字节，格式由容量决定。
    pub fn build(total_sectors: usize) -> Result<Self, Error> {
        const SECTOR: usize = 512;

        if total_sectors < 64 {
            return Err(Error::BadVolume);
        }

        let mut bpb = Self {
            oem: *b"FATENG  ",
            sector_bytes: SECTOR as u16,
            cluster_sectors: 1,
            reserved_sectors: 1,
            fat_count: 2,
            root_entries: 512,
            total_sectors_16: 0,
            media: 0xF8,
            fat_sectors_16: 0,
            sectors_per_track: 0x3F,
            heads: 0xFF,
            hidden_sectors: 0,
            total_sectors_32: 0,
            fat_sectors_32: 0,
            ext_flags: 0,
            fs_version: 0,
            root_cluster: 0,
            fs_info: 0,
            backup_boot: 0,
            volume_id: 0x2A2A_2A2A,
            volume_label: *b"NO NAME    ",
        };

        if total_sectors <= u16::MAX as usize {
            bpb.total_sectors_16 = total_sectors as u16;
        } else {
            bpb.total_sectors_32 = total_sectors as u32;
        }

        let bytes = total_sectors * SECTOR;
        if bytes <= 0x40_0000 {
            // <= 4 MiB
            bpb.build_small(total_sectors)?;
        } else if bytes <= 0x1040_0000 {
            // <= 260 MiB
            bpb.cluster_sectors = match bytes {
                ..=0x0100_0000 => 2, // <= 16  MiB => 1k cluster
                ..=0x0800_0000 => 4, // <= 128 MiB => 2k cluster
                _ => 8,
            };
            bpb.set_fat_size(FatKind::T16, total_sectors);
        } else {
            bpb.cluster_sectors = T32_SPC
                .iter()
                .find(|(limit, _)| total_sectors <= *limit)
                .unwrap_or(&T32_SPC[3])
                .1;
            bpb.reserved_sectors = 32;
            bpb.root_entries = 0;
            bpb.root_cluster = 2;
            bpb.fs_info = 1;
            bpb.backup_boot = 6;
            bpb.total_sectors_16 = 0;
            bpb.total_sectors_32 = total_sectors as u32;
            bpb.set_fat_size(FatKind::T32, total_sectors);
        }

        bpb.validate()?;
        Ok(bpb)
    }

    /// FAT12卷：选最小的簇尺寸，FAT尺寸迭代收敛。
    fn build_small(&mut self, total_sectors: usize) -> Result<(), Error> {
        for spc in [1u8, 2, 4, 8] {
            self.cluster_sectors = spc;

            // 条目数依赖簇数，簇数又依赖FAT尺寸，迭代至不动点
            let mut fat_sectors = 1usize;
            for _ in 0..8 {
                let overhead = self.reserved_sectors as usize
                    + self.root_dir_sectors()
                    + self.fat_count as usize * fat_sectors;
                let clusters = total_sectors.saturating_sub(overhead) / spc as usize;
                let fat_bytes = ((clusters + 2) * 3).div_ceil(2);
                let need = fat_bytes.div_ceil(self.sector_bytes as usize);
                if need == fat_sectors {
                    break;
                }
                fat_sectors = need;
            }
            self.fat_sectors_16 = fat_sectors as u16;

            if self.cluster_count() <= 4084 {
                return Ok(());
            }
        }

        Err(Error::BadVolume)
    }

    /// 计算FAT占用扇区数并设置
    fn set_fat_size(&mut self, kind: FatKind, total_sectors: usize) {
        let tmp1 =
            total_sectors - (self.reserved_sectors as usize + self.root_dir_sectors());
        let mut tmp2 = 256 * self.cluster_sectors as usize + self.fat_count as usize;

        if kind == FatKind::T32 {
            tmp2 /= 2;
        }
        let fat_size = (tmp1 + tmp2 - 1) / tmp2;

        if kind == FatKind::T32 {
            self.fat_sectors_16 = 0;
            self.fat_sectors_32 = fat_size as u32;
        } else {
            self.fat_sectors_16 = fat_size as u16;
        }
    }
}
