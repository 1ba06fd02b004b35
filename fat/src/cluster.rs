//! 簇编号与FAT条目的分类
//!
//! FAT条目的宽度随卷格式而变（12/16/28位），
//! 引擎内部统一用[`ClusterId`]（u32）表示，
//! 只在读写FAT区的边界处做宽度转换。

use core::fmt;

use derive_more::{From, Into};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct ClusterId(u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ClusterId {
    pub const FREE: Self = Self(0);

    /// 最小的可用簇号
    pub const MIN: Self = Self(2);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// 目录项里的两个16位字段
    pub const fn split(self) -> (u16, u16) {
        (self.0 as u16, (self.0 >> 16) as u16)
    }

    pub const fn join(lo: u16, hi: u16) -> Self {
        Self((hi as u32) << 16 | lo as u32)
    }

    pub const fn step(self, n: u32) -> Self {
        Self(self.0 + n)
    }
}

/// 卷的FAT格式，由**簇总数**唯一决定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatKind {
    T12,
    T16,
    T32,
}

impl FatKind {
    /// NOTE: 判别只看簇数，BPB里的FilSysType字符串不可信。
    pub fn from_cluster_count(count: u32) -> Self {
        if count <= 4084 {
            Self::T12
        } else if count <= 65524 {
            Self::T16
        } else {
            Self::T32
        }
    }

    /// FAT32条目的高4位保留，读写都要剥掉。
    pub const fn entry_mask(self) -> u32 {
        match self {
            Self::T12 => 0xFFF,
            Self::T16 => 0xFFFF,
            Self::T32 => 0x0FFF_FFFF,
        }
    }

    /// 链表终结标记的下界（含）
    pub const fn eoc_min(self) -> u32 {
        match self {
            Self::T12 => 0xFF8,
            Self::T16 => 0xFFF8,
            Self::T32 => 0x0FFF_FFF8,
        }
    }

    /// 写入时使用的规范终结标记
    pub const fn eoc(self) -> u32 {
        self.entry_mask()
    }

    /// 坏簇标记
    pub const fn bad(self) -> u32 {
        match self {
            Self::T12 => 0xFF7,
            Self::T16 => 0xFFF7,
            Self::T32 => 0x0FFF_FFF7,
        }
    }

    pub const fn label(self) -> &'static [u8; 8] {
        match self {
            Self::T12 => b"FAT12   ",
            Self::T16 => b"FAT16   ",
            Self::T32 => b"FAT32   ",
        }
    }
}

/// 对一条FAT条目的裁决
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    Free,
    /// 指向链表上的下一个簇
    Next(ClusterId),
    /// 链表到此为止
    Eoc,
    Bad,
    /// 介于合法范围之外，既非终结也非坏簇
    Reserved,
}

/// `max_index`: 卷上最大的合法簇编号（即簇总数+1）。
pub fn classify(kind: FatKind, raw: u32, max_index: u32) -> ClusterKind {
    let raw = raw & kind.entry_mask();

    if raw == 0 {
        ClusterKind::Free
    } else if raw == kind.bad() {
        ClusterKind::Bad
    } else if raw >= kind.eoc_min() {
        ClusterKind::Eoc
    } else if (2..=max_index).contains(&raw) {
        ClusterKind::Next(ClusterId::new(raw))
    } else {
        ClusterKind::Reserved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_by_count() {
        assert_eq!(FatKind::T12, FatKind::from_cluster_count(4084));
        assert_eq!(FatKind::T16, FatKind::from_cluster_count(4085));
        assert_eq!(FatKind::T16, FatKind::from_cluster_count(65524));
        assert_eq!(FatKind::T32, FatKind::from_cluster_count(65525));
    }

    #[test]
    fn entry_verdict() {
        assert_eq!(ClusterKind::Free, classify(FatKind::T16, 0, 100));
        assert_eq!(
            ClusterKind::Next(ClusterId::new(3)),
            classify(FatKind::T16, 3, 100)
        );
        assert_eq!(ClusterKind::Eoc, classify(FatKind::T16, 0xFFFF, 100));
        assert_eq!(ClusterKind::Bad, classify(FatKind::T16, 0xFFF7, 100));
        // 超出卷容量但不是终结标记
        assert_eq!(ClusterKind::Reserved, classify(FatKind::T16, 101, 100));
        // FAT32条目高4位被忽略
        assert_eq!(
            ClusterKind::Next(ClusterId::new(9)),
            classify(FatKind::T32, 0xF000_0009, 100)
        );
    }
}
