//! # 文件系统信息
//!
//! 仅FAT32格式在用，
//! 位于#1扇区，备份于#7扇区，
//! 保存着空闲簇的信息，需要持续维护。
//!
//! 两个计数都只是提示，0xFFFFFFFF表示不知道；
//! 挂载时存疑就丢弃，刷写FAT时顺带回写。

use crate::util::{le32, put32};

const LEAD_SIG: u32 = 0x4161_5252;
const STRUC_SIG: u32 = 0x6141_7272;
const TRAIL_SIG: u32 = 0xAA55_0000;

pub const UNKNOWN: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy)]
pub struct FsInfo {
    /// 剩余空闲簇数量
    pub free_count: u32,
    /// 从这里开始找下一个空闲簇
    pub next_free: u32,
}

impl FsInfo {
    /// 签名不符返回[`None`]，挂载方当作计数未知处理。
    pub fn decode(raw: &[u8]) -> Option<Self> {
        (raw.len() >= 512
            && le32(raw, 0) == LEAD_SIG
            && le32(raw, 484) == STRUC_SIG
            && le32(raw, 508) == TRAIL_SIG)
            .then(|| Self {
                free_count: le32(raw, 488),
                next_free: le32(raw, 492),
            })
    }

    /// 覆写整个扇区，含全部签名。
    pub fn encode(&self, out: &mut [u8]) {
        out[..512].fill(0);
        put32(out, 0, LEAD_SIG);
        put32(out, 484, STRUC_SIG);
        put32(out, 488, self.free_count);
        put32(out, 492, self.next_free);
        put32(out, 508, TRAIL_SIG);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_round_trip() {
        let info = FsInfo {
            free_count: 1234,
            next_free: 9,
        };
        let mut raw = [0u8; 512];
        info.encode(&mut raw);

        let back = FsInfo::decode(&raw).unwrap();
        assert_eq!(1234, back.free_count);
        assert_eq!(9, back.next_free);
    }

    #[test]
    fn bad_signature_is_unknown() {
        let mut raw = [0u8; 512];
        FsInfo {
            free_count: 1,
            next_free: 2,
        }
        .encode(&mut raw);
        raw[0] ^= 0xFF;
        assert!(FsInfo::decode(&raw).is_none());
    }
}
