//! MBR分区表
//!
//! 挂载前先看设备0号块：本身就是启动扇区的当作无分区介质
//! （superfloppy），否则解析MBR，取第一个FAT类型的分区。

use alloc::sync::Arc;
use alloc::vec;

use block_dev::{BlockDevice, BLOCK_SIZE};
use vfs::Error;

use crate::cluster::FatKind;
use crate::util::{le16, le32, put16, put32};
use crate::volume::reserved::Bpb;

const TABLE_OFFSET: usize = 446;
const RECORD_SIZE: usize = 16;

/// MBR里的一条分区记录
#[derive(Debug, Clone, Copy)]
pub struct PartitionRecord {
    pub boot: u8,
    /// 分区类型ID
    pub ty: u8,
    /// 起始LBA块号
    pub start: u32,
    /// 分区块数
    pub sectors: u32,
}

impl PartitionRecord {
    fn decode(raw: &[u8]) -> Self {
        Self {
            boot: raw[0],
            ty: raw[4],
            start: le32(raw, 8),
            sectors: le32(raw, 12),
        }
    }

    pub fn is_fat(&self) -> bool {
        // 0x01 FAT12, 0x04/0x06/0x0E FAT16, 0x0B/0x0C FAT32
        matches!(self.ty, 0x01 | 0x04 | 0x06 | 0x0B | 0x0C | 0x0E)
    }

    /// 格式化分区镜像时给记录配的类型ID。
    pub fn type_id(kind: FatKind, sectors: u32) -> u8 {
        match kind {
            FatKind::T12 => 0x01,
            // 32 MiB是CHS时代留下来的界限
            FatKind::T16 if sectors < 0x1_0000 => 0x04,
            FatKind::T16 => 0x06,
            FatKind::T32 => 0x0B,
        }
    }

    fn encode(&self, out: &mut [u8]) {
        out.fill(0);
        out[0] = self.boot;
        out[4] = self.ty;
        put32(out, 8, self.start);
        put32(out, 12, self.sectors);
    }
}

/// 写出只含一条记录的MBR，其余三条留空。
pub fn encode_table(record: &PartitionRecord, out: &mut [u8]) {
    out[..512].fill(0);
    record.encode(&mut out[TABLE_OFFSET..TABLE_OFFSET + RECORD_SIZE]);
    put16(out, 510, 0xAA55);
}

/// 解析MBR的四条分区记录。签名不符返回[`None`]。
pub fn decode_table(raw: &[u8]) -> Option<[PartitionRecord; 4]> {
    if raw.len() < 512 || le16(raw, 510) != 0xAA55 {
        return None;
    }

    let mut records = [PartitionRecord {
        boot: 0,
        ty: 0,
        start: 0,
        sectors: 0,
    }; 4];
    for (i, record) in records.iter_mut().enumerate() {
        let off = TABLE_OFFSET + i * RECORD_SIZE;
        *record = PartitionRecord::decode(&raw[off..off + RECORD_SIZE]);
    }
    Some(records)
}

/// 找出设备上FAT卷的起始块号。
pub fn locate(dev: &Arc<dyn BlockDevice>) -> Result<usize, Error> {
    let mut raw = vec![0u8; BLOCK_SIZE.max(512)];
    dev.read_blocks(0, &mut raw).map_err(|_| Error::Io)?;

    // 无分区介质：0号块本身就是启动扇区
    if Bpb::probe(&raw) {
        return Ok(0);
    }

    let records = decode_table(&raw).ok_or(Error::BadVolume)?;
    let record = records
        .iter()
        .find(|record| record.is_fat() && record.sectors > 0)
        .ok_or(Error::BadVolume)?;

    log::info!(
        "partition type {:#04x} at block {} ({} blocks)",
        record.ty,
        record.start,
        record.sectors
    );
    Ok(record.start as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{put16, put32};

    #[test]
    fn first_fat_record_wins() {
        let mut raw = [0u8; 512];
        put16(&mut raw, 510, 0xAA55);

        // 0号记录：Linux分区，跳过
        raw[TABLE_OFFSET + 4] = 0x83;
        put32(&mut raw, TABLE_OFFSET + 8, 63);
        put32(&mut raw, TABLE_OFFSET + 12, 1000);
        // 1号记录：FAT16
        raw[TABLE_OFFSET + RECORD_SIZE + 4] = 0x06;
        put32(&mut raw, TABLE_OFFSET + RECORD_SIZE + 8, 2048);
        put32(&mut raw, TABLE_OFFSET + RECORD_SIZE + 12, 16384);

        let records = decode_table(&raw).unwrap();
        let hit = records.iter().find(|r| r.is_fat()).unwrap();
        assert_eq!(2048, hit.start);
    }

    #[test]
    fn bad_signature_rejected() {
        let raw = [0u8; 512];
        assert!(decode_table(&raw).is_none());
    }
}
