//! 小端字节序的读写小工具
//!
//! 磁盘上的多字节字段一律小端，且不保证对齐，
//! 所以全部经由字节切片存取。

pub fn le16(raw: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([raw[off], raw[off + 1]])
}

pub fn le32(raw: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]])
}

pub fn put16(raw: &mut [u8], off: usize, val: u16) {
    raw[off..off + 2].copy_from_slice(&val.to_le_bytes());
}

pub fn put32(raw: &mut [u8], off: usize, val: u32) {
    raw[off..off + 4].copy_from_slice(&val.to_le_bytes());
}
