//! # 块设备接口层
//!
//! [`BlockDevice`] 是对底层扇区读写驱动的抽象，
//! 文件系统核心只通过它访问介质，不做任何重试。

#![no_std]

use core::any::Any;
use core::fmt;

/// 设备端的传输单位，上层逻辑扇区是它的整数倍。
pub const BLOCK_SIZE: usize = 512;

/// 块设备驱动特质
///
/// `first_block`以[`BLOCK_SIZE`]为单位，
/// 读写长度由`buf.len()`决定，必须是[`BLOCK_SIZE`]的整数倍。
pub trait BlockDevice: Send + Sync + Any {
    fn read_blocks(&self, first_block: usize, buf: &mut [u8]) -> Result<(), DevError>;
    fn write_blocks(&self, first_block: usize, buf: &[u8]) -> Result<(), DevError>;
}

/// 传输层面的硬失败，核心将其原样上抛。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevError;

impl fmt::Display for DevError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block device transfer error")
    }
}
