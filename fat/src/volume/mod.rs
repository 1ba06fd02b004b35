//! 卷的布局
//!
//! 保留区 | FAT区 | 根目录(FAT12/16) | 数据区

pub mod data;
pub mod fat;
pub mod partition;
pub mod reserved;
