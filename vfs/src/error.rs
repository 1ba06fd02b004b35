use core::fmt;

/// 所有公开操作统一返回的结果码。
///
/// 大致分四类：调用方错误、资源耗尽、介质I/O错误、一致性错误。
/// 下层绝不吞掉I/O错误，原样上抛。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /* 调用方错误 */
    AlreadyExists,
    NotFound,
    IsADirectory,
    NotADirectory,
    DirectoryNotEmpty,
    /// 句柄指向的驱动器/节点已不存在
    InvalidHandle,
    /// 路径或名称含非法字符、非法语法
    InvalidPath,
    NameTooLong,
    /// 卷上仍有打开的inode，不能卸载
    Busy,

    /* 资源耗尽 */
    /// 块缓冲池里既无空闲也无可逐出的缓冲
    NoBuffer,
    /// 打开的inode达到上限
    NoInode,
    /// 无空闲簇
    NoSpace,
    /// FAT12/16固定根目录已满
    DirectoryFull,
    NoMemory,

    /* 介质错误 */
    Io,

    /* 一致性错误 */
    /// 簇链中途遇到坏簇标记
    BadCluster,
    /// 介质上找不到可识别的FAT卷
    BadVolume,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::AlreadyExists => "entry already exists",
            Error::NotFound => "no such file or directory",
            Error::IsADirectory => "is a directory",
            Error::NotADirectory => "not a directory",
            Error::DirectoryNotEmpty => "directory not empty",
            Error::InvalidHandle => "stale or invalid handle",
            Error::InvalidPath => "invalid path or name",
            Error::NameTooLong => "name too long",
            Error::Busy => "volume busy",
            Error::NoBuffer => "no block buffer available",
            Error::NoInode => "no inode slot available",
            Error::NoSpace => "no free cluster",
            Error::DirectoryFull => "root directory full",
            Error::NoMemory => "allocation failed",
            Error::Io => "device i/o error",
            Error::BadCluster => "defective cluster in chain",
            Error::BadVolume => "not a recognizable fat volume",
        };
        f.write_str(msg)
    }
}
