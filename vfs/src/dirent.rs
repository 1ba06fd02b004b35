use alloc::string::String;

/// 列目录时交换的目录项
#[derive(Debug)]
pub struct DirEntry {
    /// Inode number
    pub inode: u64,
    pub ty: DirEntryType,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DirEntryType {
    Directory,
    #[default]
    Regular,
}
