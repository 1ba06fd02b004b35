//! 数据区的目录项布局

mod dir_entry;

pub use self::dir_entry::{
    is_long, status_of, AttrFlag, DirEntryStatus, LongDirEntry, ShortDirEntry, DIRENT_SIZE,
};
