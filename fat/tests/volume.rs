//! 目录树操作与跨重挂持久性

mod common;

use vfs::{DirEntryType, Error};

use self::common::{fresh_volume, remount};

/// 8 MiB，按容量规则落成FAT16
const SECTORS: usize = 16384;

#[test]
fn create_write_read_persists() {
    let (dev, fs, id) = fresh_volume(SECTORS);

    fs.mkdir(id, "/docs").unwrap();
    {
        let file = fs.create_file(id, "/docs/readme.txt").unwrap();
        fs.write_at(&file, 0, b"hello fat engine").unwrap();
    }

    let (fs, id) = remount(fs, id, &dev);

    let file = fs.resolve(id, "/docs/readme.txt").unwrap();
    let stat = fs.stat(&file).unwrap();
    assert_eq!(DirEntryType::Regular, stat.mode);
    assert_eq!(16, stat.size);

    let mut buf = [0u8; 32];
    let n = fs.read_at(&file, 0, &mut buf).unwrap();
    assert_eq!(b"hello fat engine", &buf[..n]);
}

#[test]
fn listing_skips_relatives() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    fs.mkdir(id, "/bin").unwrap();
    fs.create_file(id, "/init").unwrap();

    let root = fs.root(id).unwrap();
    let mut names: Vec<String> = fs
        .ls(&root, 0, usize::MAX)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    names.sort();
    assert_eq!(vec!["bin".to_string(), "init".to_string()], names);

    // 子目录里`.`与`..`不上列表
    let bin = fs.resolve(id, "/bin").unwrap();
    assert!(fs.ls(&bin, 0, usize::MAX).unwrap().is_empty());
}

#[test]
fn namespace_errors() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    fs.mkdir(id, "/d").unwrap();
    fs.create_file(id, "/d/f.txt").unwrap();

    assert_eq!(Error::NotFound, fs.resolve(id, "/missing").unwrap_err());
    assert_eq!(Error::AlreadyExists, fs.create_file(id, "/d/f.txt").unwrap_err());
    assert_eq!(Error::AlreadyExists, fs.mkdir(id, "/d").unwrap_err());
    assert_eq!(Error::IsADirectory, fs.unlink(id, "/d").unwrap_err());
    assert_eq!(Error::NotADirectory, fs.rmdir(id, "/d/f.txt").unwrap_err());
    assert_eq!(Error::DirectoryNotEmpty, fs.rmdir(id, "/d").unwrap_err());
    assert_eq!(Error::InvalidPath, fs.create_file(id, "/bad:name").unwrap_err());
    assert_eq!(Error::NotADirectory, fs.resolve(id, "/d/f.txt/x").unwrap_err());

    fs.unlink(id, "/d/f.txt").unwrap();
    assert_eq!(Error::NotFound, fs.resolve(id, "/d/f.txt").unwrap_err());
    fs.rmdir(id, "/d").unwrap();
    assert_eq!(Error::NotFound, fs.resolve(id, "/d").unwrap_err());
}

#[test]
fn relative_paths_and_cwd() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    fs.mkdir(id, "/a").unwrap();
    fs.mkdir(id, "/a/b").unwrap();
    fs.create_file(id, "/a/b/c.txt").unwrap();

    fs.set_cwd(id, "/a/b").unwrap();
    assert!(fs.resolve(id, "c.txt").is_ok());
    assert!(fs.resolve(id, "./c.txt").is_ok());
    assert!(fs.resolve(id, "../b/c.txt").is_ok());

    // 根之上没有更上层
    assert_eq!(
        fs.resolve(id, "/..").unwrap().ino(),
        fs.root(id).unwrap().ino()
    );

    fs.set_cwd(id, "..").unwrap();
    assert!(fs.resolve(id, "b/c.txt").is_ok());
    assert_eq!(Error::NotADirectory, fs.set_cwd(id, "b/c.txt").unwrap_err());
}

#[test]
fn rename_moves_entry() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    fs.mkdir(id, "/src").unwrap();
    fs.mkdir(id, "/dst").unwrap();
    {
        let f = fs.create_file(id, "/src/old.txt").unwrap();
        fs.write_at(&f, 0, b"payload").unwrap();
    }

    fs.rename(id, "/src/old.txt", "/dst/new.txt").unwrap();
    assert_eq!(Error::NotFound, fs.resolve(id, "/src/old.txt").unwrap_err());

    let f = fs.resolve(id, "/dst/new.txt").unwrap();
    let mut buf = [0u8; 16];
    let n = fs.read_at(&f, 0, &mut buf).unwrap();
    assert_eq!(b"payload", &buf[..n]);
    drop(f);

    // 目标已存在则拒绝
    fs.create_file(id, "/src/old.txt").unwrap();
    assert_eq!(
        Error::AlreadyExists,
        fs.rename(id, "/src/old.txt", "/dst/new.txt").unwrap_err()
    );
}

#[test]
fn renamed_directory_updates_parent_link() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    fs.mkdir(id, "/a").unwrap();
    fs.mkdir(id, "/b").unwrap();
    fs.mkdir(id, "/a/sub").unwrap();
    fs.create_file(id, "/a/sub/f.txt").unwrap();

    fs.rename(id, "/a/sub", "/b/sub").unwrap();

    // 挪过去后 `..` 指向新父目录
    fs.set_cwd(id, "/b/sub").unwrap();
    assert_eq!(
        fs.resolve(id, "..").unwrap().ino(),
        fs.resolve(id, "/b").unwrap().ino()
    );
    assert!(fs.resolve(id, "/b/sub/f.txt").is_ok());
}

#[test]
fn open_handles_block_removal_and_unmount() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    let file = fs.create_file(id, "/busy.txt").unwrap();
    assert_eq!(Error::Busy, fs.unlink(id, "/busy.txt").unwrap_err());
    assert_eq!(Error::Busy, fs.unmount(id).unwrap_err());

    drop(file);
    fs.unlink(id, "/busy.txt").unwrap();
    fs.unmount(id).unwrap();
}

#[test]
fn partitioned_image_mounts() {
    use std::sync::Arc;

    use fat::{FatFileSystem, FsConfig};
    use vfs::AsciiCodepage;

    let dev = common::RamDisk::new();
    // 9 MiB介质，去掉1 MiB对齐后落成FAT16分区
    FatFileSystem::format_partitioned(&dev, 18432).unwrap();

    let fs = FatFileSystem::new(FsConfig::default(), Arc::new(AsciiCodepage));
    let id = fs.mount(Arc::clone(&dev)).unwrap();
    fs.create_file(id, "/on-part.txt").unwrap();
    assert!(fs.resolve(id, "/on-part.txt").is_ok());
}

#[test]
fn same_entry_shares_one_inode() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    fs.create_file(id, "/one.txt").unwrap();
    let a = fs.resolve(id, "/one.txt").unwrap();
    let b = fs.resolve(id, "one.txt").unwrap();
    assert!(std::sync::Arc::ptr_eq(&a, &b));
}
