//! 长短文件名：生成、匹配、丢弃

mod common;

use std::sync::Arc;

use fat::{FatFileSystem, FsConfig};
use vfs::{AsciiCodepage, Error};

use self::common::{fresh_volume, remount, RamDisk};

const SECTORS: usize = 16384;

#[test]
fn long_name_survives_remount() {
    let (dev, fs, id) = fresh_volume(SECTORS);

    let name = "Background Service Manifest.toml";
    fs.create_file(id, &format!("/{name}")).unwrap();

    let (fs, id) = remount(fs, id, &dev);
    let root = fs.root(id).unwrap();
    let listed = fs.ls(&root, 0, usize::MAX).unwrap();
    assert_eq!(1, listed.len());
    // 大小写原样保存
    assert_eq!(name, listed[0].name);
}

#[test]
fn lookup_ignores_case() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    fs.create_file(id, "/MixedCase Document.txt").unwrap();
    assert!(fs.resolve(id, "/mixedcase document.txt").is_ok());
    assert!(fs.resolve(id, "/MIXEDCASE DOCUMENT.TXT").is_ok());
    assert_eq!(
        Error::AlreadyExists,
        fs.create_file(id, "/MIXEDCASE DOCUMENT.TXT").unwrap_err()
    );
}

#[test]
fn exact_short_names_stay_short() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    // 合规的大写8.3名不挂长目录项，也能按小写找到
    fs.create_file(id, "/README.TXT").unwrap();
    assert!(fs.resolve(id, "/readme.txt").is_ok());

    let root = fs.root(id).unwrap();
    assert_eq!("README.TXT", fs.ls(&root, 0, usize::MAX).unwrap()[0].name);
}

#[test]
fn lowercase_names_round_trip() {
    let (dev, fs, id) = fresh_volume(SECTORS);

    // 小写放不进只认大写的8.3，得靠长目录项保真
    fs.create_file(id, "/keeper.txt").unwrap();

    let (fs, id) = remount(fs, id, &dev);
    let root = fs.root(id).unwrap();
    assert_eq!("keeper.txt", fs.ls(&root, 0, usize::MAX).unwrap()[0].name);
}

#[test]
fn aliases_use_numeric_tails() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    // 同前缀的长名按`~1`、`~2`顺延出规范代短名
    let first = fs.create_file(id, "/a long file name.text").unwrap();
    let second = fs.create_file(id, "/a long file nap.text").unwrap();

    let via_alias = fs.resolve(id, "/A_LONG~1.TEX").unwrap();
    assert!(Arc::ptr_eq(&first, &via_alias));
    let via_alias = fs.resolve(id, "/A_LONG~2.TEX").unwrap();
    assert!(Arc::ptr_eq(&second, &via_alias));
}

#[test]
fn alias_probe_exhaustion() {
    let dev = RamDisk::new();
    FatFileSystem::format(&dev, SECTORS).unwrap();
    let cfg = FsConfig {
        sfn_probes: 0,
        ..FsConfig::default()
    };
    let fs = FatFileSystem::new(cfg, Arc::new(AsciiCodepage));
    let id = fs.mount(Arc::clone(&dev)).unwrap();

    // 放得进8.3的名字不吃探测配额
    fs.create_file(id, "/PLAIN.TXT").unwrap();
    assert_eq!(
        Error::DirectoryFull,
        fs.create_file(id, "/needs an alias.txt").unwrap_err()
    );
}

#[test]
fn colliding_long_names_get_distinct_aliases() {
    let (dev, fs, id) = fresh_volume(SECTORS);

    // 8.3投影相同，代短名必须岔开
    for i in 0..8 {
        fs.create_file(id, &format!("/very long name number {i}.dat"))
            .unwrap();
    }

    let (fs, id) = remount(fs, id, &dev);
    for i in 0..8 {
        assert!(
            fs.resolve(id, &format!("/very long name number {i}.dat")).is_ok(),
            "entry {i} lost"
        );
    }
}

#[test]
fn name_limits() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    let long: String = "x".repeat(255);
    fs.create_file(id, &format!("/{long}")).unwrap();
    assert!(fs.resolve(id, &format!("/{long}")).is_ok());

    let too_long: String = "x".repeat(256);
    assert_eq!(
        Error::NameTooLong,
        fs.create_file(id, &format!("/{too_long}")).unwrap_err()
    );

    assert_eq!(Error::InvalidPath, fs.create_file(id, "/...").unwrap_err());
    assert_eq!(Error::InvalidPath, fs.create_file(id, "/a*b").unwrap_err());
    assert_eq!(Error::InvalidPath, fs.create_file(id, "/a\u{7f}b").unwrap_err());
}

#[test]
fn deleted_entries_stay_hidden() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    fs.create_file(id, "/Short Lived Entry.txt").unwrap();
    fs.create_file(id, "/keeper.txt").unwrap();
    fs.unlink(id, "/Short Lived Entry.txt").unwrap();

    assert_eq!(
        Error::NotFound,
        fs.resolve(id, "/Short Lived Entry.txt").unwrap_err()
    );
    let root = fs.root(id).unwrap();
    let names: Vec<String> = fs
        .ls(&root, 0, usize::MAX)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(vec!["keeper.txt".to_string()], names);

    // 原槽位可复用
    fs.create_file(id, "/Another Long Novel Name.txt").unwrap();
    assert!(fs.resolve(id, "/Another Long Novel Name.txt").is_ok());
}
