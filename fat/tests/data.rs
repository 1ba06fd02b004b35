//! 文件数据读写、簇分配与空间回收

mod common;

use vfs::Error;

use self::common::{fresh_volume, remount};

/// 8 MiB FAT16，簇1 KiB
const SECTORS: usize = 16384;
const CLUSTER: usize = 1024;

#[test]
fn cross_cluster_round_trip() {
    let (dev, fs, id) = fresh_volume(SECTORS);

    let payload: Vec<u8> = (0..3 * CLUSTER + 77).map(|i| (i * 7) as u8).collect();
    {
        let f = fs.create_file(id, "/blob.bin").unwrap();
        fs.write_at(&f, 0, &payload).unwrap();

        let stat = fs.stat(&f).unwrap();
        assert_eq!(payload.len() as u64, stat.size);
        // 4个簇，每簇2扇区
        assert_eq!(8, stat.blocks);
    }

    let (fs, id) = remount(fs, id, &dev);
    let f = fs.resolve(id, "/blob.bin").unwrap();
    let mut buf = vec![0u8; payload.len() + 100];
    let n = fs.read_at(&f, 0, &mut buf).unwrap();
    assert_eq!(payload.len(), n);
    assert_eq!(payload, buf[..n]);
}

#[test]
fn unaligned_reads_and_overwrites() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    let f = fs.create_file(id, "/t.bin").unwrap();
    fs.write_at(&f, 0, &[0xAAu8; 2 * CLUSTER]).unwrap();

    // 跨簇界改写一小段
    fs.write_at(&f, CLUSTER - 3, &[0xBB; 6]).unwrap();

    let mut buf = [0u8; 10];
    let n = fs.read_at(&f, CLUSTER - 5, &mut buf).unwrap();
    assert_eq!(10, n);
    assert_eq!([0xAA, 0xAA, 0xBB, 0xBB, 0xBB, 0xBB, 0xBB, 0xBB, 0xAA, 0xAA], buf);

    // 覆写不改尺寸
    assert_eq!(2 * CLUSTER as u64, fs.stat(&f).unwrap().size);
}

#[test]
fn read_past_eof() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    let f = fs.create_file(id, "/short.txt").unwrap();
    fs.write_at(&f, 0, b"abc").unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(3, fs.read_at(&f, 0, &mut buf).unwrap());
    assert_eq!(1, fs.read_at(&f, 2, &mut buf).unwrap());
    assert_eq!(0, fs.read_at(&f, 3, &mut buf).unwrap());
    assert_eq!(0, fs.read_at(&f, 1000, &mut buf).unwrap());
}

#[test]
fn sparse_write_reads_zero_gap() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    let f = fs.create_file(id, "/sparse.bin").unwrap();
    fs.write_at(&f, 3 * CLUSTER, b"tail").unwrap();
    assert_eq!(3 * CLUSTER as u64 + 4, fs.stat(&f).unwrap().size);

    let mut buf = vec![0xFFu8; CLUSTER];
    let n = fs.read_at(&f, CLUSTER, &mut buf).unwrap();
    assert_eq!(CLUSTER, n);
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn truncate_shrink_and_grow() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    let f = fs.create_file(id, "/t.bin").unwrap();
    fs.write_at(&f, 0, &[0x11u8; 3 * CLUSTER]).unwrap();

    fs.truncate(&f, CLUSTER / 2).unwrap();
    let stat = fs.stat(&f).unwrap();
    assert_eq!(CLUSTER as u64 / 2, stat.size);
    assert_eq!(2, stat.blocks);

    // 加长部分读出来全零
    fs.truncate(&f, 2 * CLUSTER).unwrap();
    let mut buf = vec![0xFFu8; CLUSTER];
    let n = fs.read_at(&f, CLUSTER, &mut buf).unwrap();
    assert_eq!(CLUSTER, n);
    assert!(buf.iter().all(|&b| b == 0));

    fs.truncate(&f, 0).unwrap();
    let stat = fs.stat(&f).unwrap();
    assert_eq!(0, stat.size);
    assert_eq!(0, stat.blocks);
}

#[test]
fn free_space_accounting() {
    let (_dev, fs, id) = fresh_volume(SECTORS);
    let before = fs.free_space(id).unwrap();

    {
        let f = fs.create_file(id, "/big.bin").unwrap();
        fs.write_at(&f, 0, &vec![0u8; 10 * CLUSTER]).unwrap();
    }
    let used = before - fs.free_space(id).unwrap();
    assert_eq!(10 * CLUSTER as u64, used);

    fs.unlink(id, "/big.bin").unwrap();
    assert_eq!(before, fs.free_space(id).unwrap());
}

#[test]
fn data_ops_reject_directories() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    let d = fs.mkdir(id, "/d").unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(Error::IsADirectory, fs.read_at(&d, 0, &mut buf).unwrap_err());
    assert_eq!(Error::IsADirectory, fs.write_at(&d, 0, b"x").unwrap_err());
    assert_eq!(Error::IsADirectory, fs.truncate(&d, 0).unwrap_err());
}

#[test]
fn reallocated_clusters_read_zero() {
    let (_dev, fs, id) = fresh_volume(SECTORS);

    {
        let old = fs.create_file(id, "/old.bin").unwrap();
        fs.write_at(&old, 0, &vec![0x11u8; 2 * CLUSTER]).unwrap();
    }
    fs.unlink(id, "/old.bin").unwrap();

    // 新文件吃回刚释放的簇，旧租户的字节不许漏出来
    let new = fs.create_file(id, "/new.bin").unwrap();
    fs.truncate(&new, 2 * CLUSTER).unwrap();

    let mut buf = vec![0xEEu8; 2 * CLUSTER];
    assert_eq!(2 * CLUSTER, fs.read_at(&new, 0, &mut buf).unwrap());
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn concurrent_files_make_progress() {
    let (_dev, fs, id) = fresh_volume(SECTORS);
    let fs = std::sync::Arc::new(fs);

    let workers: Vec<_> = (0..4u8)
        .map(|n| {
            let fs = std::sync::Arc::clone(&fs);
            std::thread::spawn(move || {
                let path = format!("/worker{n}.bin");
                let file = fs.create_file(id, &path).unwrap();
                let payload = vec![n; 3 * CLUSTER];
                assert_eq!(payload.len(), fs.write_at(&file, 0, &payload).unwrap());

                let mut buf = vec![0u8; payload.len()];
                assert_eq!(buf.len(), fs.read_at(&file, 0, &mut buf).unwrap());
                assert_eq!(payload, buf);
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn volume_fills_up() {
    // 故意选个小卷：64 KiB FAT12
    let (_dev, fs, id) = fresh_volume(128);

    let free = fs.free_space(id).unwrap() as usize;
    {
        let f = fs.create_file(id, "/fill.bin").unwrap();
        fs.write_at(&f, 0, &vec![0u8; free]).unwrap();
        assert_eq!(Error::NoSpace, fs.write_at(&f, free, &[0u8; 1]).unwrap_err());
    }
    assert_eq!(0, fs.free_space(id).unwrap());

    fs.unlink(id, "/fill.bin").unwrap();
    assert_eq!(free as u64, fs.free_space(id).unwrap());
}
