//! 测试用的稀疏内存盘：没写过的块读出来全零，
//! 大卷（FAT32）也不占多少内存。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use block_dev::{BlockDevice, DevError, BLOCK_SIZE};
use fat::{DriveId, FatFileSystem, FsConfig};
use vfs::AsciiCodepage;

pub struct RamDisk {
    blocks: Mutex<HashMap<usize, Box<[u8; BLOCK_SIZE]>>>,
}

impl RamDisk {
    pub fn new() -> Arc<dyn BlockDevice> {
        Arc::new(Self {
            blocks: Mutex::new(HashMap::new()),
        })
    }
}

impl BlockDevice for RamDisk {
    fn read_blocks(&self, first_block: usize, buf: &mut [u8]) -> Result<(), DevError> {
        assert_eq!(0, buf.len() % BLOCK_SIZE);
        let blocks = self.blocks.lock().unwrap();
        for (i, chunk) in buf.chunks_exact_mut(BLOCK_SIZE).enumerate() {
            match blocks.get(&(first_block + i)) {
                Some(block) => chunk.copy_from_slice(&block[..]),
                None => chunk.fill(0),
            }
        }
        Ok(())
    }

    fn write_blocks(&self, first_block: usize, buf: &[u8]) -> Result<(), DevError> {
        assert_eq!(0, buf.len() % BLOCK_SIZE);
        let mut blocks = self.blocks.lock().unwrap();
        for (i, chunk) in buf.chunks_exact(BLOCK_SIZE).enumerate() {
            let mut block = Box::new([0u8; BLOCK_SIZE]);
            block.copy_from_slice(chunk);
            blocks.insert(first_block + i, block);
        }
        Ok(())
    }
}

/// 格式化一块新内存盘并挂载。
pub fn fresh_volume(sectors: usize) -> (Arc<dyn BlockDevice>, FatFileSystem, DriveId) {
    let dev = RamDisk::new();
    FatFileSystem::format(&dev, sectors).unwrap();

    let fs = FatFileSystem::new(FsConfig::default(), Arc::new(AsciiCodepage));
    let id = fs.mount(Arc::clone(&dev)).unwrap();
    (dev, fs, id)
}

/// 卸载再重挂，模拟断电前落盘后的重启。
pub fn remount(
    fs: FatFileSystem,
    id: DriveId,
    dev: &Arc<dyn BlockDevice>,
) -> (FatFileSystem, DriveId) {
    fs.unmount(id).unwrap();
    let fs = FatFileSystem::new(FsConfig::default(), Arc::new(AsciiCodepage));
    let id = fs.mount(Arc::clone(dev)).unwrap();
    (fs, id)
}
