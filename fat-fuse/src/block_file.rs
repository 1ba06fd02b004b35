use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use block_dev::{BlockDevice, DevError, BLOCK_SIZE};
use send_wrapper::SendWrapper;

/// 把宿主机上的镜像文件当块设备用。
#[derive(Debug)]
pub struct BlockFile {
    inner: SendWrapper<RefCell<File>>,
}

impl BlockFile {
    pub fn new(fd: File) -> Self {
        Self {
            inner: SendWrapper::new(RefCell::new(fd)),
        }
    }
}

impl BlockDevice for BlockFile {
    fn read_blocks(&self, first_block: usize, buf: &mut [u8]) -> Result<(), DevError> {
        debug_assert_eq!(0, buf.len() % BLOCK_SIZE);
        let mut file = self.inner.borrow_mut();
        file.seek(SeekFrom::Start((first_block * BLOCK_SIZE) as u64))
            .map_err(|_| DevError)?;
        file.read_exact(buf).map_err(|_| DevError)
    }

    fn write_blocks(&self, first_block: usize, buf: &[u8]) -> Result<(), DevError> {
        debug_assert_eq!(0, buf.len() % BLOCK_SIZE);
        let mut file = self.inner.borrow_mut();
        file.seek(SeekFrom::Start((first_block * BLOCK_SIZE) as u64))
            .map_err(|_| DevError)?;
        file.write_all(buf).map_err(|_| DevError)
    }
}
