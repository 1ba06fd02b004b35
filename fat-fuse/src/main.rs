mod block_file;
mod cli;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::sync::Arc;

use block_dev::{BlockDevice, BLOCK_SIZE};
use clap::Parser;
use fat::{FatFileSystem, FsConfig};
use typed_bytesize::ByteSizeIec;
use vfs::{AsciiCodepage, Error};

pub use self::{block_file::BlockFile, cli::Cli};

fn main() -> io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    println!("source={:?}\nout={:?}", cli.source, cli.out_dir);

    let disk_size = ByteSizeIec::mib(cli.size).0;
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(cli.out_dir.join("fs.img"))?;
    fd.set_len(disk_size)?;

    let block_dev: Arc<dyn BlockDevice> = Arc::new(BlockFile::new(fd));
    FatFileSystem::format(&block_dev, disk_size as usize / BLOCK_SIZE).unwrap();

    let fs = FatFileSystem::new(FsConfig::default(), Arc::new(AsciiCodepage));
    let id = fs.mount(block_dev).unwrap();

    // 逐级建出投放目录
    let mut dir = String::new();
    for cmp in cli.prefix.split('/').filter(|c| !c.is_empty()) {
        dir.push('/');
        dir.push_str(cmp);
        match fs.mkdir(id, &dir) {
            Ok(_) | Err(Error::AlreadyExists) => {}
            Err(e) => panic!("mkdir {dir}: {e}"),
        }
    }
    if dir.is_empty() {
        dir.push('/');
    }

    for entry in fs::read_dir(&cli.source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry
            .file_name()
            .into_string()
            .expect("source file name is not unicode");
        log::info!("packing {name:?}");

        let mut data = Vec::new();
        File::open(entry.path())?.read_to_end(&mut data)?;

        let path = if dir == "/" {
            format!("/{name}")
        } else {
            format!("{dir}/{name}")
        };
        let inode = fs.create_file(id, &path).unwrap();
        fs.write_at(&inode, 0, &data).unwrap();
    }

    println!(
        "free space: {}",
        ByteSizeIec(fs.free_space(id).unwrap())
    );
    fs.flush(id).unwrap();
    fs.unmount(id).unwrap();

    Ok(())
}
