use std::path::PathBuf;

use clap::Parser;

/// 把一个宿主目录打包进新建的FAT镜像。
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// 要打包的宿主目录
    pub source: PathBuf,

    /// 镜像落在哪个目录（文件名固定为fs.img）
    pub out_dir: PathBuf,

    /// 镜像大小，MiB
    #[arg(long, default_value_t = 64)]
    pub size: u64,

    /// 文件在镜像内的投放目录
    #[arg(long, default_value = "/")]
    pub prefix: String,
}
