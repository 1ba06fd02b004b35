//! 保留区：启动扇区（BPB）与FSINFO

mod bpb;
mod fs_info;

pub use self::{
    bpb::Bpb,
    fs_info::{FsInfo, UNKNOWN},
};
