#![no_std]

extern crate alloc;

mod codepage;
mod dirent;
mod error;
mod stat;

pub use self::{
    codepage::{AsciiCodepage, Codepage},
    dirent::{DirEntry, DirEntryType},
    error::Error,
    stat::Stat,
};
