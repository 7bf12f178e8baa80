//! A read/write FAT16/FAT32 filesystem driver over an abstract, fixed-size
//! block device.
//!
//! Mount a [`fat::Volume`] on anything implementing [`BlockDevice`], then
//! walk directories, open files, and read or write them. The core performs
//! no I/O scheduling of its own: every operation blocks on the underlying
//! device for as long as that device's `read_block`/`write_block` take.

// Mark the crate as no_std if the feature is enabled (and only)
#![cfg_attr(all(feature = "no_std", not(test)), no_std)]

#[allow(unused_extern_crates)]
extern crate core; // makes rls actually look into the standard library (hack)

#[cfg_attr(target_os = "none", panic_handler)]
#[cfg(target_os = "none")]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

pub mod device;
pub mod error;
pub mod fat;
pub mod mbr;
pub mod util;

pub use device::BlockDevice;
pub use error::{FsError, FsResult};
pub use fat::{File, OpenMode, SeekFrom, Volume};
