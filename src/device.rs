//! The `BlockDevice` contract the rest of the crate is built on.
//!
//! This is the one piece of the original source left entirely abstract — the
//! reference hardware is an SD card over SPI, but nothing here assumes that.

use core::fmt::Debug;

use generic_array::{ArrayLength, GenericArray};
use typenum::marker_traits::Unsigned;

/// Errors returned by [`BlockDevice::write_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum WriteError<T> {
    /// `lba` was outside of the device's sector range.
    OutOfRange { lba: u32 },
    Other(T),
}

impl<T> From<T> for WriteError<T> {
    fn from(other: T) -> Self {
        WriteError::Other(other)
    }
}

/// Errors returned by [`BlockDevice::read_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ReadError<T> {
    /// `lba` was outside of the device's sector range.
    OutOfRange { lba: u32 },
    Other(T),
}

impl<T> From<T> for ReadError<T> {
    fn from(other: T) -> Self {
        ReadError::Other(other)
    }
}

cfg_if::cfg_if! {
    if #[cfg(not(feature = "no_std"))] {
        use std::fmt;

        impl<T: Debug> fmt::Display for WriteError<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:?}", self) }
        }
        impl<T: Debug> fmt::Display for ReadError<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:?}", self) }
        }
        impl<T: Debug> std::error::Error for WriteError<T> {}
        impl<T: Debug> std::error::Error for ReadError<T> {}
    }
}

/// A fixed-size-sector block-addressable storage device.
///
/// Implementors provide access to a partition (or whole disk) on some
/// sector-based storage medium; the reference implementation is an SD card
/// driven over SPI, but any medium that can read/write a fixed-size sector
/// at a given LBA works (a RAM disk, a flat file, flash, ...).
pub trait BlockDevice {
    /// The device's sector size, as a typenum so that sector buffers are
    /// sized at compile time. 512 (`typenum::U512`) is by far the most
    /// common value.
    #[allow(non_camel_case_types)]
    type SectorSize: ArrayLength<u8> + Unsigned;

    type Error: Debug;

    /// Bring the device online (e.g. issue SD `CMD0`/`CMD8`/`ACMD41`).
    /// Must be idempotent: called once per [`mount`](crate::fat::volume::Volume::mount).
    fn start(&mut self) -> Result<(), Self::Error>;

    /// Read one sector into `out`.
    fn read_block(
        &mut self,
        lba: u32,
        out: &mut GenericArray<u8, Self::SectorSize>,
    ) -> Result<(), ReadError<Self::Error>>;

    /// Write one sector from `data`.
    fn write_block(
        &mut self,
        lba: u32,
        data: &GenericArray<u8, Self::SectorSize>,
    ) -> Result<(), WriteError<Self::Error>>;

    /// Sector size in bytes (e.g. 512). A constant per device.
    #[inline]
    fn sector_size(&self) -> u16 {
        Self::SectorSize::to_u16()
    }

    /// `log2(sector_size())`; used as a shift everywhere a byte offset needs
    /// converting to/from a sector count.
    #[inline]
    fn sector_size_shift(&self) -> u8 {
        Self::SectorSize::to_u32().trailing_zeros() as u8
    }
}

/// Little-endian accessor: a single byte at `offset`.
#[inline]
pub fn get_u8(offset: usize, buf: &[u8]) -> u8 {
    buf[offset]
}

/// Little-endian accessor: a `u16` at `offset`.
#[inline]
pub fn get_u16(offset: usize, buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Little-endian accessor: a `u32` at `offset`.
#[inline]
pub fn get_u32(offset: usize, buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Little-endian mutator: write a `u16` at `offset`.
#[inline]
pub fn put_u16(offset: usize, buf: &mut [u8], val: u16) {
    let bytes = val.to_le_bytes();
    buf[offset] = bytes[0];
    buf[offset + 1] = bytes[1];
}

/// Little-endian mutator: write a `u32` at `offset`.
#[inline]
pub fn put_u32(offset: usize, buf: &mut [u8], val: u32) {
    let bytes = val.to_le_bytes();
    buf[offset..offset + 4].copy_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn le_roundtrip() {
        let mut buf = [0u8; 8];
        put_u16(0, &mut buf, 0xABCD);
        put_u32(2, &mut buf, 0xDEAD_BEEF);
        assert_eq!(get_u16(0, &buf), 0xABCD);
        assert_eq!(get_u32(2, &buf), 0xDEAD_BEEF);
    }
}
