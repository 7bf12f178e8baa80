//! The single error sum type for the crate.
//!
//! PropWare's C++ source offsets each module's `ErrorCode` enum off of the
//! previous module's `END_ERROR` so that every error still fits in one
//! integer. We don't need that trick in Rust — one enum, namespaced by
//! variant, per DESIGN NOTES.

use core::fmt::{self, Debug};

use crate::device::{ReadError, WriteError};

/// Every way a filesystem operation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FsError<D: Debug> {
    /// A `read_block` call failed.
    DeviceRead(ReadError<D>),
    /// A `write_block` call failed.
    DeviceWrite(WriteError<D>),

    // --- Mount errors (spec.md §7 "Mount errors") ---
    FilesystemAlreadyMounted,
    FilesystemNotMounted,
    PartitionDoesNotExist,
    UnsupportedFilesystem,
    TooManyFats,
    BadSectorsPerCluster,

    // --- Structural errors ---
    /// Sentinel: not always fatal. Directory walks interpret it as "no more
    /// entries"; file reads interpret it as EOF; write paths at a cluster
    /// boundary recover by extending the chain.
    EndOfChain,
    /// A buffer's `current_cluster` was already end-of-chain when the
    /// caller tried to advance past it again.
    ReadingPastEoc,
    /// [`FatTable::extend_chain`](crate::fat::table::FatTable::extend_chain)
    /// was called on a cluster whose FAT entry was not EOC.
    InvalidFatAppend,
    /// A FAT entry that should have been allocated was unexpectedly free.
    EmptyFatEntry,
    /// [`FatTable::find_empty`](crate::fat::table::FatTable::find_empty)
    /// scanned every cluster in the volume without finding a free one.
    DiskFull,

    // --- Lookup errors ---
    FilenameNotFound,
    EntryNotFile,
    InvalidFilename,

    // --- Mode errors ---
    InvalidFileMode,
    FileWithoutBuffer,

    /// The read cursor has reached the file's length. Distinct from
    /// `EndOfChain`, which is a FAT-chain-level sentinel.
    Eof,
}

impl<D: Debug> From<ReadError<D>> for FsError<D> {
    fn from(e: ReadError<D>) -> Self {
        FsError::DeviceRead(e)
    }
}

impl<D: Debug> From<WriteError<D>> for FsError<D> {
    fn from(e: WriteError<D>) -> Self {
        FsError::DeviceWrite(e)
    }
}

cfg_if::cfg_if! {
    if #[cfg(not(feature = "no_std"))] {
        impl<D: Debug> fmt::Display for FsError<D> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:?}", self) }
        }
        impl<D: Debug> std::error::Error for FsError<D> {}
    }
}

pub type FsResult<T, D> = Result<T, FsError<D>>;
