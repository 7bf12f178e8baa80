//! On-disk 8.3 directory entries: layout, name normalization, and the
//! directory-walking `find` procedure.
//!
//! Grounded on the teacher crate's `fat/dir.rs` (`DirEntry`/`FileName`/
//! `FileExt`/`AttributeSet`/`DirIter` — kept for the struct-per-field and
//! `from_arr`/`e!`-macro idiom; its `DirIter`/`FatEntryTracer` coupling is
//! replaced by [`SectorBuffer`]/[`FatTable`] collaboration, see DESIGN.md).

use core::convert::TryInto;

use crate::device::{get_u16, get_u32, put_u16, put_u32};
use crate::error::FsError;
use crate::fat::cluster::FatKind;
use crate::fat::sector_buffer::SectorBuffer;
use crate::fat::table::FatTable;
use crate::device::BlockDevice;

/// Bytes occupied by one directory entry.
pub const ENTRY_SIZE: usize = 32;

const NAME_OFFSET: usize = 0x00;
const NAME_LEN: usize = 11;
const ATTR_OFFSET: usize = 0x0B;
const FIRST_CLUSTER_HIGH_OFFSET: usize = 0x14;
const FIRST_CLUSTER_LOW_OFFSET: usize = 0x1A;
const LENGTH_OFFSET: usize = 0x1C;

/// Marker byte that begins a deleted entry.
const DELETED_MARKER: u8 = 0xE5;
/// Marker byte that begins the unused tail of a directory.
const END_MARKER: u8 = 0x00;
/// When byte 0 of an on-disk name is this, it stands for a literal
/// `0xE5` (KANJI lead-byte escape carried over from the original FAT spec).
const ESCAPED_DELETED_MARKER: u8 = 0x05;

pub mod attr {
    pub const READ_ONLY: u8 = 0x01;
    pub const HIDDEN: u8 = 0x02;
    pub const SYSTEM: u8 = 0x04;
    pub const VOLUME_ID: u8 = 0x08;
    pub const SUBDIRECTORY: u8 = 0x10;
    pub const ARCHIVE: u8 = 0x20;
}

/// What an entry slot currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMarker {
    /// A directory-terminating `0x00`: nothing beyond this slot is valid.
    End,
    /// `0xE5`: free, but later slots may still hold live entries.
    Deleted,
    /// An in-use entry.
    Live,
}

fn marker_of(raw: &[u8]) -> EntryMarker {
    match raw[NAME_OFFSET] {
        END_MARKER => EntryMarker::End,
        DELETED_MARKER => EntryMarker::Deleted,
        _ => EntryMarker::Live,
    }
}

/// A validated 8.3 name, normalized to uppercase, split into its 8-byte
/// name and 3-byte extension fields (space-padded, as stored on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Name8_3 {
    name: [u8; 8],
    ext: [u8; 3],
}

impl Name8_3 {
    /// Parse and validate a human-typed name like `"README.TXT"`.
    ///
    /// Rejects (`InvalidFilename`): longer than `8 + 1 + 3`, any character
    /// outside 8.3-legal ASCII, more than one `.`, or a `.` not followed by
    /// 1 to 3 characters.
    pub fn parse<D: core::fmt::Debug>(raw: &str) -> Result<Self, FsError<D>> {
        if raw.is_empty() || raw.len() > 8 + 1 + 3 {
            return Err(FsError::InvalidFilename);
        }
        if !raw.bytes().all(is_legal_8_3_byte) {
            return Err(FsError::InvalidFilename);
        }

        let mut parts = raw.splitn(3, '.');
        let stem = parts.next().unwrap_or("");
        let ext = parts.next();
        if parts.next().is_some() {
            return Err(FsError::InvalidFilename); // more than one '.'
        }
        if stem.is_empty() || stem.len() > 8 {
            return Err(FsError::InvalidFilename);
        }
        if let Some(ext) = ext {
            if ext.is_empty() || ext.len() > 3 {
                return Err(FsError::InvalidFilename);
            }
        }

        let mut name = [b' '; 8];
        for (i, b) in stem.bytes().enumerate() {
            name[i] = b.to_ascii_uppercase();
        }
        let mut ext_field = [b' '; 3];
        if let Some(ext) = ext {
            for (i, b) in ext.bytes().enumerate() {
                ext_field[i] = b.to_ascii_uppercase();
            }
        }

        Ok(Self { name, ext: ext_field })
    }

    /// Reconstruct the canonical `NAME.EXT` form of an on-disk 11-byte
    /// name field, for comparison against a parsed target. `0xE5` bytes
    /// stored as the escape value `0x05` are translated back to `0xE5`
    /// (only byte 0 ever carries the escape).
    fn canonical_from_raw(raw: &[u8; NAME_LEN]) -> ([u8; 8], [u8; 3]) {
        let mut name = [0u8; 8];
        name.copy_from_slice(&raw[0..8]);
        if name[0] == ESCAPED_DELETED_MARKER {
            name[0] = DELETED_MARKER;
        }
        let mut ext = [0u8; 3];
        ext.copy_from_slice(&raw[8..11]);
        (name, ext)
    }

    fn matches_raw(&self, raw: &[u8; NAME_LEN]) -> bool {
        let (name, ext) = Self::canonical_from_raw(raw);
        name == self.name && ext == self.ext
    }

    /// Write this name into an on-disk 11-byte name field.
    pub fn write_raw(&self, raw: &mut [u8]) {
        raw[0..8].copy_from_slice(&self.name);
        raw[8..11].copy_from_slice(&self.ext);
    }
}

fn is_legal_8_3_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || b == b'.'
        || matches!(b, b'_' | b'-' | b'$' | b'~' | b'!' | b'#' | b'%' | b'&' | b'@' | b'^' | b'(' | b')')
}

/// A read-only view of a 32-byte directory entry's fields.
pub struct DirEntryView<'a> {
    raw: &'a [u8],
}

impl<'a> DirEntryView<'a> {
    pub fn new(raw: &'a [u8]) -> Self {
        debug_assert!(raw.len() >= ENTRY_SIZE);
        Self { raw }
    }

    pub fn marker(&self) -> EntryMarker {
        marker_of(self.raw)
    }

    pub fn matches(&self, name: &Name8_3) -> bool {
        let field: &[u8; NAME_LEN] = self.raw[NAME_OFFSET..NAME_OFFSET + NAME_LEN].try_into().unwrap();
        name.matches_raw(field)
    }

    pub fn attributes(&self) -> u8 {
        self.raw[ATTR_OFFSET]
    }

    pub fn is_directory(&self) -> bool {
        use crate::util::bits::Bits;
        self.attributes().bit(4) // attr::SUBDIRECTORY == 1 << 4
    }

    pub fn first_cluster(&self, kind: FatKind) -> u32 {
        let low = get_u16(FIRST_CLUSTER_LOW_OFFSET, self.raw) as u32;
        match kind {
            FatKind::Fat16 => low,
            FatKind::Fat32 => {
                let high = get_u16(FIRST_CLUSTER_HIGH_OFFSET, self.raw) as u32;
                ((high << 16) | low) & 0x0FFF_FFFF
            }
        }
    }

    pub fn length(&self) -> u32 {
        get_u32(LENGTH_OFFSET, self.raw)
    }
}

/// A writable view of a 32-byte directory entry's fields.
pub struct DirEntryViewMut<'a> {
    raw: &'a mut [u8],
}

impl<'a> DirEntryViewMut<'a> {
    pub fn new(raw: &'a mut [u8]) -> Self {
        debug_assert!(raw.len() >= ENTRY_SIZE);
        Self { raw }
    }

    /// Zero the whole 32-byte slot: the baseline for a freshly created
    /// entry (timestamps are left undefined, per spec).
    pub fn clear(&mut self) {
        for b in self.raw[..ENTRY_SIZE].iter_mut() {
            *b = 0;
        }
    }

    pub fn set_name(&mut self, name: &Name8_3) {
        name.write_raw(&mut self.raw[NAME_OFFSET..NAME_OFFSET + NAME_LEN]);
    }

    pub fn set_attributes(&mut self, attributes: u8) {
        self.raw[ATTR_OFFSET] = attributes;
    }

    pub fn set_first_cluster(&mut self, kind: FatKind, cluster: u32) {
        put_u16(FIRST_CLUSTER_LOW_OFFSET, self.raw, cluster as u16);
        if let FatKind::Fat32 = kind {
            put_u16(FIRST_CLUSTER_HIGH_OFFSET, self.raw, (cluster >> 16) as u16);
        }
    }

    pub fn set_length(&mut self, length: u32) {
        put_u32(LENGTH_OFFSET, self.raw, length);
    }
}

/// Where a directory walk landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindOutcome {
    /// `target` was found at this sector LBA and byte offset.
    Found { lba: u32, offset: u16 },
    /// The directory's `0x00` terminator was hit at this sector LBA and
    /// byte offset: a fresh entry can be written there (space permitting).
    NotFound { lba: u32, offset: u16 },
}

/// Walk the directory currently loaded into `buf`, starting from whatever
/// sector/offset it's positioned at, looking for `target`.
///
/// `FsError::EndOfChain` if the chain runs out before a terminator is seen
/// (e.g. a FAT16 root directory with no terminator in its fixed extent).
pub fn find<D: BlockDevice>(
    device: &mut D,
    fat_table: &mut FatTable<D>,
    buf: &mut SectorBuffer<D>,
    target: &Name8_3,
) -> Result<FindOutcome, FsError<D::Error>> {
    let sector_size = device.sector_size() as usize;
    let mut offset = 0usize;

    loop {
        while offset < sector_size {
            let entry = DirEntryView::new(&buf.bytes()[offset..offset + ENTRY_SIZE]);
            match entry.marker() {
                EntryMarker::End => {
                    return Ok(FindOutcome::NotFound {
                        lba: buf.current_lba(),
                        offset: offset as u16,
                    })
                }
                EntryMarker::Deleted => {}
                EntryMarker::Live => {
                    if entry.matches(target) {
                        return Ok(FindOutcome::Found {
                            lba: buf.current_lba(),
                            offset: offset as u16,
                        });
                    }
                }
            }
            offset += ENTRY_SIZE;
        }
        buf.advance_sector(device, fat_table)?;
        offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_name() {
        let n = Name8_3::parse::<()>("readme.txt").unwrap();
        let mut raw = [0u8; 11];
        n.write_raw(&mut raw);
        assert_eq!(&raw, b"README  TXT");
    }

    #[test]
    fn parses_name_without_extension() {
        let n = Name8_3::parse::<()>("KERNEL").unwrap();
        let mut raw = [0u8; 11];
        n.write_raw(&mut raw);
        assert_eq!(&raw, b"KERNEL     ");
    }

    #[test]
    fn rejects_too_long_stem() {
        assert!(Name8_3::parse::<()>("TOOLONGNAME.TXT").is_err());
    }

    #[test]
    fn rejects_multiple_dots() {
        assert!(Name8_3::parse::<()>("A.B.C").is_err());
    }

    #[test]
    fn rejects_extension_over_three_chars() {
        assert!(Name8_3::parse::<()>("A.TOOLONG").is_err());
    }

    #[test]
    fn escaped_deleted_marker_round_trips() {
        let mut raw = [0u8; 11];
        raw[0] = ESCAPED_DELETED_MARKER;
        raw[1..8].copy_from_slice(b"LAPLAN ");
        raw[8..11].copy_from_slice(b"TXT");
        let (name, _ext) = Name8_3::canonical_from_raw(&raw);
        assert_eq!(name[0], DELETED_MARKER);
    }
}
