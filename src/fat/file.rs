//! Open files: modes, cursors, and the read/write/seek/close operations.
//!
//! Grounded on the teacher crate's `fat/file.rs` (`File`/`FileWrapper` —
//! kept the two-type split in spirit as "metadata" vs. "the open handle
//! that can touch the device", dropped the `CS`/`Ev` cache-eviction
//! generics it borrowed from `fat::cache`, see DESIGN.md).

use crate::device::BlockDevice;
use crate::error::FsError;
use crate::fat::cluster::{ClusterEntry, FatKind};
use crate::fat::dir::{self, DirEntryView, DirEntryViewMut, Name8_3};
use crate::fat::sector_buffer::{BufferGeometry, SectorBuffer};
use crate::fat::table::FatTable;

/// How a file was opened; governs which operations are legal on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    ReadPlus,
    Append,
    AppendPlus,
}

impl OpenMode {
    fn writable(self) -> bool {
        matches!(self, OpenMode::ReadPlus | OpenMode::Append | OpenMode::AppendPlus)
    }

    fn readable(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadPlus | OpenMode::AppendPlus)
    }
}

/// `seek`'s origin, mirroring `fseek`'s `SEEK_SET`/`SEEK_CUR`/`SEEK_END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u32),
    Current(i64),
    End(i64),
}

/// An open file: one private [`SectorBuffer`], independent read and write
/// cursors, and the on-disk location of its own 32-byte directory entry.
pub struct File<D: BlockDevice> {
    id: u32,
    mode: OpenMode,
    buf: SectorBuffer<D>,
    kind: FatKind,
    first_cluster: u32,
    length: u32,
    max_allocated_bytes: u32,
    dir_sector_lba: u32,
    dir_entry_offset: u16,
    read_cursor: u32,
    write_cursor: u32,
    /// Which logical cursor (read or write) `buf` is currently positioned
    /// at. `None` just after construction's initial seed.
    buf_aligned_to: u32,
    metadata_dirty: bool,
}

impl<D: BlockDevice> File<D> {
    /// Open an existing file whose directory entry is already located at
    /// `(dir_sector_lba, dir_entry_offset)`.
    pub fn open_existing(
        device: &mut D,
        fat_table: &mut FatTable<D>,
        entry_bytes: &[u8],
        dir_sector_lba: u32,
        dir_entry_offset: u16,
        kind: FatKind,
        geometry: BufferGeometry,
        mode: OpenMode,
        id: u32,
    ) -> Result<Self, FsError<D::Error>> {
        let view = DirEntryView::new(entry_bytes);
        if view.is_directory() {
            return Err(FsError::EntryNotFile);
        }

        let first_cluster = view.first_cluster(kind);
        let length = view.length();
        let sector_size = device.sector_size() as u32;
        let bytes_per_cluster = sector_size << geometry.sectors_per_cluster_shift;
        // `create_entry` always allocates a first cluster up front, even for
        // a brand new zero-length file, so at least one cluster's worth of
        // space is already backing this file regardless of what `length`
        // says.
        let max_allocated_bytes = if bytes_per_cluster == 0 {
            0
        } else if length == 0 {
            bytes_per_cluster
        } else {
            ((length + bytes_per_cluster - 1) / bytes_per_cluster) * bytes_per_cluster
        };

        let buf = SectorBuffer::mount_cluster(device, fat_table, first_cluster, geometry, id)?;

        let write_cursor = match mode {
            OpenMode::Append | OpenMode::AppendPlus => length,
            OpenMode::Read | OpenMode::ReadPlus => 0,
        };

        Ok(Self {
            id,
            mode,
            buf,
            kind,
            first_cluster,
            length,
            max_allocated_bytes,
            dir_sector_lba,
            dir_entry_offset,
            read_cursor: 0,
            write_cursor,
            buf_aligned_to: 0,
            metadata_dirty: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn kind(&self) -> FatKind {
        self.kind
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Byte offset the read cursor is positioned at.
    pub fn tell_read(&self) -> u32 {
        self.read_cursor
    }

    /// Byte offset the write cursor is positioned at.
    pub fn tell_write(&self) -> u32 {
        self.write_cursor
    }

    /// Whether the read cursor has reached the file's length.
    pub fn eof(&self) -> bool {
        self.read_cursor >= self.length
    }

    fn sector_size(&self, device: &D) -> u32 {
        device.sector_size() as u32
    }

    /// Reposition `buf` so its current sector covers `target_offset`,
    /// walking the FAT chain from `first_cluster` (no fast path for "are
    /// we already there" beyond the cheap early-return below — see
    /// DESIGN.md).
    fn realign(
        &mut self,
        device: &mut D,
        fat_table: &mut FatTable<D>,
        target_offset: u32,
    ) -> Result<(), FsError<D::Error>> {
        let sector_size = self.sector_size(device);
        if target_offset / sector_size == self.buf_aligned_to / sector_size {
            return Ok(());
        }

        self.buf.flush(device)?;

        let geometry = self.buf.geometry();
        let bytes_per_cluster = sector_size << geometry.sectors_per_cluster_shift;

        let mut cluster = self.first_cluster;
        let mut remaining = target_offset;
        let mut at_allocation_edge = false;
        while remaining >= bytes_per_cluster {
            match fat_table.value_of(device, cluster)? {
                ClusterEntry::Used(next) => {
                    cluster = next;
                    remaining -= bytes_per_cluster;
                }
                ClusterEntry::EndOfChain if remaining == bytes_per_cluster => {
                    // `target_offset` sits exactly at the edge of the
                    // already allocated chain (a write cursor that caught
                    // up to the file's allocated capacity): stay on this
                    // cluster's last sector instead of erroring — the
                    // caller extends the chain from here.
                    remaining -= sector_size;
                    at_allocation_edge = true;
                    break;
                }
                _ => return Err(FsError::EndOfChain),
            }
        }
        let sectors_into_cluster = remaining / sector_size;

        self.buf = SectorBuffer::mount_cluster(device, fat_table, cluster, geometry, self.id)?;
        for _ in 0..sectors_into_cluster {
            self.buf.advance_sector(device, fat_table)?;
        }
        self.buf_aligned_to = if at_allocation_edge {
            target_offset - sector_size
        } else {
            (target_offset / sector_size) * sector_size
        };
        Ok(())
    }

    /// Absolute byte offset `from` (`SET`/`CUR`/`END`) resolves to.
    fn resolve_seek(&self, from: SeekFrom, cursor: u32) -> u32 {
        match from {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(delta) => (cursor as i64 + delta).max(0) as u32,
            SeekFrom::End(delta) => (self.length as i64 + delta).max(0) as u32,
        }
    }

    pub fn seek_read(
        &mut self,
        device: &mut D,
        fat_table: &mut FatTable<D>,
        from: SeekFrom,
    ) -> Result<(), FsError<D::Error>> {
        let target = self.resolve_seek(from, self.read_cursor);
        self.realign(device, fat_table, target)?;
        self.read_cursor = target;
        Ok(())
    }

    pub fn seek_write(
        &mut self,
        device: &mut D,
        fat_table: &mut FatTable<D>,
        from: SeekFrom,
    ) -> Result<(), FsError<D::Error>> {
        let target = self.resolve_seek(from, self.write_cursor);
        self.realign(device, fat_table, target)?;
        self.write_cursor = target;
        Ok(())
    }

    /// Read one byte and advance the read cursor. `FsError::Eof` once the
    /// cursor reaches `length`.
    pub fn read_char(&mut self, device: &mut D, fat_table: &mut FatTable<D>) -> Result<u8, FsError<D::Error>> {
        if !self.mode.readable() {
            return Err(FsError::InvalidFileMode);
        }
        if self.read_cursor >= self.length {
            return Err(FsError::Eof);
        }

        self.realign(device, fat_table, self.read_cursor)?;

        let sector_size = self.sector_size(device);
        let offset_in_sector = (self.read_cursor % sector_size) as usize;
        let byte = self.buf.bytes()[offset_in_sector];

        self.read_cursor += 1;
        self.buf_aligned_to = (self.read_cursor.saturating_sub(1) / sector_size) * sector_size;

        if self.read_cursor % sector_size == 0 && self.read_cursor < self.length {
            self.buf.advance_sector(device, fat_table)?;
            self.buf_aligned_to = self.read_cursor;
        }

        Ok(byte)
    }

    /// Fill `out` from the read cursor; stops at EOF. Returns the number of
    /// bytes actually read.
    pub fn read(
        &mut self,
        device: &mut D,
        fat_table: &mut FatTable<D>,
        out: &mut [u8],
    ) -> Result<usize, FsError<D::Error>> {
        let mut n = 0;
        while n < out.len() {
            match self.read_char(device, fat_table) {
                Ok(byte) => {
                    out[n] = byte;
                    n += 1;
                }
                Err(FsError::Eof) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(n)
    }

    /// Read a line into `out`: stops at `\n` (included) or `out.len() - 1`
    /// bytes, whichever comes first; always null-terminates the result.
    pub fn read_line(
        &mut self,
        device: &mut D,
        fat_table: &mut FatTable<D>,
        out: &mut [u8],
    ) -> Result<usize, FsError<D::Error>> {
        if out.is_empty() {
            return Ok(0);
        }
        let capacity = out.len() - 1;
        let mut n = 0;
        while n < capacity {
            match self.read_char(device, fat_table) {
                Ok(byte) => {
                    out[n] = byte;
                    n += 1;
                    if byte == b'\n' {
                        break;
                    }
                }
                Err(FsError::Eof) => break,
                Err(e) => return Err(e),
            }
        }
        out[n] = 0;
        Ok(n)
    }

    /// Write one byte at the write cursor, extending the file's chain at a
    /// cluster boundary if the file has run out of allocated sectors.
    pub fn write_char(
        &mut self,
        device: &mut D,
        fat_table: &mut FatTable<D>,
        byte: u8,
    ) -> Result<(), FsError<D::Error>> {
        if !self.mode.writable() {
            return Err(FsError::InvalidFileMode);
        }

        let sector_size = self.sector_size(device);

        if self.write_cursor == self.max_allocated_bytes {
            // The previous call filled the last allocated sector and left
            // `buf` parked there rather than crossing into unallocated
            // territory (see the trailing block below); extend the chain
            // now, directly off the already-positioned buffer, instead of
            // going through `realign`'s chain walk every time a write
            // lands on this boundary.
            fat_table.extend_chain(device, &mut self.buf)?;
            self.buf.advance_sector(device, fat_table)?;
            let geometry = self.buf.geometry();
            self.max_allocated_bytes += sector_size << geometry.sectors_per_cluster_shift;
            self.buf_aligned_to = self.write_cursor;
        } else {
            self.realign(device, fat_table, self.write_cursor)?;
        }

        let offset_in_sector = (self.write_cursor % sector_size) as usize;
        self.buf.bytes_mut()[offset_in_sector] = byte;

        self.write_cursor += 1;
        if self.write_cursor > self.length {
            self.length = self.write_cursor;
            self.metadata_dirty = true;
        }

        if self.write_cursor % sector_size == 0 {
            if self.write_cursor < self.max_allocated_bytes {
                self.buf.advance_sector(device, fat_table)?;
                self.buf_aligned_to = self.write_cursor;
            } else {
                // Just filled the last allocated sector. Defer crossing
                // the boundary until the next `write_char`'s leading
                // check above, which extends the chain first — advancing
                // now would walk straight into the chain's EOC marker.
                self.buf_aligned_to = self.write_cursor - sector_size;
            }
        } else {
            self.buf_aligned_to = (self.write_cursor / sector_size) * sector_size;
        }

        Ok(())
    }

    /// Write every byte of `data` starting at the write cursor.
    pub fn write(
        &mut self,
        device: &mut D,
        fat_table: &mut FatTable<D>,
        data: &[u8],
    ) -> Result<(), FsError<D::Error>> {
        for &byte in data {
            self.write_char(device, fat_table, byte)?;
        }
        Ok(())
    }

    /// Flush this file's buffer, write back its directory entry if dirty,
    /// and flush the FAT.
    pub fn close(mut self, device: &mut D, fat_table: &mut FatTable<D>) -> Result<(), FsError<D::Error>> {
        self.buf.flush(device)?;

        if self.metadata_dirty {
            let mut dir_sector = generic_array::GenericArray::default();
            device.read_block(self.dir_sector_lba, &mut dir_sector)?;
            {
                let entry_range = self.dir_entry_offset as usize..self.dir_entry_offset as usize + dir::ENTRY_SIZE;
                let mut view = DirEntryViewMut::new(&mut dir_sector[entry_range]);
                view.set_length(self.length);
            }
            device.write_block(self.dir_sector_lba, &dir_sector)?;
            self.metadata_dirty = false;
        }

        fat_table.flush(device)?;
        Ok(())
    }

    /// Write a fresh 8.3 entry for a new file at `entry_offset` within
    /// `dir_sector`: per spec.md §4.4.4. Returns the new file's first
    /// cluster.
    pub fn create_entry(
        device: &mut D,
        fat_table: &mut FatTable<D>,
        kind: FatKind,
        dir_sector: &mut [u8],
        entry_offset: usize,
        name: &Name8_3,
    ) -> Result<u32, FsError<D::Error>> {
        let first_cluster = fat_table.find_empty(device, false)?;

        let mut view = DirEntryViewMut::new(&mut dir_sector[entry_offset..entry_offset + dir::ENTRY_SIZE]);
        view.clear();
        view.set_name(name);
        view.set_attributes(dir::attr::ARCHIVE);
        view.set_first_cluster(kind, first_cluster);
        view.set_length(0);

        Ok(first_cluster)
    }
}
