//! The FAT (File Allocation Table) engine: a lazily loaded, write-back cache
//! of a single FAT sector, chain traversal, free-cluster search, and
//! mirrored writes to the redundant FAT copy.
//!
//! Grounded directly on `PropWare::ReadOnlyFatFS::get_fat_value` and
//! `PropWare::FatFS::extend_fat`/`find_empty_space` (the teacher crate's own
//! `fat/table.rs` builds a different, cache-of-many-sectors abstraction —
//! see DESIGN.md) — this keeps the original's single-sector-cache shape.

use generic_array::GenericArray;
use log::{debug, trace};

use crate::device::{get_u16, get_u32, put_u16, put_u32, BlockDevice};
use crate::error::FsError;
use crate::fat::cluster::{ClusterEntry, FatKind};
use crate::fat::sector_buffer::SectorBuffer;

/// The in-RAM FAT cache plus everything needed to address it on disk.
pub struct FatTable<D: BlockDevice> {
    sector: GenericArray<u8, D::SectorSize>,
    /// The FAT-relative sector index currently cached in `sector`.
    current_fat_sector_index: u32,
    dirty: bool,

    fat_start_lba: u32,
    fat_size_sectors: u32,
    kind: FatKind,
    entries_per_sector_shift: u8,
}

impl<D: BlockDevice> FatTable<D> {
    /// Allocate the cache and load FAT sector 0.
    pub fn new(
        device: &mut D,
        fat_start_lba: u32,
        fat_size_sectors: u32,
        kind: FatKind,
    ) -> Result<Self, FsError<D::Error>> {
        let mut sector = GenericArray::default();
        device.read_block(fat_start_lba, &mut sector)?;

        let entries_per_sector_shift = kind.entries_per_sector_shift(device.sector_size());

        Ok(Self {
            sector,
            current_fat_sector_index: 0,
            dirty: false,
            fat_start_lba,
            fat_size_sectors,
            kind,
            entries_per_sector_shift,
        })
    }

    pub fn kind(&self) -> FatKind {
        self.kind
    }

    fn fat_sector_and_offset(&self, cluster: u32) -> (u32, usize) {
        let sector = cluster >> self.entries_per_sector_shift;
        let entries_per_sector = 1u32 << self.entries_per_sector_shift;
        let offset = ((cluster - (sector * entries_per_sector)) as usize)
            * (self.kind.entry_byte_width() as usize);
        (sector, offset)
    }

    /// Ensure `sector` (a FAT-relative sector index) is the one currently
    /// cached, flushing and reloading if not.
    fn ensure_sector_loaded(&mut self, device: &mut D, sector: u32) -> Result<(), FsError<D::Error>> {
        if sector != self.current_fat_sector_index {
            self.flush(device)?;
            trace!("FatTable: loading FAT sector {}", sector);
            device.read_block(self.fat_start_lba + sector, &mut self.sector)?;
            self.current_fat_sector_index = sector;
        }
        Ok(())
    }

    fn read_raw(&self, offset: usize) -> u32 {
        match self.kind {
            FatKind::Fat16 => get_u16(offset, &self.sector) as u32,
            FatKind::Fat32 => get_u32(offset, &self.sector),
        }
    }

    fn write_raw(&mut self, offset: usize, value: u32) {
        match self.kind {
            FatKind::Fat16 => put_u16(offset, &mut self.sector, value as u16),
            FatKind::Fat32 => put_u32(offset, &mut self.sector, value),
        }
    }

    /// The FAT entry for `cluster`: the next cluster in its chain, `Free`
    /// for an unallocated cluster, or `EndOfChain` for the last cluster.
    pub fn value_of(&mut self, device: &mut D, cluster: u32) -> Result<ClusterEntry, FsError<D::Error>> {
        let (sector, offset) = self.fat_sector_and_offset(cluster);
        self.ensure_sector_loaded(device, sector)?;
        Ok(ClusterEntry::decode(self.kind, self.read_raw(offset)))
    }

    /// Given a buffer whose `current_cluster` is at the end of its chain,
    /// find a free cluster, link it in, and update `buf.next_cluster`.
    ///
    /// Fails with [`FsError::InvalidFatAppend`] if `current_cluster`'s FAT
    /// entry is not actually EOC.
    pub fn extend_chain(
        &mut self,
        device: &mut D,
        buf: &mut SectorBuffer<D>,
    ) -> Result<(), FsError<D::Error>> {
        let current = buf.current_cluster();
        let (sector, offset) = self.fat_sector_and_offset(current);
        self.ensure_sector_loaded(device, sector)?;

        if !ClusterEntry::decode(self.kind, self.read_raw(offset)).is_end_of_chain() {
            return Err(FsError::InvalidFatAppend);
        }

        let new_cluster = self.find_empty(device, false)?;

        // find_empty may have moved the cache; reload the link-from sector.
        self.ensure_sector_loaded(device, sector)?;
        self.write_raw(offset, new_cluster);
        self.dirty = true;

        debug!("FatTable: extended chain: cluster {} -> {}", current, new_cluster);
        buf.set_next_cluster(new_cluster);

        Ok(())
    }

    /// Scan the FAT linearly (by sector), starting at the currently cached
    /// sector, for the first free cluster; mark it end-of-chain and return
    /// its number.
    ///
    /// On FAT32, the first 9 candidate entries of sector 0 are skipped (a
    /// commonly observed reservation for the root directory chain — see
    /// DESIGN.md's Open Questions).
    pub fn find_empty(&mut self, device: &mut D, restore_original_sector: bool) -> Result<u32, FsError<D::Error>> {
        let original_sector = self.current_fat_sector_index;
        let entries_per_sector = 1u32 << self.entries_per_sector_shift;
        let width = self.kind.entry_byte_width() as usize;

        let mut sector = self.current_fat_sector_index;
        loop {
            self.ensure_sector_loaded(device, sector)?;

            let start_entry = if sector == 0 && matches!(self.kind, FatKind::Fat32) { 9 } else { 0 };

            for entry_in_sector in start_entry..entries_per_sector {
                let offset = (entry_in_sector as usize) * width;
                if ClusterEntry::decode(self.kind, self.read_raw(offset)).is_free() {
                    self.write_raw(offset, ClusterEntry::EndOfChain.encode());
                    self.dirty = true;

                    let cluster = sector * entries_per_sector + entry_in_sector;

                    if restore_original_sector {
                        self.ensure_sector_loaded(device, original_sector)?;
                    }

                    debug!("FatTable: allocated free cluster {}", cluster);
                    return Ok(cluster);
                }
            }

            if sector + 1 >= self.fat_size_sectors {
                return Err(FsError::DiskFull);
            }
            sector += 1;
        }
    }

    /// If the cache is dirty, write it to both the primary FAT and its
    /// mirror (`fat_start_lba + fat_size_sectors` sectors further in).
    pub fn flush(&mut self, device: &mut D) -> Result<(), FsError<D::Error>> {
        if self.dirty {
            let lba = self.fat_start_lba + self.current_fat_sector_index;
            trace!("FatTable: flushing FAT sector {} (and mirror)", self.current_fat_sector_index);
            device.write_block(lba, &self.sector)?;
            device.write_block(lba + self.fat_size_sectors, &self.sector)?;
            self.dirty = false;
        }
        Ok(())
    }
}
