//! `SectorBuffer`: one sector's worth of RAM mediating I/O for a single
//! logical stream (a file or a directory), so the FAT chain is walked
//! exactly once per cluster boundary and a dirty sector is written back at
//! most once.
//!
//! Grounded on the teacher crate's `fat/cache.rs` (which builds a many-slot
//! LRU cache with an eviction policy — this crate drops that machinery, see
//! DESIGN.md, and keeps only the single-buffer advance/flush protocol) and
//! `PropWare::FatFS`'s `m_buf`/`incCluster`/`loadNextSector` members.

use generic_array::GenericArray;
use log::trace;

use crate::device::BlockDevice;
use crate::error::FsError;
use crate::fat::cluster::{cluster_to_lba, ClusterEntry};
use crate::fat::table::FatTable;

/// `current_cluster` value meaning "this buffer holds a sector of the
/// FAT16 root directory", which has no cluster number of its own.
pub const FAT16_ROOT_SENTINEL: u32 = 0xFFFF_FFFF;

/// Reserved `owner_id` for the `Volume`'s shared directory-walking buffer.
/// Per-file owner ids are allocated starting at 1.
pub const FOLDER_OWNER_ID: u32 = 0;

/// The handful of geometry facts a buffer needs to compute LBAs without
/// holding a reference back to its owning `Volume`.
#[derive(Debug, Clone, Copy)]
pub struct BufferGeometry {
    pub sectors_per_cluster_shift: u8,
    pub first_data_lba: u32,
    /// FAT16 only; unused (but harmless) on FAT32.
    pub root_dir_lba: u32,
    /// FAT16 only.
    pub root_dir_sectors: u32,
}

impl BufferGeometry {
    fn cluster_to_lba(&self, cluster: u32) -> u32 {
        cluster_to_lba(self.first_data_lba, self.sectors_per_cluster_shift, cluster)
    }

    fn sectors_per_cluster(&self) -> u32 {
        1u32 << self.sectors_per_cluster_shift
    }
}

pub struct SectorBuffer<D: BlockDevice> {
    buf: GenericArray<u8, D::SectorSize>,
    owner_id: u32,
    current_cluster: u32,
    start_lba_of_current_cluster: u32,
    sector_offset_within_cluster: u8,
    next_cluster: ClusterEntry,
    dirty: bool,
    geometry: BufferGeometry,
}

impl<D: BlockDevice> SectorBuffer<D> {
    /// Seed a buffer on the FAT16 root directory's first sector.
    pub fn mount_fat16_root(
        device: &mut D,
        geometry: BufferGeometry,
        owner_id: u32,
    ) -> Result<Self, FsError<D::Error>> {
        let mut buf = GenericArray::default();
        device.read_block(geometry.root_dir_lba, &mut buf)?;
        Ok(Self {
            buf,
            owner_id,
            current_cluster: FAT16_ROOT_SENTINEL,
            start_lba_of_current_cluster: geometry.root_dir_lba,
            sector_offset_within_cluster: 0,
            next_cluster: ClusterEntry::Free,
            dirty: false,
            geometry,
        })
    }

    /// Seed a buffer on `first_cluster`'s first sector: used both for the
    /// FAT32 root directory and for any freshly opened file.
    pub fn mount_cluster(
        device: &mut D,
        fat_table: &mut FatTable<D>,
        first_cluster: u32,
        geometry: BufferGeometry,
        owner_id: u32,
    ) -> Result<Self, FsError<D::Error>> {
        let start_lba = geometry.cluster_to_lba(first_cluster);
        let mut buf = GenericArray::default();
        device.read_block(start_lba, &mut buf)?;
        let next_cluster = fat_table.value_of(device, first_cluster)?;

        Ok(Self {
            buf,
            owner_id,
            current_cluster: first_cluster,
            start_lba_of_current_cluster: start_lba,
            sector_offset_within_cluster: 0,
            next_cluster,
            dirty: false,
            geometry,
        })
    }

    pub fn owner_id(&self) -> u32 {
        self.owner_id
    }

    pub fn set_owner_id(&mut self, owner_id: u32) {
        self.owner_id = owner_id;
    }

    pub fn current_cluster(&self) -> u32 {
        self.current_cluster
    }

    pub fn set_next_cluster(&mut self, next_cluster: u32) {
        self.next_cluster = ClusterEntry::Used(next_cluster);
    }

    pub fn current_lba(&self) -> u32 {
        self.start_lba_of_current_cluster + self.sector_offset_within_cluster as u32
    }

    pub fn geometry(&self) -> BufferGeometry {
        self.geometry
    }

    pub fn bytes(&self) -> &GenericArray<u8, D::SectorSize> {
        &self.buf
    }

    pub fn bytes_mut(&mut self) -> &mut GenericArray<u8, D::SectorSize> {
        self.dirty = true;
        &mut self.buf
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Re-read whatever's at the buffer's current LBA without moving the
    /// cursor. Used when a directory operation has stolen the shared
    /// buffer out from under a file that must now reload its own sector.
    pub fn reload(&mut self, device: &mut D) -> Result<(), FsError<D::Error>> {
        self.flush(device)?;
        device.read_block(self.current_lba(), &mut self.buf)?;
        Ok(())
    }

    /// Unconditional write-back if dirty.
    pub fn flush(&mut self, device: &mut D) -> Result<(), FsError<D::Error>> {
        if self.dirty {
            trace!("SectorBuffer[{}]: flushing lba {}", self.owner_id, self.current_lba());
            device.write_block(self.current_lba(), &self.buf)?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Move to the next sector, crossing a cluster boundary via
    /// [`advance_cluster`](Self::advance_cluster) when necessary. Returns
    /// [`FsError::EndOfChain`] when the stream (file or directory) has no
    /// more sectors.
    pub fn advance_sector(
        &mut self,
        device: &mut D,
        fat_table: &mut FatTable<D>,
    ) -> Result<(), FsError<D::Error>> {
        self.flush(device)?;

        if self.current_cluster == FAT16_ROOT_SENTINEL {
            self.sector_offset_within_cluster += 1;
            if self.sector_offset_within_cluster as u32 >= self.geometry.root_dir_sectors {
                return Err(FsError::EndOfChain);
            }
            self.start_lba_of_current_cluster = self.geometry.root_dir_lba;
            device.read_block(self.current_lba(), &mut self.buf)?;
            return Ok(());
        }

        let sectors_per_cluster = self.geometry.sectors_per_cluster();
        if (self.sector_offset_within_cluster as u32) + 1 < sectors_per_cluster {
            self.sector_offset_within_cluster += 1;
            device.read_block(self.current_lba(), &mut self.buf)?;
            Ok(())
        } else {
            self.advance_cluster(device, fat_table)
        }
    }

    /// Hop to the next cluster in this stream's chain.
    pub fn advance_cluster(
        &mut self,
        device: &mut D,
        fat_table: &mut FatTable<D>,
    ) -> Result<(), FsError<D::Error>> {
        self.flush(device)?;

        // `next_cluster` was decoded (kind-aware) the last time this
        // cluster became current, and is used as-is here rather than
        // round-tripped through `encode`/`decode` again — re-encoding
        // would always emit a FAT32-width sentinel, which a FAT16 decode
        // keyed on that same raw value would then silently misread as an
        // ordinary `Used` cluster number.
        let next_cluster = match self.next_cluster {
            ClusterEntry::EndOfChain => return Err(FsError::EndOfChain),
            ClusterEntry::Used(n) => n,
            ClusterEntry::Free | ClusterEntry::Reserved | ClusterEntry::Bad => {
                return Err(FsError::EmptyFatEntry)
            }
        };
        if self.current_cluster == FAT16_ROOT_SENTINEL {
            // Advancing a FAT16-root buffer into FAT-chain territory would
            // mean the caller mixed up root-directory and data-cluster
            // addressing; nothing valid can follow.
            return Err(FsError::ReadingPastEoc);
        }

        self.current_cluster = next_cluster;
        self.next_cluster = fat_table.value_of(device, self.current_cluster)?;

        self.start_lba_of_current_cluster = self.geometry.cluster_to_lba(self.current_cluster);
        self.sector_offset_within_cluster = 0;
        device.read_block(self.current_lba(), &mut self.buf)?;
        Ok(())
    }
}
