//! `Volume`: mount/unmount/chdir, tying the FAT engine, sector buffers, and
//! directory/file operations together.
//!
//! Grounded on the teacher crate's `fat/mod.rs` (`FatFs<S>` — a stub that
//! parsed the BPB and stored raw fields but never built a FAT table, a
//! buffer, or directory walking) and `readonlyfatfs.h::mount`'s
//! step-by-step procedure, which this module's [`Volume::mount`] follows.

use core::fmt;

use generic_array::GenericArray;
use log::{debug, warn};

use crate::device::BlockDevice;
use crate::error::FsError;
use crate::fat::boot_sector::BiosParameterBlock;
use crate::fat::cluster::{cluster_to_lba, FatKind};
use crate::fat::dir::{self, FindOutcome, Name8_3};
use crate::fat::file::{File, OpenMode};
use crate::fat::sector_buffer::{BufferGeometry, SectorBuffer, FAT16_ROOT_SENTINEL, FOLDER_OWNER_ID};
use crate::fat::table::FatTable;
use crate::mbr::{self, PartitionEntry};

struct MountedState<D: BlockDevice> {
    kind: FatKind,
    geometry: BufferGeometry,
    root_cluster: u32,
    label: [u8; 8],
    fat_table: FatTable<D>,
    dir_buf: SectorBuffer<D>,
    current_dir_first_cluster: u32,
}

/// A mounted (or not-yet-mounted) FAT volume over one [`BlockDevice`].
pub struct Volume<D: BlockDevice> {
    device: D,
    state: Option<MountedState<D>>,
    next_file_id: u32,
}

impl<D: BlockDevice> Volume<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            state: None,
            next_file_id: 1,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.state.is_some()
    }

    fn state_mut(&mut self) -> Result<&mut MountedState<D>, FsError<D::Error>> {
        self.state.as_mut().ok_or(FsError::FilesystemNotMounted)
    }

    /// Mount partition `partition` (0..=3 of the MBR table, or the whole
    /// disk if LBA 0 is itself a FAT boot sector). See spec step list.
    pub fn mount(&mut self, partition: u8) -> Result<(), FsError<D::Error>> {
        if self.state.is_some() {
            return Err(FsError::FilesystemAlreadyMounted);
        }

        self.device
            .start()
            .map_err(|e| FsError::DeviceRead(crate::device::ReadError::Other(e)))?;

        let mut lba0: GenericArray<u8, D::SectorSize> = GenericArray::default();
        self.device.read_block(0, &mut lba0)?;

        let boot_sector_lba;
        let boot_sector_bytes: GenericArray<u8, D::SectorSize>;

        if mbr::lba0_is_boot_sector(&lba0) {
            if partition != 0 {
                return Err(FsError::PartitionDoesNotExist);
            }
            boot_sector_lba = 0;
            boot_sector_bytes = lba0;
        } else {
            if partition > 3 {
                return Err(FsError::PartitionDoesNotExist);
            }
            let entry = PartitionEntry::read(&lba0, partition);
            if entry.first_lba == 0 {
                return Err(FsError::PartitionDoesNotExist);
            }
            if !entry.looks_like_fat() {
                warn!("Volume::mount: partition {} type 0x{:02X} not in FAT whitelist", partition, entry.partition_type);
                return Err(FsError::UnsupportedFilesystem);
            }
            boot_sector_lba = entry.first_lba;
            let mut sector = GenericArray::default();
            self.device.read_block(boot_sector_lba, &mut sector)?;
            boot_sector_bytes = sector;
        }

        let bpb = BiosParameterBlock::read(&boot_sector_bytes);

        if bpb.num_fats != 2 {
            return Err(FsError::TooManyFats);
        }
        let sectors_per_cluster_shift = bpb
            .sectors_per_cluster_shift()
            .ok_or(FsError::BadSectorsPerCluster)?;

        let sector_size = self.device.sector_size();
        let root_dir_sectors = bpb.root_dir_sectors(sector_size);
        let reserved = bpb.reserved_sector_count as u32;
        let fat_size_sectors = bpb.fat_size_sectors();
        let num_fats = bpb.num_fats as u32;

        let total_sectors = bpb.total_sectors();
        let data_sectors = total_sectors
            .saturating_sub(reserved + num_fats * fat_size_sectors + root_dir_sectors);
        let cluster_count = data_sectors >> sectors_per_cluster_shift;

        let kind = FatKind::from_cluster_count(cluster_count).ok_or(FsError::UnsupportedFilesystem)?;

        let fat_start_lba = boot_sector_lba + reserved;

        let (root_dir_lba, first_data_lba, root_cluster) = match kind {
            FatKind::Fat16 => {
                let root_dir_lba = fat_start_lba + num_fats * fat_size_sectors;
                let first_data_lba = root_dir_lba + root_dir_sectors;
                (root_dir_lba, first_data_lba, 0)
            }
            FatKind::Fat32 => {
                let first_data_lba = fat_start_lba + num_fats * fat_size_sectors;
                let root_dir_lba = cluster_to_lba(first_data_lba, sectors_per_cluster_shift, bpb.root_cluster);
                (root_dir_lba, first_data_lba, bpb.root_cluster)
            }
        };

        let mut fat_table = FatTable::new(&mut self.device, fat_start_lba, fat_size_sectors, kind)?;

        let geometry = BufferGeometry {
            sectors_per_cluster_shift,
            first_data_lba,
            root_dir_lba,
            root_dir_sectors,
        };

        let (dir_buf, current_dir_first_cluster) = match kind {
            FatKind::Fat16 => (
                SectorBuffer::mount_fat16_root(&mut self.device, geometry, FOLDER_OWNER_ID)?,
                FAT16_ROOT_SENTINEL,
            ),
            FatKind::Fat32 => (
                SectorBuffer::mount_cluster(&mut self.device, &mut fat_table, root_cluster, geometry, FOLDER_OWNER_ID)?,
                root_cluster,
            ),
        };

        debug!("Volume::mount: {:?} volume, {} bytes/sector, {} clusters", kind, sector_size, cluster_count);

        self.state = Some(MountedState {
            kind,
            geometry,
            root_cluster,
            label: bpb.volume_label,
            fat_table,
            dir_buf,
            current_dir_first_cluster,
        });

        Ok(())
    }

    /// Flush every in-RAM buffer and the FAT, then mark the volume
    /// unmounted.
    pub fn unmount(&mut self) -> Result<(), FsError<D::Error>> {
        let mut state = self.state.take().ok_or(FsError::FilesystemNotMounted)?;
        state.dir_buf.flush(&mut self.device)?;
        state.fat_table.flush(&mut self.device)?;
        Ok(())
    }

    pub fn fat_kind(&self) -> Result<FatKind, FsError<D::Error>> {
        Ok(self.state.as_ref().ok_or(FsError::FilesystemNotMounted)?.kind)
    }

    /// The volume label, as the raw 8 space-padded ASCII bytes.
    pub fn label(&self) -> Result<[u8; 8], FsError<D::Error>> {
        Ok(self.state.as_ref().ok_or(FsError::FilesystemNotMounted)?.label)
    }

    /// The volume label with trailing spaces stripped.
    pub fn label_trimmed(&self) -> Result<&str, FsError<D::Error>> {
        let label = &self.state.as_ref().ok_or(FsError::FilesystemNotMounted)?.label;
        let len = label.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        core::str::from_utf8(&label[..len]).map_err(|_| FsError::InvalidFilename)
    }

    fn rewind_dir_buf(&mut self) -> Result<(), FsError<D::Error>> {
        let device = &mut self.device;
        let state = self.state.as_mut().ok_or(FsError::FilesystemNotMounted)?;
        // A write mode `open` may have left a freshly created entry dirty in
        // this buffer; flush it before it's replaced, or it's lost for good.
        state.dir_buf.flush(device)?;
        state.dir_buf = if state.current_dir_first_cluster == FAT16_ROOT_SENTINEL {
            SectorBuffer::mount_fat16_root(device, state.geometry, FOLDER_OWNER_ID)?
        } else {
            SectorBuffer::mount_cluster(device, &mut state.fat_table, state.current_dir_first_cluster, state.geometry, FOLDER_OWNER_ID)?
        };
        Ok(())
    }

    /// Enter a direct child of the current directory (`.`/`..` included,
    /// since both are ordinary entries every FAT subdirectory carries).
    pub fn chdir(&mut self, name: &str) -> Result<(), FsError<D::Error>> {
        let target = Name8_3::parse(name)?;
        self.rewind_dir_buf()?;

        let device = &mut self.device;
        let state = self.state.as_mut().ok_or(FsError::FilesystemNotMounted)?;
        let outcome = dir::find(device, &mut state.fat_table, &mut state.dir_buf, &target)?;

        let (lba, offset) = match outcome {
            FindOutcome::Found { lba, offset } => (lba, offset),
            FindOutcome::NotFound { .. } => return Err(FsError::FilenameNotFound),
        };
        debug_assert_eq!(lba, state.dir_buf.current_lba());

        let mut entry_bytes = [0u8; dir::ENTRY_SIZE];
        entry_bytes.copy_from_slice(&state.dir_buf.bytes()[offset as usize..offset as usize + dir::ENTRY_SIZE]);
        let view = crate::fat::dir::DirEntryView::new(&entry_bytes);
        if !view.is_directory() {
            return Err(FsError::EntryNotFile);
        }

        let entry_cluster = view.first_cluster(state.kind);
        // `0` is the on-disk convention for "this points at the root
        // directory" (chiefly `..` in a first-level subdirectory).
        state.current_dir_first_cluster = match (state.kind, entry_cluster) {
            (FatKind::Fat16, 0) => FAT16_ROOT_SENTINEL,
            (FatKind::Fat32, 0) => state.root_cluster,
            (_, c) => c,
        };

        state.dir_buf = if state.current_dir_first_cluster == FAT16_ROOT_SENTINEL {
            SectorBuffer::mount_fat16_root(device, state.geometry, FOLDER_OWNER_ID)?
        } else {
            SectorBuffer::mount_cluster(device, &mut state.fat_table, state.current_dir_first_cluster, state.geometry, FOLDER_OWNER_ID)?
        };

        Ok(())
    }

    /// Open (or create, for a write mode) a file that's a direct child of
    /// the current directory.
    pub fn open(&mut self, name: &str, mode: OpenMode) -> Result<File<D>, FsError<D::Error>> {
        let target = Name8_3::parse(name)?;
        self.rewind_dir_buf()?;

        let writable = !matches!(mode, OpenMode::Read);

        let device = &mut self.device;
        let state = self.state.as_mut().ok_or(FsError::FilesystemNotMounted)?;

        let found_at = match dir::find(device, &mut state.fat_table, &mut state.dir_buf, &target) {
            Ok(FindOutcome::Found { lba, offset }) => (lba, offset),
            Ok(FindOutcome::NotFound { offset, .. }) => {
                if !writable {
                    return Err(FsError::FilenameNotFound);
                }
                File::<D>::create_entry(
                    device,
                    &mut state.fat_table,
                    state.kind,
                    state.dir_buf.bytes_mut(),
                    offset as usize,
                    &target,
                )?;
                (state.dir_buf.current_lba(), offset)
            }
            Err(FsError::EndOfChain) => {
                if !writable {
                    return Err(FsError::FilenameNotFound);
                }
                state.fat_table.extend_chain(device, &mut state.dir_buf)?;
                state.dir_buf.advance_sector(device, &mut state.fat_table)?;
                for b in state.dir_buf.bytes_mut().iter_mut() {
                    *b = 0;
                }
                File::<D>::create_entry(device, &mut state.fat_table, state.kind, state.dir_buf.bytes_mut(), 0, &target)?;
                (state.dir_buf.current_lba(), 0)
            }
            Err(e) => return Err(e),
        };

        let (lba, offset) = found_at;
        let mut entry_bytes = [0u8; dir::ENTRY_SIZE];
        entry_bytes.copy_from_slice(&state.dir_buf.bytes()[offset as usize..offset as usize + dir::ENTRY_SIZE]);

        let id = self.next_file_id;
        self.next_file_id += 1;

        let device = &mut self.device;
        let state = self.state.as_mut().ok_or(FsError::FilesystemNotMounted)?;
        File::open_existing(
            device,
            &mut state.fat_table,
            &entry_bytes,
            lba,
            offset,
            state.kind,
            state.geometry,
            mode,
            id,
        )
    }

    /// Flush a file's buffer, write back its metadata if dirty, and flush
    /// the FAT.
    pub fn close(&mut self, file: File<D>) -> Result<(), FsError<D::Error>> {
        let device = &mut self.device;
        let state = self.state.as_mut().ok_or(FsError::FilesystemNotMounted)?;
        // `File::close` reads the directory sector straight from the device
        // to patch in the final length; flush first so it sees any entry
        // `open` just created rather than a stale pre-creation copy.
        state.dir_buf.flush(device)?;
        file.close(device, &mut state.fat_table)
    }

    pub fn read_char(&mut self, file: &mut File<D>) -> Result<u8, FsError<D::Error>> {
        let device = &mut self.device;
        let state = self.state.as_mut().ok_or(FsError::FilesystemNotMounted)?;
        file.read_char(device, &mut state.fat_table)
    }

    pub fn read(&mut self, file: &mut File<D>, out: &mut [u8]) -> Result<usize, FsError<D::Error>> {
        let device = &mut self.device;
        let state = self.state.as_mut().ok_or(FsError::FilesystemNotMounted)?;
        file.read(device, &mut state.fat_table, out)
    }

    pub fn read_line(&mut self, file: &mut File<D>, out: &mut [u8]) -> Result<usize, FsError<D::Error>> {
        let device = &mut self.device;
        let state = self.state.as_mut().ok_or(FsError::FilesystemNotMounted)?;
        file.read_line(device, &mut state.fat_table, out)
    }

    pub fn write_char(&mut self, file: &mut File<D>, byte: u8) -> Result<(), FsError<D::Error>> {
        let device = &mut self.device;
        let state = self.state.as_mut().ok_or(FsError::FilesystemNotMounted)?;
        file.write_char(device, &mut state.fat_table, byte)
    }

    pub fn write(&mut self, file: &mut File<D>, data: &[u8]) -> Result<(), FsError<D::Error>> {
        let device = &mut self.device;
        let state = self.state.as_mut().ok_or(FsError::FilesystemNotMounted)?;
        file.write(device, &mut state.fat_table, data)
    }

    pub fn seek_read(&mut self, file: &mut File<D>, from: crate::fat::file::SeekFrom) -> Result<(), FsError<D::Error>> {
        let device = &mut self.device;
        let state = self.state.as_mut().ok_or(FsError::FilesystemNotMounted)?;
        file.seek_read(device, &mut state.fat_table, from)
    }

    pub fn seek_write(&mut self, file: &mut File<D>, from: crate::fat::file::SeekFrom) -> Result<(), FsError<D::Error>> {
        let device = &mut self.device;
        let state = self.state.as_mut().ok_or(FsError::FilesystemNotMounted)?;
        file.seek_write(device, &mut state.fat_table, from)
    }

    /// Byte offset `file`'s read cursor is positioned at.
    pub fn tell_read(&self, file: &File<D>) -> u32 {
        file.tell_read()
    }

    /// Byte offset `file`'s write cursor is positioned at.
    pub fn tell_write(&self, file: &File<D>) -> u32 {
        file.tell_write()
    }

    /// Whether `file`'s read cursor has reached its length.
    pub fn eof(&self, file: &File<D>) -> bool {
        file.eof()
    }

    /// Give up the underlying device (e.g. to hand it to another `Volume`).
    /// Implicitly flushes, same as `unmount`, if currently mounted.
    pub fn into_device(mut self) -> Result<D, FsError<D::Error>> {
        if self.state.is_some() {
            self.unmount()?;
        }
        Ok(self.device)
    }
}

impl<D: BlockDevice> fmt::Debug for Volume<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            None => f.debug_struct("Volume").field("mounted", &false).finish(),
            Some(state) => f
                .debug_struct("Volume")
                .field("mounted", &true)
                .field("kind", &state.kind)
                .field("sectors_per_cluster_shift", &state.geometry.sectors_per_cluster_shift)
                .field("first_data_lba", &state.geometry.first_data_lba)
                .field("root_cluster", &state.root_cluster)
                .finish(),
        }
    }
}
