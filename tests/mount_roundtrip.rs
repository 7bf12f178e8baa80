//! End-to-end test driving a full mount/create/write/close/remount/read
//! cycle against an in-memory `BlockDevice`, in the style of the teacher
//! crate's `tests/file_backed.rs` (which drove a real file-backed
//! `Storage` against a pre-built disk image; this test builds its FAT16
//! image programmatically instead).

use generic_array::GenericArray;
use typenum::consts::U512;

use fatfs_core::device::{BlockDevice, ReadError, WriteError};
use fatfs_core::fat::cluster::FatKind;
use fatfs_core::{FsError, OpenMode, SeekFrom, Volume};

struct MemoryDevice {
    sectors: Vec<[u8; 512]>,
}

impl MemoryDevice {
    fn new(sector_count: usize) -> Self {
        Self {
            sectors: vec![[0u8; 512]; sector_count],
        }
    }
}

impl BlockDevice for MemoryDevice {
    type SectorSize = U512;
    type Error = core::convert::Infallible;

    fn start(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn read_block(&mut self, lba: u32, out: &mut GenericArray<u8, U512>) -> Result<(), ReadError<Self::Error>> {
        let sector = self.sectors.get(lba as usize).ok_or(ReadError::OutOfRange { lba })?;
        out.copy_from_slice(sector);
        Ok(())
    }

    fn write_block(&mut self, lba: u32, data: &GenericArray<u8, U512>) -> Result<(), WriteError<Self::Error>> {
        let sector = self.sectors.get_mut(lba as usize).ok_or(WriteError::OutOfRange { lba })?;
        sector.copy_from_slice(data);
        Ok(())
    }
}

/// A minimal, programmatically built FAT16 image: boot sector directly at
/// LBA 0 (no MBR), 1 sector/cluster, 2 FATs of 16 sectors each, a 1-sector
/// (16-entry) root directory, and exactly 4085 data clusters — the FAT16
/// floor from spec.md §3's cluster-count rule.
fn fat16_image() -> MemoryDevice {
    const RESERVED: u16 = 1;
    const NUM_FATS: u8 = 2;
    const FAT_SIZE: u16 = 16;
    const ROOT_ENTRY_COUNT: u16 = 16;
    const CLUSTER_COUNT: u32 = 4085;
    const TOTAL_SECTORS: u16 = (RESERVED as u32 + (NUM_FATS as u32) * (FAT_SIZE as u32) + 1 + CLUSTER_COUNT) as u16;

    let mut device = MemoryDevice::new(TOTAL_SECTORS as usize);

    let boot = &mut device.sectors[0];
    boot[0] = 0xEB; // boot sector jump opcode: no MBR present
    boot[0x0D] = 1; // sectors per cluster
    boot[0x0E..0x10].copy_from_slice(&RESERVED.to_le_bytes());
    boot[0x10] = NUM_FATS;
    boot[0x11..0x13].copy_from_slice(&ROOT_ENTRY_COUNT.to_le_bytes());
    boot[0x13..0x15].copy_from_slice(&TOTAL_SECTORS.to_le_bytes());
    boot[0x16..0x18].copy_from_slice(&FAT_SIZE.to_le_bytes());
    boot[0x47..0x4F].copy_from_slice(b"TESTFS  ");

    device
}

#[test]
fn mount_reports_fat16() {
    let device = fat16_image();
    let mut volume = Volume::new(device);
    volume.mount(0).unwrap();
    assert_eq!(volume.fat_kind().unwrap(), FatKind::Fat16);
    assert_eq!(volume.label_trimmed().unwrap(), "TESTFS");
}

#[test]
fn mount_twice_is_rejected() {
    let device = fat16_image();
    let mut volume = Volume::new(device);
    volume.mount(0).unwrap();
    assert!(matches!(volume.mount(0), Err(FsError::FilesystemAlreadyMounted)));
}

#[test]
fn operations_before_mount_are_rejected() {
    let device = fat16_image();
    let mut volume = Volume::new(device);
    assert!(matches!(volume.open("A.TXT", OpenMode::Read), Err(FsError::FilesystemNotMounted)));
}

#[test]
fn opening_a_missing_file_for_read_fails() {
    let device = fat16_image();
    let mut volume = Volume::new(device);
    volume.mount(0).unwrap();
    assert!(matches!(volume.open("NOPE.TXT", OpenMode::Read), Err(FsError::FilenameNotFound)));
}

#[test]
fn create_write_close_remount_read_round_trips() {
    let device = fat16_image();
    let mut volume = Volume::new(device);
    volume.mount(0).unwrap();

    let mut file = volume.open("HELLO.TXT", OpenMode::Append).unwrap();
    volume.write(&mut file, b"hello, fat16!").unwrap();
    volume.close(file).unwrap();

    volume.unmount().unwrap();

    // Hand the same backing device to a fresh Volume, as a caller would
    // after a power cycle.
    let device = volume.into_device().unwrap();
    let mut volume = Volume::new(device);
    volume.mount(0).unwrap();

    let mut file = volume.open("HELLO.TXT", OpenMode::Read).unwrap();
    assert_eq!(file.length(), b"hello, fat16!".len() as u32);

    let mut buf = [0u8; 32];
    let n = volume.read(&mut file, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello, fat16!");

    volume.close(file).unwrap();
}

#[test]
fn append_mode_continues_at_end_of_file() {
    let device = fat16_image();
    let mut volume = Volume::new(device);
    volume.mount(0).unwrap();

    let mut file = volume.open("LOG.TXT", OpenMode::Append).unwrap();
    volume.write(&mut file, b"first-").unwrap();
    volume.close(file).unwrap();

    let mut file = volume.open("LOG.TXT", OpenMode::Append).unwrap();
    volume.write(&mut file, b"second").unwrap();
    volume.close(file).unwrap();

    let mut file = volume.open("LOG.TXT", OpenMode::Read).unwrap();
    let mut buf = [0u8; 32];
    let n = volume.read(&mut file, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"first-second");
}

#[test]
fn seek_read_repositions_the_cursor() {
    let device = fat16_image();
    let mut volume = Volume::new(device);
    volume.mount(0).unwrap();

    let mut file = volume.open("DATA.TXT", OpenMode::Append).unwrap();
    volume.write(&mut file, b"0123456789").unwrap();
    volume.close(file).unwrap();

    let mut file = volume.open("DATA.TXT", OpenMode::Read).unwrap();
    volume.seek_read(&mut file, SeekFrom::Start(5)).unwrap();
    let mut buf = [0u8; 5];
    volume.read(&mut file, &mut buf).unwrap();
    assert_eq!(&buf, b"56789");
}

#[test]
fn file_spanning_many_clusters_reads_back_whole() {
    let device = fat16_image();
    let mut volume = Volume::new(device);
    volume.mount(0).unwrap();

    // One sector per cluster, so writing several kilobytes forces the FAT
    // chain to extend across many clusters.
    let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

    let mut file = volume.open("BIG.BIN", OpenMode::Append).unwrap();
    volume.write(&mut file, &payload).unwrap();
    volume.close(file).unwrap();

    let mut file = volume.open("BIG.BIN", OpenMode::Read).unwrap();
    assert_eq!(file.length(), payload.len() as u32);

    let mut read_back = vec![0u8; payload.len()];
    let n = volume.read(&mut file, &mut read_back).unwrap();
    assert_eq!(n, payload.len());
    assert_eq!(read_back, payload);
}
