//! 内存模拟块设备

use super::{BlockDriver, SECTOR_SIZE};
use crate::driver::{DeviceType, Driver};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use sync::Mutex;

/// 内存模拟的块设备
///
/// 用于测试和开发；记录读写的扇区数，便于断言 I/O 行为。
pub struct RamDisk {
    /// 存储数据
    data: Mutex<Vec<u8>>,

    /// 块大小
    block_size: usize,

    /// 设备 ID
    device_id: usize,

    sectors_read: AtomicUsize,
    sectors_written: AtomicUsize,
    fail_reads: AtomicBool,
}

impl RamDisk {
    /// 创建含 `sectors` 个标准扇区的内存磁盘
    pub fn with_sectors(sectors: usize, device_id: usize) -> Arc<Self> {
        Self::new(sectors * SECTOR_SIZE, SECTOR_SIZE, device_id)
    }

    /// 创建指定大小的内存磁盘
    pub fn new(size: usize, block_size: usize, device_id: usize) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(vec![0u8; size]),
            block_size,
            device_id,
            sectors_read: AtomicUsize::new(0),
            sectors_written: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
        })
    }

    /// 获取原始数据（用于调试）
    pub fn raw_data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// 获取设备 ID
    pub fn device_id(&self) -> usize {
        self.device_id
    }

    /// 已读扇区数
    pub fn sectors_read(&self) -> usize {
        self.sectors_read.load(Ordering::Relaxed)
    }

    /// 已写扇区数
    pub fn sectors_written(&self) -> usize {
        self.sectors_written.load(Ordering::Relaxed)
    }

    /// 打开后所有读请求都失败，用于模拟坏盘
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    fn range_of(&self, block_id: usize, len: usize, disk_len: usize) -> Option<(usize, usize)> {
        if len != self.block_size {
            return None;
        }
        let offset = block_id.checked_mul(self.block_size)?;
        let end = offset.checked_add(self.block_size)?;
        (end <= disk_len).then_some((offset, end))
    }
}

impl Driver for RamDisk {
    fn device_type(&self) -> DeviceType {
        DeviceType::Block
    }

    fn get_id(&self) -> String {
        alloc::format!("ramdisk_{}", self.device_id)
    }

    fn as_block(&self) -> Option<&dyn BlockDriver> {
        Some(self)
    }
}

impl BlockDriver for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> bool {
        if self.fail_reads.load(Ordering::Relaxed) {
            return false;
        }
        let data = self.data.lock();
        let Some((start, end)) = self.range_of(block_id, buf.len(), data.len()) else {
            return false;
        };
        buf.copy_from_slice(&data[start..end]);
        self.sectors_read.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> bool {
        let mut data = self.data.lock();
        let Some((start, end)) = self.range_of(block_id, buf.len(), data.len()) else {
            return false;
        };
        data[start..end].copy_from_slice(buf);
        self.sectors_written.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn total_blocks(&self) -> usize {
        self.data.lock().len() / self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockRole, block_device_by_role, register_block_device};
    use core::sync::atomic::{AtomicUsize, Ordering};
    use sync::ArchOps;
    use test_support::mock::arch::MOCK_ARCH_OPS;

    struct DummyArchOps;

    impl ArchOps for DummyArchOps {
        unsafe fn read_and_disable_interrupts(&self) -> usize {
            MOCK_ARCH_OPS.read_and_disable_interrupts()
        }

        unsafe fn restore_interrupts(&self, flags: usize) {
            MOCK_ARCH_OPS.restore_interrupts(flags)
        }
    }

    static DUMMY_ARCH_OPS: DummyArchOps = DummyArchOps;
    // 0 = uninit, 1 = initializing, 2 = ready
    static SYNC_INIT: AtomicUsize = AtomicUsize::new(0);

    fn init_sync_arch_ops() {
        match SYNC_INIT.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                // Safety: tests use a single global dummy ArchOps.
                unsafe { sync::register_arch_ops(&DUMMY_ARCH_OPS) };
                SYNC_INIT.store(2, Ordering::Release);
            }
            Err(_) => {
                while SYNC_INIT.load(Ordering::Acquire) != 2 {
                    core::hint::spin_loop();
                }
            }
        }
    }

    #[test]
    fn test_ramdisk_read_write_roundtrip() {
        let rd = RamDisk::with_sectors(8, 1);
        assert_eq!(rd.block_size(), SECTOR_SIZE);
        assert_eq!(rd.total_blocks(), 8);

        let mut wbuf = [0u8; SECTOR_SIZE];
        wbuf[0] = 0xAA;
        wbuf[SECTOR_SIZE - 1] = 0x55;
        assert!(rd.write_block(3, &wbuf));

        let mut rbuf = [0u8; SECTOR_SIZE];
        assert!(rd.read_block(3, &mut rbuf));
        assert_eq!(rbuf, wbuf);

        // Other sectors remain zero.
        let mut rbuf2 = [0u8; SECTOR_SIZE];
        assert!(rd.read_block(2, &mut rbuf2));
        assert_eq!(rbuf2, [0u8; SECTOR_SIZE]);

        assert_eq!(rd.sectors_written(), 1);
        assert_eq!(rd.sectors_read(), 2);
    }

    #[test]
    fn test_ramdisk_bounds_and_wrong_buf_size() {
        let rd = RamDisk::with_sectors(2, 1);
        assert_eq!(rd.total_blocks(), 2);

        let mut bad_read = [0u8; 16];
        assert!(!rd.read_block(0, &mut bad_read));

        let bad_write = [0u8; 16];
        assert!(!rd.write_block(0, &bad_write));

        let mut ok_read = [0u8; SECTOR_SIZE];
        assert!(!rd.read_block(2, &mut ok_read)); // out of range
        assert!(!rd.read_block(usize::MAX, &mut ok_read));

        let ok_write = [0u8; SECTOR_SIZE];
        assert!(!rd.write_block(2, &ok_write)); // out of range

        assert_eq!(rd.sectors_read(), 0);
        assert_eq!(rd.sectors_written(), 0);
    }

    #[test]
    fn test_ramdisk_failed_reads() {
        let rd = RamDisk::with_sectors(2, 1);
        let mut buf = [0u8; SECTOR_SIZE];
        rd.set_fail_reads(true);
        assert!(!rd.read_block(0, &mut buf));
        assert!(rd.write_block(0, &buf));
        rd.set_fail_reads(false);
        assert!(rd.read_block(0, &mut buf));
        assert_eq!(rd.sectors_read(), 1);
    }

    #[test]
    fn test_register_block_device_by_role() {
        init_sync_arch_ops();
        assert!(block_device_by_role(BlockRole::Scratch).is_none());

        let swap = RamDisk::with_sectors(16, 7);
        register_block_device(BlockRole::Swap, swap);
        let found = block_device_by_role(BlockRole::Swap).unwrap();
        assert_eq!(found.get_id(), "ramdisk_7");
        assert_eq!(found.total_blocks(), 16);

        // 同一用途重新登记会替换旧设备
        register_block_device(BlockRole::Swap, RamDisk::with_sectors(32, 8));
        assert_eq!(block_device_by_role(BlockRole::Swap).unwrap().total_blocks(), 32);
    }
}
