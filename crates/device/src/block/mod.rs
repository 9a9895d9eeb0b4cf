//! 块设备模块
//!
//! 包含块设备驱动接口、内存模拟实现，以及按用途索引的全局块设备表。
//! 块设备按线性扇区号寻址，每个扇区 [`SECTOR_SIZE`] 字节。

mod ram_disk;

use alloc::{sync::Arc, vec::Vec};
use lazy_static::lazy_static;
use sync::SpinLock;

use crate::driver::Driver;

pub use ram_disk::RamDisk;

/// 标准扇区大小（字节）
pub const SECTOR_SIZE: usize = 512;

/// 块设备在内核中的用途
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRole {
    /// 内核映像
    Kernel,
    /// 文件系统
    FileSys,
    /// 临时数据
    Scratch,
    /// 交换区
    Swap,
}

lazy_static! {
    /// 全局块设备表，按用途登记
    static ref BLK_DEVICES: SpinLock<Vec<(BlockRole, Arc<dyn BlockDriver>)>> =
        SpinLock::new(Vec::new());
}

/// 登记一个块设备；同一用途重复登记时替换旧设备
pub fn register_block_device(role: BlockRole, dev: Arc<dyn BlockDriver>) {
    let mut devices = BLK_DEVICES.lock();
    if let Some(slot) = devices.iter_mut().find(|(r, _)| *r == role) {
        log::warn!("block: replacing device registered as {:?}", role);
        slot.1 = dev;
    } else {
        devices.push((role, dev));
    }
}

/// 查找登记为 `role` 的块设备
pub fn block_device_by_role(role: BlockRole) -> Option<Arc<dyn BlockDriver>> {
    BLK_DEVICES
        .lock()
        .iter()
        .find(|(r, _)| *r == role)
        .map(|(_, dev)| dev.clone())
}

/// 块设备驱动程序接口
pub trait BlockDriver: Driver {
    /// 读取块设备数据
    /// # 参数：
    /// * `block_id` - 扇区号
    /// * `buf` - 用于存储读取数据的缓冲区，长度必须等于 [`BlockDriver::block_size`]
    /// # 返回值：
    /// 如果读取成功则返回 true，否则返回 false
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> bool;

    /// 写入块设备数据
    /// # 参数：
    /// * `block_id` - 扇区号
    /// * `buf` - 包含要写入数据的缓冲区，长度必须等于 [`BlockDriver::block_size`]
    /// # 返回值：
    /// 如果写入成功则返回 true，否则返回 false
    fn write_block(&self, block_id: usize, buf: &[u8]) -> bool;

    /// 刷新到磁盘
    fn flush(&self) -> bool {
        true
    }

    /// 获取块大小（字节）
    fn block_size(&self) -> usize {
        SECTOR_SIZE
    }

    /// 获取总块数
    fn total_blocks(&self) -> usize;
}
