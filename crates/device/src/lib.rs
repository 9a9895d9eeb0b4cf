//! 设备驱动框架（块设备部分）
//!
//! 虚拟内存子系统只通过块设备与外界交换数据：
//!
//! - [`Driver`] trait - 设备驱动基础接口
//! - [`BlockDriver`] trait - 以扇区为单位读写的块设备接口
//! - [`RamDisk`] - 内存模拟块设备
//! - [`register_block_device`] / [`block_device_by_role`] - 按用途登记和查找块设备
//!   （交换区设备以 [`BlockRole::Swap`] 登记）

#![no_std]
#![allow(clippy::module_inception)]

extern crate alloc;

pub mod block;
pub mod driver;

// Re-export driver
pub use driver::{DeviceType, Driver};

// Re-export block
pub use block::{
    BlockDriver, BlockRole, RamDisk, SECTOR_SIZE, block_device_by_role, register_block_device,
};
