//! 按需分页的虚拟内存子系统
//!
//! 提供物理帧分配与时钟驱逐、交换区、进程补充页表、内存映射文件、
//! 缺页处理和栈增长。
//!
//! # 组成
//!
//! - [`UserPool`]：用户物理页池（位图），[`FrameTracker`] 以 RAII 方式持有一页
//! - [`FrameTable`]：全局帧表，分配失败时用时钟算法驱逐
//! - [`SwapManager`]：交换槽分配与读写
//! - [`PageTable`] / [`PageEntry`]：每进程的补充页表
//! - [`MmapTable`]：每进程的文件映射
//! - [`AddressSpace`]：加载器、陷阱处理和系统调用层的统一入口
//! - [`VmSystem`]：持有全局状态的服务对象，以 `Arc` 句柄传递
//!
//! # 外部依赖
//!
//! 通过 trait 与内核其他部分解耦：
//! - [`PageDirectory`]：硬件页表（[`SoftPageDirectory`] 是软件实现）
//! - [`VmFile`]：文件系统
//! - [`device::BlockDriver`]：交换设备
//!
//! 所有锁都来自 `sync` crate，使用前必须先调用 `sync::register_arch_ops`。

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

mod config;
mod error;
mod fault;
mod file;
mod mmap;
mod space;
mod swap;
mod system;

pub mod address;
pub mod frame_allocator;
pub mod frame_table;
pub mod page_table;
pub mod pagedir;
pub mod syscall;

#[cfg(test)]
mod tests;

pub use config::{DEFAULT_MAX_STACK_SIZE, DEFAULT_STACK_SLACK, DEFAULT_USER_TOP, VmConfig};
pub use error::{Resource, VmError, VmResult};
pub use fault::{fault_in, grow_stack, stack_growth_allowed};
pub use file::{FileLock, VmFile, read_exact_at, write_all_at};
pub use mmap::{MapId, MmapRegion, MmapTable};
pub use space::AddressSpace;
pub use swap::{SwapManager, SwapSlot};
pub use system::{VmSystem, register_vm_system, try_vm_system, vm_system};

// Re-export 常用类型
pub use address::{PAGE_SIZE, Paddr, Ppn, Vaddr, Vpn};
pub use frame_allocator::{FrameTracker, UserPool};
pub use frame_table::{FrameHandle, FrameId, FrameOwner, FrameTable};
pub use page_table::{FileBacking, PageEntry, PageEntryRef, PageKind, PageTable};
pub use pagedir::{PageDirectory, PagingError, PagingResult, PteFlags, SoftPageDirectory};
pub use syscall::{MAP_FAILED, sys_mmap, sys_munmap};
