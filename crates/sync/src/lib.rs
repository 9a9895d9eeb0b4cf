//! 同步原语
//!
//! 向虚拟内存子系统提供两类锁：
//!
//! - [`Mutex`]：纯自旋互斥锁，不改变中断状态，可以在持锁期间执行块设备或文件 I/O
//!   （帧表锁、交换区锁、文件访问锁都是这一类）。
//! - [`SpinLock`]：进入临界区前保存并关闭本地中断，离开时恢复，只用于很短的临界区
//!   （物理页池位图、软件页目录、块设备注册表）。
//!
//! 两者都基于 [`lock_api`] 构建，守卫类型由 `lock_api` 提供。
//!
//! # 架构依赖
//!
//! 此 crate 通过 [`ArchOps`] trait 抽象中断控制。
//! 使用 [`SpinLock`] 前必须调用 [`register_arch_ops`] 注册实现。

#![no_std]

mod raw_spin_lock;
mod spin_lock;

pub use raw_spin_lock::RawSpinLock;
pub use spin_lock::RawIrqSpinLock;

use core::sync::atomic::{AtomicUsize, Ordering};

/// 不关中断的自旋互斥锁
pub type Mutex<T> = lock_api::Mutex<RawSpinLock, T>;
/// [`Mutex`] 的 RAII 守卫
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinLock, T>;

/// 关中断的自旋锁
pub type SpinLock<T> = lock_api::Mutex<RawIrqSpinLock, T>;
/// [`SpinLock`] 的 RAII 守卫
pub type SpinLockGuard<'a, T> = lock_api::MutexGuard<'a, RawIrqSpinLock, T>;

/// 架构相关操作的 trait
///
/// 由内核（或测试）实现并注册，提供中断控制
pub trait ArchOps: Send + Sync {
    /// 读取并禁用中断，返回之前的状态
    ///
    /// # Safety
    /// 调用者必须确保在适当的上下文中调用
    unsafe fn read_and_disable_interrupts(&self) -> usize;

    /// 恢复中断状态
    ///
    /// # Safety
    /// flags 必须是之前 read_and_disable_interrupts 返回的值
    unsafe fn restore_interrupts(&self, flags: usize);
}

/// 全局架构操作实例（存储 fat pointer 的两个部分）
static ARCH_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static ARCH_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册架构操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_arch_ops(ops: &'static dyn ArchOps) {
    let ptr = ops as *const dyn ArchOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) = unsafe { core::mem::transmute::<*const dyn ArchOps, (usize, usize)>(ptr) };
    ARCH_OPS_DATA.store(data, Ordering::Release);
    ARCH_OPS_VTABLE.store(vtable, Ordering::Release);
}

/// 获取架构操作实例
#[inline]
pub(crate) fn arch_ops() -> &'static dyn ArchOps {
    let data = ARCH_OPS_DATA.load(Ordering::Acquire);
    let vtable = ARCH_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("sync: ArchOps not registered, call register_arch_ops first");
    }
    // SAFETY: data 和 vtable 是通过 register_arch_ops 设置的有效指针
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn ArchOps>((data, vtable)) }
}
