//! 关中断自旋锁
//!
//! 加锁时先保存并关闭本地中断，再获取 [`RawSpinLock`]；解锁时先释放锁标志，再恢复中断。
//! 保存的中断状态放在锁内部，只有持锁者会读写它。

use crate::arch_ops;
use crate::raw_spin_lock::RawSpinLock;
use core::sync::atomic::{AtomicUsize, Ordering};
use lock_api::RawMutex;

/// 关中断的原始自旋锁，实现 [`lock_api::RawMutex`]。
///
/// 禁用中断只能阻止本地 CPU 上的中断重入，跨 CPU 的互斥仍由内部的 [`RawSpinLock`] 保证。
#[derive(Debug)]
pub struct RawIrqSpinLock {
    inner: RawSpinLock,
    saved_flags: AtomicUsize,
}

impl RawIrqSpinLock {
    /// 创建一个未加锁的实例。
    pub const fn new() -> Self {
        RawIrqSpinLock {
            inner: RawSpinLock::new(),
            saved_flags: AtomicUsize::new(0),
        }
    }
}

impl Default for RawIrqSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawMutex for RawIrqSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawIrqSpinLock::new();

    // 中断状态属于本 CPU，守卫不能跨线程转移
    type GuardMarker = lock_api::GuardNoSend;

    fn lock(&self) {
        // SAFETY: 保存的状态在 unlock 中原样恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        self.inner.lock();
        self.saved_flags.store(flags, Ordering::Relaxed);
    }

    fn try_lock(&self) -> bool {
        // SAFETY: 获取失败时立即恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        if self.inner.try_lock() {
            self.saved_flags.store(flags, Ordering::Relaxed);
            true
        } else {
            unsafe { arch_ops().restore_interrupts(flags) };
            false
        }
    }

    unsafe fn unlock(&self) {
        let flags = self.saved_flags.load(Ordering::Relaxed);
        unsafe {
            self.inner.unlock();
            arch_ops().restore_interrupts(flags);
        }
    }

    fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}
