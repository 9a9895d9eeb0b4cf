//! 原始自旋锁
//!
//! 只负责互斥，不触碰中断状态。

use core::hint;
use core::sync::atomic::{AtomicBool, Ordering};

/// 基于原子标志的原始自旋锁，实现 [`lock_api::RawMutex`]。
///
/// 不可重入：持锁时再次加锁会死锁。
#[derive(Debug)]
pub struct RawSpinLock {
    locked: AtomicBool,
}

impl RawSpinLock {
    /// 创建一个未加锁的实例。
    pub const fn new() -> Self {
        RawSpinLock {
            locked: AtomicBool::new(false),
        }
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl lock_api::RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSpinLock::new();

    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // 只读等待，避免在争用时反复写缓存行
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}
