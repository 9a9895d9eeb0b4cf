//! 架构相关操作的 Mock 实现

use std::cell::Cell;

thread_local! {
    // 每个测试线程视作一个 CPU，拥有独立的中断开关
    static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Mock 架构操作
///
/// 中断状态是线程局部的，并行运行的测试互不干扰。
pub struct MockArchOps;

impl MockArchOps {
    pub const fn new() -> Self {
        Self
    }

    /// 关闭中断并返回之前的状态（1 = 开启）
    pub fn read_and_disable_interrupts(&self) -> usize {
        INTERRUPTS_ENABLED.with(|s| s.replace(false)) as usize
    }

    /// 恢复 `read_and_disable_interrupts` 返回的状态
    pub fn restore_interrupts(&self, flags: usize) {
        INTERRUPTS_ENABLED.with(|s| s.set(flags != 0));
    }

    /// 当前线程的中断是否开启
    pub fn is_enabled(&self) -> bool {
        INTERRUPTS_ENABLED.with(|s| s.get())
    }

    /// 直接设置当前线程的中断状态
    pub fn set_enabled(&self, enabled: bool) {
        INTERRUPTS_ENABLED.with(|s| s.set(enabled));
    }
}

impl Default for MockArchOps {
    fn default() -> Self {
        Self::new()
    }
}

/// 全局 Mock 实例
pub static MOCK_ARCH_OPS: MockArchOps = MockArchOps::new();
