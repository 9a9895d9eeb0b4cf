//! 内存管理相关的 Mock 实现
//!
//! 提供一块按页对齐、生命周期为 `'static` 的宿主内存，充当"物理内存"。
//! 配合恒等直接映射（偏移为 0）使用：物理地址就是宿主指针的数值。

/// 测试使用的页大小
pub const MOCK_PAGE_SIZE: usize = 4096;

/// 模拟物理内存区域
#[derive(Debug, Clone, Copy)]
pub struct PhysArena {
    start: usize,
    pages: usize,
}

impl PhysArena {
    /// 分配 `pages` 个页的模拟物理内存
    ///
    /// 内存被有意泄漏，以便 `'static` 的帧跟踪器在测试结束前一直有效。
    pub fn new(pages: usize) -> Self {
        let buf = vec![0u8; (pages + 1) * MOCK_PAGE_SIZE].leak();
        let base = buf.as_mut_ptr() as usize;
        let start = (base + MOCK_PAGE_SIZE - 1) & !(MOCK_PAGE_SIZE - 1);
        Self { start, pages }
    }

    /// 起始地址（页对齐）
    pub fn start(&self) -> usize {
        self.start
    }

    /// 结束地址（不包含）
    pub fn end(&self) -> usize {
        self.start + self.pages * MOCK_PAGE_SIZE
    }

    /// 页数
    pub fn pages(&self) -> usize {
        self.pages
    }
}
