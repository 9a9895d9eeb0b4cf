//! 用户物理页池
//!
//! 本模块管理分配给用户页的物理内存（相当于内核的用户页池）。
//!
//! ## 分配策略（位图）
//!
//! - **bitmap**：每个 bit 表示一个物理页（0=空闲，1=已分配）
//! - **last_alloc_hint**：上次分配位置提示，利用局部性加速查找
//!
//! 单页分配从 last_alloc_hint 所在的 u64 开始循环查找第一个空闲位，
//! 释放时直接清除对应 bit。
//!
//! ## RAII：自动回收
//!
//! [`FrameTracker`] 独占一个物理页，`Drop` 时自动归还给所属的 [`UserPool`]。
//! 帧表中的每条帧记录都持有一个 `FrameTracker`，销毁记录即释放物理页。
//!
//! ## 直接映射
//!
//! 物理页的内容通过直接映射窗口访问：内核虚拟地址 = 物理地址 + `direct_map_offset`。

use alloc::sync::Arc;
use alloc::vec::Vec;
use sync::SpinLock;

use crate::address::{PAGE_SIZE, Paddr, Ppn, page_round_down, page_round_up};

// ============================================================================
// FrameTracker - 单页 RAII 封装
// ============================================================================

/// 物理页跟踪器
///
/// 当此结构体被 drop 时，它所管理的物理页会被归还给页池。
pub struct FrameTracker {
    ppn: Ppn,
    pool: Arc<UserPool>,
}

impl FrameTracker {
    /// 获取物理页号
    pub fn ppn(&self) -> Ppn {
        self.ppn
    }

    /// 获取物理地址
    pub fn paddr(&self) -> Paddr {
        self.ppn.start_addr()
    }

    /// 页内容（只读）
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: 页池保证该物理页可经直接映射访问，且被本跟踪器独占
        unsafe { core::slice::from_raw_parts(self.pool.kernel_ptr(self.ppn), PAGE_SIZE) }
    }

    /// 页内容（可写）
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: 同上，`&mut self` 保证没有其他引用
        unsafe { core::slice::from_raw_parts_mut(self.pool.kernel_ptr(self.ppn), PAGE_SIZE) }
    }

    /// 将整页清零
    pub fn zero(&mut self) {
        self.bytes_mut().fill(0);
    }
}

impl core::fmt::Debug for FrameTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("FrameTracker").field(&self.ppn).finish()
    }
}

impl Drop for FrameTracker {
    /// 自动回收物理页
    fn drop(&mut self) {
        self.pool.dealloc(self.ppn);
    }
}

// ============================================================================
// UserPool - 位图分配器
// ============================================================================

struct PoolBitmap {
    /// 位图数据（每个 bit 表示一个页：0=空闲，1=已分配）
    bitmap: Vec<u64>,
    /// 已分配页数
    allocated_count: usize,
    /// 上次分配的位置提示
    last_alloc_hint: usize,
}

/// 用户物理页池
pub struct UserPool {
    /// 起始 Ppn
    start: Ppn,
    /// 总页数
    total_frames: usize,
    /// 直接映射偏移
    direct_map_offset: usize,
    inner: SpinLock<PoolBitmap>,
}

impl UserPool {
    /// 以物理区间 `[start, end)` 创建页池
    ///
    /// 起点向上、终点向下对齐到页边界。
    ///
    /// # Safety
    /// 调用者必须保证该区间内的每个物理页都可经 `paddr + direct_map_offset`
    /// 读写，且在页池存活期间不被其他代码使用。
    pub unsafe fn new(start: Paddr, end: Paddr, direct_map_offset: usize) -> Arc<Self> {
        let start_ppn = Paddr::from_usize(page_round_up(start.as_usize())).floor();
        let end_ppn = Paddr::from_usize(page_round_down(end.as_usize())).floor();
        let total_frames = end_ppn.as_usize().saturating_sub(start_ppn.as_usize());

        Arc::new(Self {
            start: start_ppn,
            total_frames,
            direct_map_offset,
            inner: SpinLock::new(PoolBitmap {
                bitmap: alloc::vec![0u64; total_frames.div_ceil(64)],
                allocated_count: 0,
                last_alloc_hint: 0,
            }),
        })
    }

    fn kernel_ptr(&self, ppn: Ppn) -> *mut u8 {
        (ppn.start_addr().as_usize() + self.direct_map_offset) as *mut u8
    }

    /// 分配一个物理页，`zero` 为真时清零
    ///
    /// 页池耗尽时返回 `None`，由调用者（帧表）决定是否驱逐。
    pub fn alloc(self: &Arc<Self>, zero: bool) -> Option<FrameTracker> {
        let ppn = {
            let mut inner = self.inner.lock();
            let frame_idx = self.find_free(&inner)?;
            inner.bitmap[frame_idx / 64] |= 1u64 << (frame_idx % 64);
            inner.allocated_count += 1;
            inner.last_alloc_hint = frame_idx / 64;
            Ppn::from_usize(self.start.as_usize() + frame_idx)
        };

        let mut frame = FrameTracker {
            ppn,
            pool: self.clone(),
        };
        if zero {
            frame.zero();
        }
        Some(frame)
    }

    /// 从 last_alloc_hint 开始循环查找第一个空闲位
    fn find_free(&self, inner: &PoolBitmap) -> Option<usize> {
        let words = inner.bitmap.len();
        for step in 0..words {
            let idx = (inner.last_alloc_hint + step) % words;
            let word = inner.bitmap[idx];
            // 快速跳过全满的 u64
            if word == u64::MAX {
                continue;
            }
            let frame_idx = idx * 64 + (!word).trailing_zeros() as usize;
            if frame_idx < self.total_frames {
                return Some(frame_idx);
            }
        }
        None
    }

    fn dealloc(&self, ppn: Ppn) {
        debug_assert!(
            ppn >= self.start && ppn.as_usize() < self.start.as_usize() + self.total_frames,
            "user pool: frame out of range"
        );
        let frame_idx = ppn.as_usize() - self.start.as_usize();
        let mut inner = self.inner.lock();
        let mask = 1u64 << (frame_idx % 64);
        debug_assert!(
            inner.bitmap[frame_idx / 64] & mask != 0,
            "user pool: double free detected"
        );
        inner.bitmap[frame_idx / 64] &= !mask;
        inner.allocated_count -= 1;
    }

    /// 总页数
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// 已分配页数
    pub fn allocated_frames(&self) -> usize {
        self.inner.lock().allocated_count
    }

    /// 空闲页数
    pub fn free_frames(&self) -> usize {
        self.total_frames - self.allocated_frames()
    }
}

impl core::fmt::Debug for UserPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserPool")
            .field("start", &self.start)
            .field("total_frames", &self.total_frames)
            .finish()
    }
}
