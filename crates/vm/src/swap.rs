//! 交换区管理
//!
//! 交换区是一块专用块设备，被切分为页大小的槽。每个槽占
//! `PAGE_SIZE / block_size` 个连续扇区（512 字节扇区时为 8 个），
//! 内部第 `i` 个槽覆盖扇区 `i*8 .. i*8+7`。
//!
//! 槽的占用情况由位图记录。对外的槽号从 1 开始（[`SwapSlot`]），
//! 0 表示"不在交换区"，因此在类型上不可表示。
//!
//! 三个操作（换出、换入、释放）都经由同一把交换锁串行化，
//! 不同进程的并发驱逐也不会拿到同一个槽。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::num::NonZeroUsize;
use device::{BlockDriver, BlockRole, block_device_by_role};
use sync::Mutex;

use crate::address::PAGE_SIZE;
use crate::error::{Resource, VmError, VmResult};

/// 交换槽号（从 1 开始）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(NonZeroUsize);

impl SwapSlot {
    /// 由外部槽号构造；0 表示"无"，返回 `None`
    pub fn new(index: usize) -> Option<Self> {
        NonZeroUsize::new(index).map(SwapSlot)
    }

    /// 外部槽号（从 1 开始）
    pub fn index(self) -> usize {
        self.0.get()
    }

    fn internal(self) -> usize {
        self.0.get() - 1
    }

    fn from_internal(idx: usize) -> Self {
        SwapSlot(NonZeroUsize::MIN.saturating_add(idx))
    }
}

/// 交换槽位图（0=空闲，1=已用）
struct SlotBitmap {
    bits: Vec<u64>,
    slots: usize,
    used: usize,
}

impl SlotBitmap {
    fn new(slots: usize) -> Self {
        Self {
            bits: alloc::vec![0u64; slots.div_ceil(64)],
            slots,
            used: 0,
        }
    }

    fn is_used(&self, idx: usize) -> bool {
        self.bits[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    fn set(&mut self, idx: usize, used: bool) {
        let mask = 1u64 << (idx % 64);
        if used {
            self.bits[idx / 64] |= mask;
            self.used += 1;
        } else {
            self.bits[idx / 64] &= !mask;
            self.used -= 1;
        }
    }

    /// 首次适配：总是返回编号最小的空闲槽
    fn first_free(&self) -> Option<usize> {
        self.bits.iter().enumerate().find_map(|(word_idx, &word)| {
            if word == u64::MAX {
                return None;
            }
            let idx = word_idx * 64 + (!word).trailing_zeros() as usize;
            (idx < self.slots).then_some(idx)
        })
    }
}

/// 交换区管理器
pub struct SwapManager {
    device: Arc<dyn BlockDriver>,
    sectors_per_slot: usize,
    bitmap: Mutex<SlotBitmap>,
}

impl SwapManager {
    /// 在块设备 `device` 上建立交换区
    ///
    /// # Panics
    /// 设备扇区大小不能整除页大小时 panic。
    pub fn new(device: Arc<dyn BlockDriver>) -> Self {
        let sector_size = device.block_size();
        assert!(
            sector_size != 0 && PAGE_SIZE % sector_size == 0,
            "swap: sector size {} does not divide the page size",
            sector_size
        );
        let sectors_per_slot = PAGE_SIZE / sector_size;
        let slots = device.total_blocks() / sectors_per_slot;
        log::debug!(
            "swap: {} slots of {} sectors on {}",
            slots,
            sectors_per_slot,
            device.get_id()
        );
        Self {
            device,
            sectors_per_slot,
            bitmap: Mutex::new(SlotBitmap::new(slots)),
        }
    }

    /// 使用以 [`BlockRole::Swap`] 登记的块设备建立交换区
    pub fn from_registered_device() -> Option<Self> {
        block_device_by_role(BlockRole::Swap).map(Self::new)
    }

    /// 将一页内容写入一个空闲槽并返回槽号
    pub fn swap_out(&self, page: &[u8]) -> VmResult<SwapSlot> {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let mut bitmap = self.bitmap.lock();
        let idx = bitmap
            .first_free()
            .ok_or(VmError::AllocationFailure(Resource::SwapSlot))?;

        let sector_size = PAGE_SIZE / self.sectors_per_slot;
        for (i, chunk) in page.chunks_exact(sector_size).enumerate() {
            let sector = idx * self.sectors_per_slot + i;
            if !self.device.write_block(sector, chunk) {
                return Err(VmError::DeviceIo { sector });
            }
        }
        bitmap.set(idx, true);
        Ok(SwapSlot::from_internal(idx))
    }

    /// 从槽 `slot` 读回一页，并在同一临界区内释放该槽
    ///
    /// # Panics
    /// 槽未被占用时 panic：同一槽不能在再次换出前被读两次。
    pub fn swap_in(&self, slot: SwapSlot, page: &mut [u8]) -> VmResult<()> {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let idx = slot.internal();
        let mut bitmap = self.bitmap.lock();
        assert!(
            idx < bitmap.slots && bitmap.is_used(idx),
            "swap: slot {} is not in use",
            slot.index()
        );

        let sector_size = PAGE_SIZE / self.sectors_per_slot;
        for (i, chunk) in page.chunks_exact_mut(sector_size).enumerate() {
            let sector = idx * self.sectors_per_slot + i;
            if !self.device.read_block(sector, chunk) {
                return Err(VmError::DeviceIo { sector });
            }
        }
        bitmap.set(idx, false);
        Ok(())
    }

    /// 不读取内容直接释放槽（页面被丢弃而从未换入时使用）
    pub fn swap_free(&self, slot: SwapSlot) {
        let idx = slot.internal();
        let mut bitmap = self.bitmap.lock();
        if idx < bitmap.slots && bitmap.is_used(idx) {
            bitmap.set(idx, false);
        } else {
            log::warn!("swap: freeing unused slot {}", slot.index());
        }
    }

    /// 槽 `slot` 是否被占用
    pub fn is_in_use(&self, slot: SwapSlot) -> bool {
        let idx = slot.internal();
        let bitmap = self.bitmap.lock();
        idx < bitmap.slots && bitmap.is_used(idx)
    }

    /// 槽总数
    pub fn slot_count(&self) -> usize {
        self.bitmap.lock().slots
    }

    /// 已占用槽数
    pub fn used_slots(&self) -> usize {
        self.bitmap.lock().used
    }
}

impl core::fmt::Debug for SwapManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SwapManager")
            .field("device", &self.device.get_id())
            .field("sectors_per_slot", &self.sectors_per_slot)
            .finish()
    }
}
