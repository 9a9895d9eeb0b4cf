//! 补充页表模块
//!
//! 每个进程一张 [`PageTable`]，以页对齐的虚拟页号为键记录该进程所有
//! 虚拟页的 [`PageEntry`]。硬件可见的映射由 [`PageDirectory`] 维护，
//! 页表项只有通过页目录（`get_page`）才能找到自己的物理帧。
//!
//! 页表项的生命周期：
//!
//! - 创建：加载可执行段、建立 mmap、栈增长
//! - 修改：缺页调入、驱逐
//! - 销毁：解除映射或进程退出，恰好释放一次其帧和交换槽

mod entry;

pub use entry::*;

use alloc::sync::Arc;
use alloc::vec::Vec;
use hashbrown::HashMap;
use sync::Mutex;

use crate::address::{Vaddr, Vpn};
use crate::error::{Resource, VmError, VmResult};
use crate::pagedir::PageDirectory;
use crate::system::VmSystem;

/// 进程的补充页表
pub struct PageTable {
    system: Arc<VmSystem>,
    pagedir: Arc<dyn PageDirectory>,
    entries: Mutex<HashMap<Vpn, PageEntryRef>>,
}

impl PageTable {
    /// 创建空页表，`pagedir` 是同一进程的硬件页目录
    pub fn new(system: Arc<VmSystem>, pagedir: Arc<dyn PageDirectory>) -> Self {
        Self {
            system,
            pagedir,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 所属的虚拟内存子系统
    pub fn system(&self) -> &Arc<VmSystem> {
        &self.system
    }

    /// 进程的硬件页目录
    pub fn pagedir(&self) -> &Arc<dyn PageDirectory> {
        &self.pagedir
    }

    /// 插入页表项
    ///
    /// 键已存在时返回 [`VmError::DuplicateMapping`]，不会覆盖已有项；
    /// 表无法增长时返回 [`VmError::AllocationFailure`]。
    pub fn insert(&self, entry: PageEntryRef) -> VmResult<()> {
        let vpn = entry.lock().vpn();
        let mut entries = self.entries.lock();
        if entries.contains_key(&vpn) {
            return Err(VmError::DuplicateMapping(vpn.start_addr().as_usize()));
        }
        entries
            .try_reserve(1)
            .map_err(|_| VmError::AllocationFailure(Resource::Metadata))?;
        entries.insert(vpn, entry);
        Ok(())
    }

    /// 查找覆盖 `vaddr` 的页表项
    pub fn find(&self, vaddr: Vaddr) -> Option<PageEntryRef> {
        self.entries.lock().get(&vaddr.floor()).cloned()
    }

    /// 删除页表项，释放其驻留帧和交换槽
    ///
    /// 只有 `entry` 本身仍在表中时才会删除；返回是否删除。
    pub fn delete(&self, entry: &PageEntryRef) -> bool {
        let vpn = entry.lock().vpn();
        {
            let mut entries = self.entries.lock();
            let present = entries
                .get(&vpn)
                .is_some_and(|current| Arc::ptr_eq(current, entry));
            if !present {
                return false;
            }
            entries.remove(&vpn);
        }
        self.release(entry);
        true
    }

    /// 释放所有页表项；可重复调用
    pub fn destroy(&self) {
        let drained: Vec<PageEntryRef> = self.entries.lock().drain().map(|(_, e)| e).collect();
        if !drained.is_empty() {
            log::debug!("page table: releasing {} pages", drained.len());
        }
        for entry in &drained {
            self.release(entry);
        }
    }

    /// 页表项数
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// 页表是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// `[start, start + pages)` 内是否有任何页已有页表项
    pub fn contains_range(&self, start: Vpn, pages: usize) -> bool {
        let entries = self.entries.lock();
        (0..pages).any(|i| entries.contains_key(&start.add(i)))
    }

    /// 先释放帧（帧表锁下完成查询），再释放交换槽
    fn release(&self, entry: &PageEntryRef) {
        let vpn = entry.lock().vpn();
        if let Err(err) = self
            .system
            .frames()
            .release_mapping(self.pagedir.as_ref(), vpn, false)
        {
            log::warn!("page table: failed to release frame of page {}: {}", vpn, err);
        }
        let slot = entry.lock().take_swap_slot();
        if let Some(slot) = slot {
            self.system.swap().swap_free(slot);
        }
    }
}

impl Drop for PageTable {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl core::fmt::Debug for PageTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTable")
            .field("entries", &self.len())
            .finish()
    }
}
