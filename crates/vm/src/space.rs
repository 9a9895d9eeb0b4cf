//! 进程地址空间
//!
//! [`AddressSpace`] 把一个进程的页目录、补充页表和映射表组合在一起，
//! 是加载器、陷阱处理和系统调用层进入虚拟内存子系统的入口：
//!
//! - 加载器：[`AddressSpace::load_segment`]、[`AddressSpace::setup_stack`]
//! - 陷阱处理：[`AddressSpace::handle_page_fault`]
//! - 系统调用：`mmap` / `munmap`，以及按需调页的用户内存读写
//!
//! 进程退出时先解除所有映射，再销毁页表，顺序不能颠倒。

use alloc::sync::Arc;

use crate::address::{PAGE_SIZE, Vaddr, page_offset};
use crate::error::{VmError, VmResult};
use crate::fault::{fault_in, grow_stack, stack_growth_allowed};
use crate::file::VmFile;
use crate::mmap::{MapId, MmapTable};
use crate::page_table::{FileBacking, PageEntry, PageKind, PageTable};
use crate::pagedir::PageDirectory;
use crate::system::VmSystem;

/// 进程地址空间
pub struct AddressSpace {
    page_table: PageTable,
    mmaps: MmapTable,
    torn_down: bool,
}

impl AddressSpace {
    /// 以页目录 `pagedir` 创建空地址空间
    pub fn new(system: Arc<VmSystem>, pagedir: Arc<dyn PageDirectory>) -> Self {
        Self {
            page_table: PageTable::new(system, pagedir),
            mmaps: MmapTable::new(),
            torn_down: false,
        }
    }

    /// 补充页表
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    /// 映射表
    pub fn mmaps(&self) -> &MmapTable {
        &self.mmaps
    }

    /// 页目录
    pub fn pagedir(&self) -> &Arc<dyn PageDirectory> {
        self.page_table.pagedir()
    }

    /// 所属的虚拟内存子系统
    pub fn system(&self) -> &Arc<VmSystem> {
        self.page_table.system()
    }

    /// 登记一个可执行段：从 `upage` 开始，每页一个 `Binary` 页表项
    ///
    /// 每页先从 `file` 的 `offset` 处读取至多一页，剩余部分补零；
    /// `read_bytes + zero_bytes` 必须是页大小的整数倍。内容在第一次访问时才读入。
    pub fn load_segment(
        &self,
        file: &Arc<dyn VmFile>,
        offset: usize,
        upage: usize,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> VmResult<()> {
        let total = read_bytes
            .checked_add(zero_bytes)
            .ok_or(VmError::IllegalAddress(upage))?;
        if page_offset(upage) != 0 || page_offset(total) != 0 {
            return Err(VmError::IllegalAddress(upage));
        }
        let end = upage
            .checked_add(total)
            .ok_or(VmError::IllegalAddress(upage))?;
        if end > self.system().config().user_top {
            return Err(VmError::IllegalAddress(upage));
        }

        let mut remaining = read_bytes;
        for i in 0..total / PAGE_SIZE {
            let page_read = remaining.min(PAGE_SIZE);
            let backing = FileBacking::new(
                file.clone(),
                offset + i * PAGE_SIZE,
                page_read,
                PAGE_SIZE - page_read,
            );
            let entry = PageEntry::create(
                Vaddr::from_usize(upage + i * PAGE_SIZE),
                PageKind::Binary,
                writable,
                false,
                Some(backing),
            );
            self.page_table.insert(entry)?;
            remaining -= page_read;
        }
        Ok(())
    }

    /// 安装初始栈页，返回初始栈指针
    pub fn setup_stack(&self) -> VmResult<usize> {
        let user_top = self.system().config().user_top;
        grow_stack(&self.page_table, user_top - PAGE_SIZE)?;
        Ok(user_top)
    }

    /// 处理 `addr` 处的缺页，`esp` 是用户栈指针
    ///
    /// 返回错误时调用者应终止进程。
    pub fn handle_page_fault(&self, addr: usize, esp: usize) -> VmResult<()> {
        let config = self.system().config();
        if !config.is_user_vaddr(addr) {
            log::warn!("vm: fault on kernel address {:#x}", addr);
            return Err(VmError::IllegalAddress(addr));
        }
        match self.page_table.find(Vaddr::from_usize(addr)) {
            Some(entry) => fault_in(&self.page_table, &entry),
            None if stack_growth_allowed(config, addr, esp) => grow_stack(&self.page_table, addr),
            None => {
                log::warn!("vm: illegal access at {:#x} (esp {:#x})", addr, esp);
                Err(VmError::IllegalAddress(addr))
            }
        }
    }

    /// 将 `file` 映射到 `addr`
    pub fn mmap(&mut self, file: &Arc<dyn VmFile>, addr: usize) -> VmResult<MapId> {
        let config = *self.system().config();
        self.mmaps.map(&self.page_table, &config, file, addr)
    }

    /// 解除映射 `id`
    pub fn munmap(&mut self, id: MapId) -> VmResult<()> {
        self.mmaps.unmap(&self.page_table, id)
    }

    /// 从用户地址 `va` 读取 `out.len()` 字节（跨页安全，按需调页）
    pub fn read_bytes_at(&self, va: usize, out: &mut [u8], esp: usize) -> VmResult<()> {
        let mut done = 0usize;
        while done < out.len() {
            let cur = va.checked_add(done).ok_or(VmError::IllegalAddress(va))?;
            let off = page_offset(cur);
            let take = (out.len() - done).min(PAGE_SIZE - off);
            let dst = &mut out[done..done + take];
            if self.access_page(cur, esp, false, |page| {
                dst.copy_from_slice(&page[off..off + take]);
            })? {
                done += take;
            }
        }
        Ok(())
    }

    /// 向用户地址 `va` 写入 `bytes`（跨页安全，按需调页）
    ///
    /// 写只读页返回 [`VmError::IllegalAddress`]。
    pub fn write_bytes_at(&self, va: usize, bytes: &[u8], esp: usize) -> VmResult<()> {
        let mut done = 0usize;
        while done < bytes.len() {
            let cur = va.checked_add(done).ok_or(VmError::IllegalAddress(va))?;
            let off = page_offset(cur);
            let take = (bytes.len() - done).min(PAGE_SIZE - off);
            let src = &bytes[done..done + take];
            if self.access_page(cur, esp, true, |page| {
                page[off..off + take].copy_from_slice(src);
            })? {
                done += take;
            }
        }
        Ok(())
    }

    /// 访问 `addr` 所在页；页面不驻留时调入并返回 `false`，由调用者重试
    fn access_page(
        &self,
        addr: usize,
        esp: usize,
        write: bool,
        f: impl FnOnce(&mut [u8]),
    ) -> VmResult<bool> {
        if !self.system().config().is_user_vaddr(addr) {
            return Err(VmError::IllegalAddress(addr));
        }
        let vaddr = Vaddr::from_usize(addr);
        let Some(entry) = self.page_table.find(vaddr) else {
            self.handle_page_fault(addr, esp)?;
            return Ok(false);
        };
        if write && !entry.lock().writable() {
            return Err(VmError::IllegalAddress(addr));
        }
        let frames = self.system().frames();
        match frames.access_resident(self.pagedir().as_ref(), vaddr.floor(), write, f) {
            Some(()) => Ok(true),
            None => {
                fault_in(&self.page_table, &entry)?;
                Ok(false)
            }
        }
    }

    /// 释放地址空间：解除所有映射，再销毁页表
    ///
    /// 写回失败不会中断释放，返回第一个错误。重复调用什么也不做。
    pub fn teardown(&mut self) -> VmResult<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        let result = self.mmaps.unmap_all(&self.page_table);
        self.page_table.destroy();
        result
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            log::warn!("vm: address space teardown: {}", err);
        }
    }
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("page_table", &self.page_table)
            .field("mmaps", &self.mmaps.len())
            .finish()
    }
}
