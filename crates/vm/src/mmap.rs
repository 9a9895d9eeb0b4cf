//! 内存映射文件
//!
//! 每个进程一张 [`MmapTable`]，记录它建立的所有文件映射。映射按页创建
//! `Mapped` 类型的页表项，内容在第一次访问时才从文件读入；脏页在驱逐或
//! 解除映射时写回文件。

use alloc::collections::btree_map::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::address::{PAGE_SIZE, Vaddr, Vpn};
use crate::config::VmConfig;
use crate::error::{VmError, VmResult};
use crate::file::VmFile;
use crate::page_table::{FileBacking, PageEntry, PageEntryRef, PageKind, PageTable};

/// 映射编号，进程内从 1 开始单调递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapId(usize);

impl MapId {
    /// 由编号构造
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// 编号
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

/// 一个文件映射
pub struct MmapRegion {
    file: Arc<dyn VmFile>,
    base: Vpn,
    entries: Vec<PageEntryRef>,
}

impl MmapRegion {
    /// 映射的起始页
    pub fn base(&self) -> Vpn {
        self.base
    }

    /// 映射的页数
    pub fn pages(&self) -> usize {
        self.entries.len()
    }

    /// 映射所用的文件句柄（重新打开得到，与原描述符无关）
    pub fn file(&self) -> &Arc<dyn VmFile> {
        &self.file
    }
}

impl core::fmt::Debug for MmapRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MmapRegion")
            .field("file", &"<dyn VmFile>")
            .field("base", &self.base)
            .field("pages", &self.entries.len())
            .finish()
    }
}

/// 进程的映射表
#[derive(Debug)]
pub struct MmapTable {
    next_id: usize,
    regions: BTreeMap<MapId, MmapRegion>,
}

impl Default for MmapTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MmapTable {
    /// 创建空映射表
    pub fn new() -> Self {
        Self {
            next_id: 1,
            regions: BTreeMap::new(),
        }
    }

    /// 将 `file` 映射到 `addr`
    ///
    /// `addr` 必须非零、页对齐，整个映射必须落在用户空间内且不与已有页重叠。
    /// 空文件无法映射。
    pub fn map(
        &mut self,
        page_table: &PageTable,
        config: &VmConfig,
        file: &Arc<dyn VmFile>,
        addr: usize,
    ) -> VmResult<MapId> {
        let vaddr = Vaddr::from_usize(addr);
        if addr == 0 || !vaddr.is_page_aligned() {
            return Err(VmError::IllegalAddress(addr));
        }
        let len = file.len();
        if len == 0 {
            return Err(VmError::IllegalAddress(addr));
        }
        let pages = len.div_ceil(PAGE_SIZE);
        let end = addr
            .checked_add(pages * PAGE_SIZE)
            .ok_or(VmError::IllegalAddress(addr))?;
        if end > config.user_top {
            return Err(VmError::IllegalAddress(addr));
        }
        let base = vaddr.floor();
        if page_table.contains_range(base, pages) {
            return Err(VmError::DuplicateMapping(addr));
        }

        let file = file.reopen().map_err(|_| VmError::MissingEntry(addr))?;
        let mut entries = Vec::with_capacity(pages);
        for i in 0..pages {
            let offset = i * PAGE_SIZE;
            let read_bytes = (len - offset).min(PAGE_SIZE);
            let backing = FileBacking::new(file.clone(), offset, read_bytes, PAGE_SIZE - read_bytes);
            let entry = PageEntry::create(
                base.add(i).start_addr(),
                PageKind::Mapped,
                true,
                false,
                Some(backing),
            );
            page_table.insert(entry.clone())?;
            entries.push(entry);
        }

        let id = MapId(self.next_id);
        self.next_id += 1;
        self.regions.insert(id, MmapRegion { file, base, entries });
        log::debug!("mmap: id {} maps {} pages at {}", id.0, pages, base);
        Ok(id)
    }

    /// 解除映射 `id`；未知编号什么也不做
    ///
    /// 驻留且脏的页先写回文件。某页写回失败时其余页面照常解除，
    /// 返回第一个错误。
    pub fn unmap(&mut self, page_table: &PageTable, id: MapId) -> VmResult<()> {
        let Some(region) = self.regions.remove(&id) else {
            return Ok(());
        };
        let frames = page_table.system().frames();
        let mut result = Ok(());
        for entry in &region.entries {
            let vpn = entry.lock().vpn();
            if let Err(err) = frames.release_mapping(page_table.pagedir().as_ref(), vpn, true) {
                log::error!("mmap: write back of page {} failed: {}", vpn, err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
            page_table.delete(entry);
        }
        log::debug!("mmap: id {} unmapped", id.0);
        result
    }

    /// 解除所有映射（进程退出时使用）
    pub fn unmap_all(&mut self, page_table: &PageTable) -> VmResult<()> {
        let ids: Vec<MapId> = self.regions.keys().copied().collect();
        let mut result = Ok(());
        for id in ids {
            if let Err(err) = self.unmap(page_table, id) {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    /// 查找映射
    pub fn get(&self, id: MapId) -> Option<&MmapRegion> {
        self.regions.get(&id)
    }

    /// 映射数
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// 是否没有任何映射
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
