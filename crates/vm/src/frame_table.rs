//! 帧表
//!
//! 帧表是系统中所有已分配给用户页的物理帧的全局登记处，负责：
//!
//! - 分配：从 [`UserPool`] 取页；页池耗尽时驱逐一个帧后重试（循环，不递归）
//! - 驱逐：时钟（second-chance）算法选择牺牲帧，并按 `(dirty, kind)` 处理其内容
//! - 释放：页表删除页面或解除映射时归还帧
//!
//! ## 帧记录
//!
//! 帧记录存放在带代数（generation）的槽位数组中，通过 [`FrameId`] 访问，
//! 不使用裸指针。过期的 `FrameId` 不会再命中被复用的槽位。
//!
//! 帧在分配后、填充完成前没有所有者（unbound），时钟算法会跳过这类帧；
//! 调用 [`FrameTable::bind`] 之后才可能被驱逐。
//!
//! ## 时钟
//!
//! `ring` 是所有帧的环形序列，`cursor` 指向下一个待检查的位置。
//! 移除 `ring[pos]` 时：`pos < cursor` 则游标减一，随后越界回绕到 0，
//! 因此游标始终指向被移除元素的后继。
//!
//! ## 锁
//!
//! 所有操作都持有帧表锁。驱逐时在帧表锁之下再获取页表项锁，
//! 以及文件锁或交换锁之一（二者不嵌套）。

use alloc::collections::btree_map::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use sync::Mutex;

use crate::address::{Paddr, Ppn, Vpn};
use crate::error::{Resource, VmError, VmResult};
use crate::file::{FileLock, read_exact_at, write_all_at};
use crate::frame_allocator::{FrameTracker, UserPool};
use crate::page_table::{FileBacking, PageEntry, PageEntryRef, PageKind};
use crate::pagedir::PageDirectory;
use crate::swap::SwapManager;

/// 帧记录句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    index: usize,
    generation: u32,
}

/// 新分配帧的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHandle {
    /// 帧记录
    pub id: FrameId,
    /// 物理地址
    pub paddr: Paddr,
}

impl FrameHandle {
    /// 物理页号
    pub fn ppn(&self) -> Ppn {
        self.paddr.floor()
    }
}

/// 帧的所有者：哪个页目录的哪个虚拟页正在使用它
#[derive(Clone)]
pub struct FrameOwner {
    pagedir: Arc<dyn PageDirectory>,
    entry: Weak<Mutex<PageEntry>>,
    vpn: Vpn,
}

impl FrameOwner {
    /// 创建所有者记录；帧表只保存页表项的弱引用
    pub fn new(pagedir: Arc<dyn PageDirectory>, entry: &PageEntryRef, vpn: Vpn) -> Self {
        Self {
            pagedir,
            entry: Arc::downgrade(entry),
            vpn,
        }
    }

    fn is_accessed(&self) -> bool {
        self.pagedir.is_accessed(self.vpn)
    }
}

struct FrameRecord {
    page: FrameTracker,
    owner: Option<FrameOwner>,
}

struct Slot {
    generation: u32,
    record: Option<FrameRecord>,
}

struct FrameTableInner {
    slots: Vec<Slot>,
    free_slots: Vec<usize>,
    ring: Vec<FrameId>,
    cursor: usize,
    by_ppn: BTreeMap<Ppn, FrameId>,
}

impl FrameTableInner {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            ring: Vec::new(),
            cursor: 0,
            by_ppn: BTreeMap::new(),
        }
    }

    fn register(&mut self, page: FrameTracker) -> FrameHandle {
        let ppn = page.ppn();
        let record = FrameRecord { page, owner: None };
        let id = match self.free_slots.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.record = Some(record);
                FrameId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    record: Some(record),
                });
                FrameId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };
        self.ring.push(id);
        self.by_ppn.insert(ppn, id);
        FrameHandle {
            id,
            paddr: ppn.start_addr(),
        }
    }

    fn get(&self, id: FrameId) -> Option<&FrameRecord> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.record.as_ref())
    }

    fn get_mut(&mut self, id: FrameId) -> Option<&mut FrameRecord> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.record.as_mut())
    }

    /// 从环、索引和槽位数组中移除帧记录，返回记录本身（物理页随之释放）
    fn remove(&mut self, id: FrameId) -> Option<FrameRecord> {
        let slot = self.slots.get_mut(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(id.index);
        self.by_ppn.remove(&record.page.ppn());

        if let Some(pos) = self.ring.iter().position(|&f| f == id) {
            self.ring.remove(pos);
            if pos < self.cursor {
                self.cursor -= 1;
            }
            if self.cursor >= self.ring.len() {
                self.cursor = 0;
            }
        }
        Some(record)
    }

    fn advance(&mut self) {
        self.cursor += 1;
        if self.cursor >= self.ring.len() {
            self.cursor = 0;
        }
    }

    /// 时钟扫描：返回牺牲帧，不存在可驱逐帧时返回 `None`
    ///
    /// 被访问过的帧清除 ACCESSED 位后跳过；两圈之内必然找到一个已绑定帧，
    /// 否则说明所有帧都处于填充过程中。
    fn select_victim(&mut self) -> Option<FrameId> {
        let limit = self.ring.len() * 2 + 1;
        for _ in 0..limit {
            let id = *self.ring.get(self.cursor)?;
            let reprieved = self
                .get(id)
                .and_then(|r| r.owner.as_ref())
                .map(|owner| {
                    let accessed = owner.is_accessed();
                    if accessed {
                        owner.pagedir.set_accessed(owner.vpn, false);
                    }
                    accessed
                });
            match reprieved {
                Some(false) => return Some(id),
                // 未绑定或刚被访问过
                _ => self.advance(),
            }
        }
        None
    }
}

/// 全局帧表
pub struct FrameTable {
    pool: Arc<UserPool>,
    swap: Arc<SwapManager>,
    file_lock: Arc<FileLock>,
    inner: Mutex<FrameTableInner>,
}

impl FrameTable {
    /// 在页池 `pool` 之上建立帧表
    pub fn new(pool: Arc<UserPool>, swap: Arc<SwapManager>, file_lock: Arc<FileLock>) -> Self {
        Self {
            pool,
            swap,
            file_lock,
            inner: Mutex::new(FrameTableInner::new()),
        }
    }

    /// 分配一个帧，`zero` 为真时清零
    ///
    /// 页池耗尽时驱逐一个帧后重试。新帧尚未绑定所有者，不会被驱逐。
    pub fn allocate(&self, zero: bool) -> VmResult<FrameHandle> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(page) = self.pool.alloc(zero) {
                return Ok(inner.register(page));
            }
            self.evict_locked(&mut inner)?;
        }
    }

    /// 将帧绑定到其所有者，此后该帧参与时钟扫描
    pub fn bind(&self, id: FrameId, owner: FrameOwner) -> VmResult<()> {
        let mut inner = self.inner.lock();
        let record = inner
            .get_mut(id)
            .ok_or(VmError::MissingEntry(owner.vpn.start_addr().as_usize()))?;
        record.owner = Some(owner);
        Ok(())
    }

    /// 在帧表锁下访问帧内容
    pub fn with_page<R>(&self, frame: &FrameHandle, f: impl FnOnce(&mut [u8]) -> R) -> VmResult<R> {
        let mut inner = self.inner.lock();
        let record = inner
            .get_mut(frame.id)
            .ok_or(VmError::MissingEntry(frame.paddr.as_usize()))?;
        Ok(f(record.page.bytes_mut()))
    }

    /// 访问 `pagedir` 中 `vpn` 当前驻留的帧，并按访问类型设置 ACCESSED / DIRTY 位
    ///
    /// 页面不驻留时返回 `None`。查询和访问在同一次帧表锁内完成，
    /// 期间该帧不会被驱逐。
    pub fn access_resident<R>(
        &self,
        pagedir: &dyn PageDirectory,
        vpn: Vpn,
        write: bool,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        let ppn = pagedir.get_page(vpn)?;
        let id = *inner.by_ppn.get(&ppn)?;
        let record = inner.get_mut(id)?;
        pagedir.set_accessed(vpn, true);
        if write {
            pagedir.set_dirty(vpn, true);
        }
        Some(f(record.page.bytes_mut()))
    }

    /// 释放物理地址 `paddr` 处的帧；未登记时什么也不做
    pub fn free(&self, paddr: Paddr) {
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.by_ppn.get(&paddr.floor()) {
            Self::release_locked(&mut inner, id);
        }
    }

    /// 先将脏的映射文件页写回文件，再释放帧
    ///
    /// 写回失败时帧保持原状并返回错误。
    pub fn flush_and_free(&self, paddr: Paddr) -> VmResult<()> {
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.by_ppn.get(&paddr.floor()) {
            self.flush_locked(&inner, id)?;
            Self::release_locked(&mut inner, id);
        }
        Ok(())
    }

    /// 释放 `pagedir` 中 `vpn` 当前驻留的帧，`flush` 为真时先写回脏的映射文件页
    ///
    /// 映射的查询在帧表锁内完成，不会与并发驱逐交错。返回是否释放了帧。
    pub fn release_mapping(&self, pagedir: &dyn PageDirectory, vpn: Vpn, flush: bool) -> VmResult<bool> {
        let mut inner = self.inner.lock();
        let Some(ppn) = pagedir.get_page(vpn) else {
            return Ok(false);
        };
        let Some(&id) = inner.by_ppn.get(&ppn) else {
            pagedir.clear_page(vpn);
            return Ok(false);
        };
        if flush {
            self.flush_locked(&inner, id)?;
        }
        Self::release_locked(&mut inner, id);
        // 未绑定的帧没有所有者记录
        pagedir.clear_page(vpn);
        Ok(true)
    }

    /// 驱逐一个帧
    pub fn evict(&self) -> VmResult<()> {
        let mut inner = self.inner.lock();
        self.evict_locked(&mut inner)
    }

    /// 从文件读取 `read_bytes` 字节到页面开头，其余补零
    pub fn load_file_to_page(&self, page: &mut [u8], backing: &FileBacking) -> VmResult<()> {
        let (head, tail) = page.split_at_mut(backing.read_bytes);
        read_exact_at(&self.file_lock, backing.file.as_ref(), backing.offset, head)?;
        tail.fill(0);
        Ok(())
    }

    /// 已登记的帧数
    pub fn len(&self) -> usize {
        self.inner.lock().ring.len()
    }

    /// 帧表是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 可用物理帧总数
    pub fn capacity(&self) -> usize {
        self.pool.total_frames()
    }

    /// 物理地址 `paddr` 处是否有登记的帧
    pub fn contains(&self, paddr: Paddr) -> bool {
        self.inner.lock().by_ppn.contains_key(&paddr.floor())
    }

    /// 用户页池
    pub fn pool(&self) -> &Arc<UserPool> {
        &self.pool
    }

    fn release_locked(inner: &mut FrameTableInner, id: FrameId) {
        let Some(record) = inner.remove(id) else {
            return;
        };
        if let Some(owner) = record.owner {
            owner.pagedir.clear_page(owner.vpn);
            if let Some(entry) = owner.entry.upgrade() {
                entry.lock().set_loaded(false);
            }
        }
    }

    /// 脏的映射文件页写回文件；其他页面什么也不做
    fn flush_locked(&self, inner: &FrameTableInner, id: FrameId) -> VmResult<()> {
        let Some(record) = inner.get(id) else {
            return Ok(());
        };
        let Some(owner) = record.owner.as_ref() else {
            return Ok(());
        };
        let Some(entry) = owner.entry.upgrade() else {
            return Ok(());
        };
        let entry = entry.lock();
        if entry.kind() != PageKind::Mapped || !owner.pagedir.is_dirty(owner.vpn) {
            return Ok(());
        }
        let backing = entry
            .backing()
            .ok_or(VmError::MissingEntry(owner.vpn.start_addr().as_usize()))?;
        write_all_at(
            &self.file_lock,
            backing.file.as_ref(),
            backing.offset,
            &record.page.bytes()[..backing.read_bytes],
        )
    }

    fn evict_locked(&self, inner: &mut FrameTableInner) -> VmResult<()> {
        let id = inner
            .select_victim()
            .ok_or(VmError::AllocationFailure(Resource::Frame))?;
        let Some(record) = inner.get(id) else {
            return Err(VmError::AllocationFailure(Resource::Frame));
        };
        let Some(owner) = record.owner.clone() else {
            return Err(VmError::AllocationFailure(Resource::Frame));
        };
        let Some(entry_ref) = owner.entry.upgrade() else {
            panic!("frame table: frame for page {} lost its page entry", owner.vpn);
        };

        {
            let mut entry = entry_ref.lock();
            let dirty = owner.pagedir.is_dirty(owner.vpn);
            let kind = entry.kind();
            log::debug!(
                "frame table: evicting page {} ({:?}, dirty={})",
                owner.vpn,
                kind,
                dirty
            );
            let bytes = record.page.bytes();
            match (dirty, kind) {
                (true, PageKind::Mapped) => {
                    let backing = entry
                        .backing()
                        .ok_or(VmError::MissingEntry(owner.vpn.start_addr().as_usize()))?;
                    write_all_at(
                        &self.file_lock,
                        backing.file.as_ref(),
                        backing.offset,
                        &bytes[..backing.read_bytes],
                    )?;
                }
                (true, PageKind::Binary) => {
                    let slot = self.swap.swap_out(bytes)?;
                    entry.set_swap_slot(slot);
                    entry.transition(PageKind::Swapped);
                }
                (_, PageKind::Swapped) => {
                    let slot = self.swap.swap_out(bytes)?;
                    entry.set_swap_slot(slot);
                }
                (false, PageKind::Mapped | PageKind::Binary) => {}
            }
            entry.set_loaded(false);
        }

        owner.pagedir.clear_page(owner.vpn);
        inner.remove(id);
        Ok(())
    }
}

impl core::fmt::Debug for FrameTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameTable")
            .field("frames", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
