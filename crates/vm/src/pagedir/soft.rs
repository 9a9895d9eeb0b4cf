//! 软件页目录
//!
//! 用有序表模拟硬件页表，ACCESSED / DIRTY 位由 [`SoftPageDirectory::touch`]
//! 模拟 MMU 设置。

use alloc::collections::btree_map::BTreeMap;
use sync::SpinLock;

use super::{PageDirectory, PagingError, PagingResult, PteFlags};
use crate::address::{Ppn, Vpn};

/// 纯软件实现的页目录
#[derive(Debug, Default)]
pub struct SoftPageDirectory {
    entries: SpinLock<BTreeMap<Vpn, (Ppn, PteFlags)>>,
}

impl SoftPageDirectory {
    /// 创建空页目录
    pub fn new() -> Self {
        Self {
            entries: SpinLock::new(BTreeMap::new()),
        }
    }

    /// 模拟一次 MMU 访问：设置 ACCESSED，写访问再设置 DIRTY
    ///
    /// 页面不存在时返回 [`PagingError::NotMapped`]，只读页上的写访问返回
    /// [`PagingError::InvalidAddress`]，均对应一次缺页异常。
    pub fn touch(&self, vpn: Vpn, write: bool) -> PagingResult<Ppn> {
        let mut entries = self.entries.lock();
        let (ppn, flags) = entries.get_mut(&vpn).ok_or(PagingError::NotMapped)?;
        if write && !flags.contains(PteFlags::WRITABLE) {
            return Err(PagingError::InvalidAddress);
        }
        flags.insert(PteFlags::ACCESSED);
        if write {
            flags.insert(PteFlags::DIRTY);
        }
        Ok(*ppn)
    }

    /// 当前映射数
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// 是否没有任何映射
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl PageDirectory for SoftPageDirectory {
    fn install_page(&self, vpn: Vpn, ppn: Ppn, flags: PteFlags) -> PagingResult<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&vpn) {
            return Err(PagingError::AlreadyMapped);
        }
        entries.insert(vpn, (ppn, flags | PteFlags::VALID));
        Ok(())
    }

    fn clear_page(&self, vpn: Vpn) {
        self.entries.lock().remove(&vpn);
    }

    fn get_page(&self, vpn: Vpn) -> Option<Ppn> {
        self.entries.lock().get(&vpn).map(|(ppn, _)| *ppn)
    }

    fn flags(&self, vpn: Vpn) -> Option<PteFlags> {
        self.entries.lock().get(&vpn).map(|(_, flags)| *flags)
    }

    fn update_flags(&self, vpn: Vpn, flags: PteFlags) -> PagingResult<()> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&vpn).ok_or(PagingError::NotMapped)?;
        entry.1 = flags;
        Ok(())
    }
}
