//! 页目录模块
//!
//! 页目录是硬件可见的映射（虚拟页 → 物理页 + 标志位），由 MMU 在访问时设置
//! ACCESSED / DIRTY 位。本模块只定义虚拟内存核心需要的最小接口：
//!
//! - 安装 / 清除映射（`install_page` / `clear_page`）
//! - 查询映射的物理页（`get_page`）
//! - 读写 ACCESSED / DIRTY 位（时钟算法与脏页写回）
//!
//! 具体实现由架构代码提供；[`SoftPageDirectory`] 是纯软件模型，供宿主机和测试使用。
//!
//! 一个页目录会被其地址空间和帧表（驱逐时）同时访问，因此所有方法都接收 `&self`，
//! 由实现自行保证内部可变性。

mod soft;

pub use soft::SoftPageDirectory;

use crate::address::{Ppn, Vpn};

bitflags::bitflags! {
    /// 页目录项标志位
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u8 {
        /// 映射有效
        const VALID = 1 << 0;
        /// 可写
        const WRITABLE = 1 << 1;
        /// 用户态可访问
        const USER = 1 << 2;
        /// 自上次清除以来被访问过
        const ACCESSED = 1 << 3;
        /// 自安装以来被写过
        const DIRTY = 1 << 4;
    }
}

impl PteFlags {
    /// 用户页的标志位
    pub fn user(writable: bool) -> Self {
        let mut flags = PteFlags::VALID | PteFlags::USER;
        if writable {
            flags |= PteFlags::WRITABLE;
        }
        flags
    }
}

/// 页目录操作中可能发生的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// 虚拟地址未被映射
    NotMapped,
    /// 虚拟地址已被映射
    AlreadyMapped,
    /// 提供了无效的地址
    InvalidAddress,
    /// 页目录自身的存储耗尽
    OutOfMemory,
}

/// 页目录操作的结果类型
pub type PagingResult<T> = Result<T, PagingError>;

/// 页目录接口
///
/// 此 trait 定义了虚拟内存核心对硬件页表的全部需求，由具体架构实现。
pub trait PageDirectory: Send + Sync {
    /// 建立 `vpn → ppn` 映射；若 `vpn` 已有映射则返回 [`PagingError::AlreadyMapped`]
    fn install_page(&self, vpn: Vpn, ppn: Ppn, flags: PteFlags) -> PagingResult<()>;

    /// 清除 `vpn` 的映射；未映射时什么也不做
    fn clear_page(&self, vpn: Vpn);

    /// 查询 `vpn` 当前映射的物理页
    fn get_page(&self, vpn: Vpn) -> Option<Ppn>;

    /// 读取 `vpn` 的标志位
    fn flags(&self, vpn: Vpn) -> Option<PteFlags>;

    /// 覆盖 `vpn` 的标志位
    fn update_flags(&self, vpn: Vpn, flags: PteFlags) -> PagingResult<()>;

    /// 页面自上次清除后是否被访问
    fn is_accessed(&self, vpn: Vpn) -> bool {
        self.flags(vpn)
            .is_some_and(|f| f.contains(PteFlags::ACCESSED))
    }

    /// 设置或清除 ACCESSED 位；未映射时忽略
    fn set_accessed(&self, vpn: Vpn, accessed: bool) {
        set_flag(self, vpn, PteFlags::ACCESSED, accessed);
    }

    /// 页面是否被写过
    fn is_dirty(&self, vpn: Vpn) -> bool {
        self.flags(vpn).is_some_and(|f| f.contains(PteFlags::DIRTY))
    }

    /// 设置或清除 DIRTY 位；未映射时忽略
    fn set_dirty(&self, vpn: Vpn, dirty: bool) {
        set_flag(self, vpn, PteFlags::DIRTY, dirty);
    }
}

fn set_flag<D: PageDirectory + ?Sized>(dir: &D, vpn: Vpn, flag: PteFlags, on: bool) {
    let Some(mut flags) = dir.flags(vpn) else {
        return;
    };
    flags.set(flag, on);
    match dir.update_flags(vpn, flags) {
        // 映射在读取标志位之后被清除，没有页可标记
        Ok(()) | Err(PagingError::NotMapped) => {}
        Err(err) => log::warn!("pagedir: failed to update flags of page {}: {:?}", vpn, err),
    }
}
