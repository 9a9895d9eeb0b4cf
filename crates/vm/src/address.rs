//! 地址模块
//!
//! 提供物理/虚拟地址与页号的强类型包装：
//!
//! - [`Paddr`] / [`Vaddr`] - 物理地址 / 虚拟地址
//! - [`Ppn`] / [`Vpn`] - 物理页号 / 虚拟页号
//!
//! 所有换算都基于固定的 [`PAGE_SIZE`]。

use core::fmt;

/// 页大小（字节）
pub const PAGE_SIZE: usize = 4096;
/// 页内偏移位数
pub const PAGE_SHIFT: usize = 12;

/// 向下对齐到页边界
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// 向上对齐到页边界
#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// 页内偏移
#[inline]
pub const fn page_offset(addr: usize) -> usize {
    addr & (PAGE_SIZE - 1)
}

/// `impl_address!` 宏
/// ---------------------
/// 为地址类型实现 usize 转换、对齐和格式化。
macro_rules! impl_address {
    ($type:ident, $page:ident) => {
        impl $type {
            /// 从 usize 构造
            #[inline]
            pub const fn from_usize(value: usize) -> Self {
                Self(value)
            }

            /// 转换为 usize
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// 是否按页对齐
            #[inline]
            pub const fn is_page_aligned(self) -> bool {
                page_offset(self.0) == 0
            }

            /// 页内偏移
            #[inline]
            pub const fn page_offset(self) -> usize {
                page_offset(self.0)
            }

            /// 所在页的页号（向下取整）
            #[inline]
            pub const fn floor(self) -> $page {
                $page(self.0 >> PAGE_SHIFT)
            }

            /// 页号（向上取整）
            #[inline]
            pub const fn ceil(self) -> $page {
                $page(page_round_up(self.0) >> PAGE_SHIFT)
            }
        }

        impl fmt::Display for $type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

/// `impl_page_num!` 宏
/// ---------------------
/// 为页号类型实现 usize 转换与地址换算。
macro_rules! impl_page_num {
    ($type:ident, $addr:ident) => {
        impl $type {
            /// 从 usize 构造
            #[inline]
            pub const fn from_usize(value: usize) -> Self {
                Self(value)
            }

            /// 转换为 usize
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// 页的起始地址
            #[inline]
            pub const fn start_addr(self) -> $addr {
                $addr(self.0 << PAGE_SHIFT)
            }

            /// 页的结束地址（不包含）
            #[inline]
            pub const fn end_addr(self) -> $addr {
                $addr((self.0 + 1) << PAGE_SHIFT)
            }

            /// 向后偏移 `pages` 页
            #[inline]
            pub const fn add(self, pages: usize) -> Self {
                Self(self.0 + pages)
            }
        }
    };
}

/// 物理地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Paddr(pub usize);
impl_address!(Paddr, Ppn);

/// 虚拟地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Vaddr(pub usize);
impl_address!(Vaddr, Vpn);

/// 物理页号
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Ppn(pub usize);
impl_page_num!(Ppn, Paddr);

/// 虚拟页号
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Vpn(pub usize);
impl_page_num!(Vpn, Vaddr);

impl fmt::Display for Vpn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start_addr())
    }
}
