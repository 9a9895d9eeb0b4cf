//! 页表项
//!
//! 每个虚拟页对应一个 [`PageEntry`]，描述它的后备存储和驻留状态。
//! 后备类型 [`PageKind`] 只允许沿以下路径转换：
//!
//! ```text
//! Binary  --(脏页被驱逐)-->  Swapped
//! ```
//!
//! `Mapped` 与 `Swapped` 在整个生命周期内不变，其他转换都是逻辑错误。

use alloc::sync::Arc;
use sync::Mutex;

use crate::address::{PAGE_SIZE, Vaddr, Vpn};
use crate::file::VmFile;
use crate::swap::SwapSlot;

/// 页面的后备类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// 可执行文件段：从文件按需加载，脏了之后改由交换区承载
    Binary,
    /// 内存映射文件：从文件加载，脏页写回文件
    Mapped,
    /// 匿名页（栈或被换出过的段页）：内容只存在于内存或交换区
    Swapped,
}

/// 从文件重新填充页面所需的信息
#[derive(Clone)]
pub struct FileBacking {
    /// 文件句柄
    pub file: Arc<dyn VmFile>,
    /// 页面内容在文件中的偏移
    pub offset: usize,
    /// 从文件读取的字节数
    pub read_bytes: usize,
    /// 读取之后补零的字节数
    pub zero_bytes: usize,
}

impl FileBacking {
    /// 创建文件后备；`read_bytes + zero_bytes` 必须等于页大小
    pub fn new(file: Arc<dyn VmFile>, offset: usize, read_bytes: usize, zero_bytes: usize) -> Self {
        debug_assert_eq!(read_bytes + zero_bytes, PAGE_SIZE);
        Self {
            file,
            offset,
            read_bytes,
            zero_bytes,
        }
    }
}

impl core::fmt::Debug for FileBacking {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileBacking")
            .field("file", &"<dyn VmFile>")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("zero_bytes", &self.zero_bytes)
            .finish()
    }
}

/// 页表项
#[derive(Debug)]
pub struct PageEntry {
    vpn: Vpn,
    kind: PageKind,
    writable: bool,
    loaded: bool,
    backing: Option<FileBacking>,
    swap_slot: Option<SwapSlot>,
}

/// 共享的页表项引用
///
/// 页表持有强引用；帧表只持有 `Weak` 反向引用。
pub type PageEntryRef = Arc<Mutex<PageEntry>>;

impl PageEntry {
    /// 为 `vaddr` 所在的页创建页表项
    pub fn create(
        vaddr: Vaddr,
        kind: PageKind,
        writable: bool,
        loaded: bool,
        backing: Option<FileBacking>,
    ) -> PageEntryRef {
        Arc::new(Mutex::new(PageEntry {
            vpn: vaddr.floor(),
            kind,
            writable,
            loaded,
            backing,
            swap_slot: None,
        }))
    }

    /// 虚拟页号
    pub fn vpn(&self) -> Vpn {
        self.vpn
    }

    /// 后备类型
    pub fn kind(&self) -> PageKind {
        self.kind
    }

    /// 是否可写
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// 是否驻留在物理帧中
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    /// 文件后备信息
    pub fn backing(&self) -> Option<&FileBacking> {
        self.backing.as_ref()
    }

    /// 占用的交换槽
    pub fn swap_slot(&self) -> Option<SwapSlot> {
        self.swap_slot
    }

    pub(crate) fn set_loaded(&mut self, loaded: bool) {
        self.loaded = loaded;
    }

    pub(crate) fn set_swap_slot(&mut self, slot: SwapSlot) {
        debug_assert!(self.swap_slot.is_none(), "page {} already owns a swap slot", self.vpn);
        self.swap_slot = Some(slot);
    }

    pub(crate) fn take_swap_slot(&mut self) -> Option<SwapSlot> {
        self.swap_slot.take()
    }

    /// 转换后备类型
    ///
    /// # Panics
    /// 只有 `Binary → Swapped` 是合法转换，其余一律 panic。
    pub(crate) fn transition(&mut self, to: PageKind) {
        match (self.kind, to) {
            (PageKind::Binary, PageKind::Swapped) => self.kind = to,
            (from, to) => panic!(
                "page {}: illegal backing transition {:?} -> {:?}",
                self.vpn, from, to
            ),
        }
    }
}
