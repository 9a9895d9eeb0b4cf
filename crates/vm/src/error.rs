//! 错误类型
//!
//! [`VmError`] 覆盖虚拟内存子系统所有可恢复的失败；
//! 破坏内部一致性的逻辑错误（例如读取空闲的交换槽）直接 panic。

use core::fmt;

use crate::pagedir::PagingError;

/// 分配失败时耗尽的资源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// 物理帧（且没有可驱逐的帧）
    Frame,
    /// 元数据（页表项、映射记录）
    Metadata,
    /// 交换槽
    SwapSlot,
}

/// 虚拟内存操作中可能发生的错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// 资源耗尽
    AllocationFailure(Resource),
    /// 非法地址：未对齐、位于内核空间，或未映射且不满足栈增长规则
    IllegalAddress(usize),
    /// 文件读写字节数少于请求值（文件被截断或损坏）
    ShortIo {
        /// 文件偏移
        offset: usize,
        /// 请求的字节数
        expected: usize,
        /// 实际传输的字节数
        actual: usize,
    },
    /// 目标地址已有映射
    DuplicateMapping(usize),
    /// 不存在的页、映射或文件
    MissingEntry(usize),
    /// 块设备拒绝了一次扇区传输
    DeviceIo {
        /// 扇区号
        sector: usize,
    },
    /// 页目录操作失败
    Paging(PagingError),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::AllocationFailure(res) => write!(f, "out of {:?}", res),
            VmError::IllegalAddress(addr) => write!(f, "illegal address {:#x}", addr),
            VmError::ShortIo {
                offset,
                expected,
                actual,
            } => write!(
                f,
                "short file I/O at offset {}: expected {} bytes, got {}",
                offset, expected, actual
            ),
            VmError::DuplicateMapping(addr) => write!(f, "address {:#x} is already mapped", addr),
            VmError::MissingEntry(key) => write!(f, "no entry for {:#x}", key),
            VmError::DeviceIo { sector } => write!(f, "block device I/O failed at sector {}", sector),
            VmError::Paging(err) => write!(f, "paging error: {:?}", err),
        }
    }
}

impl From<PagingError> for VmError {
    fn from(err: PagingError) -> Self {
        VmError::Paging(err)
    }
}

/// 虚拟内存操作的结果类型
pub type VmResult<T> = Result<T, VmError>;
