//! 文件接口
//!
//! 虚拟内存核心只需要文件系统的极小子集：按偏移读写、长度、重新打开。
//! 所有文件访问都要持有全局文件访问锁 [`FileLock`]，该锁与系统调用层共享。

use alloc::sync::Arc;
use sync::Mutex;

use crate::error::{VmError, VmResult};

/// 全局文件访问锁
pub type FileLock = Mutex<()>;

/// 可用于按需分页和内存映射的文件
pub trait VmFile: Send + Sync {
    /// 从 `offset` 读取到 `buf`，返回实际读取的字节数
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize>;

    /// 将 `buf` 写入 `offset`，返回实际写入的字节数
    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize>;

    /// 文件长度（字节）
    fn len(&self) -> usize;

    /// 文件是否为空
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 打开同一文件的一个新句柄，生命周期与原句柄无关
    fn reopen(&self) -> Result<Arc<dyn VmFile>, isize>;
}

/// 在文件锁保护下读满 `buf`，不足即为 [`VmError::ShortIo`]
pub fn read_exact_at(
    lock: &FileLock,
    file: &dyn VmFile,
    offset: usize,
    buf: &mut [u8],
) -> VmResult<()> {
    let actual = {
        let _guard = lock.lock();
        file.read_at(offset, buf).unwrap_or(0)
    };
    if actual != buf.len() {
        log::error!(
            "vm: short read at offset {}: expected {}, got {}",
            offset,
            buf.len(),
            actual
        );
        return Err(VmError::ShortIo {
            offset,
            expected: buf.len(),
            actual,
        });
    }
    Ok(())
}

/// 在文件锁保护下写完 `buf`，不足即为 [`VmError::ShortIo`]
pub fn write_all_at(lock: &FileLock, file: &dyn VmFile, offset: usize, buf: &[u8]) -> VmResult<()> {
    let actual = {
        let _guard = lock.lock();
        file.write_at(offset, buf).unwrap_or(0)
    };
    if actual != buf.len() {
        log::error!(
            "vm: short write at offset {}: expected {}, got {}",
            offset,
            buf.len(),
            actual
        );
        return Err(VmError::ShortIo {
            offset,
            expected: buf.len(),
            actual,
        });
    }
    Ok(())
}
