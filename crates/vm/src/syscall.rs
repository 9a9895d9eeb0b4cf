//! `mmap` / `munmap` 系统调用
//!
//! 参数校验和返回值约定：失败统一返回有符号的 `-1`，不使用无符号回绕值。

use alloc::sync::Arc;

use crate::file::VmFile;
use crate::mmap::MapId;
use crate::space::AddressSpace;

/// `mmap` 失败时的返回值
pub const MAP_FAILED: isize = -1;

/// 将已打开的文件 `file` 映射到 `addr`，返回映射编号或 [`MAP_FAILED`]
///
/// `file` 为 `None` 表示描述符无效（例如标准输入输出）。
pub fn sys_mmap(space: &mut AddressSpace, file: Option<&Arc<dyn VmFile>>, addr: usize) -> isize {
    let Some(file) = file else {
        return MAP_FAILED;
    };
    match space.mmap(file, addr) {
        Ok(id) => id.as_usize() as isize,
        Err(err) => {
            log::debug!("sys_mmap({:#x}): {}", addr, err);
            MAP_FAILED
        }
    }
}

/// 解除映射 `mapid`；未知编号视为成功
///
/// 写回失败时返回 `-1`，映射仍会被解除。
pub fn sys_munmap(space: &mut AddressSpace, mapid: isize) -> isize {
    let Ok(id) = usize::try_from(mapid) else {
        return 0;
    };
    match space.munmap(MapId::new(id)) {
        Ok(()) => 0,
        Err(err) => {
            log::error!("sys_munmap({}): {}", mapid, err);
            -1
        }
    }
}
