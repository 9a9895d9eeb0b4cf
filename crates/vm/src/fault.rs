//! 缺页处理
//!
//! 两条路径：
//!
//! - 地址没有页表项：满足栈增长规则时分配一个清零帧作为新的栈页
//! - 页表项存在但未驻留：分配帧，从文件或交换区填充，安装映射
//!
//! 填充期间帧尚未绑定所有者，不会被驱逐；任何一步失败都归还帧并返回错误，
//! 由调用者终止进程。

use crate::address::Vaddr;
use crate::config::VmConfig;
use crate::error::{VmError, VmResult};
use crate::frame_table::{FrameHandle, FrameOwner};
use crate::page_table::{PageEntry, PageEntryRef, PageKind, PageTable};
use crate::pagedir::PteFlags;
use crate::swap::SwapSlot;

/// 对没有页表项的地址 `addr`，判断是否应当增长栈
///
/// 条件：位于用户空间，不低于栈底限，且不低于 `esp - stack_slack`。
pub fn stack_growth_allowed(config: &VmConfig, addr: usize, esp: usize) -> bool {
    config.is_user_vaddr(addr)
        && addr >= config.stack_floor()
        && addr >= esp.saturating_sub(config.stack_slack)
}

/// 在 `addr` 所在的页增长一页栈
pub fn grow_stack(page_table: &PageTable, addr: usize) -> VmResult<()> {
    let frames = page_table.system().frames();
    let vaddr = Vaddr::from_usize(addr);
    let vpn = vaddr.floor();

    let frame = frames.allocate(true)?;
    let entry = PageEntry::create(vaddr, PageKind::Swapped, true, true, None);
    if let Err(err) = page_table.insert(entry.clone()) {
        frames.free(frame.paddr);
        return Err(err);
    }
    if let Err(err) = page_table
        .pagedir()
        .install_page(vpn, frame.ppn(), PteFlags::user(true))
    {
        frames.free(frame.paddr);
        page_table.delete(&entry);
        return Err(err.into());
    }
    frames.bind(
        frame.id,
        FrameOwner::new(page_table.pagedir().clone(), &entry, vpn),
    )?;
    log::debug!("vm: stack grown to {}", vpn);
    Ok(())
}

/// 将未驻留的页面 `entry` 调入内存
///
/// 页面已驻留时说明是保护错误（例如写只读页），返回 [`VmError::IllegalAddress`]。
///
/// # Panics
/// `Swapped` 页面既未驻留也没有交换槽时 panic。
pub fn fault_in(page_table: &PageTable, entry: &PageEntryRef) -> VmResult<()> {
    let system = page_table.system();
    let frames = system.frames();

    let (vpn, kind, writable, backing, slot) = {
        let mut entry = entry.lock();
        let vpn = entry.vpn();
        if entry.loaded() {
            return Err(VmError::IllegalAddress(vpn.start_addr().as_usize()));
        }
        let slot = match entry.kind() {
            PageKind::Swapped => match entry.take_swap_slot() {
                Some(slot) => Some(slot),
                None => panic!("page {}: swapped page has no swap slot", vpn),
            },
            PageKind::Binary | PageKind::Mapped => None,
        };
        (vpn, entry.kind(), entry.writable(), entry.backing().cloned(), slot)
    };

    let frame = match frames.allocate(false) {
        Ok(frame) => frame,
        Err(err) => {
            // 换入尚未开始，槽仍归页表项所有
            if let Some(slot) = slot {
                entry.lock().set_swap_slot(slot);
            }
            return Err(err);
        }
    };
    let filled = frames.with_page(&frame, |page| match (slot, &backing) {
        (Some(slot), _) => system.swap().swap_in(slot, page),
        (None, Some(backing)) => frames.load_file_to_page(page, backing),
        (None, None) => Err(VmError::MissingEntry(vpn.start_addr().as_usize())),
    });
    if let Err(err) = filled.and_then(|r| r) {
        abandon(page_table, &frame, entry, slot);
        return Err(err);
    }

    if let Err(err) = page_table
        .pagedir()
        .install_page(vpn, frame.ppn(), PteFlags::user(writable))
    {
        abandon(page_table, &frame, entry, None);
        return Err(err.into());
    }
    entry.lock().set_loaded(true);
    frames.bind(
        frame.id,
        FrameOwner::new(page_table.pagedir().clone(), entry, vpn),
    )?;
    log::debug!("vm: page {} faulted in ({:?})", vpn, kind);
    Ok(())
}

/// 调入失败：归还帧，交换槽仍然有效时还给页表项
fn abandon(
    page_table: &PageTable,
    frame: &FrameHandle,
    entry: &PageEntryRef,
    slot: Option<SwapSlot>,
) {
    page_table.system().frames().free(frame.paddr);
    if let Some(slot) = slot {
        if page_table.system().swap().is_in_use(slot) {
            entry.lock().set_swap_slot(slot);
        }
    }
}
