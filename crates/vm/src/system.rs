//! 虚拟内存子系统服务对象
//!
//! [`VmSystem`] 在子系统初始化时构造一次，持有全局帧表、交换区和文件访问锁，
//! 以 `Arc` 句柄传递给每个进程的地址空间。陷阱处理等无法携带句柄的路径
//! 可以通过 [`register_vm_system`] 登记后用 [`vm_system`] 取得。

use alloc::sync::Arc;
use device::BlockDriver;
use lazy_static::lazy_static;
use sync::SpinLock;

use crate::config::VmConfig;
use crate::file::FileLock;
use crate::frame_allocator::UserPool;
use crate::frame_table::FrameTable;
use crate::swap::SwapManager;

/// 虚拟内存子系统
pub struct VmSystem {
    config: VmConfig,
    frames: FrameTable,
    swap: Arc<SwapManager>,
    file_lock: Arc<FileLock>,
}

impl VmSystem {
    /// 用页池 `pool` 和交换设备 `swap_device` 建立子系统
    pub fn new(config: VmConfig, pool: Arc<UserPool>, swap_device: Arc<dyn BlockDriver>) -> Arc<Self> {
        let swap = Arc::new(SwapManager::new(swap_device));
        let file_lock = Arc::new(FileLock::new(()));
        log::debug!(
            "vm: {} user frames, {} swap slots",
            pool.total_frames(),
            swap.slot_count()
        );
        Arc::new(Self {
            config,
            frames: FrameTable::new(pool, swap.clone(), file_lock.clone()),
            swap,
            file_lock,
        })
    }

    /// 布局参数
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// 全局帧表
    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    /// 交换区
    pub fn swap(&self) -> &Arc<SwapManager> {
        &self.swap
    }

    /// 文件访问锁，与文件系统调用共享
    pub fn file_lock(&self) -> &Arc<FileLock> {
        &self.file_lock
    }
}

impl core::fmt::Debug for VmSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VmSystem")
            .field("config", &self.config)
            .field("frames", &self.frames)
            .field("swap", &self.swap)
            .finish()
    }
}

lazy_static! {
    static ref VM_SYSTEM: SpinLock<Option<Arc<VmSystem>>> = SpinLock::new(None);
}

/// 登记全局虚拟内存子系统，重复登记时替换旧值
pub fn register_vm_system(system: Arc<VmSystem>) {
    if VM_SYSTEM.lock().replace(system).is_some() {
        log::warn!("vm: replacing registered vm system");
    }
}

/// 获取已登记的子系统
pub fn try_vm_system() -> Option<Arc<VmSystem>> {
    VM_SYSTEM.lock().clone()
}

/// 获取已登记的子系统
///
/// # Panics
/// 尚未调用 [`register_vm_system`] 时 panic。
pub fn vm_system() -> Arc<VmSystem> {
    match try_vm_system() {
        Some(system) => system,
        None => panic!("vm: system not registered, call register_vm_system first"),
    }
}
