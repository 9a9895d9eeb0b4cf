// 虚拟内存子系统的宿主机单元测试
//
// 物理内存由 `PhysArena` 模拟（恒等直接映射），交换设备是 `RamDisk`，
// 硬件页表是 `SoftPageDirectory`，文件是 `MemFile`。

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};
use device::RamDisk;
use sync::ArchOps;
use test_support::mock::arch::MOCK_ARCH_OPS;
use test_support::mock::fs::MemFile;
use test_support::mock::mm::PhysArena;

use crate::address::{PAGE_SIZE, Paddr};
use crate::config::VmConfig;
use crate::file::VmFile;
use crate::frame_allocator::UserPool;
use crate::pagedir::SoftPageDirectory;
use crate::space::AddressSpace;
use crate::system::VmSystem;

mod frame_table;

/// 可执行段的起始地址
pub(crate) const CODE_BASE: usize = 0x0804_8000;
/// 映射文件使用的地址
pub(crate) const MMAP_BASE: usize = 0x1000_0000;

struct TestArchOps;

impl ArchOps for TestArchOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        MOCK_ARCH_OPS.read_and_disable_interrupts()
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        MOCK_ARCH_OPS.restore_interrupts(flags)
    }
}

static TEST_ARCH_OPS: TestArchOps = TestArchOps;
// 0 = uninit, 1 = initializing, 2 = ready
static SYNC_INIT: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn init_sync_arch_ops() {
    match SYNC_INIT.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {
            // Safety: tests use a single global mock ArchOps.
            unsafe { sync::register_arch_ops(&TEST_ARCH_OPS) };
            SYNC_INIT.store(2, Ordering::Release);
        }
        Err(_) => {
            while SYNC_INIT.load(Ordering::Acquire) != 2 {
                core::hint::spin_loop();
            }
        }
    }
}

/// `MemFile` 的 [`VmFile`] 包装
pub(crate) struct TestFile(pub MemFile);

impl VmFile for TestFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        Ok(self.0.read_at(offset, buf))
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        Ok(self.0.write_at(offset, buf))
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn reopen(&self) -> Result<Arc<dyn VmFile>, isize> {
        Ok(Arc::new(TestFile(self.0.reopen())))
    }
}

pub(crate) fn vm_file(file: &MemFile) -> Arc<dyn VmFile> {
    Arc::new(TestFile(file.clone()))
}

/// 一个完整的子系统：`frames` 个物理帧，`swap_slots` 个交换槽
pub(crate) struct Harness {
    pub system: Arc<VmSystem>,
    pub disk: Arc<RamDisk>,
}

pub(crate) fn harness(frames: usize, swap_slots: usize) -> Harness {
    init_sync_arch_ops();
    let arena = PhysArena::new(frames);
    // Safety: the arena is leaked and identity mapped.
    let pool = unsafe {
        UserPool::new(
            Paddr::from_usize(arena.start()),
            Paddr::from_usize(arena.end()),
            0,
        )
    };
    let disk = RamDisk::with_sectors(swap_slots * (PAGE_SIZE / device::SECTOR_SIZE), 0);
    let system = VmSystem::new(VmConfig::default(), pool, disk.clone());
    Harness { system, disk }
}

impl Harness {
    /// 新建一个进程地址空间，同时返回其软件页目录
    pub fn space(&self) -> (AddressSpace, Arc<SoftPageDirectory>) {
        let pagedir = Arc::new(SoftPageDirectory::new());
        let space = AddressSpace::new(self.system.clone(), pagedir.clone());
        (space, pagedir)
    }

    /// 已分配的物理帧数
    pub fn frames_in_use(&self) -> usize {
        self.system.frames().pool().allocated_frames()
    }

    /// 已占用的交换槽数
    pub fn slots_in_use(&self) -> usize {
        self.system.swap().used_slots()
    }
}
