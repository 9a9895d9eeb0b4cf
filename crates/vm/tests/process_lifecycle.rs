//! 进程生命周期：加载、运行（缺页、驱逐、mmap）、退出

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use device::{BlockRole, RamDisk, register_block_device};
use sync::ArchOps;
use test_support::mock::arch::MOCK_ARCH_OPS;
use test_support::mock::fs::MemFile;
use test_support::mock::mm::PhysArena;
use vm::{
    AddressSpace, MAP_FAILED, PAGE_SIZE, Paddr, SoftPageDirectory, SwapManager, UserPool,
    VmConfig, VmFile, VmSystem, sys_mmap, sys_munmap,
};

struct HostArchOps;

impl ArchOps for HostArchOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        MOCK_ARCH_OPS.read_and_disable_interrupts()
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        MOCK_ARCH_OPS.restore_interrupts(flags)
    }
}

static HOST_ARCH_OPS: HostArchOps = HostArchOps;
static SYNC_INIT: AtomicUsize = AtomicUsize::new(0);

fn init() {
    match SYNC_INIT.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {
            unsafe { sync::register_arch_ops(&HOST_ARCH_OPS) };
            SYNC_INIT.store(2, Ordering::Release);
        }
        Err(_) => {
            while SYNC_INIT.load(Ordering::Acquire) != 2 {
                std::hint::spin_loop();
            }
        }
    }
}

struct HostFile(MemFile);

impl VmFile for HostFile {
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
        Ok(Arc::new(HostFile(self.0.reopen())))
    }
}

fn boot(frames: usize, swap_slots: usize) -> Arc<VmSystem> {
    init();
    let arena = PhysArena::new(frames);
    let pool = unsafe {
        UserPool::new(
            Paddr::from_usize(arena.start()),
            Paddr::from_usize(arena.end()),
            0,
        )
    };
    VmSystem::new(
        VmConfig::default(),
        pool,
        RamDisk::with_sectors(swap_slots * 8, 1),
    )
}

const TEXT: usize = 0x0804_8000;
const DATA: usize = 0x0805_0000;
const MAP: usize = 0x2000_0000;

/// 模拟加载一个有代码段、数据段和 bss 的程序
fn exec(system: &Arc<VmSystem>, image: &MemFile) -> (AddressSpace, usize) {
    let space = AddressSpace::new(system.clone(), Arc::new(SoftPageDirectory::new()));
    let file: Arc<dyn VmFile> = Arc::new(HostFile(image.clone()));
    space
        .load_segment(&file, 0, TEXT, 2 * PAGE_SIZE, 0, false)
        .unwrap();
    space
        .load_segment(&file, 2 * PAGE_SIZE, DATA, 1000, 3 * PAGE_SIZE - 1000, true)
        .unwrap();
    let esp = space.setup_stack().unwrap();
    (space, esp)
}

#[test]
fn test_full_process_lifecycle() {
    let system = boot(4, 32);
    let image = MemFile::with_pattern(3 * PAGE_SIZE);
    let (mut space, esp) = exec(&system, &image);

    // 代码段按需读入
    let mut text = [0u8; 16];
    space.read_bytes_at(TEXT + PAGE_SIZE, &mut text, esp).unwrap();
    let expected: Vec<u8> = (PAGE_SIZE..PAGE_SIZE + 16).map(|i| (i % 251) as u8).collect();
    assert_eq!(&text[..], expected.as_slice());

    // 数据段和 bss 写入后在内存压力下仍然保持
    for i in 0..3 {
        space
            .write_bytes_at(DATA + i * PAGE_SIZE + 900, &[0x40 + i as u8; 200], esp)
            .unwrap();
    }

    // 栈向下增长若干页
    let mut sp = esp;
    for depth in 0..6u8 {
        sp -= PAGE_SIZE;
        space.write_bytes_at(sp, &[depth; 4], sp).unwrap();
    }

    // 映射一个文件并修改
    let doc = MemFile::with_pattern(2 * PAGE_SIZE);
    let doc_file: Arc<dyn VmFile> = Arc::new(HostFile(doc.clone()));
    let id = sys_mmap(&mut space, Some(&doc_file), MAP);
    assert_eq!(id, 1);
    assert_eq!(sys_mmap(&mut space, Some(&doc_file), MAP), MAP_FAILED);
    space.write_bytes_at(MAP + PAGE_SIZE, b"edited", sp).unwrap();

    assert!(system.frames().len() <= 4);
    assert!(system.swap().used_slots() > 0);

    for i in 0..3 {
        let mut buf = [0u8; 202];
        space
            .read_bytes_at(DATA + i * PAGE_SIZE + 899, &mut buf, sp)
            .unwrap();
        let original = if i == 0 { (2 * PAGE_SIZE + 899) % 251 } else { 0 };
        assert_eq!(buf[0] as usize, original);
        assert!(buf[1..201].iter().all(|&b| b == 0x40 + i as u8));
    }
    let mut sp_check = esp;
    for depth in 0..6u8 {
        sp_check -= PAGE_SIZE;
        let mut buf = [0u8; 4];
        space.read_bytes_at(sp_check, &mut buf, sp).unwrap();
        assert_eq!(buf, [depth; 4]);
    }

    assert_eq!(sys_munmap(&mut space, id), 0);
    assert_eq!(&doc.contents()[PAGE_SIZE..PAGE_SIZE + 6], b"edited");
    assert_eq!(doc.writes().len(), 1);
    // 可执行文件从不被写
    assert!(image.writes().is_empty());

    space.teardown().unwrap();
    assert!(system.frames().is_empty());
    assert_eq!(system.frames().pool().allocated_frames(), 0);
    assert_eq!(system.swap().used_slots(), 0);
}

#[test]
fn test_concurrent_processes() {
    let system = boot(6, 64);
    let handles: Vec<_> = (0..3u8)
        .map(|p| {
            let system = system.clone();
            thread::spawn(move || {
                let image = MemFile::with_pattern(3 * PAGE_SIZE);
                let (space, esp) = exec(&system, &image);
                for round in 0..3u8 {
                    for i in 0..3 {
                        let addr = DATA + i * PAGE_SIZE;
                        space.write_bytes_at(addr, &[p, round, i as u8], esp).unwrap();
                    }
                    for i in 0..3 {
                        let mut buf = [0u8; 3];
                        space.read_bytes_at(DATA + i * PAGE_SIZE, &mut buf, esp).unwrap();
                        assert_eq!(buf, [p, round, i as u8]);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(system.frames().is_empty());
    assert_eq!(system.swap().used_slots(), 0);
}

#[test]
fn test_swap_from_registered_device() {
    init();
    let disk = RamDisk::with_sectors(16, 9);
    register_block_device(BlockRole::Swap, disk);
    let swap = SwapManager::from_registered_device().unwrap();
    assert_eq!(swap.slot_count(), 2);
}
