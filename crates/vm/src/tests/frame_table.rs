use super::*;
use crate::address::Vaddr;
use crate::error::{Resource, VmError};
use crate::page_table::{FileBacking, PageKind};
use crate::pagedir::PageDirectory;
use alloc::vec;

fn page_addr(i: usize) -> usize {
    CODE_BASE + i * PAGE_SIZE
}

#[test]
fn test_allocate_returns_distinct_frames() {
    let h = harness(4, 4);
    let frames = h.system.frames();
    let a = frames.allocate(true).unwrap();
    let b = frames.allocate(false).unwrap();
    assert_ne!(a.paddr, b.paddr);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames.capacity(), 4);
    assert!(frames.contains(a.paddr));

    frames.free(a.paddr);
    frames.free(b.paddr);
    assert!(frames.is_empty());
    assert_eq!(h.frames_in_use(), 0);
}

#[test]
fn test_allocate_zero_fills() {
    let h = harness(1, 1);
    let frames = h.system.frames();
    let dirty = frames.allocate(false).unwrap();
    frames.with_page(&dirty, |page| page.fill(0xff)).unwrap();
    frames.free(dirty.paddr);

    let clean = frames.allocate(true).unwrap();
    assert_eq!(clean.paddr, dirty.paddr);
    let all_zero = frames.with_page(&clean, |page| page.iter().all(|&b| b == 0));
    assert_eq!(all_zero, Ok(true));
}

#[test]
fn test_stale_frame_handle_is_rejected() {
    let h = harness(2, 1);
    let frames = h.system.frames();
    let old = frames.allocate(true).unwrap();
    frames.free(old.paddr);
    let _new = frames.allocate(true).unwrap();
    assert!(frames.with_page(&old, |_| ()).is_err());
}

#[test]
fn test_free_unknown_address_is_noop() {
    let h = harness(2, 1);
    let frames = h.system.frames();
    let frame = frames.allocate(true).unwrap();
    frames.free(Paddr::from_usize(0x1000));
    assert_eq!(frames.len(), 1);
    frames.free(frame.paddr);
    frames.free(frame.paddr);
    assert!(frames.is_empty());
}

#[test]
fn test_unbound_frames_are_never_evicted() {
    let h = harness(2, 2);
    let frames = h.system.frames();
    let _a = frames.allocate(true).unwrap();
    let _b = frames.allocate(true).unwrap();
    assert_eq!(
        frames.allocate(true),
        Err(VmError::AllocationFailure(Resource::Frame))
    );
    assert_eq!(frames.evict(), Err(VmError::AllocationFailure(Resource::Frame)));
}

#[test]
fn test_more_requests_than_frames_succeed_by_eviction() {
    let h = harness(4, 16);
    let (space, _pagedir) = h.space();
    let file = vm_file(&MemFile::new(alloc::vec::Vec::new()));
    space
        .load_segment(&file, 0, CODE_BASE, 0, 10 * PAGE_SIZE, true)
        .unwrap();

    for i in 0..10 {
        space
            .write_bytes_at(page_addr(i) + 17, &[i as u8 + 1; 64], 0)
            .unwrap();
        assert!(h.system.frames().len() <= 4);
    }
    assert_eq!(h.frames_in_use(), h.system.frames().len());
    assert!(h.slots_in_use() >= 6);

    for i in 0..10 {
        let mut buf = [0u8; 66];
        space.read_bytes_at(page_addr(i) + 16, &mut buf, 0).unwrap();
        assert_eq!(buf[0], 0);
        assert!(buf[1..65].iter().all(|&b| b == i as u8 + 1));
        assert_eq!(buf[65], 0);
    }
    assert!(h.system.frames().len() <= 4);
}

#[test]
fn test_dirty_binary_page_round_trips_through_swap() {
    let h = harness(2, 4);
    let (space, pagedir) = h.space();
    let file = vm_file(&MemFile::with_pattern(PAGE_SIZE));
    space
        .load_segment(&file, 0, CODE_BASE, 100, PAGE_SIZE - 100, true)
        .unwrap();

    let payload = [0xabu8; 300];
    space.write_bytes_at(CODE_BASE + 50, &payload, 0).unwrap();
    h.system.frames().evict().unwrap();

    let vpn = Vaddr::from_usize(CODE_BASE).floor();
    assert!(pagedir.get_page(vpn).is_none());
    let entry = space.page_table().find(Vaddr::from_usize(CODE_BASE)).unwrap();
    {
        let entry = entry.lock();
        assert_eq!(entry.kind(), PageKind::Swapped);
        assert!(!entry.loaded());
        assert!(entry.writable());
        assert!(entry.swap_slot().is_some());
    }
    assert_eq!(h.slots_in_use(), 1);
    assert_eq!(h.disk.sectors_written(), PAGE_SIZE / device::SECTOR_SIZE);

    let mut back = [0u8; 300];
    space.read_bytes_at(CODE_BASE + 50, &mut back, 0).unwrap();
    assert_eq!(back, payload);
    // 换入后槽被释放，页表项不再持有槽号
    assert_eq!(h.slots_in_use(), 0);
    assert!(entry.lock().swap_slot().is_none());

    // 文件内容来自段加载的部分仍然正确
    let mut head = [0u8; 50];
    space.read_bytes_at(CODE_BASE, &mut head, 0).unwrap();
    assert!(head.iter().enumerate().all(|(i, &b)| b == (i % 251) as u8));
}

#[test]
fn test_clean_pages_are_discarded() {
    let h = harness(1, 2);
    let (space, pagedir) = h.space();
    let mem = MemFile::with_pattern(2 * PAGE_SIZE);
    let file = vm_file(&mem);
    space
        .load_segment(&file, 0, CODE_BASE, 2 * PAGE_SIZE, 0, false)
        .unwrap();

    let mut buf = [0u8; 4];
    space.read_bytes_at(CODE_BASE, &mut buf, 0).unwrap();
    space.read_bytes_at(page_addr(1), &mut buf, 0).unwrap();
    assert!(pagedir.get_page(Vaddr::from_usize(CODE_BASE).floor()).is_none());
    assert_eq!(h.slots_in_use(), 0);
    assert!(mem.writes().is_empty());

    let entry = space.page_table().find(Vaddr::from_usize(CODE_BASE)).unwrap();
    assert_eq!(entry.lock().kind(), PageKind::Binary);

    // 再次访问时从文件重新读取
    let reads = mem.read_count();
    space.read_bytes_at(CODE_BASE + 8, &mut buf, 0).unwrap();
    assert_eq!(mem.read_count(), reads + 1);
    assert_eq!(buf, [8, 9, 10, 11]);
}

#[test]
fn test_clock_gives_second_chance() {
    let h = harness(3, 4);
    let (space, pagedir) = h.space();
    let file = vm_file(&MemFile::with_pattern(3 * PAGE_SIZE));
    space
        .load_segment(&file, 0, CODE_BASE, 3 * PAGE_SIZE, 0, false)
        .unwrap();

    let vpns: alloc::vec::Vec<_> = (0..3)
        .map(|i| Vaddr::from_usize(page_addr(i)).floor())
        .collect();
    let mut buf = [0u8; 1];
    for i in 0..3 {
        space.read_bytes_at(page_addr(i), &mut buf, 0).unwrap();
    }
    assert!(vpns.iter().all(|&vpn| pagedir.is_accessed(vpn)));

    // 一整圈清除所有 ACCESSED 位，然后选中第一个帧
    h.system.frames().evict().unwrap();
    assert!(pagedir.get_page(vpns[0]).is_none());
    assert!(pagedir.get_page(vpns[1]).is_some());
    assert!(pagedir.get_page(vpns[2]).is_some());
    assert!(!pagedir.is_accessed(vpns[1]));
    assert!(!pagedir.is_accessed(vpns[2]));

    // 被访问过的页获得第二次机会
    space.read_bytes_at(page_addr(2), &mut buf, 0).unwrap();
    h.system.frames().evict().unwrap();
    assert!(pagedir.get_page(vpns[1]).is_none());
    assert!(pagedir.get_page(vpns[2]).is_some());
}

#[test]
fn test_load_file_to_page_short_read() {
    let h = harness(1, 1);
    let mem = MemFile::with_pattern(PAGE_SIZE);
    let backing = FileBacking::new(vm_file(&mem), PAGE_SIZE - 10, 20, PAGE_SIZE - 20);
    let mut page = vec![0xffu8; PAGE_SIZE];
    assert_eq!(
        h.system.frames().load_file_to_page(&mut page, &backing),
        Err(VmError::ShortIo {
            offset: PAGE_SIZE - 10,
            expected: 20,
            actual: 10,
        })
    );

    let backing = FileBacking::new(vm_file(&mem), 4, 4, PAGE_SIZE - 4);
    h.system.frames().load_file_to_page(&mut page, &backing).unwrap();
    assert_eq!(&page[..4], &[4, 5, 6, 7]);
    assert!(page[4..].iter().all(|&b| b == 0));
}

#[test]
fn test_free_bound_frame_unloads_entry() {
    let h = harness(2, 1);
    let (space, pagedir) = h.space();
    space.setup_stack().unwrap();
    let top = h.system.config().user_top - PAGE_SIZE;
    let vpn = Vaddr::from_usize(top).floor();
    let ppn = pagedir.get_page(vpn).unwrap();

    h.system.frames().free(ppn.start_addr());
    assert!(pagedir.get_page(vpn).is_none());
    let entry = space.page_table().find(Vaddr::from_usize(top)).unwrap();
    assert!(!entry.lock().loaded());
}
