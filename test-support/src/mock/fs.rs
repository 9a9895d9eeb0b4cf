//! 文件相关的 Mock 实现
//!
//! [`MemFile`] 是一个内存文件：数据在重新打开的句柄之间共享，
//! 并记录每一次写调用，便于断言写回行为。

use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MemFileState {
    data: Vec<u8>,
    writes: Vec<(usize, usize)>,
    reads: usize,
    short_io: bool,
}

/// 内存文件句柄
#[derive(Debug, Clone, Default)]
pub struct MemFile {
    state: Arc<Mutex<MemFileState>>,
}

impl MemFile {
    /// 以给定内容创建文件
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemFileState {
                data,
                ..Default::default()
            })),
        }
    }

    /// 创建 `len` 字节、内容为 `i % 251` 的文件
    pub fn with_pattern(len: usize) -> Self {
        Self::new((0..len).map(|i| (i % 251) as u8).collect())
    }

    /// 打开同一文件的另一个句柄（共享数据与日志）
    pub fn reopen(&self) -> Self {
        self.clone()
    }

    /// 从 `offset` 处读取，返回实际读取的字节数
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let mut st = self.state.lock().unwrap();
        st.reads += 1;
        if offset >= st.data.len() {
            return 0;
        }
        let mut n = buf.len().min(st.data.len() - offset);
        if st.short_io && n > 0 {
            n -= 1;
        }
        buf[..n].copy_from_slice(&st.data[offset..offset + n]);
        n
    }

    /// 向 `offset` 处写入，文件不会因此增长；返回实际写入的字节数
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        let mut st = self.state.lock().unwrap();
        st.writes.push((offset, buf.len()));
        if offset >= st.data.len() {
            return 0;
        }
        let mut n = buf.len().min(st.data.len() - offset);
        if st.short_io && n > 0 {
            n -= 1;
        }
        st.data[offset..offset + n].copy_from_slice(&buf[..n]);
        n
    }

    /// 文件长度
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().data.len()
    }

    /// 文件是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 让后续读写都少传输一个字节，模拟被截断的文件
    pub fn set_short_io(&self, short: bool) {
        self.state.lock().unwrap().short_io = short;
    }

    /// 文件内容快照
    pub fn contents(&self) -> Vec<u8> {
        self.state.lock().unwrap().data.clone()
    }

    /// 所有写调用的 `(offset, len)` 记录
    pub fn writes(&self) -> Vec<(usize, usize)> {
        self.state.lock().unwrap().writes.clone()
    }

    /// 读调用次数
    pub fn read_count(&self) -> usize {
        self.state.lock().unwrap().reads
    }
}
