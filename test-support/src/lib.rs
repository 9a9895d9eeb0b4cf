//! 测试支持 crate
//!
//! 为宿主机上的 `cargo test` 提供 Mock 实现：中断状态、模拟物理内存和内存文件。
//!
//! 这里不依赖任何内核 crate（避免循环依赖），各 crate 在 `cfg(test)` 下
//! 为本地包装类型实现自己的 trait。

pub mod mock;
