//! 虚拟内存布局配置

/// 用户地址空间上界（不包含），同时是初始栈顶
pub const DEFAULT_USER_TOP: usize = 0xc000_0000;
/// 用户栈最大尺寸
pub const DEFAULT_MAX_STACK_SIZE: usize = 0x800_0000;
/// 栈指针下方允许访问的余量（`pusha` 一次压入 32 字节）
pub const DEFAULT_STACK_SLACK: usize = 32;

/// 虚拟内存子系统的布局参数
///
/// 在子系统初始化时构造一次，随 [`crate::VmSystem`] 传递给所有调用者。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// 用户地址空间上界（不包含）
    pub user_top: usize,
    /// 用户栈最大尺寸，栈只能在 `[user_top - max_stack_size, user_top)` 内增长
    pub max_stack_size: usize,
    /// 栈指针下方允许触发栈增长的余量
    pub stack_slack: usize,
}

impl VmConfig {
    /// 地址是否属于用户空间
    #[inline]
    pub fn is_user_vaddr(&self, addr: usize) -> bool {
        addr < self.user_top
    }

    /// 栈增长的下界（包含）
    #[inline]
    pub fn stack_floor(&self) -> usize {
        self.user_top.saturating_sub(self.max_stack_size)
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            user_top: DEFAULT_USER_TOP,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
            stack_slack: DEFAULT_STACK_SLACK,
        }
    }
}
