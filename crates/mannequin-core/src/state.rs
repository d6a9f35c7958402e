//! 模式状态定义
//!
//! 人偶模式是否激活由 [`ModeState`] 表示，由协调器独占修改。
//! [`SharedModeState`] 把状态放在互斥锁后面，协调器在整次切换期间持有该锁，
//! 因此读取方看到的永远是某次完整切换之前或之后的值。

use mannequin_protocol::ModeStatus;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;

/// 控制模式
///
/// - **Strict**: 常规模式，刚性控制器跟踪指令轨迹（默认）
/// - **Mannequin**: 人偶模式，低增益控制器允许手动拖动关节
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlRegime {
    /// 常规模式（默认）
    #[default]
    Strict,

    /// 人偶模式
    Mannequin,
}

impl ControlRegime {
    /// 由"是否启用人偶模式"得到目标模式
    pub fn from_enabled(enable: bool) -> Self {
        if enable { Self::Mannequin } else { Self::Strict }
    }

    /// 是否为人偶模式
    pub fn is_mannequin(self) -> bool {
        self == Self::Mannequin
    }
}

/// 人偶模式状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeState {
    regime: ControlRegime,
    transitions: u64,
}

impl ModeState {
    /// 初始状态：常规模式
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定初始模式
    pub fn with_regime(regime: ControlRegime) -> Self {
        Self {
            regime,
            transitions: 0,
        }
    }

    pub fn regime(&self) -> ControlRegime {
        self.regime
    }

    /// 人偶模式是否激活
    pub fn is_active(&self) -> bool {
        self.regime.is_mannequin()
    }

    /// 已提交的切换次数
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// 提交一次成功的切换
    pub(crate) fn commit(&mut self, enable: bool) {
        self.regime = ControlRegime::from_enabled(enable);
        self.transitions += 1;
    }

    /// 转换为查询结果
    pub fn status(&self) -> ModeStatus {
        ModeStatus {
            active: self.is_active(),
            transitions: self.transitions,
            ..ModeStatus::default()
        }
    }
}

/// 共享的模式状态（注入协调器）
///
/// 克隆只复制句柄，所有克隆指向同一个状态。
#[derive(Debug, Clone, Default)]
pub struct SharedModeState {
    inner: Arc<Mutex<ModeState>>,
}

impl SharedModeState {
    pub fn new(initial: ModeState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    /// 获取状态锁
    pub fn lock(&self) -> MutexGuard<'_, ModeState> {
        self.inner.lock()
    }

    /// 限时获取状态锁；超时返回 `None`
    ///
    /// 协调器在整次切换期间持有该锁，并发的切换请求在此排队，最多等待 `timeout`。
    pub fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, ModeState>> {
        self.inner.try_lock_for(timeout)
    }

    /// 读取当前状态
    ///
    /// 如果有切换正在进行，会等待其结束。
    pub fn snapshot(&self) -> ModeState {
        *self.inner.lock()
    }
}
