//! 进程内话题
//!
//! [`LatchedTopic`] 是一个简单的发布/订阅通道：
//! - 每个订阅者拥有独立的 crossbeam channel
//! - latched 话题保留最新值（ArcSwap 无锁读取），新订阅者立即收到
//! - 订阅者 Drop 后，下一次发布时自动移除
//!
//! [`TopicPublisher`] 把模式状态话题与播报话题组合起来，实现协调器的 [`ModePublisher`]。

use crate::collaborators::ModePublisher;
use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, Sender};
use mannequin_protocol::{MODE_STATE_TOPIC, SAY_TOPIC};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// 进程内话题
pub struct LatchedTopic<T> {
    name: String,
    latch: bool,
    latest: ArcSwapOption<T>,
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone + Send + Sync + 'static> LatchedTopic<T> {
    /// 创建 latched 话题
    pub fn latched(name: impl Into<String>) -> Self {
        Self::with_latch(name, true)
    }

    /// 创建普通话题（不保留最新值）
    pub fn volatile(name: impl Into<String>) -> Self {
        Self::with_latch(name, false)
    }

    fn with_latch(name: impl Into<String>, latch: bool) -> Self {
        Self {
            name: name.into(),
            latch,
            latest: ArcSwapOption::empty(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_latched(&self) -> bool {
        self.latch
    }

    /// 发布新值
    pub fn publish(&self, value: T) {
        // 持锁期间更新 latched 值，保证与 subscribe 之间不会漏发或重发
        let mut subscribers = self.subscribers.lock();
        if self.latch {
            self.latest.store(Some(Arc::new(value.clone())));
        }
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        if subscribers.len() != before {
            debug!(
                topic = %self.name,
                dropped = before - subscribers.len(),
                "Pruned disconnected subscribers"
            );
        }
    }

    /// 订阅话题
    ///
    /// latched 话题如果已有值，返回的 Receiver 中第一条即为该值。
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut subscribers = self.subscribers.lock();
        if let Some(latest) = self.latest.load_full() {
            let _ = tx.send((*latest).clone());
        }
        subscribers.push(tx);
        rx
    }

    /// latched 话题的最新值（普通话题始终为 `None`）
    pub fn latest(&self) -> Option<T> {
        self.latest.load_full().map(|value| (*value).clone())
    }

    /// 当前订阅者数量（包括尚未被清理的已断开订阅者）
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// 人偶模式话题组
///
/// - `mannequin_mode_active`: latched 布尔状态
/// - `/say`: 播报文本
pub struct TopicPublisher {
    state: LatchedTopic<bool>,
    say: LatchedTopic<String>,
}

impl Default for TopicPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicPublisher {
    pub fn new() -> Self {
        Self {
            state: LatchedTopic::latched(MODE_STATE_TOPIC),
            say: LatchedTopic::volatile(SAY_TOPIC),
        }
    }

    /// 模式状态话题
    pub fn state(&self) -> &LatchedTopic<bool> {
        &self.state
    }

    /// 播报话题
    pub fn say(&self) -> &LatchedTopic<String> {
        &self.say
    }
}

impl ModePublisher for TopicPublisher {
    fn publish_state(&self, active: bool) {
        self.state.publish(active);
    }

    fn announce(&self, message: &str) {
        self.say.publish(message.to_string());
    }
}
