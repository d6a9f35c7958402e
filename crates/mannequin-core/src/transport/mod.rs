//! 服务传输层
//!
//! 基于 UDP 数据报的阻塞式服务调用与话题推送：
//! - [`ServiceClient`]: 按服务名解析地址、发送请求、等待匹配序列号的响应
//! - [`ServiceHost`]: 注册类型化处理函数，在后台线程中提供服务，并管理话题订阅者
//! - [`Broadcaster`]: 向订阅者推送话题（latched 话题保留最新值）
//! - [`Subscription`]: 订阅远端话题，并定期保活（服务端清理超过 [`SUBSCRIBER_TIMEOUT`] 未活跃的订阅者）

mod client;
mod host;

pub use client::{HEARTBEAT_INTERVAL, ServiceClient, Subscription};
pub use host::{Broadcaster, HostHandle, SUBSCRIBER_TIMEOUT, ServiceHost};

use std::collections::HashMap;
use std::net::SocketAddr;

/// 服务目录：服务名 → 地址
///
/// 服务名比较时忽略开头的 `/`，`/look/target` 与 `look/target` 视为同一服务。
#[derive(Debug, Clone, Default)]
pub struct ServiceDirectory {
    endpoints: HashMap<String, SocketAddr>,
    fallback: Option<SocketAddr>,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 未注册的服务统一解析到 `addr`
    pub fn with_fallback(mut self, addr: SocketAddr) -> Self {
        self.fallback = Some(addr);
        self
    }

    /// 注册服务地址（覆盖旧值）
    pub fn register(&mut self, service: &str, addr: SocketAddr) {
        self.endpoints.insert(normalize(service).to_string(), addr);
    }

    /// 解析服务地址
    pub fn resolve(&self, service: &str) -> Option<SocketAddr> {
        self.endpoints
            .get(normalize(service))
            .copied()
            .or(self.fallback)
    }

    /// 已显式注册的服务数量
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

fn normalize(service: &str) -> &str {
    service.trim_start_matches('/')
}
