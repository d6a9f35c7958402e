//! 服务调用客户端

use super::ServiceDirectory;
use crate::error::ServiceError;
use mannequin_protocol::wire::{MAX_DATAGRAM, SEQ_MASK};
use mannequin_protocol::{Message, MessageType};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// 订阅保活间隔，须明显小于服务端的订阅者超时
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// 为目标地址绑定一个临时本地端口
fn bind_ephemeral(target: SocketAddr) -> io::Result<UdpSocket> {
    if target.is_ipv4() {
        UdpSocket::bind("0.0.0.0:0")
    } else {
        UdpSocket::bind("[::]:0")
    }
}

/// 服务调用客户端
///
/// 每次调用使用独立的临时 socket，因此可以在多个线程间共享（`&self`）。
/// 调用阻塞直到收到响应或超时，不自动重试。
pub struct ServiceClient {
    directory: ServiceDirectory,
    timeout: Duration,
    next_seq: AtomicU32,
}

impl ServiceClient {
    pub fn new(directory: ServiceDirectory, timeout: Duration) -> Self {
        Self {
            directory,
            timeout,
            next_seq: AtomicU32::new(1),
        }
    }

    /// 单次调用超时
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn next_seq(&self) -> u32 {
        self.next_seq.fetch_add(1, Ordering::Relaxed) & SEQ_MASK
    }

    /// 调用服务
    ///
    /// # 错误
    ///
    /// - `NotRegistered`: 服务目录中没有该服务
    /// - `Unreachable`: 发送失败或对端端口未监听
    /// - `Timeout`: 超时未收到响应
    /// - `Remote`: 对端返回错误帧
    /// - `Protocol`: 响应无法解析为 `Resp`
    pub fn call<Req, Resp>(&self, service: &str, request: &Req) -> Result<Resp, ServiceError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let addr = self
            .directory
            .resolve(service)
            .ok_or_else(|| ServiceError::NotRegistered {
                service: service.to_string(),
            })?;

        let seq = self.next_seq();
        let bytes = Message::request(seq, service, request)?.encode()?;

        let unreachable = |e: io::Error| ServiceError::Unreachable {
            service: service.to_string(),
            reason: e.to_string(),
        };

        let socket = bind_ephemeral(addr).map_err(unreachable)?;
        socket.connect(addr).map_err(unreachable)?;
        socket.send(&bytes).map_err(unreachable)?;
        debug!(service, %addr, seq, "Service request sent");

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ServiceError::Timeout {
                    service: service.to_string(),
                    timeout: self.timeout,
                });
            }
            socket.set_read_timeout(Some(remaining)).map_err(unreachable)?;

            let len = match socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Err(ServiceError::Timeout {
                        service: service.to_string(),
                        timeout: self.timeout,
                    });
                },
                Err(e) => return Err(unreachable(e)),
            };

            let msg = match Message::decode(&buf[..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(service, error = %e, "Dropping malformed datagram");
                    continue;
                },
            };

            if msg.seq != seq {
                trace!(service, expected = seq, got = msg.seq, "Dropping stale response");
                continue;
            }

            match msg.msg_type {
                MessageType::Response => return Ok(msg.body_as()?),
                MessageType::Error => {
                    let body = msg.error_body();
                    return Err(ServiceError::Remote {
                        service: service.to_string(),
                        code: body.code,
                        detail: body.detail,
                    });
                },
                other => {
                    trace!(service, ?other, "Ignoring unexpected message type");
                },
            }
        }
    }
}

/// 远端话题订阅
///
/// 订阅成功后，latched 话题的最新值会立即推送过来。
/// 在 [`recv`](Self::recv) 中每隔 [`HEARTBEAT_INTERVAL`] 发送一次保活，
/// 长时间不调用 `recv` 的订阅会被服务端清理。
/// Drop 时尽力发送取消订阅。
pub struct Subscription {
    socket: UdpSocket,
    topics: Vec<String>,
    pending: VecDeque<Message>,
    buf: Vec<u8>,
    last_heartbeat: Instant,
}

impl Subscription {
    /// 订阅 `server` 上的话题，等待每个话题的订阅确认
    pub fn open(
        server: SocketAddr,
        topics: &[&str],
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let name = topics.join(",");
        let unreachable = |e: io::Error| ServiceError::Unreachable {
            service: name.clone(),
            reason: e.to_string(),
        };

        let socket = bind_ephemeral(server).map_err(unreachable)?;
        socket.connect(server).map_err(unreachable)?;

        let mut subscription = Self {
            socket,
            topics: topics.iter().map(|t| t.to_string()).collect(),
            pending: VecDeque::new(),
            buf: vec![0u8; MAX_DATAGRAM],
            last_heartbeat: Instant::now(),
        };

        for (seq, topic) in topics.iter().enumerate() {
            let bytes = Message::control(MessageType::Subscribe, seq as u32, topic).encode()?;
            subscription.socket.send(&bytes).map_err(unreachable)?;
        }

        let deadline = Instant::now() + timeout;
        let mut acked = 0;
        while acked < topics.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match subscription.recv_raw(remaining).map_err(unreachable)? {
                Some(msg) if msg.msg_type == MessageType::SubscribeAck => acked += 1,
                Some(msg) => subscription.pending.push_back(msg),
                None => {
                    return Err(ServiceError::Timeout {
                        service: name.clone(),
                        timeout,
                    });
                },
            }
        }

        Ok(subscription)
    }

    fn recv_raw(&mut self, timeout: Duration) -> io::Result<Option<Message>> {
        if timeout.is_zero() {
            return Ok(None);
        }
        self.socket.set_read_timeout(Some(timeout))?;
        loop {
            match self.socket.recv(&mut self.buf) {
                Ok(len) => match Message::decode(&self.buf[..len]) {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) => warn!(error = %e, "Dropping malformed datagram"),
                },
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Ok(None);
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// 到期时向服务端发送保活
    fn heartbeat_if_due(&mut self) -> io::Result<()> {
        if self.last_heartbeat.elapsed() < HEARTBEAT_INTERVAL {
            return Ok(());
        }
        for topic in &self.topics {
            match Message::control(MessageType::Heartbeat, 0, topic).encode() {
                Ok(bytes) => {
                    self.socket.send(&bytes)?;
                },
                Err(e) => warn!(topic = %topic, error = %e, "Failed to encode heartbeat"),
            }
        }
        trace!(topics = self.topics.len(), "Subscription heartbeat sent");
        self.last_heartbeat = Instant::now();
        Ok(())
    }

    fn unreachable(&self, e: io::Error) -> ServiceError {
        ServiceError::Unreachable {
            service: self.topics.join(","),
            reason: e.to_string(),
        }
    }

    /// 接收下一条话题推送；超时返回 `None`
    pub fn recv(&mut self, timeout: Duration) -> Result<Option<Message>, ServiceError> {
        self.heartbeat_if_due().map_err(|e| self.unreachable(e))?;
        if let Some(msg) = self.pending.pop_front() {
            return Ok(Some(msg));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            // 分段等待，保证长时间等待期间也按时保活
            let until_heartbeat = HEARTBEAT_INTERVAL.saturating_sub(self.last_heartbeat.elapsed());
            let wait = remaining.min(until_heartbeat.max(Duration::from_millis(1)));
            match self.recv_raw(wait).map_err(|e| self.unreachable(e))? {
                Some(msg) if msg.msg_type == MessageType::Publish => return Ok(Some(msg)),
                Some(_) => continue,
                None => self.heartbeat_if_due().map_err(|e| self.unreachable(e))?,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for topic in &self.topics {
            if let Ok(bytes) = Message::control(MessageType::Unsubscribe, 0, topic).encode() {
                let _ = self.socket.send(&bytes);
            }
        }
    }
}
