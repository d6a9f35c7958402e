//! 服务端：请求分发与话题订阅管理
//!
//! 接收线程只负责收包、处理订阅消息；服务请求通过 crossbeam channel 交给工作线程处理。
//! 用 [`ServiceHost::register_query`] 注册的服务由独立的查询线程处理，
//! 因此即使所有工作线程都被耗时的请求（如模式切换）占用，查询仍能及时答复。

use mannequin_protocol::wire::MAX_DATAGRAM;
use mannequin_protocol::{ErrorCode, Message, MessageType, ProtocolError};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// 接收线程轮询关闭标志的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 请求队列容量
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// 订阅者超时：超过该时间既无订阅也无保活消息的订阅者会被清理
pub const SUBSCRIBER_TIMEOUT: Duration = Duration::from_secs(30);

/// 处理函数失败原因
#[derive(Debug, Clone, PartialEq, Eq)]
enum HandlerFailure {
    /// 请求体无法解析
    InvalidRequest(String),
    /// 处理函数返回错误
    Failed(String),
}

impl HandlerFailure {
    fn code(&self) -> ErrorCode {
        match self {
            HandlerFailure::InvalidRequest(_) => ErrorCode::InvalidMessage,
            HandlerFailure::Failed(_) => ErrorCode::HandlerFailed,
        }
    }

    fn detail(&self) -> &str {
        match self {
            HandlerFailure::InvalidRequest(detail) | HandlerFailure::Failed(detail) => detail,
        }
    }
}

/// 处理函数；第二个参数为接收线程收到请求的时刻
type Handler = Arc<
    dyn Fn(serde_json::Value, Instant) -> Result<serde_json::Value, HandlerFailure> + Send + Sync,
>;

/// 请求由哪类线程处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    /// 工作线程池
    Work,
    /// 独立查询线程
    Query,
}

struct Route {
    handler: Handler,
    lane: Lane,
}

type Routes = HashMap<String, Route>;

/// 排队中的请求：消息、对端地址、接收时刻
type Queued = (Message, SocketAddr, Instant);

// ============================================================================
// Subscriber Table
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Subscriber {
    addr: SocketAddr,
    last_active: Instant,
}

/// 话题订阅表
#[derive(Debug)]
struct SubscriberTable {
    /// 话题 → 订阅者
    topics: HashMap<String, Vec<Subscriber>>,
    /// latched 话题的最新值
    latched: HashMap<String, serde_json::Value>,
    timeout: Duration,
}

impl Default for SubscriberTable {
    fn default() -> Self {
        Self::with_timeout(SUBSCRIBER_TIMEOUT)
    }
}

impl SubscriberTable {
    fn with_timeout(timeout: Duration) -> Self {
        Self {
            topics: HashMap::new(),
            latched: HashMap::new(),
            timeout,
        }
    }

    /// 添加订阅者，返回该话题的 latched 值（如果有）
    ///
    /// 重复订阅只刷新活跃时间。
    fn subscribe(
        &mut self,
        topic: &str,
        addr: SocketAddr,
        now: Instant,
    ) -> Option<serde_json::Value> {
        let subscribers = self.topics.entry(topic.to_string()).or_default();
        match subscribers.iter_mut().find(|s| s.addr == addr) {
            Some(existing) => existing.last_active = now,
            None => subscribers.push(Subscriber {
                addr,
                last_active: now,
            }),
        }
        self.latched.get(topic).cloned()
    }

    fn unsubscribe(&mut self, topic: &str, addr: SocketAddr) {
        if let Some(subscribers) = self.topics.get_mut(topic) {
            subscribers.retain(|s| s.addr != addr);
        }
    }

    /// 保活；未订阅该话题时返回 `false`
    fn update_activity(&mut self, topic: &str, addr: SocketAddr, now: Instant) -> bool {
        let subscriber = self
            .topics
            .get_mut(topic)
            .and_then(|subscribers| subscribers.iter_mut().find(|s| s.addr == addr));
        match subscriber {
            Some(subscriber) => {
                subscriber.last_active = now;
                true
            },
            None => false,
        }
    }

    /// 清理超时的订阅者，返回清理数量
    fn cleanup_timeout(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let mut removed = 0;
        for (topic, subscribers) in self.topics.iter_mut() {
            subscribers.retain(|s| {
                let alive = now.saturating_duration_since(s.last_active) < timeout;
                if !alive {
                    debug!(topic = %topic, addr = %s.addr, "Subscriber timed out");
                    removed += 1;
                }
                alive
            });
        }
        removed
    }

    fn subscribers(&self, topic: &str) -> Vec<SocketAddr> {
        self.topics
            .get(topic)
            .map(|subscribers| subscribers.iter().map(|s| s.addr).collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Broadcaster
// ============================================================================

/// 话题推送器
///
/// 与 [`ServiceHost`] 共享 socket 与订阅表，可克隆后在任意线程中使用。
#[derive(Clone)]
pub struct Broadcaster {
    socket: Arc<UdpSocket>,
    table: Arc<Mutex<SubscriberTable>>,
    seq: Arc<AtomicU32>,
}

impl Broadcaster {
    /// 推送话题
    ///
    /// `latch == true` 时保留该值，之后的新订阅者会立即收到。
    /// 返回成功发送的订阅者数量；超时或发送失败的订阅者会被移除。
    pub fn publish<T: Serialize>(
        &self,
        topic: &str,
        value: &T,
        latch: bool,
    ) -> Result<usize, ProtocolError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let msg = Message::publish(seq, topic, value)?;
        let bytes = msg.encode()?;

        let subscribers = {
            let mut table = self.table.lock();
            if latch {
                table.latched.insert(topic.to_string(), msg.body.clone());
            }
            table.cleanup_timeout(Instant::now());
            table.subscribers(topic)
        };

        let mut delivered = 0;
        for addr in subscribers {
            match self.socket.send_to(&bytes, addr) {
                Ok(_) => delivered += 1,
                Err(e) => {
                    debug!(topic, %addr, error = %e, "Dropping subscriber after send failure");
                    self.table.lock().unsubscribe(topic, addr);
                },
            }
        }
        trace!(topic, delivered, "Topic published");
        Ok(delivered)
    }
}

// ============================================================================
// Service Host
// ============================================================================

/// 服务端
///
/// # 示例
///
/// ```rust,no_run
/// use mannequin_core::transport::ServiceHost;
/// use mannequin_protocol::{SetBoolRequest, SetBoolResponse};
///
/// let mut host = ServiceHost::bind("127.0.0.1:0").unwrap();
/// host.register("head_loose/set_trajectory_lock", |req: SetBoolRequest| {
///     SetBoolResponse::ok(format!("lock = {}", req.data))
/// });
/// let handle = host.spawn().unwrap();
/// println!("serving on {}", handle.local_addr());
/// ```
pub struct ServiceHost {
    socket: Arc<UdpSocket>,
    routes: Routes,
    table: Arc<Mutex<SubscriberTable>>,
    seq: Arc<AtomicU32>,
    workers: usize,
}

impl ServiceHost {
    /// 绑定监听地址
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        Ok(Self {
            socket: Arc::new(socket),
            routes: HashMap::new(),
            table: Arc::new(Mutex::new(SubscriberTable::default())),
            seq: Arc::new(AtomicU32::new(1)),
            workers: 2,
        })
    }

    /// 工作线程数（默认 2，至少 1）
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// 注册服务处理函数
    pub fn register<Req, Resp, F>(&mut self, service: &str, handler: F)
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        self.register_fallible(service, move |req: Req| Ok::<_, String>(handler(req)));
    }

    /// 注册可能失败的服务处理函数
    ///
    /// 处理函数返回 `Err` 时，调用方收到 `HandlerFailed` 错误帧。
    pub fn register_fallible<Req, Resp, F>(&mut self, service: &str, handler: F)
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        F: Fn(Req) -> Result<Resp, String> + Send + Sync + 'static,
    {
        self.insert(service, Lane::Work, move |req: Req, _| handler(req));
    }

    /// 注册需要知道请求接收时刻的服务处理函数
    ///
    /// 请求可能在队列中等待，处理函数可据此计算剩余的答复时限。
    pub fn register_timed<Req, Resp, F>(&mut self, service: &str, handler: F)
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        F: Fn(Req, Instant) -> Resp + Send + Sync + 'static,
    {
        self.insert(service, Lane::Work, move |req: Req, received| {
            Ok::<_, String>(handler(req, received))
        });
    }

    /// 注册查询服务，由独立的查询线程处理
    ///
    /// 查询处理函数必须很快返回，不得等待其他请求。
    pub fn register_query<Req, Resp, F>(&mut self, service: &str, handler: F)
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        self.insert(service, Lane::Query, move |req: Req, _| {
            Ok::<_, String>(handler(req))
        });
    }

    fn insert<Req, Resp, F>(&mut self, service: &str, lane: Lane, handler: F)
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        F: Fn(Req, Instant) -> Result<Resp, String> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(move |body: serde_json::Value, received: Instant| {
            let request: Req = serde_json::from_value(body)
                .map_err(|e| HandlerFailure::InvalidRequest(e.to_string()))?;
            let response = handler(request, received).map_err(HandlerFailure::Failed)?;
            serde_json::to_value(response).map_err(|e| HandlerFailure::Failed(e.to_string()))
        });
        self.routes.insert(
            service.trim_start_matches('/').to_string(),
            Route { handler, lane },
        );
    }

    /// 获取话题推送器
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster {
            socket: self.socket.clone(),
            table: self.table.clone(),
            seq: self.seq.clone(),
        }
    }

    /// 启动接收线程、工作线程与查询线程
    pub fn spawn(self) -> io::Result<HostHandle> {
        let local_addr = self.socket.local_addr()?;
        self.socket.set_read_timeout(Some(POLL_INTERVAL))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let routes = Arc::new(self.routes);
        let (work_tx, work_rx) = crossbeam_channel::bounded::<Queued>(REQUEST_QUEUE_CAPACITY);
        let (query_tx, query_rx) = crossbeam_channel::bounded::<Queued>(REQUEST_QUEUE_CAPACITY);

        let mut threads = Vec::with_capacity(self.workers + 2);
        let lanes = (0..self.workers)
            .map(|index| (format!("mannequin-worker-{}", index), work_rx.clone()))
            .chain(std::iter::once(("mannequin-query".to_string(), query_rx)));
        for (name, rx) in lanes {
            let socket = self.socket.clone();
            let routes = routes.clone();
            threads.push(thread::Builder::new().name(name).spawn(move || {
                // 接收线程退出后 channel 关闭，循环自然结束
                for (msg, peer, received) in rx.iter() {
                    let reply = dispatch(&routes, &msg, received);
                    send_reply(&socket, &reply, peer);
                }
            })?);
        }

        let socket = self.socket.clone();
        let table = self.table.clone();
        let flag = shutdown.clone();
        let queues = Queues {
            routes,
            work: work_tx,
            query: query_tx,
        };
        threads.push(
            thread::Builder::new()
                .name("mannequin-host".to_string())
                .spawn(move || receive_loop(&socket, &table, &queues, &flag))?,
        );

        info!(%local_addr, workers = self.workers, "Service host started");
        Ok(HostHandle {
            local_addr,
            shutdown,
            threads,
        })
    }
}

/// 接收线程持有的请求队列
struct Queues {
    routes: Arc<Routes>,
    work: crossbeam_channel::Sender<Queued>,
    query: crossbeam_channel::Sender<Queued>,
}

impl Queues {
    /// 按服务选择队列；未知服务交给工作线程答复 `ServiceNotFound`
    fn lane_for(&self, service: &str) -> &crossbeam_channel::Sender<Queued> {
        match self.routes.get(service.trim_start_matches('/')) {
            Some(route) if route.lane == Lane::Query => &self.query,
            _ => &self.work,
        }
    }
}

fn receive_loop(
    socket: &UdpSocket,
    table: &Mutex<SubscriberTable>,
    queues: &Queues,
    shutdown: &AtomicBool,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while !shutdown.load(Ordering::Relaxed) {
        let (len, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            },
            // 向已关闭的订阅者发送后，部分平台会在下一次 recv 上报告错误，忽略即可
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
            Err(e) => {
                error!(error = %e, "Service host receive failed");
                continue;
            },
        };
        let now = Instant::now();

        let msg = match Message::decode(&buf[..len]) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(%peer, error = %e, "Dropping malformed datagram");
                continue;
            },
        };

        match msg.msg_type {
            MessageType::Request => {
                if queues.lane_for(&msg.name).try_send((msg, peer, now)).is_err() {
                    warn!(%peer, "Request queue full, dropping request");
                }
            },
            MessageType::Subscribe => {
                let latched = table.lock().subscribe(&msg.name, peer, now);
                debug!(topic = %msg.name, %peer, "Subscriber added");
                send_reply(
                    socket,
                    &Message::control(MessageType::SubscribeAck, msg.seq, &msg.name),
                    peer,
                );
                if let Some(value) = latched {
                    let publish = Message {
                        msg_type: MessageType::Publish,
                        seq: 0,
                        name: msg.name.clone(),
                        body: value,
                    };
                    send_reply(socket, &publish, peer);
                }
            },
            MessageType::Unsubscribe => {
                table.lock().unsubscribe(&msg.name, peer);
                debug!(topic = %msg.name, %peer, "Subscriber removed");
            },
            MessageType::Heartbeat => {
                if !table.lock().update_activity(&msg.name, peer, now) {
                    trace!(topic = %msg.name, %peer, "Heartbeat from unknown subscriber");
                }
            },
            other => trace!(%peer, ?other, "Ignoring unexpected message type"),
        }
    }
    debug!("Service host receive loop stopped");
}

fn dispatch(routes: &Routes, msg: &Message, received: Instant) -> Message {
    let service = msg.name.as_str();
    let Some(route) = routes.get(service.trim_start_matches('/')) else {
        debug!(service, "Unknown service");
        return Message::error(
            msg.seq,
            service,
            ErrorCode::ServiceNotFound,
            format!("no service named {}", service),
        );
    };

    match (route.handler)(msg.body.clone(), received) {
        Ok(body) => Message {
            msg_type: MessageType::Response,
            seq: msg.seq,
            name: msg.name.clone(),
            body,
        },
        Err(failure) => {
            warn!(service, detail = failure.detail(), "Service handler failed");
            Message::error(msg.seq, service, failure.code(), failure.detail())
        },
    }
}

fn send_reply(socket: &UdpSocket, msg: &Message, peer: SocketAddr) {
    match msg.encode() {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, peer) {
                debug!(%peer, error = %e, "Failed to send reply");
            }
        },
        Err(e) => error!(error = %e, "Failed to encode reply"),
    }
}

/// 运行中的服务端句柄
///
/// Drop 时停止所有线程。
pub struct HostHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl HostHandle {
    /// 实际监听地址（绑定端口 0 时用于获取分配的端口）
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 停止并等待所有线程退出
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                error!("Service host thread panicked");
            }
        }
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_table() {
        let a: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:1001".parse().unwrap();
        let now = Instant::now();

        let mut table = SubscriberTable::default();
        assert!(table.subscribe("t", a, now).is_none());
        table.subscribe("t", a, now); // 重复订阅不重复添加
        table.subscribe("t", b, now);
        assert_eq!(table.subscribers("t"), vec![a, b]);

        table.latched.insert("t".to_string(), serde_json::json!({"data": true}));
        assert_eq!(
            table.subscribe("t", a, now),
            Some(serde_json::json!({"data": true}))
        );

        table.unsubscribe("t", a);
        assert_eq!(table.subscribers("t"), vec![b]);
        assert!(table.subscribers("other").is_empty());
    }

    #[test]
    fn test_subscriber_cleanup_timeout() {
        let a: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:1001".parse().unwrap();
        let start = Instant::now();

        let mut table = SubscriberTable::with_timeout(Duration::from_secs(30));
        table.subscribe("t", a, start);
        table.subscribe("t", b, start);

        // b 在 20s 时保活，a 沉默
        assert!(table.update_activity("t", b, start + Duration::from_secs(20)));
        assert!(!table.update_activity("other", b, start));

        assert_eq!(table.cleanup_timeout(start + Duration::from_secs(29)), 0);
        assert_eq!(table.cleanup_timeout(start + Duration::from_secs(31)), 1);
        assert_eq!(table.subscribers("t"), vec![b]);

        assert_eq!(table.cleanup_timeout(start + Duration::from_secs(50)), 1);
        assert!(table.subscribers("t").is_empty());
    }

    #[test]
    fn test_resubscribe_refreshes_activity() {
        let a: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        let start = Instant::now();

        let mut table = SubscriberTable::with_timeout(Duration::from_secs(30));
        table.subscribe("t", a, start);
        table.subscribe("t", a, start + Duration::from_secs(25));
        assert_eq!(table.cleanup_timeout(start + Duration::from_secs(40)), 0);
        assert_eq!(table.subscribers("t"), vec![a]);
    }

    #[test]
    fn test_dispatch_unknown_and_failed() {
        let mut host = ServiceHost::bind("127.0.0.1:0").unwrap();
        host.register_fallible("broken", |_: serde_json::Value| {
            Err::<serde_json::Value, _>("boom".to_string())
        });
        host.register("/echo", |req: serde_json::Value| req);

        let now = Instant::now();
        let unknown = dispatch(
            &host.routes,
            &Message::request(1, "missing", &serde_json::Value::Null).unwrap(),
            now,
        );
        assert_eq!(unknown.msg_type, MessageType::Error);
        assert_eq!(unknown.error_body().code, ErrorCode::ServiceNotFound);

        let failed = dispatch(
            &host.routes,
            &Message::request(2, "broken", &serde_json::Value::Null).unwrap(),
            now,
        );
        assert_eq!(failed.error_body().code, ErrorCode::HandlerFailed);
        assert_eq!(failed.error_body().detail, "boom");

        // 注册时的前导斜杠不影响匹配
        let echo = dispatch(
            &host.routes,
            &Message::request(3, "echo", &serde_json::json!({"x": 1})).unwrap(),
            now,
        );
        assert_eq!(echo.msg_type, MessageType::Response);
        assert_eq!(echo.seq, 3);
        assert_eq!(echo.body, serde_json::json!({"x": 1}));
    }

    #[test]
    fn test_dispatch_invalid_request_body() {
        let mut host = ServiceHost::bind("127.0.0.1:0").unwrap();
        host.register("set", |req: mannequin_protocol::SetBoolRequest| {
            mannequin_protocol::SetBoolResponse::ok(req.data.to_string())
        });

        let reply = dispatch(
            &host.routes,
            &Message::request(1, "set", &serde_json::json!({"data": "yes"})).unwrap(),
            Instant::now(),
        );
        assert_eq!(reply.error_body().code, ErrorCode::InvalidMessage);
    }

    #[test]
    fn test_timed_handler_sees_receive_time() {
        let mut host = ServiceHost::bind("127.0.0.1:0").unwrap();
        host.register_timed("age", |_: serde_json::Value, received: Instant| {
            received.elapsed() >= Duration::from_millis(50)
        });
        host.register_query("/status", |_: serde_json::Value| true);

        let received = Instant::now() - Duration::from_millis(100);
        let reply = dispatch(
            &host.routes,
            &Message::request(1, "age", &serde_json::Value::Null).unwrap(),
            received,
        );
        assert_eq!(reply.body, serde_json::json!(true));

        assert_eq!(host.routes["age"].lane, Lane::Work);
        assert_eq!(host.routes["status"].lane, Lane::Query);
    }
}
