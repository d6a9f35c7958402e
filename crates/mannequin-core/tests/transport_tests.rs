//! 传输层回环测试
//!
//! 在本机启动 [`ServiceHost`] 模拟机器人侧服务，通过 [`RemoteCollaborators`]
//! 驱动协调器完成端到端切换。

use mannequin_core::{
    CoordinatorBuilder, RemoteCollaborators, ServiceClient, ServiceDirectory, ServiceError,
    ServiceHost, Subscription, TopicPublisher,
};
use mannequin_core::config::ControllerSets;
use mannequin_protocol::{
    BoolMsg, Empty, ErrorCode, ModeStatus, SetBoolRequest, SetBoolResponse, SetTargetRequest, SetTargetResponse,
    Strictness, SwitchControllerRequest, SwitchControllerResponse,
};
use parking_lot::Mutex;
use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_millis(1000);

/// 机器人侧服务收到的请求
#[derive(Default)]
struct RobotLog {
    targets: Vec<String>,
    switches: Vec<SwitchControllerRequest>,
    locks: Vec<(String, bool)>,
}

fn spawn_robot(switch_ok: bool) -> (mannequin_core::HostHandle, Arc<Mutex<RobotLog>>) {
    let log = Arc::new(Mutex::new(RobotLog::default()));
    let mut host = ServiceHost::bind("127.0.0.1:0").unwrap();

    let l = log.clone();
    host.register("/look/target", move |req: SetTargetRequest| {
        l.lock().targets.push(req.mode);
        SetTargetResponse {
            success: true,
            message: String::new(),
        }
    });

    let l = log.clone();
    host.register(
        "pr2_controller_manager/switch_controller",
        move |req: SwitchControllerRequest| {
            l.lock().switches.push(req);
            SwitchControllerResponse { ok: switch_ok }
        },
    );

    for name in ["head_loose", "l_arm_loose"] {
        let l = log.clone();
        host.register(
            &format!("{}/set_trajectory_lock", name),
            move |req: SetBoolRequest| {
                l.lock().locks.push((name.to_string(), req.data));
                SetBoolResponse::ok("")
            },
        );
    }
    // r_arm_loose 没有注册：对端返回 ServiceNotFound

    (host.spawn().unwrap(), log)
}

fn controllers() -> ControllerSets {
    ControllerSets::new(
        vec!["head".into(), "l_arm".into(), "r_arm".into()],
        vec!["head_loose".into(), "l_arm_loose".into(), "r_arm_loose".into()],
    )
    .unwrap()
}

#[test]
fn test_round_trip_call() {
    let mut host = ServiceHost::bind("127.0.0.1:0").unwrap();
    host.register("echo", |req: SetBoolRequest| SetBoolResponse::ok(req.data.to_string()));
    let handle = host.spawn().unwrap();

    let directory = ServiceDirectory::new().with_fallback(handle.local_addr());
    let client = ServiceClient::new(directory, TIMEOUT);

    let response: SetBoolResponse = client.call("/echo", &SetBoolRequest::new(true)).unwrap();
    assert_eq!(response, SetBoolResponse::ok("true"));

    handle.shutdown();
}

#[test]
fn test_remote_errors() {
    let mut host = ServiceHost::bind("127.0.0.1:0").unwrap();
    host.register_fallible("broken", |_: SetBoolRequest| {
        Err::<SetBoolResponse, _>("motor fault".to_string())
    });
    let handle = host.spawn().unwrap();
    let client = ServiceClient::new(ServiceDirectory::new().with_fallback(handle.local_addr()), TIMEOUT);

    let err = client
        .call::<_, SetBoolResponse>("broken", &SetBoolRequest::new(true))
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Remote { code: ErrorCode::HandlerFailed, ref detail, .. } if detail == "motor fault"
    ));
    assert!(!err.is_unavailable());

    let err = client
        .call::<_, SetBoolResponse>("missing", &SetBoolRequest::new(true))
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Remote {
            code: ErrorCode::ServiceNotFound,
            ..
        }
    ));
    assert!(err.is_unavailable());
}

#[test]
fn test_end_to_end_enable() {
    let (handle, log) = spawn_robot(true);
    let client = ServiceClient::new(ServiceDirectory::new().with_fallback(handle.local_addr()), TIMEOUT);
    let publisher = Arc::new(TopicPublisher::new());

    let coordinator = CoordinatorBuilder::new()
        .controllers(controllers())
        .remote(Arc::new(RemoteCollaborators::new(Arc::new(client))))
        .publisher(publisher.clone())
        .build()
        .unwrap();

    let outcome = coordinator.set_mode(true);

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "mannequin mode is active");
    // 未注册的 r_arm_loose 只产生一条警告
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].controller, "r_arm_loose");

    let log = log.lock();
    assert_eq!(log.targets, vec!["inactive".to_string()]);
    assert_eq!(log.switches.len(), 1);
    assert_eq!(log.switches[0].strictness, Strictness::Strict);
    assert_eq!(log.switches[0].start_controllers[0], "head_loose");
    assert_eq!(
        log.locks,
        vec![
            ("head_loose".to_string(), true),
            ("l_arm_loose".to_string(), true)
        ]
    );
    assert_eq!(publisher.state().latest(), Some(true));
}

#[test]
fn test_end_to_end_swap_rejected() {
    let (handle, log) = spawn_robot(false);
    let client = ServiceClient::new(ServiceDirectory::new().with_fallback(handle.local_addr()), TIMEOUT);

    let coordinator = CoordinatorBuilder::new()
        .controllers(controllers())
        .remote(Arc::new(RemoteCollaborators::new(Arc::new(client))))
        .publisher(Arc::new(TopicPublisher::new()))
        .build()
        .unwrap();

    let outcome = coordinator.set_mode(false);
    assert!(!outcome.success);
    assert_eq!(outcome.message, "switching controllers failed");
    assert!(log.lock().locks.is_empty());
}

#[test]
fn test_controller_manager_timeout() {
    // 只收不回的控制器管理器
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut directory = ServiceDirectory::new();
    directory.register(
        "pr2_controller_manager/switch_controller",
        silent.local_addr().unwrap(),
    );
    let client = ServiceClient::new(directory, Duration::from_millis(200));

    let coordinator = CoordinatorBuilder::new()
        .controllers(controllers())
        .remote(Arc::new(RemoteCollaborators::new(Arc::new(client))))
        .publisher(Arc::new(TopicPublisher::new()))
        .build()
        .unwrap();

    let outcome = coordinator.set_mode(false);
    assert!(!outcome.success);
    assert!(
        outcome.message.starts_with("controller manager unavailable"),
        "{}",
        outcome.message
    );
}

#[test]
fn test_latched_subscription() {
    let host = ServiceHost::bind("127.0.0.1:0").unwrap();
    let broadcaster = host.broadcaster();
    let handle = host.spawn().unwrap();

    broadcaster
        .publish("mannequin_mode_active", &BoolMsg { data: true }, true)
        .unwrap();

    let mut subscription =
        Subscription::open(handle.local_addr(), &["mannequin_mode_active", "/say"], TIMEOUT)
            .unwrap();

    let msg = subscription.recv(TIMEOUT).unwrap().expect("latched value");
    assert_eq!(msg.name, "mannequin_mode_active");
    assert_eq!(msg.body_as::<BoolMsg>().unwrap(), BoolMsg { data: true });

    let delivered = broadcaster
        .publish("/say", &mannequin_protocol::StringMsg { data: "hi".into() }, false)
        .unwrap();
    assert_eq!(delivered, 1);
    let msg = subscription.recv(TIMEOUT).unwrap().expect("say message");
    assert_eq!(msg.name, "/say");

    // 没有更多推送
    assert!(subscription.recv(Duration::from_millis(100)).unwrap().is_none());
}

#[test]
fn test_query_answers_while_workers_busy() {
    let mut host = ServiceHost::bind("127.0.0.1:0").unwrap().workers(1);
    host.register("slow", |req: SetBoolRequest| {
        thread::sleep(Duration::from_millis(500));
        SetBoolResponse::ok(req.data.to_string())
    });
    host.register_query("status", |_: Empty| BoolMsg { data: true });
    let handle = host.spawn().unwrap();
    let directory = ServiceDirectory::new().with_fallback(handle.local_addr());

    let slow_client = ServiceClient::new(directory.clone(), TIMEOUT);
    let slow = thread::spawn(move || {
        slow_client.call::<_, SetBoolResponse>("slow", &SetBoolRequest::new(true))
    });
    thread::sleep(Duration::from_millis(50));

    // 唯一的工作线程被占用，查询仍在查询线程上答复
    let client = ServiceClient::new(directory, Duration::from_millis(200));
    let status: BoolMsg = client.call("status", &Empty {}).unwrap();
    assert!(status.data);

    assert!(slow.join().unwrap().unwrap().success);
}

/// 人偶模式服务及其依赖：跟踪与交换正常，轨迹锁全部无应答
struct ModeService {
    server: mannequin_core::HostHandle,
    _robot: mannequin_core::HostHandle,
    _silent: UdpSocket,
}

fn spawn_mode_service(call_timeout: Duration) -> ModeService {
    let (robot, _) = spawn_robot(true);
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let silent_addr = silent.local_addr().unwrap();

    let mut directory = ServiceDirectory::new().with_fallback(robot.local_addr());
    for name in ["head_loose", "l_arm_loose", "r_arm_loose"] {
        directory.register(&format!("{}/set_trajectory_lock", name), silent_addr);
    }
    let client = ServiceClient::new(directory, call_timeout);
    let coordinator = Arc::new(
        CoordinatorBuilder::new()
            .controllers(controllers())
            .remote(Arc::new(RemoteCollaborators::new(Arc::new(client))))
            .publisher(Arc::new(TopicPublisher::new()))
            .build()
            .unwrap(),
    );

    let mut host = ServiceHost::bind("127.0.0.1:0").unwrap();
    let c = coordinator.clone();
    host.register_timed("set_mannequin_mode", move |req: SetBoolRequest, received| {
        SetBoolResponse::from(c.set_mode_requested_at(req.data, received))
    });
    host.register_query("get_mannequin_mode", move |_: Empty| coordinator.status());
    ModeService {
        server: host.spawn().unwrap(),
        _robot: robot,
        _silent: silent,
    }
}

#[test]
fn test_slow_lock_fanout_outlasts_short_client_timeout() {
    // 每个轨迹锁调用都要等满 150ms
    let service = spawn_mode_service(Duration::from_millis(150));
    let directory = ServiceDirectory::new().with_fallback(service.server.local_addr());

    let impatient = ServiceClient::new(directory.clone(), Duration::from_millis(200));
    let result: Result<SetBoolResponse, _> =
        impatient.call("set_mannequin_mode", &SetBoolRequest::new(true));
    match result {
        Err(ServiceError::Timeout { service, timeout }) => {
            assert_eq!(service, "set_mannequin_mode");
            assert_eq!(timeout, Duration::from_millis(200));
        },
        other => panic!("expected timeout, got {:?}", other),
    }

    // 服务端公布的答复上限：2 × 150ms × (2 + 3)
    let query = ServiceClient::new(directory.clone(), Duration::from_millis(200));
    let status: ModeStatus = query.call("get_mannequin_mode", &Empty {}).unwrap();
    assert_eq!(status.max_reply(), Duration::from_millis(1500));

    // 按公布的上限等待的调用方总能收到答复，即使前一次切换仍在进行
    let patient = ServiceClient::new(directory, status.max_reply() + Duration::from_millis(500));
    let start = Instant::now();
    let response: SetBoolResponse = patient
        .call("set_mannequin_mode", &SetBoolRequest::new(false))
        .unwrap();
    assert!(start.elapsed() <= status.max_reply() + Duration::from_millis(500));
    assert!(response.success, "{}", response.message);
    assert_eq!(response.warnings.len(), 3);
    assert!(response.warnings[0].contains("timed out"), "{:?}", response.warnings);

    // 被放弃的那次启用也已提交
    let status: ModeStatus = query.call("get_mannequin_mode", &Empty {}).unwrap();
    assert!(!status.active);
    assert_eq!(status.transitions, 2);
}
