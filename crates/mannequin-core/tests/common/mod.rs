//! 集成测试共享的 mock 协作服务
//!
//! 所有 mock 把调用写入同一个 [`CallLog`]，便于断言跨服务的调用顺序。

#![allow(dead_code)]

use mannequin_core::{
    ControllerManager, ControllerSets, CoordinatorBuilder, LookTarget, ModeCoordinator,
    ServiceError, SharedModeState, TopicPublisher, TrajectoryLock,
};
use mannequin_protocol::{
    SetBoolResponse, SetTargetRequest, SetTargetResponse, Strictness, SwitchControllerRequest,
    SwitchControllerResponse,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// 记录的一次调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetTarget { mode: String },
    Switch {
        start: Vec<String>,
        stop: Vec<String>,
        strictness: Strictness,
    },
    Lock { service: String, enable: bool },
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    pub fn lock_calls(&self) -> Vec<(String, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Lock { service, enable } => Some((service, enable)),
                _ => None,
            })
            .collect()
    }

    pub fn count_set_target(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::SetTarget { .. }))
            .count()
    }

    pub fn count_switch(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Switch { .. }))
            .count()
    }
}

/// 跟踪节点的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookBehavior {
    Accept,
    Reject,
    Unavailable,
}

/// 控制器管理器的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchBehavior {
    Accept,
    Reject,
    Unavailable,
}

pub struct MockLook {
    pub log: CallLog,
    pub behavior: Mutex<LookBehavior>,
}

impl LookTarget for MockLook {
    fn set_target(&self, request: &SetTargetRequest) -> Result<SetTargetResponse, ServiceError> {
        self.log.push(Call::SetTarget {
            mode: request.mode.clone(),
        });
        match *self.behavior.lock() {
            LookBehavior::Accept => Ok(SetTargetResponse {
                success: true,
                message: String::new(),
            }),
            LookBehavior::Reject => Ok(SetTargetResponse {
                success: false,
                message: "head busy".to_string(),
            }),
            LookBehavior::Unavailable => Err(ServiceError::NotRegistered {
                service: "/look/target".to_string(),
            }),
        }
    }
}

pub struct MockManager {
    pub log: CallLog,
    pub behavior: Mutex<SwitchBehavior>,
    /// 每次调用的耗时，用于并发测试
    pub delay: Duration,
}

impl ControllerManager for MockManager {
    fn switch_controllers(
        &self,
        request: &SwitchControllerRequest,
    ) -> Result<SwitchControllerResponse, ServiceError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.log.push(Call::Switch {
            start: request.start_controllers.clone(),
            stop: request.stop_controllers.clone(),
            strictness: request.strictness,
        });
        match *self.behavior.lock() {
            SwitchBehavior::Accept => Ok(SwitchControllerResponse { ok: true }),
            SwitchBehavior::Reject => Ok(SwitchControllerResponse { ok: false }),
            SwitchBehavior::Unavailable => Err(ServiceError::Timeout {
                service: "pr2_controller_manager/switch_controller".to_string(),
                timeout: Duration::from_millis(2000),
            }),
        }
    }
}

pub struct MockLocks {
    pub log: CallLog,
    /// 这些服务返回 `success == false`
    pub rejecting: Mutex<HashSet<String>>,
    /// 这些服务不可达
    pub unreachable: Mutex<HashSet<String>>,
}

impl TrajectoryLock for MockLocks {
    fn set_trajectory_lock(
        &self,
        service: &str,
        enable: bool,
    ) -> Result<SetBoolResponse, ServiceError> {
        self.log.push(Call::Lock {
            service: service.to_string(),
            enable,
        });
        if self.unreachable.lock().contains(service) {
            return Err(ServiceError::Unreachable {
                service: service.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        if self.rejecting.lock().contains(service) {
            return Ok(SetBoolResponse::failed("lock busy"));
        }
        Ok(SetBoolResponse::ok(""))
    }
}

pub fn strict_names() -> Vec<String> {
    ["head", "l_arm", "r_arm"].iter().map(|s| s.to_string()).collect()
}

pub fn loose_names() -> Vec<String> {
    ["head_loose", "l_arm_loose", "r_arm_loose"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn pr2_controllers() -> ControllerSets {
    ControllerSets::new(strict_names(), loose_names()).unwrap()
}

/// 组装好的测试环境
pub struct Fixture {
    pub log: CallLog,
    pub look: Arc<MockLook>,
    pub manager: Arc<MockManager>,
    pub locks: Arc<MockLocks>,
    pub publisher: Arc<TopicPublisher>,
    pub coordinator: Arc<ModeCoordinator>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_controllers(pr2_controllers(), Duration::ZERO)
    }

    pub fn with_controllers(controllers: ControllerSets, switch_delay: Duration) -> Self {
        Self::build(CoordinatorBuilder::new().controllers(controllers), switch_delay)
    }

    /// 指定调用超时（决定切换预算）
    pub fn with_call_timeout(switch_delay: Duration, call_timeout: Duration) -> Self {
        Self::build(
            CoordinatorBuilder::new()
                .controllers(pr2_controllers())
                .call_timeout(call_timeout),
            switch_delay,
        )
    }

    /// 注入已有的共享状态
    pub fn with_state(state: SharedModeState) -> Self {
        Self::build(
            CoordinatorBuilder::new()
                .controllers(pr2_controllers())
                .state(state),
            Duration::ZERO,
        )
    }

    fn build(builder: CoordinatorBuilder, switch_delay: Duration) -> Self {
        let log = CallLog::default();
        let look = Arc::new(MockLook {
            log: log.clone(),
            behavior: Mutex::new(LookBehavior::Accept),
        });
        let manager = Arc::new(MockManager {
            log: log.clone(),
            behavior: Mutex::new(SwitchBehavior::Accept),
            delay: switch_delay,
        });
        let locks = Arc::new(MockLocks {
            log: log.clone(),
            rejecting: Mutex::new(HashSet::new()),
            unreachable: Mutex::new(HashSet::new()),
        });
        let publisher = Arc::new(TopicPublisher::new());

        let coordinator = builder
            .look_target(look.clone())
            .controller_manager(manager.clone())
            .trajectory_lock(locks.clone())
            .publisher(publisher.clone())
            .build()
            .unwrap();

        Self {
            log,
            look,
            manager,
            locks,
            publisher,
            coordinator: Arc::new(coordinator),
        }
    }
}
