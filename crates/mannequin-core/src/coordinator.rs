//! 人偶模式切换协调器
//!
//! 一次切换是一条有序流水线，任一中止点之后的步骤都不会执行，也不做回滚：
//!
//! 1. **SuspendTracking**（仅启用时）：停用跟踪节点
//! 2. **SwitchControllers**：严格模式下原子地交换两组控制器
//! 3. **NotifyLocks**：逐个通知松弛控制器开关轨迹锁，失败只记为警告
//! 4. **Commit**：提交状态、发布 latched 状态与播报文本
//!
//! 整条流水线在 [`SharedModeState`] 的锁内执行，并发的切换请求串行化。
//!
//! 每次远程调用最多耗时 `call_timeout`，因此一次流水线最多耗时
//! [`transition_budget`](ModeCoordinator::transition_budget)。等待锁同样以该时长为限
//! （从请求到达算起），超时则以 [`TransitionStep::WaitForLock`] 失败且不做任何调用，
//! 所以任一请求都能在两倍预算内得到答复，该上限通过 [`ModeStatus::max_reply_ms`] 对外公布。

use crate::collaborators::{ControllerManager, LookTarget, ModePublisher, TrajectoryLock};
use crate::config::ControllerSets;
use crate::error::TransitionError;
use crate::state::SharedModeState;
use arc_swap::ArcSwap;
use mannequin_protocol::{
    ModeStatus, SetBoolResponse, SetTargetRequest, Strictness, SwitchControllerRequest,
    announcement, trajectory_lock_service,
};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 流水线步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionStep {
    /// 等待进行中的切换结束
    WaitForLock,
    /// 停用跟踪
    SuspendTracking,
    /// 交换控制器
    SwitchControllers,
    /// 通知轨迹锁
    NotifyLocks,
    /// 提交并发布
    Commit,
}

impl TransitionStep {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionStep::WaitForLock => "wait_for_lock",
            TransitionStep::SuspendTracking => "suspend_tracking",
            TransitionStep::SwitchControllers => "switch_controllers",
            TransitionStep::NotifyLocks => "notify_locks",
            TransitionStep::Commit => "commit",
        }
    }
}

impl fmt::Display for TransitionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个松弛控制器轨迹锁通知失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockWarning {
    pub controller: String,
    pub service: String,
    pub reason: String,
}

impl fmt::Display for LockWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service, self.reason)
    }
}

/// 轨迹锁通知结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// 尝试通知的控制器数
    pub attempted: usize,
    pub warnings: Vec<LockWarning>,
}

impl NotifyReport {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.warnings.len()
    }
}

/// 一次切换的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub success: bool,
    /// 成功时为播报文本，失败时为中止原因
    pub message: String,
    pub failed_step: Option<TransitionStep>,
    pub warnings: Vec<LockWarning>,
    /// 切换结束后人偶模式是否激活
    pub active: bool,
}

impl From<TransitionOutcome> for SetBoolResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        SetBoolResponse {
            success: outcome.success,
            message: outcome.message,
            warnings: outcome.warnings.iter().map(ToString::to_string).collect(),
        }
    }
}

/// 人偶模式协调器
///
/// 通过 [`CoordinatorBuilder`](crate::CoordinatorBuilder) 构造。
pub struct ModeCoordinator {
    controllers: ControllerSets,
    look: Arc<dyn LookTarget>,
    manager: Arc<dyn ControllerManager>,
    locks: Arc<dyn TrajectoryLock>,
    publisher: Arc<dyn ModePublisher>,
    state: SharedModeState,
    committed: ArcSwap<ModeStatus>,
    call_timeout: Duration,
}

impl ModeCoordinator {
    pub(crate) fn new(
        controllers: ControllerSets,
        look: Arc<dyn LookTarget>,
        manager: Arc<dyn ControllerManager>,
        locks: Arc<dyn TrajectoryLock>,
        publisher: Arc<dyn ModePublisher>,
        state: SharedModeState,
        call_timeout: Duration,
    ) -> Self {
        let committed = ArcSwap::from_pointee(state.snapshot().status());
        Self {
            controllers,
            look,
            manager,
            locks,
            publisher,
            state,
            committed,
            call_timeout,
        }
    }

    pub fn controllers(&self) -> &ControllerSets {
        &self.controllers
    }

    pub fn state(&self) -> &SharedModeState {
        &self.state
    }

    /// 单次流水线的最长耗时：跟踪、交换各一次调用，加上每个松弛控制器一次调用
    pub fn transition_budget(&self) -> Duration {
        let calls = 2 + self.controllers.loose().len() as u32;
        self.call_timeout.saturating_mul(calls)
    }

    /// 最近一次提交的状态（不等待进行中的切换）
    pub fn status(&self) -> ModeStatus {
        let max_reply = self.transition_budget().saturating_mul(2);
        ModeStatus {
            max_reply_ms: u64::try_from(max_reply.as_millis()).unwrap_or(u64::MAX),
            ..**self.committed.load()
        }
    }

    /// 发布当前状态（服务启动时调用，不播报）
    pub fn publish_current_state(&self) {
        let active = self.status().active;
        self.publisher.publish_state(active);
    }

    /// 切换人偶模式
    ///
    /// 即使目标模式与当前模式相同，也会完整执行流水线。
    pub fn set_mode(&self, enable: bool) -> TransitionOutcome {
        self.set_mode_requested_at(enable, Instant::now())
    }

    /// 切换人偶模式，`requested_at` 为请求到达的时刻
    ///
    /// 到 `requested_at + transition_budget()` 仍未轮到本请求时放弃，状态不变。
    pub fn set_mode_requested_at(&self, enable: bool, requested_at: Instant) -> TransitionOutcome {
        let budget = self.transition_budget();
        let wait = requested_at
            .checked_add(budget)
            .map_or(budget, |deadline| deadline.saturating_duration_since(Instant::now()));
        let Some(mut state) = self.state.try_lock_for(wait) else {
            let err = TransitionError::Busy {
                waited: requested_at.elapsed(),
            };
            warn!(enable, error = %err, "Mode transition rejected");
            return TransitionOutcome {
                success: false,
                message: err.to_string(),
                failed_step: Some(err.step()),
                warnings: Vec::new(),
                active: self.status().active,
            };
        };
        info!(enable, active = state.is_active(), "Mode transition requested");

        match self.run_pipeline(enable) {
            Ok(report) => {
                state.commit(enable);
                let status = state.status();
                self.committed.store(Arc::new(status));

                let message = announcement(enable);
                self.publisher.publish_state(enable);
                self.publisher.announce(message);
                info!(
                    active = status.active,
                    transitions = status.transitions,
                    locks_ok = report.succeeded(),
                    lock_warnings = report.warnings.len(),
                    "Mode transition committed"
                );

                TransitionOutcome {
                    success: true,
                    message: message.to_string(),
                    failed_step: None,
                    warnings: report.warnings,
                    active: enable,
                }
            },
            Err(err) => {
                warn!(enable, step = %err.step(), error = %err, "Mode transition aborted");
                TransitionOutcome {
                    success: false,
                    message: err.to_string(),
                    failed_step: Some(err.step()),
                    warnings: Vec::new(),
                    active: state.is_active(),
                }
            },
        }
    }

    fn run_pipeline(&self, enable: bool) -> Result<NotifyReport, TransitionError> {
        if enable {
            self.suspend_tracking()?;
        }
        self.atomic_swap(enable)?;
        Ok(self.best_effort_notify(enable))
    }

    fn suspend_tracking(&self) -> Result<(), TransitionError> {
        debug!("Suspending head tracking");
        match self.look.set_target(&SetTargetRequest::inactive()) {
            Ok(response) if response.success => Ok(()),
            Ok(response) => {
                let reason = if response.message.is_empty() {
                    "look service rejected the request".to_string()
                } else {
                    response.message
                };
                Err(TransitionError::TrackingRejected(reason))
            },
            Err(e) if e.is_unavailable() => Err(TransitionError::TrackingUnavailable(e)),
            Err(e) => Err(TransitionError::TrackingRejected(e.to_string())),
        }
    }

    /// 严格模式下交换控制器组
    fn atomic_swap(&self, enable: bool) -> Result<(), TransitionError> {
        let (start, stop) = self.controllers.start_stop(enable);
        let request = SwitchControllerRequest {
            start_controllers: start.to_vec(),
            stop_controllers: stop.to_vec(),
            strictness: Strictness::Strict,
        };
        debug!(start = ?request.start_controllers, stop = ?request.stop_controllers, "Switching controllers");

        match self.manager.switch_controllers(&request) {
            Ok(response) if response.ok => Ok(()),
            Ok(_) => Err(TransitionError::SwitchRejected),
            Err(e) if e.is_unavailable() => Err(TransitionError::SwitchUnavailable(e)),
            Err(e) => {
                debug!(error = %e, "Controller manager returned an error");
                Err(TransitionError::SwitchRejected)
            },
        }
    }

    /// 逐个通知松弛控制器，失败不影响其余控制器
    fn best_effort_notify(&self, enable: bool) -> NotifyReport {
        let mut report = NotifyReport::default();
        for controller in self.controllers.loose() {
            let service = trajectory_lock_service(controller);
            report.attempted += 1;

            let reason = match self.locks.set_trajectory_lock(&service, enable) {
                Ok(response) if response.success => {
                    debug!(controller = %controller, enable, "Trajectory lock updated");
                    continue;
                },
                Ok(response) if response.message.is_empty() => "request rejected".to_string(),
                Ok(response) => response.message,
                Err(e) => e.to_string(),
            };

            warn!(controller = %controller, service = %service, reason = %reason, "Failed to set trajectory lock");
            report.warnings.push(LockWarning {
                controller: controller.clone(),
                service,
                reason,
            });
        }
        report
    }
}
