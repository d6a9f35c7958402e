//! Builder 模式实现
//!
//! 提供链式构造 [`ModeCoordinator`] 的便捷方式。

use crate::collaborators::{ControllerManager, LookTarget, ModePublisher, TrajectoryLock};
use crate::config::{ControllerSets, DEFAULT_CALL_TIMEOUT_MS};
use crate::coordinator::ModeCoordinator;
use crate::error::ConfigError;
use crate::remote::RemoteCollaborators;
use crate::state::SharedModeState;
use std::sync::Arc;
use std::time::Duration;

/// 协调器 Builder（链式构造）
///
/// 控制器组、三个协作服务与发布者都是必需的；状态默认为常规模式，
/// 单次调用超时默认取远程实现的超时（没有时为 [`DEFAULT_CALL_TIMEOUT_MS`]）。
///
/// # Example
///
/// ```no_run
/// use mannequin_core::{CoordinatorBuilder, MannequinConfig, RemoteCollaborators, TopicPublisher};
/// use std::sync::Arc;
///
/// let config = MannequinConfig::load_from_file("mannequin.toml").unwrap();
/// let remote = Arc::new(RemoteCollaborators::from_config(&config.services).unwrap());
/// let coordinator = CoordinatorBuilder::new()
///     .controllers(config.controllers)
///     .remote(remote)
///     .publisher(Arc::new(TopicPublisher::new()))
///     .build()
///     .unwrap();
/// ```
#[derive(Default)]
pub struct CoordinatorBuilder {
    controllers: Option<ControllerSets>,
    look: Option<Arc<dyn LookTarget>>,
    manager: Option<Arc<dyn ControllerManager>>,
    locks: Option<Arc<dyn TrajectoryLock>>,
    publisher: Option<Arc<dyn ModePublisher>>,
    state: Option<SharedModeState>,
    call_timeout: Option<Duration>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置控制器组
    pub fn controllers(mut self, controllers: ControllerSets) -> Self {
        self.controllers = Some(controllers);
        self
    }

    pub fn look_target(mut self, look: Arc<dyn LookTarget>) -> Self {
        self.look = Some(look);
        self
    }

    pub fn controller_manager(mut self, manager: Arc<dyn ControllerManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn trajectory_lock(mut self, locks: Arc<dyn TrajectoryLock>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// 三个协作服务都使用同一个远程实现，并沿用其调用超时
    pub fn remote(self, remote: Arc<RemoteCollaborators>) -> Self {
        let timeout = remote.client().timeout();
        self.look_target(remote.clone())
            .controller_manager(remote.clone())
            .trajectory_lock(remote)
            .call_timeout(timeout)
    }

    /// 单次协作服务调用的超时，决定切换预算
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn ModePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// 注入共享状态（可选，默认常规模式）
    pub fn state(mut self, state: SharedModeState) -> Self {
        self.state = Some(state);
        self
    }

    /// 构建协调器
    ///
    /// # 错误
    ///
    /// 缺少任一必需组件时返回 [`ConfigError::Missing`]。
    pub fn build(self) -> Result<ModeCoordinator, ConfigError> {
        let controllers = self.controllers.ok_or(ConfigError::Missing("controllers"))?;
        let look = self.look.ok_or(ConfigError::Missing("look target"))?;
        let manager = self.manager.ok_or(ConfigError::Missing("controller manager"))?;
        let locks = self.locks.ok_or(ConfigError::Missing("trajectory lock"))?;
        let publisher = self.publisher.ok_or(ConfigError::Missing("publisher"))?;

        Ok(ModeCoordinator::new(
            controllers,
            look,
            manager,
            locks,
            publisher,
            self.state.unwrap_or_default(),
            self.call_timeout
                .unwrap_or(Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS)),
        ))
    }
}
