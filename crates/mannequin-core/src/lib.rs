//! # Mannequin Core
//!
//! 人偶模式切换的核心层，包括：
//! - 模式切换协调器（有序流水线：停用跟踪 → 原子交换控制器 → 通知轨迹锁 → 提交发布）
//! - 模式状态（互斥锁保护，切换期间独占）
//! - 控制器组与服务配置（TOML）
//! - UDP 服务调用与话题订阅传输层
//! - 进程内 latched 话题
//!
//! # 使用示例
//!
//! ```no_run
//! use mannequin_core::{CoordinatorBuilder, MannequinConfig, RemoteCollaborators, TopicPublisher};
//! use std::sync::Arc;
//!
//! let config = MannequinConfig::load_from_file("mannequin.toml")?;
//! let publisher = Arc::new(TopicPublisher::new());
//! let coordinator = CoordinatorBuilder::new()
//!     .controllers(config.controllers.clone())
//!     .remote(Arc::new(RemoteCollaborators::from_config(&config.services)?))
//!     .publisher(publisher.clone())
//!     .build()?;
//!
//! let outcome = coordinator.set_mode(true);
//! println!("{}: {}", outcome.success, outcome.message);
//! # Ok::<(), mannequin_core::ConfigError>(())
//! ```

mod builder;
pub mod collaborators;
pub mod config;
pub mod coordinator;
mod error;
pub mod remote;
pub mod state;
pub mod topic;
pub mod transport;

pub use builder::CoordinatorBuilder;
pub use collaborators::{ControllerManager, LookTarget, ModePublisher, TrajectoryLock};
pub use config::{ControllerSets, MannequinConfig, ServiceConfig};
pub use coordinator::{LockWarning, ModeCoordinator, NotifyReport, TransitionOutcome, TransitionStep};
pub use error::{ConfigError, ServiceError, TransitionError};
pub use remote::RemoteCollaborators;
pub use state::{ControlRegime, ModeState, SharedModeState};
pub use topic::{LatchedTopic, TopicPublisher};
pub use transport::{
    Broadcaster, HostHandle, ServiceClient, ServiceDirectory, ServiceHost,
    Subscription,
};
