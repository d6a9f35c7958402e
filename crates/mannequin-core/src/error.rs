//! 核心层错误类型定义

use crate::coordinator::TransitionStep;
use mannequin_protocol::{ErrorCode, ProtocolError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// 服务调用错误（传输层）
///
/// 只描述"调用是否到达并得到回复"，不解释回复内容。
/// 应用层拒绝（如 `ok == false`）由调用方自行判断。
#[derive(Error, Debug)]
pub enum ServiceError {
    /// 服务目录中没有该服务的地址
    #[error("Service {service} is not registered")]
    NotRegistered { service: String },

    /// 发送/接收失败（端口未监听、网络不可达等）
    #[error("Service {service} unreachable: {reason}")]
    Unreachable { service: String, reason: String },

    /// 等待响应超时
    #[error("Service {service} timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    /// 对端返回错误帧
    #[error("Service {service} returned {code:?}: {detail}")]
    Remote {
        service: String,
        code: ErrorCode,
        detail: String,
    },

    /// 帧格式错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ServiceError {
    /// 服务是否不可用（区别于应用层拒绝）
    pub fn is_unavailable(&self) -> bool {
        match self {
            ServiceError::NotRegistered { .. }
            | ServiceError::Unreachable { .. }
            | ServiceError::Timeout { .. } => true,
            ServiceError::Remote { code, .. } => *code == ErrorCode::ServiceNotFound,
            ServiceError::Protocol(_) => false,
        }
    }
}

/// 模式切换错误（协调器层）
///
/// 每个变体对应流水线中的一个中止点，`Display` 即返回给调用方的消息。
#[derive(Error, Debug)]
pub enum TransitionError {
    /// 跟踪节点不可用
    #[error("look service unavailable: {0}")]
    TrackingUnavailable(#[source] ServiceError),

    /// 跟踪节点拒绝停用
    #[error("deactivating look target failed: {0}")]
    TrackingRejected(String),

    /// 控制器管理器不可用
    #[error("controller manager unavailable: {0}")]
    SwitchUnavailable(#[source] ServiceError),

    /// 控制器管理器拒绝切换（严格模式下未做任何切换）
    #[error("switching controllers failed")]
    SwitchRejected,

    /// 另一次切换仍在进行，本请求未执行任何步骤
    #[error("another mode transition is still in progress after {waited:?}")]
    Busy { waited: Duration },
}

impl TransitionError {
    /// 中止发生的步骤
    pub fn step(&self) -> TransitionStep {
        match self {
            TransitionError::Busy { .. } => TransitionStep::WaitForLock,
            TransitionError::TrackingUnavailable(_) | TransitionError::TrackingRejected(_) => {
                TransitionStep::SuspendTracking
            },
            TransitionError::SwitchUnavailable(_) | TransitionError::SwitchRejected => {
                TransitionStep::SwitchControllers
            },
        }
    }

    /// 是否因服务不可用而中止
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            TransitionError::TrackingUnavailable(_) | TransitionError::SwitchUnavailable(_)
        )
    }
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 控制器列表为空
    #[error("Controller sets must not be empty")]
    EmptyControllerSet,

    /// 严格/松弛控制器列表长度不一致
    #[error("Controller sets are not parallel: {strict} strict vs {loose} loose")]
    LengthMismatch { strict: usize, loose: usize },

    /// 控制器名为空
    #[error("Empty controller name at index {index} of the {set} set")]
    EmptyName { set: &'static str, index: usize },

    /// 同一列表内重复
    #[error("Controller {0} is listed more than once")]
    Duplicate(String),

    /// 同时出现在两个列表中
    #[error("Controller {0} is both strict and loose")]
    Overlap(String),

    /// 地址无法解析
    #[error("Invalid address for {name}: {value}")]
    InvalidAddress { name: String, value: String },

    /// 构造协调器时缺少组件
    #[error("Missing component: {0}")]
    Missing(&'static str),

    /// 读取配置文件失败
    #[error("Failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML 解析失败
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
