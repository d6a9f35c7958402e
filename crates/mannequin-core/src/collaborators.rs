//! 协作服务接口
//!
//! 协调器通过以下 trait 访问外部服务，具体实现可以是远程调用
//! （[`RemoteCollaborators`](crate::remote::RemoteCollaborators)），也可以是测试中的 mock。
//!
//! 所有方法都是阻塞调用。返回 `Err` 表示调用未完成（服务不可用、超时等），
//! 返回 `Ok` 时由协调器根据响应内容判断是否被拒绝。

use crate::error::ServiceError;
use mannequin_protocol::{
    SetBoolResponse, SetTargetRequest, SetTargetResponse, SwitchControllerRequest,
    SwitchControllerResponse,
};

/// 跟踪（视线）节点
pub trait LookTarget: Send + Sync {
    /// 设置跟踪目标；启用人偶模式前用于停用跟踪
    fn set_target(&self, request: &SetTargetRequest) -> Result<SetTargetResponse, ServiceError>;
}

/// 控制器管理器
pub trait ControllerManager: Send + Sync {
    /// 启动/停止控制器
    ///
    /// `Strictness::Strict` 时，控制器管理器保证要么全部切换成功，要么不做任何切换。
    fn switch_controllers(
        &self,
        request: &SwitchControllerRequest,
    ) -> Result<SwitchControllerResponse, ServiceError>;
}

/// 松弛控制器的轨迹锁
pub trait TrajectoryLock: Send + Sync {
    /// 开启/关闭轨迹锁
    ///
    /// `service` 为 `<controller>/set_trajectory_lock`。
    fn set_trajectory_lock(
        &self,
        service: &str,
        enable: bool,
    ) -> Result<SetBoolResponse, ServiceError>;
}

/// 模式状态发布
///
/// 发布是"发出即忘"的，不返回错误。
pub trait ModePublisher: Send + Sync {
    /// 发布人偶模式状态（latched）
    fn publish_state(&self, active: bool);

    /// 发布播报文本
    fn announce(&self, message: &str);
}
