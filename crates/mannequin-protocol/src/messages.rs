//! 服务与话题消息定义
//!
//! 字段命名与机器人中间件中对应的 srv/msg 定义保持一致，便于与现有节点互通。

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// 服务名 / 话题名
// ============================================================================

/// 人偶模式切换服务（本节点提供）
pub const SET_MANNEQUIN_MODE_SERVICE: &str = "set_mannequin_mode";

/// 人偶模式查询服务（本节点提供）
pub const GET_MANNEQUIN_MODE_SERVICE: &str = "get_mannequin_mode";

/// 视线/跟踪节点的目标设置服务
pub const LOOK_TARGET_SERVICE: &str = "/look/target";

/// 控制器管理器的控制器切换服务
pub const SWITCH_CONTROLLER_SERVICE: &str = "pr2_controller_manager/switch_controller";

/// 松弛控制器轨迹锁服务名后缀
pub const TRAJECTORY_LOCK_SUFFIX: &str = "set_trajectory_lock";

/// 模式状态话题（latched）
pub const MODE_STATE_TOPIC: &str = "mannequin_mode_active";

/// 语音播报话题
pub const SAY_TOPIC: &str = "/say";

/// 跟踪节点的"停用"模式
pub const LOOK_MODE_INACTIVE: &str = "inactive";

/// 启用人偶模式后的播报文本
pub const ANNOUNCE_ACTIVE: &str = "mannequin mode is active";

/// 关闭人偶模式后的播报文本
pub const ANNOUNCE_DISABLED: &str = "disabled mannequin mode";

/// 拼接控制器的轨迹锁服务名：`<controller>/set_trajectory_lock`
pub fn trajectory_lock_service(controller: &str) -> String {
    format!("{}/{}", controller.trim_end_matches('/'), TRAJECTORY_LOCK_SUFFIX)
}

/// 根据新状态选择播报文本
pub fn announcement(active: bool) -> &'static str {
    if active {
        ANNOUNCE_ACTIVE
    } else {
        ANNOUNCE_DISABLED
    }
}

// ============================================================================
// 通用消息
// ============================================================================

/// 空请求
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// `SetBool` 请求
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBoolRequest {
    pub data: bool,
}

impl SetBoolRequest {
    pub fn new(data: bool) -> Self {
        Self { data }
    }
}

/// `SetBool` 响应
///
/// `warnings` 只在人偶模式切换服务中使用：切换成功但部分控制器轨迹锁通知失败时，
/// 在此列出失败项。其他服务不会填写该字段。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBoolResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SetBoolResponse {
    /// 成功响应
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            warnings: Vec::new(),
        }
    }

    /// 失败响应
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            warnings: Vec::new(),
        }
    }
}

/// 布尔话题负载
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolMsg {
    pub data: bool,
}

/// 字符串话题负载
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringMsg {
    pub data: String,
}

/// 人偶模式查询结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeStatus {
    /// 人偶模式是否激活
    pub active: bool,
    /// 自启动以来成功提交的切换次数
    pub transitions: u64,
    /// 服务端对 `set_mannequin_mode` 的最长答复时间（毫秒），包括排队等待
    ///
    /// 调用方的超时不应小于该值，否则可能在收到答复前放弃，而服务端随后仍会提交切换。
    #[serde(default)]
    pub max_reply_ms: u64,
}

impl ModeStatus {
    /// 服务端最长答复时间
    pub fn max_reply(&self) -> Duration {
        Duration::from_millis(self.max_reply_ms)
    }
}

// ============================================================================
// 跟踪节点
// ============================================================================

/// 三维点
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// 带坐标系的点
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointStamped {
    #[serde(default)]
    pub frame_id: String,
    pub point: Point,
}

/// 跟踪节点目标设置请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTargetRequest {
    pub mode: String,
    pub target: PointStamped,
    #[serde(default)]
    pub frame: String,
}

impl SetTargetRequest {
    /// 停用跟踪：模式 `inactive`，零点，空坐标系
    pub fn inactive() -> Self {
        Self {
            mode: LOOK_MODE_INACTIVE.to_string(),
            target: PointStamped::default(),
            frame: String::new(),
        }
    }
}

/// 跟踪节点目标设置响应
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTargetResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// 控制器管理器
// ============================================================================

/// 控制器切换严格程度
///
/// 数值与控制器管理器的 `SwitchController` 定义一致。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(i32)]
#[serde(into = "i32", try_from = "i32")]
pub enum Strictness {
    /// 尽力而为：能启动/停止的控制器照常处理
    BestEffort = 1,
    /// 严格：任一控制器失败则整体失败，不做部分切换
    Strict = 2,
}

impl Default for Strictness {
    fn default() -> Self {
        Self::Strict
    }
}

/// 控制器切换请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchControllerRequest {
    pub start_controllers: Vec<String>,
    pub stop_controllers: Vec<String>,
    pub strictness: Strictness,
}

/// 控制器切换响应
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchControllerResponse {
    pub ok: bool,
}
