//! # Mannequin Protocol
//!
//! 人偶模式（mannequin mode）服务/话题协议定义（无运行时依赖）
//!
//! ## 模块
//!
//! - `messages`: 服务请求/响应与话题负载类型，服务名/话题名常量
//! - `wire`: UDP 数据报帧格式（8 字节消息头 + JSON 负载）
//!
//! ## 帧格式
//!
//! ```text
//! +------+-------+------------+----------+-------------+----------------------+
//! | type | flags | length(LE) | reserved | seq (24bit) | JSON {name, body}    |
//! +------+-------+------------+----------+-------------+----------------------+
//!   1B     1B       2B           1B         3B            length 字节
//! ```

pub mod messages;
pub mod wire;

// 重新导出常用类型
pub use messages::*;
pub use wire::{ErrorBody, ErrorCode, Message, MessageHeader, MessageType};

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Message too short: {actual} bytes (header is {expected})")]
    TooShort { expected: usize, actual: usize },

    #[error("Invalid message type: 0x{0:02X}")]
    InvalidMessageType(u8),

    #[error("Payload length mismatch: header says {declared}, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
