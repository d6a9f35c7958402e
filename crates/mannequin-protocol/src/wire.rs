//! UDP 数据报帧格式
//!
//! 服务调用与话题推送共用同一帧格式：8 字节消息头 + JSON 负载。
//! 负载固定为 `{"name": <服务名或话题名>, "body": <消息体>}`。

use crate::ProtocolError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// 消息头长度（字节）
pub const HEADER_LEN: usize = 8;

/// 单个 UDP 数据报的最大长度（IPv4）
pub const MAX_DATAGRAM: usize = 65_507;

/// 序列号有效位掩码（24 位）
pub const SEQ_MASK: u32 = 0x00FF_FFFF;

// ============================================================================
// Message Types
// ============================================================================

/// 消息类型枚举
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum MessageType {
    // 调用方 → 服务端
    Request = 0x01,     // 服务调用
    Subscribe = 0x02,   // 订阅话题
    Unsubscribe = 0x03, // 取消订阅
    Heartbeat = 0x04,   // 订阅保活

    // 服务端 → 调用方
    Response = 0x81,     // 服务响应
    Publish = 0x83,      // 话题推送
    SubscribeAck = 0x84, // 订阅确认
    Error = 0xFF,        // 错误消息
}

// ============================================================================
// Error Codes
// ============================================================================

/// 错误码枚举
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum ErrorCode {
    Unknown = 0x00,
    /// 对端没有注册该服务
    ServiceNotFound = 0x01,
    /// 请求无法解析
    InvalidMessage = 0x02,
    /// 处理函数返回错误
    HandlerFailed = 0x03,
}

/// 错误消息体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    #[serde(default)]
    pub detail: String,
}

// ============================================================================
// Message Header
// ============================================================================

/// 消息头（8 字节）
///
/// `length` 是负载长度，不包含消息头本身。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub msg_type: MessageType,
    pub flags: u8,
    pub length: u16,
    pub reserved: u8,
    pub seq: u32,
}

impl MessageHeader {
    /// 创建新的消息头（序列号截断为 24 位）
    pub fn new(msg_type: MessageType, length: u16, seq: u32) -> Self {
        Self {
            msg_type,
            flags: 0,
            length,
            reserved: 0,
            seq: seq & SEQ_MASK,
        }
    }

    /// 编码消息头
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.msg_type.into();
        buf[1] = self.flags;
        buf[2..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4] = self.reserved;
        buf[5..8].copy_from_slice(&self.seq.to_le_bytes()[..3]);
        buf
    }

    /// 从缓冲区解码消息头
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::TooShort {
                expected: HEADER_LEN,
                actual: buf.len(),
            });
        }

        let msg_type =
            MessageType::try_from(buf[0]).map_err(|_| ProtocolError::InvalidMessageType(buf[0]))?;

        Ok(Self {
            msg_type,
            flags: buf[1],
            length: u16::from_le_bytes([buf[2], buf[3]]),
            reserved: buf[4],
            seq: u32::from_le_bytes([buf[5], buf[6], buf[7], 0]),
        })
    }
}

// ============================================================================
// Message
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Envelope {
    name: String,
    #[serde(default)]
    body: serde_json::Value,
}

/// 完整协议消息
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub msg_type: MessageType,
    pub seq: u32,
    /// 服务名或话题名
    pub name: String,
    pub body: serde_json::Value,
}

impl Message {
    fn with_body<T: Serialize>(
        msg_type: MessageType,
        seq: u32,
        name: &str,
        body: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            msg_type,
            seq: seq & SEQ_MASK,
            name: name.to_string(),
            body: serde_json::to_value(body)?,
        })
    }

    /// 服务调用
    pub fn request<T: Serialize>(seq: u32, service: &str, body: &T) -> Result<Self, ProtocolError> {
        Self::with_body(MessageType::Request, seq, service, body)
    }

    /// 服务响应
    pub fn response<T: Serialize>(
        seq: u32,
        service: &str,
        body: &T,
    ) -> Result<Self, ProtocolError> {
        Self::with_body(MessageType::Response, seq, service, body)
    }

    /// 话题推送
    pub fn publish<T: Serialize>(seq: u32, topic: &str, body: &T) -> Result<Self, ProtocolError> {
        Self::with_body(MessageType::Publish, seq, topic, body)
    }

    /// 错误消息
    pub fn error(seq: u32, name: &str, code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::Error,
            seq: seq & SEQ_MASK,
            name: name.to_string(),
            body: serde_json::json!({ "code": u8::from(code), "detail": detail.into() }),
        }
    }

    /// 不带消息体的控制消息（订阅/取消订阅/保活/订阅确认）
    pub fn control(msg_type: MessageType, seq: u32, topic: &str) -> Self {
        Self {
            msg_type,
            seq: seq & SEQ_MASK,
            name: topic.to_string(),
            body: serde_json::Value::Null,
        }
    }

    /// 编码为数据报
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = serde_json::to_vec(&Envelope {
            name: self.name.clone(),
            body: self.body.clone(),
        })?;

        if payload.len() > MAX_DATAGRAM - HEADER_LEN {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }

        let header = MessageHeader::new(self.msg_type, payload.len() as u16, self.seq);
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// 从数据报解码
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let header = MessageHeader::decode(buf)?;
        let payload = &buf[HEADER_LEN..];
        if payload.len() != header.length as usize {
            return Err(ProtocolError::LengthMismatch {
                declared: header.length as usize,
                actual: payload.len(),
            });
        }

        let envelope: Envelope = serde_json::from_slice(payload)?;
        Ok(Self {
            msg_type: header.msg_type,
            seq: header.seq,
            name: envelope.name,
            body: envelope.body,
        })
    }

    /// 将消息体解析为具体类型
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(T::deserialize(&self.body)?)
    }

    /// 解析错误消息体
    ///
    /// 非 `Error` 消息或消息体损坏时返回 `Unknown`。
    pub fn error_body(&self) -> ErrorBody {
        self.body_as::<ErrorBody>().unwrap_or(ErrorBody {
            code: ErrorCode::Unknown,
            detail: String::new(),
        })
    }
}
