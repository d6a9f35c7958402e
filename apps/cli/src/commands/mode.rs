//! 启用/关闭人偶模式
//!
//! 切换前先查询服务端公布的答复上限，等待时间取该上限与 `--timeout-ms` 中较大者。

use super::Connection;
use anyhow::{Context, Result, bail};
use mannequin_core::ServiceError;
use mannequin_protocol::{
    Empty, GET_MANNEQUIN_MODE_SERVICE, ModeStatus, SET_MANNEQUIN_MODE_SERVICE, SetBoolRequest,
    SetBoolResponse,
};
use std::time::Duration;
use tracing::debug;

/// 在服务端答复上限之外额外等待的时间（网络往返）
const REPLY_MARGIN: Duration = Duration::from_millis(1000);

/// 模式切换命令
#[derive(Debug, Clone, Copy)]
pub struct ModeCommand {
    pub enable: bool,
}

impl ModeCommand {
    pub fn execute(&self, connection: &Connection) -> Result<()> {
        let status: ModeStatus = connection
            .client()?
            .call(GET_MANNEQUIN_MODE_SERVICE, &Empty {})
            .with_context(|| format!("querying {}", connection.server))?;
        let timeout = reply_timeout(connection.timeout(), &status);
        debug!(
            server = %connection.server,
            enable = self.enable,
            timeout_ms = timeout.as_millis() as u64,
            "Requesting mode change"
        );

        let client = connection.client_with_timeout(timeout)?;
        let response: SetBoolResponse =
            match client.call(SET_MANNEQUIN_MODE_SERVICE, &SetBoolRequest::new(self.enable)) {
                Ok(response) => response,
                Err(ServiceError::Timeout { timeout, .. }) => bail!(
                    "no reply from {} within {:?}; the transition may still complete, \
                     run `mannequin-cli status` to check",
                    connection.server,
                    timeout
                ),
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("calling {} on {}", SET_MANNEQUIN_MODE_SERVICE, connection.server)
                    });
                },
            };

        print!("{}", render(&response));

        if !response.success {
            bail!("{}", response.message);
        }
        Ok(())
    }
}

/// 等待切换答复的时间：不小于服务端公布的上限加余量
fn reply_timeout(requested: Duration, status: &ModeStatus) -> Duration {
    requested.max(status.max_reply() + REPLY_MARGIN)
}

/// 格式化切换结果（含轨迹锁警告）
fn render(response: &SetBoolResponse) -> String {
    let mut out = String::new();
    if response.success {
        out.push_str(&format!("✅ {}\n", response.message));
    }
    for warning in &response.warnings {
        out.push_str(&format!("⚠️  trajectory lock: {}\n", warning));
    }
    out
}
