//! 查询当前模式

use super::Connection;
use anyhow::{Context, Result};
use clap::Args;
use mannequin_protocol::{Empty, GET_MANNEQUIN_MODE_SERVICE, ModeStatus};

/// 状态查询命令参数
#[derive(Args, Debug, Clone, Default)]
pub struct StatusCommand {
    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub fn execute(&self, connection: &Connection) -> Result<()> {
        let client = connection.client()?;
        let status: ModeStatus = client
            .call(GET_MANNEQUIN_MODE_SERVICE, &Empty {})
            .with_context(|| format!("querying {}", connection.server))?;

        if self.json {
            println!("{}", serde_json::to_string(&status)?);
        } else {
            println!("{}", describe(&status));
        }
        Ok(())
    }
}

fn describe(status: &ModeStatus) -> String {
    let mode = if status.active { "mannequin" } else { "strict" };
    format!("mode: {} (transitions: {})", mode, status.transitions)
}
