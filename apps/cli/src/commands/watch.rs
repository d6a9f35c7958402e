//! 订阅模式状态与播报

use super::Connection;
use anyhow::{Context, Result};
use clap::Args;
use mannequin_core::Subscription;
use mannequin_protocol::{BoolMsg, MODE_STATE_TOPIC, Message, SAY_TOPIC, StringMsg};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 检查 Ctrl+C 的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 订阅命令参数
#[derive(Args, Debug, Clone, Default)]
pub struct WatchCommand {
    /// 收到指定条数后退出（默认一直运行）
    #[arg(short = 'n', long)]
    pub count: Option<usize>,
}

impl WatchCommand {
    pub fn execute(&self, connection: &Connection) -> Result<()> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
            .context("failed to set Ctrl+C handler")?;

        let mut subscription = Subscription::open(
            connection.server_addr()?,
            &[MODE_STATE_TOPIC, SAY_TOPIC],
            connection.timeout(),
        )
        .with_context(|| format!("subscribing on {}", connection.server))?;

        let mut received = 0;
        while running.load(Ordering::SeqCst) {
            if self.count.is_some_and(|count| received >= count) {
                break;
            }
            if let Some(msg) = subscription.recv(POLL_INTERVAL)? {
                println!("{}", format_message(&msg));
                received += 1;
            }
        }
        Ok(())
    }
}

fn format_message(msg: &Message) -> String {
    match msg.name.as_str() {
        MODE_STATE_TOPIC => match msg.body_as::<BoolMsg>() {
            Ok(state) => format!("[{}] active = {}", MODE_STATE_TOPIC, state.data),
            Err(_) => format!("[{}] {}", MODE_STATE_TOPIC, msg.body),
        },
        SAY_TOPIC => match msg.body_as::<StringMsg>() {
            Ok(say) => format!("[{}] {}", SAY_TOPIC, say.data),
            Err(_) => format!("[{}] {}", SAY_TOPIC, msg.body),
        },
        other => format!("[{}] {}", other, msg.body),
    }
}
