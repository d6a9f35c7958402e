//! 命令定义和实现

pub mod mode;
pub mod status;
pub mod watch;

pub use mode::ModeCommand;
pub use status::StatusCommand;
pub use watch::WatchCommand;

use anyhow::{Context, Result};
use clap::Args;
use mannequin_core::{ServiceClient, ServiceDirectory};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// 服务端连接参数（所有子命令共用）
#[derive(Args, Debug, Clone)]
pub struct Connection {
    /// 人偶模式服务地址
    #[arg(short, long, global = true, default_value = "127.0.0.1:18900")]
    pub server: String,

    /// 等待响应的超时（毫秒）
    ///
    /// 切换命令会按服务端公布的答复上限自动放宽，此值只作为下限
    #[arg(long, global = true, default_value_t = 15_000)]
    pub timeout_ms: u64,
}

impl Connection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 解析服务地址
    pub fn server_addr(&self) -> Result<SocketAddr> {
        self.server
            .to_socket_addrs()
            .with_context(|| format!("invalid server address {}", self.server))?
            .next()
            .with_context(|| format!("server address {} resolved to nothing", self.server))
    }

    /// 所有服务都发往同一个服务端的客户端
    pub fn client(&self) -> Result<ServiceClient> {
        self.client_with_timeout(self.timeout())
    }

    pub fn client_with_timeout(&self, timeout: Duration) -> Result<ServiceClient> {
        let directory = ServiceDirectory::new().with_fallback(self.server_addr()?);
        Ok(ServiceClient::new(directory, timeout))
    }
}
