//! # Mannequin CLI
//!
//! 人偶模式服务的命令行客户端。
//!
//! ```bash
//! # 启用人偶模式（可以手动摆放关节）
//! mannequin-cli enable
//!
//! # 查询当前状态
//! mannequin-cli status
//!
//! # 持续打印状态与播报
//! mannequin-cli watch
//!
//! # 恢复常规模式
//! mannequin-cli --server 192.168.1.10:18900 disable
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{Connection, ModeCommand, StatusCommand, WatchCommand};

/// Mannequin CLI - 人偶模式命令行工具
#[derive(Parser, Debug)]
#[command(name = "mannequin-cli")]
#[command(about = "Command-line client for the mannequin mode server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connection: Connection,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 启用人偶模式
    Enable,

    /// 恢复常规模式
    Disable,

    /// 查询当前模式
    Status {
        #[command(flatten)]
        args: StatusCommand,
    },

    /// 订阅并打印模式状态与播报
    Watch {
        #[command(flatten)]
        args: WatchCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mannequin_cli=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Enable => ModeCommand { enable: true }.execute(&cli.connection),
        Commands::Disable => ModeCommand { enable: false }.execute(&cli.connection),
        Commands::Status { args } => args.execute(&cli.connection),
        Commands::Watch { args } => args.execute(&cli.connection),
    }
}
