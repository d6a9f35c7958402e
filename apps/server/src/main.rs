//! 人偶模式服务主入口
//!
//! 持有单例锁，加载配置，提供 `set_mannequin_mode` / `get_mannequin_mode`，
//! 直到收到 Ctrl+C。

mod server;
mod singleton;

use clap::Parser;
use mannequin_core::{ConfigError, ControllerSets, MannequinConfig};
use server::MannequinServer;
use singleton::SingletonLock;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// 人偶模式服务
///
/// 在严格控制器与低增益松弛控制器之间切换，允许手动摆放机器人关节
#[derive(Parser, Debug)]
#[command(name = "mannequin-server")]
#[command(about = "Mannequin mode coordinator - swaps strict and loose controllers on request", long_about = None)]
struct Args {
    /// TOML 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 服务监听地址（覆盖配置文件）
    ///
    /// 格式: IP:PORT (例如: 127.0.0.1:18900)
    #[arg(long)]
    bind: Option<String>,

    /// 严格控制器列表，逗号分隔（覆盖配置文件）
    #[arg(long, value_delimiter = ',')]
    strict: Vec<String>,

    /// 松弛控制器列表，逗号分隔，与 --strict 一一对应（覆盖配置文件）
    #[arg(long, value_delimiter = ',')]
    loose: Vec<String>,

    /// 未单独配置的服务统一发往此地址
    #[arg(long)]
    robot: Option<String>,

    /// 单次服务调用超时（毫秒）
    #[arg(long)]
    call_timeout_ms: Option<u64>,

    /// 请求工作线程数
    #[arg(long, default_value = "2")]
    workers: usize,

    /// 锁文件路径
    ///
    /// 默认: 自动选择用户可写目录（XDG_RUNTIME_DIR、缓存目录或临时目录）
    #[arg(long)]
    lock_file: Option<PathBuf>,

    /// 日志目录（每日轮转）；不指定时只输出到 stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

/// 合并配置文件与命令行参数
fn load_config(args: &Args) -> Result<MannequinConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => Some(MannequinConfig::load_from_file(path)?),
        None => None,
    };

    // 只给出一个列表时，另一个沿用配置文件
    if !args.strict.is_empty() || !args.loose.is_empty() {
        let pick = |flag: &Vec<String>, file: Option<&[String]>| match file {
            Some(file) if flag.is_empty() => file.to_vec(),
            _ => flag.clone(),
        };
        let file = config.as_ref().map(|c| &c.controllers);
        let controllers = ControllerSets::new(
            pick(&args.strict, file.map(ControllerSets::strict)),
            pick(&args.loose, file.map(ControllerSets::loose)),
        )?;
        match config.as_mut() {
            Some(config) => config.controllers = controllers,
            None => config = Some(MannequinConfig::new(controllers)),
        }
    }

    let mut config = config.ok_or(ConfigError::Missing("controllers (use --config or --strict/--loose)"))?;
    if let Some(ref bind) = args.bind {
        config.services.bind = bind.clone();
    }
    if let Some(ref robot) = args.robot {
        config.services.default_endpoint = Some(robot.clone());
    }
    if let Some(timeout) = args.call_timeout_ms {
        config.services.call_timeout_ms = timeout;
    }

    // 命令行覆盖后重新校验地址
    config.services.bind_addr()?;
    config.services.directory()?;
    Ok(config)
}

/// 初始化日志：stderr，加上可选的每日轮转文件
fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mannequin_server=info,mannequin_core=info"));

    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mannequin-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        },
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        },
    }
}

fn main() {
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_dir.as_ref());

    let lock_file = args.lock_file.clone().unwrap_or_else(singleton::default_lock_path);

    // 1. 单例锁（同一台机器人只允许一个协调器）
    let lock = match SingletonLock::try_lock(&lock_file) {
        Ok(lock) => lock,
        Err(e) => {
            error!(lock_file = %lock_file.display(), error = %e, "Failed to acquire singleton lock");
            eprintln!("Another instance of mannequin-server may be running.");
            process::exit(1);
        },
    };

    // 2. 配置
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            process::exit(2);
        },
    };

    // 3. Ctrl+C 优雅退出
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    }) {
        error!(error = %e, "Failed to set signal handler");
        process::exit(1);
    }

    // 4. 启动服务
    let server = match MannequinServer::start(&config, args.workers) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to start server");
            process::exit(1);
        },
    };

    info!(
        lock_file = %lock.path().display(),
        active = server.coordinator().status().active,
        "Press Ctrl+C to stop"
    );
    let _ = stop_rx.recv();

    info!("Received interrupt signal, shutting down");
    server.shutdown();
    drop(lock);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_from(std::iter::once("mannequin-server").chain(args.iter().copied()))
    }

    #[test]
    fn test_controllers_from_flags() {
        let args = parse(&[
            "--strict",
            "head,l_arm",
            "--loose",
            "head_loose,l_arm_loose",
            "--robot",
            "127.0.0.1:18901",
            "--call-timeout-ms",
            "500",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.controllers.strict(), ["head", "l_arm"]);
        assert_eq!(config.controllers.loose(), ["head_loose", "l_arm_loose"]);
        assert_eq!(config.services.call_timeout_ms, 500);
        assert_eq!(
            config.services.default_endpoint.as_deref(),
            Some("127.0.0.1:18901")
        );
    }

    #[test]
    fn test_missing_controllers() {
        let args = parse(&[]);
        assert!(matches!(load_config(&args), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mannequin.toml");
        std::fs::write(
            &path,
            r#"
[controllers]
strict = ["head"]
loose = ["head_loose"]

[services]
bind = "127.0.0.1:18900"
"#,
        )
        .unwrap();

        let path_arg = path.to_string_lossy().to_string();
        let args = parse(&["--config", &path_arg, "--bind", "127.0.0.1:0"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.controllers.loose(), ["head_loose"]);
        assert_eq!(config.services.bind, "127.0.0.1:0");

        let args = parse(&["--config", &path_arg, "--strict", "a,b"]);
        assert!(matches!(
            load_config(&args),
            Err(ConfigError::LengthMismatch { strict: 2, loose: 1 })
        ));
    }
}
