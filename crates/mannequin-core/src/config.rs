//! # 配置
//!
//! 控制器列表与服务地址配置，启动时从 TOML 文件加载一次。
//!
//! ```toml
//! [controllers]
//! strict = ["head_traj_controller", "l_arm_controller", "r_arm_controller"]
//! loose = ["head_traj_controller_loose", "l_arm_controller_loose", "r_arm_controller_loose"]
//!
//! [services]
//! bind = "127.0.0.1:18900"
//! call_timeout_ms = 2000
//! default_endpoint = "127.0.0.1:18901"
//!
//! [services.endpoints]
//! "/look/target" = "127.0.0.1:18910"
//! ```

use crate::error::ConfigError;
use crate::transport::ServiceDirectory;
use mannequin_protocol::{LOOK_TARGET_SERVICE, SWITCH_CONTROLLER_SERVICE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

/// 默认服务监听地址
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:18900";

/// 默认单次服务调用超时（毫秒）
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 2000;

/// 原始控制器列表（未校验）
#[derive(Debug, Clone, Deserialize)]
struct ControllerLists {
    strict: Vec<String>,
    loose: Vec<String>,
}

impl TryFrom<ControllerLists> for ControllerSets {
    type Error = ConfigError;

    fn try_from(lists: ControllerLists) -> Result<Self, Self::Error> {
        ControllerSets::new(lists.strict, lists.loose)
    }
}

/// 严格/松弛控制器列表
///
/// 两个列表按下标一一对应（同一组关节），构造后不可修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ControllerLists")]
pub struct ControllerSets {
    strict: Vec<String>,
    loose: Vec<String>,
}

impl ControllerSets {
    /// 创建并校验控制器列表
    ///
    /// # 错误
    ///
    /// - 任一列表为空，或长度不一致
    /// - 存在空名称、列表内重复、或同一控制器同时出现在两个列表中
    pub fn new(strict: Vec<String>, loose: Vec<String>) -> Result<Self, ConfigError> {
        if strict.is_empty() || loose.is_empty() {
            return Err(ConfigError::EmptyControllerSet);
        }
        if strict.len() != loose.len() {
            return Err(ConfigError::LengthMismatch {
                strict: strict.len(),
                loose: loose.len(),
            });
        }

        let mut seen_strict = HashSet::new();
        for (index, name) in strict.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(ConfigError::EmptyName {
                    set: "strict",
                    index,
                });
            }
            if !seen_strict.insert(name.as_str()) {
                return Err(ConfigError::Duplicate(name.clone()));
            }
        }

        let mut seen_loose = HashSet::new();
        for (index, name) in loose.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(ConfigError::EmptyName {
                    set: "loose",
                    index,
                });
            }
            if !seen_loose.insert(name.as_str()) {
                return Err(ConfigError::Duplicate(name.clone()));
            }
            if seen_strict.contains(name.as_str()) {
                return Err(ConfigError::Overlap(name.clone()));
            }
        }

        Ok(Self { strict, loose })
    }

    /// 常规模式使用的刚性控制器
    pub fn strict(&self) -> &[String] {
        &self.strict
    }

    /// 人偶模式使用的松弛控制器
    pub fn loose(&self) -> &[String] {
        &self.loose
    }

    /// 关节组数量
    pub fn len(&self) -> usize {
        self.strict.len()
    }

    /// 永远为 false（构造时已保证非空）
    pub fn is_empty(&self) -> bool {
        self.strict.is_empty()
    }

    /// 切换方向：返回 `(start, stop)`
    ///
    /// - 启用：启动松弛控制器，停止刚性控制器
    /// - 关闭：启动刚性控制器，停止松弛控制器
    pub fn start_stop(&self, enable: bool) -> (&[String], &[String]) {
        if enable {
            (&self.loose, &self.strict)
        } else {
            (&self.strict, &self.loose)
        }
    }

    /// 按关节组遍历 `(strict, loose)` 对
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.strict
            .iter()
            .zip(self.loose.iter())
            .map(|(s, l)| (s.as_str(), l.as_str()))
    }
}

/// 服务配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// 本节点服务监听地址
    pub bind: String,

    /// 单次服务调用超时（毫秒）
    pub call_timeout_ms: u64,

    /// 跟踪节点目标设置服务名
    pub look_target: String,

    /// 控制器切换服务名
    pub switch_controller: String,

    /// 未单独列出的服务统一发往此地址（可选）
    pub default_endpoint: Option<String>,

    /// 服务名 → 地址
    pub endpoints: BTreeMap<String, String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND_ADDR.to_string(),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            look_target: LOOK_TARGET_SERVICE.to_string(),
            switch_controller: SWITCH_CONTROLLER_SERVICE.to_string(),
            default_endpoint: None,
            endpoints: BTreeMap::new(),
        }
    }
}

impl ServiceConfig {
    /// 单次服务调用超时
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// 解析监听地址
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve_addr("bind", &self.bind)
    }

    /// 构建服务目录
    pub fn directory(&self) -> Result<ServiceDirectory, ConfigError> {
        let mut directory = ServiceDirectory::new();
        if let Some(ref fallback) = self.default_endpoint {
            directory = directory.with_fallback(resolve_addr("default_endpoint", fallback)?);
        }
        for (name, value) in &self.endpoints {
            directory.register(name, resolve_addr(name, value)?);
        }
        Ok(directory)
    }
}

/// 解析 `host:port`（允许主机名）
pub(crate) fn resolve_addr(name: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ConfigError::InvalidAddress {
            name: name.to_string(),
            value: value.to_string(),
        })
}

/// 完整配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MannequinConfig {
    /// 控制器列表
    pub controllers: ControllerSets,

    /// 服务配置
    #[serde(default)]
    pub services: ServiceConfig,
}

impl MannequinConfig {
    /// 使用默认服务配置
    pub fn new(controllers: ControllerSets) -> Self {
        Self {
            controllers,
            services: ServiceConfig::default(),
        }
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        // 提前暴露地址错误，避免在第一次切换时才失败
        config.services.bind_addr()?;
        config.services.directory()?;
        Ok(config)
    }

    /// 从文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}
