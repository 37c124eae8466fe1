//! SimFlow 配置管理系统
//!
//! 支持 YAML 配置文件驱动的仿真装配

use crate::core::realtime::RealTimeConfig;
use crate::core::scheduler::SchedulerConfig;
use crate::error::{Result, SimFlowError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// 内核配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// 内核基础设置
    pub kernel: KernelSettings,
    /// 调度器配置
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// 实时调度配置
    #[serde(default)]
    pub realtime: RealTimeConfig,
    /// 执行层配置
    pub layers: Vec<LayerConfig>,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 内核基础设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelSettings {
    /// 仿真名称
    pub name: String,
    /// 版本
    pub version: String,
    /// 运行模式
    pub mode: RunMode,
}

/// 运行模式
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunMode {
    /// 纯虚拟时间
    VirtualTime,
    /// 挂钟节拍
    RealTime,
    /// 混合：虚拟层与实时层并存
    Hybrid,
}

/// 执行层配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    /// 层名称
    pub name: String,
    /// 层驱动方式
    pub kind: LayerKind,
    /// 组件参数
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// 是否启用
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// 执行层驱动方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LayerKind {
    /// 离散事件（调用方驱动的虚拟时间）
    Discrete,
    /// 实时（专用排空任务）
    RealTime,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,
    /// 是否启用详细日志
    pub verbose: bool,
}

/// 日志级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            kernel: KernelSettings {
                name: "SimFlow".to_string(),
                version: "1.0.0".to_string(),
                mode: RunMode::VirtualTime,
            },
            scheduler: SchedulerConfig::default(),
            realtime: RealTimeConfig::default(),
            layers: vec![
                LayerConfig {
                    name: "simulation".to_string(),
                    kind: LayerKind::Discrete,
                    parameters: HashMap::new(),
                    enabled: true,
                },
                LayerConfig {
                    name: "real_time".to_string(),
                    kind: LayerKind::RealTime,
                    parameters: HashMap::new(),
                    enabled: false,
                },
            ],
            logging: LoggingConfig {
                level: LogLevel::Info,
                verbose: false,
            },
        }
    }
}

impl KernelConfig {
    /// 从 YAML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// 从 YAML 字符串解析配置
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: KernelConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到 YAML 文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_queue_size == 0 {
            return Err(SimFlowError::config(
                "scheduler.max_queue_size must be positive",
            ));
        }

        let mut seen = HashSet::new();
        for layer in &self.layers {
            if layer.name.is_empty() {
                return Err(SimFlowError::config("layer name must not be empty"));
            }
            if !seen.insert(layer.name.clone()) {
                return Err(SimFlowError::DuplicateLayer {
                    layer: layer.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// 已启用的执行层
    pub fn enabled_layers(&self) -> impl Iterator<Item = &LayerConfig> {
        self.layers.iter().filter(|layer| layer.enabled)
    }
}
