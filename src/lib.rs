//! SimFlow - 离散事件仿真内核
//!
//! 让应用代码针对虚拟时钟调度回调、确定性地推进时钟，并在多个协作
//! 执行层（仿真、实时 I/O、测试装配）之间安全地传播通知。
//!
//! # 架构分层
//!
//! - **调度抽象层**: 统一的 Scheduler 契约与取消句柄
//! - **调度实现层**: 离散事件（虚拟时间）与实时（挂钟节拍）两种驱动
//! - **层协调层**: 执行层标识、协调注册表与兄弟调度器
//! - **通知路由层**: 跨层发布/订阅，投递始终回到归属层的调度器
//!
//! # 特性
//!
//! - **确定性排序**: (时间, 插入序号) 稳定排序，同一输入必然同一执行顺序
//! - **惰性取消**: 竞技场 + 世代计数，过期句柄永远是安全空操作
//! - **快速失败**: 回调与处理器的失败向外传播，绝不静默吞掉
//! - **单线程执行**: 多线程入队，单线程执行，跨层交互只经通知路由器

pub mod config;
pub mod core;
pub mod error;
pub mod runner;
pub mod types;

// 重新导出核心类型
pub use config::*;
pub use core::*;
pub use error::*;
pub use runner::*;
pub use types::*;

/// 框架信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const FRAMEWORK_NAME: &str = "SimFlow";

/// 快速启动函数
pub fn initialize() -> Result<()> {
    // 初始化日志系统；重复初始化是安全空操作
    let _ = tracing_subscriber::fmt::try_init();

    tracing::info!("🚀 Initializing {} v{}", FRAMEWORK_NAME, VERSION);
    tracing::info!("⏱️  Modes: discrete virtual-time and wall-clock real-time");

    Ok(())
}
