//! 核心内核模块
//!
//! 事件调度抽象及其离散/实时实现、执行层协调、跨层通知路由

pub mod bus;
pub mod clock;
pub mod discrete;
pub mod layer;
pub mod periodic;
pub mod queue;
pub mod realtime;
pub mod router;
pub mod scheduler;

// 重新导出核心组件
pub use bus::*;
pub use clock::*;
pub use discrete::*;
pub use layer::*;
pub use periodic::*;
pub use queue::*;
pub use realtime::*;
pub use router::*;
pub use scheduler::*;
