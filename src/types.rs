//! 核心类型定义
//!
//! 虚拟时间、执行层标识和通知类型

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;

/// 纳秒时间戳
pub type TimestampNs = i64;

/// 虚拟时间（单位：秒）
///
/// 调度器本地时钟值，驱动事件排序。与挂钟时间无关，除非显式绑定。
/// 比较采用 `f64::total_cmp`，保证全序和确定性的排序结果。
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTime(f64);

impl SimTime {
    /// 虚拟时间零点
    pub const ZERO: SimTime = SimTime(0.0);

    /// 从秒数创建虚拟时间
    #[inline]
    pub fn new(seconds: f64) -> Self {
        SimTime(seconds)
    }

    /// 返回秒数表示
    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0
    }

    /// 返回 `self` 之后 `delay` 秒的时间点
    #[inline]
    pub fn after(self, delay: f64) -> SimTime {
        SimTime(self.0 + delay)
    }

    /// 是否为有限值（NaN/无穷在调度入口处被拒绝）
    #[inline]
    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T={}", self.0)
    }
}

/// 执行层标识
///
/// 区分协作调度器实例的不透明标签（如 "simulation"、"real_time"、
/// "test_harness"），仅作查找键使用，创建后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    /// 创建新的执行层标识
    pub fn new(name: impl Into<String>) -> Self {
        LayerId(name.into())
    }

    /// 返回标识名称
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LayerId {
    fn from(name: &str) -> Self {
        LayerId::new(name)
    }
}

/// 通知基础特征
///
/// 任何不可变值类型都可以作为通知广播给订阅者。
pub trait Notification: Send + Sync + Any {
    fn kind(&self) -> &'static str;

    /// 类型擦除转换
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_time_zero() {
        assert_eq!(SimTime::ZERO.as_secs_f64(), 0.0);
    }

    #[test]
    fn test_sim_time_ordering() {
        let t1 = SimTime::new(10.0);
        let t2 = SimTime::new(20.0);
        assert!(t1 < t2);
        assert_eq!(t1, SimTime::new(10.0));
    }

    #[test]
    fn test_sim_time_after() {
        let t = SimTime::new(100.0);
        assert_eq!(t.after(50.0), SimTime::new(150.0));
        assert_eq!(t.after(0.0), t);
    }

    #[test]
    fn test_sim_time_total_order_is_deterministic() {
        let mut times = vec![
            SimTime::new(3.0),
            SimTime::new(-1.0),
            SimTime::new(2.5),
            SimTime::new(0.0),
        ];
        times.sort();
        assert_eq!(
            times,
            vec![
                SimTime::new(-1.0),
                SimTime::new(0.0),
                SimTime::new(2.5),
                SimTime::new(3.0),
            ]
        );
    }

    #[test]
    fn test_sim_time_display() {
        assert_eq!(format!("{}", SimTime::new(42.0)), "T=42");
    }

    #[test]
    fn test_layer_id_equality() {
        let a = LayerId::new("simulation");
        let b = LayerId::from("simulation");
        let c = LayerId::new("real_time");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "simulation");
        assert_eq!(format!("{}", c), "real_time");
    }
}
