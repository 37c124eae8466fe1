//! 时间源抽象
//!
//! 提供"当前虚拟时间"的读取。三种变体：可调节（测试控制）、挂钟派生
//! （实时调度）、调度器内部（由事件队列自身驱动，见 `discrete` 模块）。

use crate::types::SimTime;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// 时间源特征
#[cfg_attr(test, mockall::automock)]
pub trait TimeSource: Send + Sync {
    /// 当前虚拟时间
    fn now(&self) -> SimTime;
}

/// 可调节时间源
///
/// 由测试代码显式推进。读取方假定时间单调不减，调用方负责不回拨。
pub struct AdjustableTimeSource {
    current: Mutex<SimTime>,
}

impl AdjustableTimeSource {
    pub fn new(start: SimTime) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// 设置当前时间
    pub fn set(&self, time: SimTime) {
        *self.current.lock() = time;
    }

    /// 前进 `delta` 秒
    pub fn advance(&self, delta: f64) {
        let mut current = self.current.lock();
        *current = current.after(delta);
    }
}

impl TimeSource for AdjustableTimeSource {
    fn now(&self) -> SimTime {
        *self.current.lock()
    }
}

/// 挂钟派生时间源
///
/// 以创建时刻为零点，读取单调时钟的流逝秒数。
pub struct WallClockTimeSource {
    origin: Instant,
}

impl WallClockTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// 零点对应的挂钟时刻
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// 虚拟时间对应的挂钟时刻
    pub fn instant_at(&self, time: SimTime) -> Instant {
        self.origin + Duration::from_secs_f64(time.as_secs_f64().max(0.0))
    }
}

impl Default for WallClockTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClockTimeSource {
    fn now(&self) -> SimTime {
        SimTime::new(self.origin.elapsed().as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjustable_source() {
        let source = AdjustableTimeSource::new(SimTime::ZERO);
        assert_eq!(source.now(), SimTime::ZERO);

        source.advance(5.0);
        assert_eq!(source.now(), SimTime::new(5.0));

        source.set(SimTime::new(100.0));
        assert_eq!(source.now(), SimTime::new(100.0));
    }

    #[test]
    fn test_wall_clock_source_is_nondecreasing() {
        let source = WallClockTimeSource::new();
        let t1 = source.now();
        let t2 = source.now();
        assert!(t2 >= t1);
    }

    #[test]
    fn test_wall_clock_instant_at() {
        let source = WallClockTimeSource::new();
        let at = source.instant_at(SimTime::new(1.5));
        assert_eq!(at - source.origin(), Duration::from_secs_f64(1.5));
    }

    #[test]
    fn test_mock_time_source() {
        let mut mock = MockTimeSource::new();
        mock.expect_now().return_const(SimTime::new(7.0));
        assert_eq!(mock.now(), SimTime::new(7.0));
    }
}
