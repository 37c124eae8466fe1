//! 周期调度辅助
//!
//! 纯粹基于调度器契约构建：每次触发先重新武装下一次触发，再调用回调，
//! 因此回调期间请求的取消作用在已入队的下一次上，保证不再有后续触发；
//! 已经弹出、正在执行的触发正常完成。

use crate::core::scheduler::{CancelToken, Scheduler};
use crate::error::{Result, SimFlowError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// 周期回调
pub type PeriodicCallback = Arc<dyn Fn() -> Result<()> + Send + Sync>;

struct PeriodicState {
    scheduler: Arc<dyn Scheduler>,
    period: f64,
    label: String,
    callback: PeriodicCallback,
    cancelled: AtomicBool,
    current: Mutex<Option<CancelToken>>,
}

impl PeriodicState {
    fn schedule_next(self: &Arc<Self>, delay: f64) -> Result<()> {
        // current 锁横跨 schedule 调用，触发线程与取消方不会对令牌竞争
        let mut current = self.current.lock();
        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(());
        }
        let state = self.clone();
        let token = self
            .scheduler
            .schedule_after(delay, &self.label, Box::new(move || state.fire()))?;
        *current = Some(token);
        Ok(())
    }

    fn fire(self: Arc<Self>) -> Result<()> {
        match self.schedule_next(self.period) {
            Ok(()) => {}
            // 调度器已停止：周期自然结束，不算回调失败
            Err(SimFlowError::SchedulerStopped { .. }) => return Ok(()),
            Err(e) => return Err(e),
        }
        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(());
        }
        (self.callback)()
    }
}

/// 周期调度句柄
///
/// 单个句柄管辖所有后续触发的取消。
pub struct PeriodicHandle {
    state: Arc<PeriodicState>,
}

impl std::fmt::Debug for PeriodicHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicHandle")
            .field("label", &self.state.label)
            .finish_non_exhaustive()
    }
}

impl PeriodicHandle {
    /// 停止所有后续重新调度；幂等，绝不报错
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        if let Some(token) = self.state.current.lock().take() {
            token.cancel();
        }
        debug!("Periodic schedule '{}' cancelled", self.state.label);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

/// 周期调度辅助
pub struct PeriodicSchedule;

impl PeriodicSchedule {
    /// 在 `initial_delay` 秒后首次触发，之后每 `period` 秒触发一次
    pub fn start_at(
        scheduler: Arc<dyn Scheduler>,
        initial_delay: f64,
        period: f64,
        label: &str,
        callback: PeriodicCallback,
    ) -> Result<PeriodicHandle> {
        if !period.is_finite() || period <= 0.0 {
            return Err(SimFlowError::InvalidDelay { value: period });
        }

        let state = Arc::new(PeriodicState {
            scheduler,
            period,
            label: label.to_string(),
            callback,
            cancelled: AtomicBool::new(false),
            current: Mutex::new(None),
        });
        state.schedule_next(initial_delay)?;
        Ok(PeriodicHandle { state })
    }
}
