//! 调度器契约与共享内核
//!
//! 定义 Scheduler 特征（调度、暂停/恢复、停止、取消）、生命周期状态、
//! 关闭回调语义，以及离散/实时两种实现共用的内核：互斥保护的事件队列，
//! 多线程入队、单线程执行。

use crate::core::clock::TimeSource;
use crate::core::queue::{Callback, EventQueue, ScheduledEvent};
use crate::error::{Result, SimFlowError};
use crate::types::{SimTime, TimestampNs};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info};

/// 调度器生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running, // 正在运行
    Paused,  // 已暂停，仍可入队
    Stopped, // 终态
}

/// 排空循环退出原因
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    /// 队列排空（或仅剩守护事件）
    Drained,
    /// 显式调用 stop()
    Stopped,
    /// 回调失败，错误已向调用方传播
    Failed { message: String },
}

/// 关闭回调，排空循环退出时恰好调用一次
pub type ShutdownCallback = Box<dyn FnOnce(ShutdownReason) + Send + 'static>;

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 事件队列容量
    pub max_queue_size: usize,
    /// 是否启用指标收集
    pub enable_metrics: bool,
    /// 创建后是否处于暂停态
    pub start_paused: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
            enable_metrics: true,
            start_paused: false,
        }
    }
}

/// 调度器统计信息
#[derive(Debug, Clone, Default)]
pub struct SchedulerMetrics {
    pub events_scheduled: u64,
    pub events_executed: u64,
    pub events_cancelled: u64,
    pub events_failed: u64,
    pub queue_size: usize,
    pub peak_queue_size: usize,
    pub captured_at: TimestampNs,
}

/// 调度器契约
///
/// 所有 schedule_* 调用均可从任意线程发起；回调执行本身绝不与同一
/// 调度器的其他回调并发。
pub trait Scheduler: Send + Sync {
    /// 调度器名称
    fn name(&self) -> &str;

    /// 在绝对虚拟时间 `time` 调度回调；早于当前时间则拒绝
    fn schedule_at(&self, time: SimTime, label: &str, callback: Callback) -> Result<CancelToken>;

    /// 延迟 `delay` 秒调度回调，`delay` 必须非负
    fn schedule_after(&self, delay: f64, label: &str, callback: Callback) -> Result<CancelToken>;

    /// 立即调度：保证在当前正在执行的回调之后运行，绝不重入调用方的栈
    fn schedule_now(&self, label: &str, callback: Callback) -> Result<CancelToken>;

    /// 守护调度：排序语义相同，但不计入"还有待处理工作"的判定
    fn schedule_daemon_after(
        &self,
        delay: f64,
        label: &str,
        callback: Callback,
    ) -> Result<CancelToken>;

    /// 暂停排空循环；新的调度调用仍然成功入队。
    ///
    /// 只冻结分发，不改变"当前虚拟时间"的定义：离散调度器的内部时钟
    /// 停在最后推进到的事件时间，挂钟时间源照常流逝。
    fn pause(&self) -> Result<()>;

    /// 恢复，并一次性排空所有当前已到期的事件，期间不插入人为间隔
    fn resume(&self) -> Result<()>;

    /// 停止（终态）。关闭回调恰好触发一次；之后的调度调用返回
    /// `SchedulerStopped` 而不是静默入队。
    fn stop(&self) -> Result<()>;

    /// 当前虚拟时间
    fn now(&self) -> SimTime;

    /// 当前状态
    fn state(&self) -> SchedulerState;

    /// 是否还有非守护的待处理事件
    fn has_pending_work(&self) -> bool;

    /// 指标快照
    fn metrics(&self) -> SchedulerMetrics;
}

/// 取消句柄
///
/// 只持有 (槽位, 世代) 查找关系，不持有事件本身。cancel() 幂等，
/// 对已触发、已取消或槽位已复用的事件是保证安全的空操作，绝不报错。
#[derive(Clone)]
pub struct CancelToken {
    inner: Weak<Mutex<CoreInner>>,
    slot: usize,
    generation: u64,
}

impl CancelToken {
    /// 取消所引用的事件（若尚未触发）
    pub fn cancel(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut guard = inner.lock();
            if guard.queue.cancel(self.slot, self.generation) {
                if guard.enable_metrics {
                    guard.metrics.events_cancelled += 1;
                    guard.metrics.queue_size = guard.queue.len();
                }
                debug!("Cancelled event at slot {} (gen {})", self.slot, self.generation);
            }
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

/// 内核共享状态，互斥锁序列化并发入队/取消与弹出
pub(crate) struct CoreInner {
    queue: EventQueue,
    state: SchedulerState,
    clock: SimTime,
    shutdown: Option<ShutdownCallback>,
    drain_active: bool,
    enable_metrics: bool,
    metrics: SchedulerMetrics,
}

/// 单次排空步骤的结果
pub(crate) enum DrainStep {
    /// 弹出了一个事件，锁外执行
    Execute(ScheduledEvent),
    /// 处于暂停态
    Paused,
    /// 已停止
    Stopped,
    /// 队列为空或仅剩守护事件
    Idle,
}

#[derive(Clone, Copy)]
enum When {
    At(SimTime),
    After(f64),
}

/// 调度器共享内核
pub(crate) struct SchedulerCore {
    name: String,
    inner: Arc<Mutex<CoreInner>>,
    /// None 表示内部时钟（仅随弹出的事件推进）
    time_source: Option<Arc<dyn TimeSource>>,
}

impl SchedulerCore {
    pub fn new(
        name: &str,
        config: &SchedulerConfig,
        time_source: Option<Arc<dyn TimeSource>>,
        shutdown: Option<ShutdownCallback>,
    ) -> Self {
        let state = if config.start_paused {
            SchedulerState::Paused
        } else {
            SchedulerState::Running
        };

        Self {
            name: name.to_string(),
            inner: Arc::new(Mutex::new(CoreInner {
                queue: EventQueue::new(config.max_queue_size),
                state,
                clock: SimTime::ZERO,
                shutdown,
                drain_active: false,
                enable_metrics: config.enable_metrics,
                metrics: SchedulerMetrics::default(),
            })),
            time_source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn now_locked(&self, inner: &CoreInner) -> SimTime {
        match &self.time_source {
            // 时间在一个调度器生命周期内单调不减
            Some(source) => source.now().max(inner.clock),
            None => inner.clock,
        }
    }

    pub fn now(&self) -> SimTime {
        let inner = self.inner.lock();
        self.now_locked(&inner)
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().state
    }

    pub fn has_pending_work(&self) -> bool {
        self.inner.lock().queue.has_pending_work()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let inner = self.inner.lock();
        let mut metrics = inner.metrics.clone();
        metrics.queue_size = inner.queue.len();
        metrics.captured_at = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        metrics
    }

    fn schedule_impl(
        &self,
        when: When,
        label: &str,
        daemon: bool,
        callback: Callback,
    ) -> Result<CancelToken> {
        match when {
            When::At(time) if !time.is_finite() => {
                return Err(SimFlowError::InvalidDelay {
                    value: time.as_secs_f64(),
                });
            }
            When::After(delay) if !delay.is_finite() || delay < 0.0 => {
                return Err(SimFlowError::InvalidDelay { value: delay });
            }
            _ => {}
        }

        let mut inner = self.inner.lock();
        if inner.state == SchedulerState::Stopped {
            return Err(SimFlowError::SchedulerStopped {
                scheduler: self.name.clone(),
            });
        }

        let now = self.now_locked(&inner);
        let time = match when {
            When::At(time) => {
                if time < now {
                    return Err(SimFlowError::TimeOrdering {
                        requested: time.as_secs_f64(),
                        current: now.as_secs_f64(),
                    });
                }
                time
            }
            When::After(delay) => now.after(delay),
        };

        let (slot, generation, seq) = inner.queue.insert(time, label.to_string(), daemon, callback)?;

        if inner.enable_metrics {
            inner.metrics.events_scheduled += 1;
            let size = inner.queue.len();
            inner.metrics.queue_size = size;
            if size > inner.metrics.peak_queue_size {
                inner.metrics.peak_queue_size = size;
            }
        }

        debug!(
            "Scheduled event '{}' on '{}' at {} (seq {}, daemon: {})",
            label, self.name, time, seq, daemon
        );

        Ok(CancelToken {
            inner: Arc::downgrade(&self.inner),
            slot,
            generation,
        })
    }

    pub fn schedule_at(&self, time: SimTime, label: &str, callback: Callback) -> Result<CancelToken> {
        self.schedule_impl(When::At(time), label, false, callback)
    }

    pub fn schedule_after(&self, delay: f64, label: &str, callback: Callback) -> Result<CancelToken> {
        self.schedule_impl(When::After(delay), label, false, callback)
    }

    pub fn schedule_now(&self, label: &str, callback: Callback) -> Result<CancelToken> {
        // 入队在当前时间点：同时间事件按插入序号排序，因此必然排在
        // 正在执行的回调之后，不会重入
        self.schedule_impl(When::After(0.0), label, false, callback)
    }

    pub fn schedule_daemon_after(
        &self,
        delay: f64,
        label: &str,
        callback: Callback,
    ) -> Result<CancelToken> {
        self.schedule_impl(When::After(delay), label, true, callback)
    }

    pub fn pause(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            SchedulerState::Stopped => Err(SimFlowError::SchedulerStopped {
                scheduler: self.name.clone(),
            }),
            SchedulerState::Paused => Ok(()),
            SchedulerState::Running => {
                inner.state = SchedulerState::Paused;
                info!("Scheduler '{}' paused", self.name);
                Ok(())
            }
        }
    }

    /// resume 的状态翻转部分；到期事件的排空由各实现负责
    pub fn mark_running(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            SchedulerState::Stopped => Err(SimFlowError::SchedulerStopped {
                scheduler: self.name.clone(),
            }),
            SchedulerState::Running => Ok(()),
            SchedulerState::Paused => {
                inner.state = SchedulerState::Running;
                info!("Scheduler '{}' resumed", self.name);
                Ok(())
            }
        }
    }

    /// 转入终态。若当前没有活动的排空循环，返回需要立刻执行的关闭回调；
    /// 否则由排空循环在退出时执行。
    pub fn request_stop(&self) -> Option<(ShutdownCallback, ShutdownReason)> {
        let mut inner = self.inner.lock();
        if inner.state == SchedulerState::Stopped {
            return None;
        }
        inner.state = SchedulerState::Stopped;
        info!("Scheduler '{}' stopped", self.name);

        if inner.drain_active {
            None
        } else {
            inner
                .shutdown
                .take()
                .map(|callback| (callback, ShutdownReason::Stopped))
        }
    }

    /// 标记排空循环开始；同一调度器同时只允许一个排空者
    pub fn begin_drain(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.drain_active {
            return Err(SimFlowError::internal(&format!(
                "scheduler '{}' already has an active drain loop",
                self.name
            )));
        }
        inner.drain_active = true;
        Ok(())
    }

    /// 排空循环因暂停让出，调度器保持可恢复
    pub fn yield_drain(&self) {
        self.inner.lock().drain_active = false;
    }

    /// 排空循环退出：转入终态并取出关闭回调
    pub fn finish_drain(&self, reason: ShutdownReason) -> Option<(ShutdownCallback, ShutdownReason)> {
        let mut inner = self.inner.lock();
        inner.drain_active = false;
        inner.state = SchedulerState::Stopped;
        inner
            .shutdown
            .take()
            .map(|callback| (callback, reason))
    }

    /// 离散排空的下一步：推进内部时钟到最小事件时间并弹出
    pub fn next_virtual_step(&self) -> DrainStep {
        let mut inner = self.inner.lock();
        match inner.state {
            SchedulerState::Stopped => DrainStep::Stopped,
            SchedulerState::Paused => DrainStep::Paused,
            SchedulerState::Running => {
                if !inner.queue.has_pending_work() {
                    return DrainStep::Idle;
                }
                match inner.queue.pop() {
                    Some(event) => {
                        // 时间只向前推进
                        if event.time > inner.clock {
                            inner.clock = event.time;
                        }
                        DrainStep::Execute(event)
                    }
                    None => DrainStep::Idle,
                }
            }
        }
    }

    /// 弹出一个已到期事件（time <= 当前时间），不推进时钟定义
    pub fn pop_due(&self) -> Option<ScheduledEvent> {
        let mut inner = self.inner.lock();
        if inner.state != SchedulerState::Running {
            return None;
        }
        let now = self.now_locked(&inner);
        match inner.queue.peek() {
            Some((time, _, _)) if time <= now => {
                let event = inner.queue.pop()?;
                if event.time > inner.clock {
                    inner.clock = event.time;
                }
                Some(event)
            }
            _ => None,
        }
    }

    /// 下一个待处理事件的时间
    pub fn next_event_time(&self) -> Option<SimTime> {
        let mut inner = self.inner.lock();
        inner.queue.peek().map(|(time, _, _)| time)
    }

    pub fn record_executed(&self, success: bool) {
        let mut inner = self.inner.lock();
        if inner.enable_metrics {
            inner.metrics.events_executed += 1;
            if !success {
                inner.metrics.events_failed += 1;
            }
            inner.metrics.queue_size = inner.queue.len();
        }
    }

    /// 内部时钟的 TimeSource 视图（调度器内部时间源变体）
    pub fn clock_view(&self) -> Arc<dyn TimeSource> {
        Arc::new(CoreClock {
            inner: Arc::downgrade(&self.inner),
        })
    }
}

/// 由事件队列自身驱动的时间源：读取内核时钟
struct CoreClock {
    inner: Weak<Mutex<CoreInner>>,
}

impl TimeSource for CoreClock {
    fn now(&self) -> SimTime {
        self.inner
            .upgrade()
            .map(|inner| inner.lock().clock)
            .unwrap_or(SimTime::ZERO)
    }
}

/// 事件执行器
///
/// 调用回调；未捕获的失败原样向外传播，绝不吞掉。
pub(crate) struct EventExecutor {
    scheduler: String,
}

impl EventExecutor {
    pub fn new(name: &str) -> Self {
        Self {
            scheduler: name.to_string(),
        }
    }

    pub fn execute(&self, event: ScheduledEvent) -> Result<()> {
        debug!(
            "Executing event '{}' on '{}' at {}",
            event.label, self.scheduler, event.time
        );
        let label = event.label;
        match (event.callback)() {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    "Event '{}' on '{}' failed: {}",
                    label, self.scheduler, e
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::MockTimeSource;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn core_with_clock_at(now: f64) -> SchedulerCore {
        let mut source = MockTimeSource::new();
        source.expect_now().return_const(SimTime::new(now));
        SchedulerCore::new(
            "test",
            &SchedulerConfig::default(),
            Some(Arc::new(source)),
            None,
        )
    }

    #[test]
    fn test_schedule_in_past_is_rejected() {
        let core = core_with_clock_at(10.0);
        let err = core
            .schedule_at(SimTime::new(5.0), "late", Box::new(|| Ok(())))
            .unwrap_err();
        assert!(matches!(
            err,
            SimFlowError::TimeOrdering {
                requested,
                current
            } if requested == 5.0 && current == 10.0
        ));
    }

    #[test]
    fn test_schedule_at_current_time_is_allowed() {
        let core = core_with_clock_at(10.0);
        assert!(core
            .schedule_at(SimTime::new(10.0), "on-time", Box::new(|| Ok(())))
            .is_ok());
    }

    #[test]
    fn test_negative_delay_is_rejected() {
        let core = core_with_clock_at(0.0);
        let err = core
            .schedule_after(-1.0, "backwards", Box::new(|| Ok(())))
            .unwrap_err();
        assert!(matches!(err, SimFlowError::InvalidDelay { value } if value == -1.0));
    }

    #[test]
    fn test_non_finite_time_is_rejected() {
        let core = core_with_clock_at(0.0);
        assert!(core
            .schedule_after(f64::NAN, "nan", Box::new(|| Ok(())))
            .is_err());
        assert!(core
            .schedule_at(SimTime::new(f64::INFINITY), "inf", Box::new(|| Ok(())))
            .is_err());
    }

    #[test]
    fn test_scheduling_after_stop_fails() {
        let core = core_with_clock_at(0.0);
        core.request_stop();
        let err = core
            .schedule_after(1.0, "too-late", Box::new(|| Ok(())))
            .unwrap_err();
        assert!(matches!(err, SimFlowError::SchedulerStopped { .. }));
    }

    #[test]
    fn test_stop_runs_shutdown_exactly_once() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let core = SchedulerCore::new(
            "test",
            &SchedulerConfig::default(),
            None,
            Some(Box::new(move |reason| {
                assert!(matches!(reason, ShutdownReason::Stopped));
                fired_clone.store(true, Ordering::SeqCst);
            })),
        );

        let first = core.request_stop();
        assert!(first.is_some());
        let (callback, reason) = first.unwrap();
        callback(reason);
        assert!(fired.load(Ordering::SeqCst));

        // 第二次 stop 不再返回回调
        assert!(core.request_stop().is_none());
    }

    #[test]
    fn test_paused_scheduler_still_enqueues() {
        let core = core_with_clock_at(0.0);
        core.pause().unwrap();
        assert_eq!(core.state(), SchedulerState::Paused);
        core.schedule_after(0.0, "queued", Box::new(|| Ok(()))).unwrap();
        assert!(core.has_pending_work());
    }

    #[test]
    fn test_metrics_counters() {
        let core = core_with_clock_at(0.0);
        let token = core
            .schedule_after(1.0, "a", Box::new(|| Ok(())))
            .unwrap();
        core.schedule_after(2.0, "b", Box::new(|| Ok(()))).unwrap();
        token.cancel();
        token.cancel(); // 幂等

        let metrics = core.metrics();
        assert_eq!(metrics.events_scheduled, 2);
        assert_eq!(metrics.events_cancelled, 1);
        assert_eq!(metrics.queue_size, 1);
        assert_eq!(metrics.peak_queue_size, 2);
        assert!(metrics.captured_at > 0);
    }

    #[test]
    fn test_cancel_token_outlives_scheduler() {
        let core = core_with_clock_at(0.0);
        let token = core
            .schedule_after(1.0, "orphan", Box::new(|| Ok(())))
            .unwrap();
        drop(core);
        // 内核释放后取消仍是安全空操作
        token.cancel();
    }
}
