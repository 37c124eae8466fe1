//! 实时调度器
//!
//! 与离散调度器同一契约，但时间源派生自挂钟。专用排空任务计算到下一个
//! 到期事件的挂钟延迟并睡眠/自旋等待；批量执行超期时立即继续执行而不
//! 补偿性跳过——迟到会累积，但事件绝不丢弃。

use crate::core::clock::{TimeSource, WallClockTimeSource};
use crate::core::queue::Callback;
use crate::core::scheduler::{
    CancelToken, EventExecutor, Scheduler, SchedulerConfig, SchedulerCore, SchedulerMetrics,
    SchedulerState, ShutdownCallback, ShutdownReason,
};
use crate::error::{Result, SimFlowError};
use crate::types::SimTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant as TokioInstant};
use tracing::{info, warn};

/// 实时调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealTimeConfig {
    /// 剩余等待低于该阈值（微秒）时从睡眠切换到忙等，提高到期精度
    pub spin_threshold_us: u64,
}

impl Default for RealTimeConfig {
    fn default() -> Self {
        Self {
            spin_threshold_us: 200,
        }
    }
}

/// 实时调度器
///
/// `start()` 生成专用排空任务（需要在 tokio 运行时内调用）；`stop()`
/// 通知任务在当前回调完成后退出。
pub struct RealTimeScheduler {
    core: Arc<SchedulerCore>,
    executor: Arc<EventExecutor>,
    wall_clock: Arc<WallClockTimeSource>,
    config: RealTimeConfig,
    notify: Arc<Notify>,
    shutdown_tx: Mutex<Option<mpsc::UnboundedSender<()>>>,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl RealTimeScheduler {
    pub fn new(name: &str, config: SchedulerConfig, rt_config: RealTimeConfig) -> Self {
        Self::with_shutdown(name, config, rt_config, None)
    }

    pub fn with_shutdown(
        name: &str,
        config: SchedulerConfig,
        rt_config: RealTimeConfig,
        shutdown: Option<ShutdownCallback>,
    ) -> Self {
        let wall_clock = Arc::new(WallClockTimeSource::new());
        let core = Arc::new(SchedulerCore::new(
            name,
            &config,
            Some(wall_clock.clone() as Arc<dyn TimeSource>),
            shutdown,
        ));

        Self {
            core,
            executor: Arc::new(EventExecutor::new(name)),
            wall_clock,
            config: rt_config,
            notify: Arc::new(Notify::new()),
            shutdown_tx: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// 启动排空任务
    pub fn start(&self) -> Result<()> {
        self.core.begin_drain()?;

        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let core = self.core.clone();
        let executor = self.executor.clone();
        let wall_clock = self.wall_clock.clone();
        let notify = self.notify.clone();
        let spin_threshold = Duration::from_micros(self.config.spin_threshold_us);

        let handle = tokio::spawn(async move {
            Self::drain_loop(core, executor, wall_clock, notify, shutdown_rx, spin_threshold).await
        });
        *self.handle.lock() = Some(handle);

        info!("Real-time scheduler '{}' started", self.core.name());
        Ok(())
    }

    /// 等待排空任务退出（在 stop() 之后调用）
    pub async fn join(&self) -> Result<()> {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| SimFlowError::internal(&format!("drain task join failed: {}", e)))?,
            None => Ok(()),
        }
    }

    async fn drain_loop(
        core: Arc<SchedulerCore>,
        executor: Arc<EventExecutor>,
        wall_clock: Arc<WallClockTimeSource>,
        notify: Arc<Notify>,
        mut shutdown_rx: mpsc::UnboundedReceiver<()>,
        spin_threshold: Duration,
    ) -> Result<()> {
        loop {
            // 连续执行所有已到期事件；超期积压时立即继续，不等待、不丢弃
            while let Some(event) = core.pop_due() {
                let lateness = wall_clock.now().as_secs_f64() - event.time.as_secs_f64();
                if lateness > 0.05 {
                    warn!(
                        "Event '{}' on '{}' running {:.3}s late",
                        event.label,
                        core.name(),
                        lateness
                    );
                }
                if let Err(e) = executor.execute(event) {
                    core.record_executed(false);
                    if let Some((callback, reason)) = core.finish_drain(ShutdownReason::Failed {
                        message: e.to_string(),
                    }) {
                        callback(reason);
                    }
                    return Err(e);
                }
                core.record_executed(true);
            }

            let state = core.state();
            if state == SchedulerState::Stopped {
                break;
            }

            // 暂停时不关注队头：只等恢复/停止信号
            let deadline = if state == SchedulerState::Paused {
                None
            } else {
                core.next_event_time()
                    .map(|time| wall_clock.instant_at(time))
            };

            match deadline {
                Some(when) => {
                    let now = Instant::now();
                    if when <= now + spin_threshold {
                        // 忙等收尾
                        while Instant::now() < when {
                            if core.state() == SchedulerState::Stopped {
                                break;
                            }
                            tokio::task::yield_now().await;
                        }
                    } else {
                        let coarse = when.checked_sub(spin_threshold).unwrap_or(when);
                        tokio::select! {
                            message = shutdown_rx.recv() => {
                                if message.is_none() {
                                    core.request_stop();
                                }
                            }
                            _ = notify.notified() => {}
                            _ = sleep_until(TokioInstant::from_std(coarse)) => {}
                        }
                    }
                }
                None => {
                    tokio::select! {
                        message = shutdown_rx.recv() => {
                            if message.is_none() {
                                core.request_stop();
                            }
                        }
                        _ = notify.notified() => {}
                    }
                }
            }
        }

        if let Some((callback, reason)) = core.finish_drain(ShutdownReason::Stopped) {
            callback(reason);
        }
        info!("Real-time scheduler '{}' drain loop exited", core.name());
        Ok(())
    }
}

impl Scheduler for RealTimeScheduler {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn schedule_at(&self, time: SimTime, label: &str, callback: Callback) -> Result<CancelToken> {
        let token = self.core.schedule_at(time, label, callback)?;
        self.notify.notify_one();
        Ok(token)
    }

    fn schedule_after(&self, delay: f64, label: &str, callback: Callback) -> Result<CancelToken> {
        let token = self.core.schedule_after(delay, label, callback)?;
        self.notify.notify_one();
        Ok(token)
    }

    fn schedule_now(&self, label: &str, callback: Callback) -> Result<CancelToken> {
        let token = self.core.schedule_now(label, callback)?;
        self.notify.notify_one();
        Ok(token)
    }

    fn schedule_daemon_after(
        &self,
        delay: f64,
        label: &str,
        callback: Callback,
    ) -> Result<CancelToken> {
        let token = self.core.schedule_daemon_after(delay, label, callback)?;
        self.notify.notify_one();
        Ok(token)
    }

    fn pause(&self) -> Result<()> {
        self.core.pause()?;
        self.notify.notify_one();
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.core.mark_running()?;
        // 由排空任务一次性处理所有到期积压
        self.notify.notify_one();
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        // 任务未启动时关闭回调由这里执行；已启动则由任务在退出时执行
        if let Some((callback, reason)) = self.core.request_stop() {
            callback(reason);
        }
        if let Some(shutdown_tx) = self.shutdown_tx.lock().take() {
            let _ = shutdown_tx.send(());
        }
        self.notify.notify_one();
        Ok(())
    }

    fn now(&self) -> SimTime {
        self.core.now()
    }

    fn state(&self) -> SchedulerState {
        self.core.state()
    }

    fn has_pending_work(&self) -> bool {
        self.core.has_pending_work()
    }

    fn metrics(&self) -> SchedulerMetrics {
        self.core.metrics()
    }
}
