//! 离散事件调度器
//!
//! 时间源为内部时钟，只推进到下一个弹出事件的时间（虚拟时间模式）。
//! 由调用方同步驱动：`run()` 排空到自然终止，`step()` / `drain_due()`
//! 支持增量驱动。自然终止的判定不把守护事件算作"还有工作"。

use crate::core::clock::TimeSource;
use crate::core::queue::Callback;
use crate::core::scheduler::{
    CancelToken, DrainStep, EventExecutor, Scheduler, SchedulerConfig, SchedulerCore,
    SchedulerMetrics, SchedulerState, ShutdownCallback, ShutdownReason,
};
use crate::error::Result;
use crate::types::SimTime;
use std::sync::Arc;
use tracing::info;

/// 离散事件调度器
pub struct DiscreteEventScheduler {
    core: SchedulerCore,
    executor: EventExecutor,
}

impl DiscreteEventScheduler {
    pub fn new(name: &str, config: SchedulerConfig) -> Self {
        Self::with_shutdown(name, config, None)
    }

    /// 带关闭回调创建；回调在排空循环退出时恰好触发一次
    pub fn with_shutdown(
        name: &str,
        config: SchedulerConfig,
        shutdown: Option<ShutdownCallback>,
    ) -> Self {
        Self {
            core: SchedulerCore::new(name, &config, None, shutdown),
            executor: EventExecutor::new(name),
        }
    }

    /// 运行到自然终止
    ///
    /// 循环弹出最小 (时间, 序号) 事件、推进内部时钟、执行回调，直到
    /// 队列排空或仅剩守护事件（此时等同排空），或 stop()/pause() 打断。
    /// 回调失败使循环终止：错误向调用方传播，关闭回调带失败原因触发。
    pub fn run(&self) -> Result<()> {
        self.core.begin_drain()?;
        loop {
            match self.core.next_virtual_step() {
                DrainStep::Execute(event) => {
                    if let Err(e) = self.executor.execute(event) {
                        self.core.record_executed(false);
                        self.invoke_shutdown(ShutdownReason::Failed {
                            message: e.to_string(),
                        });
                        return Err(e);
                    }
                    self.core.record_executed(true);
                }
                DrainStep::Paused => {
                    // 暂停只冻结分发；调度器保持可恢复，不触发关闭回调
                    self.core.yield_drain();
                    return Ok(());
                }
                DrainStep::Stopped => {
                    self.invoke_shutdown(ShutdownReason::Stopped);
                    return Ok(());
                }
                DrainStep::Idle => {
                    info!(
                        "Scheduler '{}' drained at {}",
                        self.core.name(),
                        self.core.now()
                    );
                    self.invoke_shutdown(ShutdownReason::Drained);
                    return Ok(());
                }
            }
        }
    }

    /// 执行单个事件，返回是否执行了事件
    ///
    /// 增量驱动入口：不触发自然终止的关闭回调。
    pub fn step(&self) -> Result<bool> {
        self.core.begin_drain()?;
        match self.core.next_virtual_step() {
            DrainStep::Execute(event) => match self.executor.execute(event) {
                Ok(()) => {
                    self.core.record_executed(true);
                    self.core.yield_drain();
                    Ok(true)
                }
                Err(e) => {
                    self.core.record_executed(false);
                    self.invoke_shutdown(ShutdownReason::Failed {
                        message: e.to_string(),
                    });
                    Err(e)
                }
            },
            _ => {
                self.core.yield_drain();
                Ok(false)
            }
        }
    }

    /// 排空当前已到期（time <= 当前虚拟时钟）的事件，返回执行数量
    pub fn drain_due(&self) -> Result<usize> {
        self.core.begin_drain()?;
        let result = self.drain_due_inner();
        if result.is_ok() {
            self.core.yield_drain();
        }
        result
    }

    fn drain_due_inner(&self) -> Result<usize> {
        let mut count = 0;
        while let Some(event) = self.core.pop_due() {
            match self.executor.execute(event) {
                Ok(()) => {
                    self.core.record_executed(true);
                    count += 1;
                }
                Err(e) => {
                    self.core.record_executed(false);
                    self.invoke_shutdown(ShutdownReason::Failed {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
        Ok(count)
    }

    fn invoke_shutdown(&self, reason: ShutdownReason) {
        if let Some((callback, reason)) = self.core.finish_drain(reason) {
            callback(reason);
        }
    }

    /// 内部时钟的时间源视图
    pub fn time_source(&self) -> Arc<dyn TimeSource> {
        self.core.clock_view()
    }
}

impl Scheduler for DiscreteEventScheduler {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn schedule_at(&self, time: SimTime, label: &str, callback: Callback) -> Result<CancelToken> {
        self.core.schedule_at(time, label, callback)
    }

    fn schedule_after(&self, delay: f64, label: &str, callback: Callback) -> Result<CancelToken> {
        self.core.schedule_after(delay, label, callback)
    }

    fn schedule_now(&self, label: &str, callback: Callback) -> Result<CancelToken> {
        self.core.schedule_now(label, callback)
    }

    fn schedule_daemon_after(
        &self,
        delay: f64,
        label: &str,
        callback: Callback,
    ) -> Result<CancelToken> {
        self.core.schedule_daemon_after(delay, label, callback)
    }

    fn pause(&self) -> Result<()> {
        self.core.pause()
    }

    fn resume(&self) -> Result<()> {
        self.core.mark_running()?;
        // 恢复时一次性排空所有已到期事件，连续到期之间没有人为间隔
        if self.core.begin_drain().is_err() {
            // 已有排空者在运行，由它继续
            return Ok(());
        }
        match self.drain_due_inner() {
            Ok(_) => {
                self.core.yield_drain();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn stop(&self) -> Result<()> {
        if let Some((callback, reason)) = self.core.request_stop() {
            callback(reason);
        }
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
