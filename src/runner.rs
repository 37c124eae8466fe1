//! 仿真装配与驱动
//!
//! 引导代码显式持有通知路由器与协调注册表（而不是全局单例）：按配置
//! 构建各执行层，把 (调度器, 总线) 对登记到路由器，启动实时层、驱动
//! 虚拟层，并在结束时显式销毁。

use crate::config::{KernelConfig, LayerKind};
use crate::core::bus::NotificationBus;
use crate::core::discrete::DiscreteEventScheduler;
use crate::core::layer::{CoordinationRegistry, LayerScheduler};
use crate::core::realtime::RealTimeScheduler;
use crate::core::router::NotificationRouter;
use crate::core::scheduler::{Scheduler, ShutdownReason};
use crate::error::{Result, SimFlowError};
use crate::types::LayerId;
use std::sync::Arc;
use tracing::{info, warn};

/// 执行层的驱动方式
enum LayerDriver {
    Discrete(Arc<DiscreteEventScheduler>),
    RealTime(Arc<RealTimeScheduler>),
}

/// 已构建的执行层
struct BuiltLayer {
    id: LayerId,
    driver: LayerDriver,
    scheduler: Arc<LayerScheduler>,
    bus: Arc<NotificationBus>,
}

/// 仿真装配
pub struct SimulationHarness {
    config: KernelConfig,
    router: Arc<NotificationRouter>,
    registry: Arc<CoordinationRegistry>,
    layers: Vec<BuiltLayer>,
}

impl SimulationHarness {
    /// 按配置构建全部启用的执行层
    pub fn from_config(config: KernelConfig) -> Result<Self> {
        config.validate()?;

        let router = Arc::new(NotificationRouter::new());
        let registry = CoordinationRegistry::new();
        let mut layers = Vec::new();

        for layer_config in config.enabled_layers() {
            let id = LayerId::new(layer_config.name.clone());

            let shutdown_id = id.clone();
            let shutdown = Box::new(move |reason: ShutdownReason| match reason {
                ShutdownReason::Failed { message } => {
                    warn!("Layer '{}' shut down after failure: {}", shutdown_id, message)
                }
                reason => info!("Layer '{}' shut down: {:?}", shutdown_id, reason),
            });

            let (driver, inner): (LayerDriver, Arc<dyn Scheduler>) = match layer_config.kind {
                LayerKind::Discrete => {
                    let scheduler = Arc::new(DiscreteEventScheduler::with_shutdown(
                        &layer_config.name,
                        config.scheduler.clone(),
                        Some(shutdown),
                    ));
                    (LayerDriver::Discrete(scheduler.clone()), scheduler)
                }
                LayerKind::RealTime => {
                    let scheduler = Arc::new(RealTimeScheduler::with_shutdown(
                        &layer_config.name,
                        config.scheduler.clone(),
                        config.realtime.clone(),
                        Some(shutdown),
                    ));
                    (LayerDriver::RealTime(scheduler.clone()), scheduler)
                }
            };

            let layer_scheduler = LayerScheduler::register(id.clone(), inner, registry.clone())?;
            let bus = NotificationBus::new();
            router.register_execution_layer(id.clone(), layer_scheduler.clone(), bus.clone())?;

            layers.push(BuiltLayer {
                id,
                driver,
                scheduler: layer_scheduler,
                bus,
            });
        }

        info!(
            "Simulation harness '{}' built with {} layer(s)",
            config.kernel.name,
            layers.len()
        );

        Ok(Self {
            config,
            router,
            registry,
            layers,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<CoordinationRegistry> {
        &self.registry
    }

    /// 按层标识取执行层调度器
    pub fn scheduler(&self, layer: &LayerId) -> Option<Arc<LayerScheduler>> {
        self.layers
            .iter()
            .find(|built| built.id == *layer)
            .map(|built| built.scheduler.clone())
    }

    /// 按层标识取通知总线
    pub fn bus(&self, layer: &LayerId) -> Option<Arc<NotificationBus>> {
        self.layers
            .iter()
            .find(|built| built.id == *layer)
            .map(|built| built.bus.clone())
    }

    /// 启动所有实时层的排空任务（需要在 tokio 运行时内调用）
    pub fn start(&self) -> Result<()> {
        for layer in &self.layers {
            if let LayerDriver::RealTime(scheduler) = &layer.driver {
                scheduler.start()?;
            }
        }
        Ok(())
    }

    /// 依次驱动所有离散层直到各自自然终止
    pub fn run_virtual(&self) -> Result<()> {
        for layer in &self.layers {
            if let LayerDriver::Discrete(scheduler) = &layer.driver {
                scheduler.run()?;
            }
        }
        Ok(())
    }

    /// 驱动指定的离散层
    pub fn run_layer(&self, layer: &LayerId) -> Result<()> {
        let built = self
            .layers
            .iter()
            .find(|built| built.id == *layer)
            .ok_or_else(|| SimFlowError::UnknownLayer {
                layer: layer.to_string(),
            })?;
        match &built.driver {
            LayerDriver::Discrete(scheduler) => scheduler.run(),
            LayerDriver::RealTime(_) => Err(SimFlowError::config(&format!(
                "layer '{}' is real-time driven; use start()",
                layer
            ))),
        }
    }

    /// 显式销毁：停止全部执行层并重置路由器
    pub fn shutdown(&self) -> Result<()> {
        for layer in &self.layers {
            match &layer.driver {
                LayerDriver::Discrete(scheduler) => scheduler.stop()?,
                LayerDriver::RealTime(scheduler) => scheduler.stop()?,
            }
        }
        self.router.reset();
        info!("Simulation harness '{}' shut down", self.config.kernel.name);
        Ok(())
    }
}

/// 按配置初始化日志系统（重复调用安全）
pub fn init_logging(config: &KernelConfig) {
    let level = config.logging.level.as_tracing_level();
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayerConfig;
    use crate::core::bus::SubscriptionBuilder;
    use crate::types::Notification;
    use parking_lot::Mutex;
    use std::any::Any;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug)]
    struct PhaseChanged {
        phase: &'static str,
    }

    impl Notification for PhaseChanged {
        fn kind(&self) -> &'static str {
            "PhaseChanged"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn two_discrete_layers() -> KernelConfig {
        let mut config = KernelConfig::default();
        config.layers = vec![
            LayerConfig {
                name: "simulation".to_string(),
                kind: LayerKind::Discrete,
                parameters: HashMap::new(),
                enabled: true,
            },
            LayerConfig {
                name: "harness".to_string(),
                kind: LayerKind::Discrete,
                parameters: HashMap::new(),
                enabled: true,
            },
        ];
        config
    }

    #[test]
    fn test_default_config_builds_single_discrete_layer() {
        let harness = SimulationHarness::from_config(KernelConfig::default()).unwrap();
        assert_eq!(harness.router().layer_count(), 1);
        assert!(harness.scheduler(&LayerId::new("simulation")).is_some());
        assert!(harness.scheduler(&LayerId::new("real_time")).is_none());
    }

    #[test]
    fn test_scheduled_work_runs_on_virtual_drive() {
        let harness = SimulationHarness::from_config(KernelConfig::default()).unwrap();
        let scheduler = harness.scheduler(&LayerId::new("simulation")).unwrap();

        let counter = Arc::new(AtomicU64::new(0));
        let counter_clone = counter.clone();
        scheduler
            .schedule_after(
                5.0,
                "tick",
                Box::new(move || {
                    counter_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        harness.run_virtual().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cross_layer_broadcast_through_harness() {
        let harness = SimulationHarness::from_config(two_discrete_layers()).unwrap();
        let simulation = LayerId::new("simulation");
        let observer_home = LayerId::new("harness");

        let log = Arc::new(Mutex::new(Vec::new()));
        let delivered = log.clone();
        let subscription = SubscriptionBuilder::new("observer", observer_home.clone())
            .on::<PhaseChanged, _>(move |notification| {
                delivered.lock().push(notification.phase);
                Ok(())
            })
            .unwrap()
            .build();
        harness.router().subscribe(subscription).unwrap();

        let router = harness.router().clone();
        harness
            .scheduler(&simulation)
            .unwrap()
            .schedule_now(
                "announce",
                Box::new(move || router.broadcast(PhaseChanged { phase: "green" })),
            )
            .unwrap();

        harness.run_layer(&simulation).unwrap();
        assert!(log.lock().is_empty());

        harness.run_layer(&observer_home).unwrap();
        assert_eq!(*log.lock(), vec!["green"]);
    }

    #[test]
    fn test_run_layer_rejects_unknown_layer() {
        let harness = SimulationHarness::from_config(KernelConfig::default()).unwrap();
        let err = harness.run_layer(&LayerId::new("nowhere")).unwrap_err();
        assert!(matches!(err, SimFlowError::UnknownLayer { .. }));
    }

    #[test]
    fn test_shutdown_stops_layers_and_resets_router() {
        let harness = SimulationHarness::from_config(KernelConfig::default()).unwrap();
        let scheduler = harness.scheduler(&LayerId::new("simulation")).unwrap();

        harness.shutdown().unwrap();
        assert_eq!(harness.router().layer_count(), 0);

        let err = scheduler
            .schedule_now("late", Box::new(|| Ok(())))
            .unwrap_err();
        assert!(matches!(err, SimFlowError::SchedulerStopped { .. }));
    }

    #[tokio::test]
    async fn test_real_time_layer_starts_and_executes() {
        let mut config = KernelConfig::default();
        for layer in &mut config.layers {
            layer.enabled = layer.kind == LayerKind::RealTime;
        }

        let harness = SimulationHarness::from_config(config).unwrap();
        harness.start().unwrap();

        let scheduler = harness.scheduler(&LayerId::new("real_time")).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        let counter_clone = counter.clone();
        scheduler
            .schedule_after(
                0.01,
                "io-tick",
                Box::new(move || {
                    counter_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        harness.shutdown().unwrap();
    }
}
