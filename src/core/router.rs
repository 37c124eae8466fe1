//! 通知路由器
//!
//! 进程范围的协调者：持有执行层标识到 (调度器, 总线) 对的映射。广播时
//! 为每个感兴趣的订阅者查出归属层，并通过该层调度器的 schedule_now
//! 重新进入目标层完成投递——绝不跨线程直接调用处理器；广播线程自己的
//! 层等于目标层时同样走 schedule_now，保持与其他待处理同层事件的相对
//! 顺序。实例由引导代码显式构造、显式销毁，不做全局单例。

use crate::core::bus::{NotificationBus, Subscriber, Subscription};
use crate::core::scheduler::Scheduler;
use crate::error::{Result, SimFlowError};
use crate::types::{LayerId, Notification};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

struct LayerEntry {
    layer: LayerId,
    scheduler: Arc<dyn Scheduler>,
    bus: Arc<NotificationBus>,
}

/// 路由器统计信息
#[derive(Debug, Clone, Default)]
pub struct RouterMetrics {
    pub broadcasts: u64,
    pub deliveries_scheduled: u64,
    pub layers_registered: usize,
}

/// 通知路由器
pub struct NotificationRouter {
    /// 注册顺序决定广播扇出顺序，保证确定性
    layers: Mutex<Vec<LayerEntry>>,
    metrics: Mutex<RouterMetrics>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self {
            layers: Mutex::new(Vec::new()),
            metrics: Mutex::new(RouterMetrics::default()),
        }
    }

    /// 登记执行层的 (调度器, 总线) 对
    ///
    /// 重复登记同一层标识是配置错误，在登记时而不是广播时报告。
    pub fn register_execution_layer(
        &self,
        layer: LayerId,
        scheduler: Arc<dyn Scheduler>,
        bus: Arc<NotificationBus>,
    ) -> Result<()> {
        let mut layers = self.layers.lock();
        if layers.iter().any(|entry| entry.layer == layer) {
            return Err(SimFlowError::DuplicateLayer {
                layer: layer.to_string(),
            });
        }
        info!("Execution layer '{}' registered on router", layer);
        layers.push(LayerEntry {
            layer,
            scheduler,
            bus,
        });
        self.metrics.lock().layers_registered = layers.len();
        Ok(())
    }

    /// 按归属层登记订阅者；归属层未登记则报错
    pub fn subscribe(&self, subscription: Arc<Subscription>) -> Result<()> {
        let layers = self.layers.lock();
        let entry = layers
            .iter()
            .find(|entry| entry.layer == *subscription.home_layer())
            .ok_or_else(|| SimFlowError::UnknownLayer {
                layer: subscription.home_layer().to_string(),
            })?;
        entry.bus.subscribe(subscription);
        Ok(())
    }

    /// 便捷入口：由订阅者组件自行构建分发表并登记
    pub fn subscribe_component(&self, subscriber: Arc<dyn Subscriber>) -> Result<Arc<Subscription>> {
        let subscription = subscriber.subscription()?;
        self.subscribe(subscription.clone())?;
        Ok(subscription)
    }

    /// 广播通知
    pub fn broadcast<T: Notification>(&self, notification: T) -> Result<()> {
        self.broadcast_arc(Arc::new(notification))
    }

    /// 广播已装箱的通知
    ///
    /// 对每个匹配订阅者在其归属层调度一次投递；调度失败（如目标层已
    /// 停止）向广播方传播。
    pub fn broadcast_arc(&self, notification: Arc<dyn Notification>) -> Result<()> {
        let type_id = notification.as_any().type_id();

        // schedule_now 在锁外执行，先做层快照
        let snapshot: Vec<(LayerId, Arc<dyn Scheduler>, Arc<NotificationBus>)> = self
            .layers
            .lock()
            .iter()
            .map(|entry| (entry.layer.clone(), entry.scheduler.clone(), entry.bus.clone()))
            .collect();

        let mut scheduled = 0u64;
        for (layer, scheduler, bus) in snapshot {
            for subscription in bus.matching(type_id) {
                let label = format!(
                    "deliver {} -> {}",
                    notification.kind(),
                    subscription.name()
                );
                debug!(
                    "Routing '{}' to subscriber '{}' on layer '{}'",
                    notification.kind(),
                    subscription.name(),
                    layer
                );
                let deliver_bus = bus.clone();
                let payload = notification.clone();
                scheduler.schedule_now(
                    &label,
                    Box::new(move || deliver_bus.deliver(&subscription, payload.as_ref())),
                )?;
                scheduled += 1;
            }
        }

        let mut metrics = self.metrics.lock();
        metrics.broadcasts += 1;
        metrics.deliveries_scheduled += scheduled;
        Ok(())
    }

    /// 清空每个已登记总线中的订阅者；层登记本身保留
    pub fn clear_all_handlers(&self) {
        for entry in self.layers.lock().iter() {
            entry.bus.clear();
        }
        info!("Cleared subscriber registries on all layers");
    }

    /// 显式销毁：清除全部层登记（测试运行之间使用，绝不隐式发生）
    pub fn reset(&self) {
        let mut layers = self.layers.lock();
        for entry in layers.iter() {
            entry.bus.clear();
        }
        layers.clear();
        self.metrics.lock().layers_registered = 0;
        info!("Notification router reset");
    }

    pub fn layer_count(&self) -> usize {
        self.layers.lock().len()
    }

    pub fn bus_for(&self, layer: &LayerId) -> Option<Arc<NotificationBus>> {
        self.layers
            .lock()
            .iter()
            .find(|entry| entry.layer == *layer)
            .map(|entry| entry.bus.clone())
    }

    pub fn scheduler_for(&self, layer: &LayerId) -> Option<Arc<dyn Scheduler>> {
        self.layers
            .lock()
            .iter()
            .find(|entry| entry.layer == *layer)
            .map(|entry| entry.scheduler.clone())
    }

    pub fn metrics(&self) -> RouterMetrics {
        self.metrics.lock().clone()
    }
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new()
    }
}
