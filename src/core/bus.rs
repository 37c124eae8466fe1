//! 层内通知总线
//!
//! 订阅者通过显式类型化注册构建一次性的分发表（TypeId → 处理器），
//! 没有运行时反射。`deliver` 在调用它的线程上同步调用匹配的处理器，
//! 处理器失败立即原样抛出，绝不吞掉（全库快速失败策略）。

use crate::error::{Result, SimFlowError};
use crate::types::{LayerId, Notification};
use parking_lot::{Mutex, RwLock};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// 类型擦除的通知处理器
type BoxedHandler = Arc<dyn Fn(&dyn Notification) -> Result<()> + Send + Sync>;

/// 单个订阅者的分发表
///
/// 构造后不可变：归属层和各通知类型的处理器在构建时确定。
pub struct Subscription {
    name: String,
    home_layer: LayerId,
    handlers: HashMap<TypeId, BoxedHandler>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 归属执行层
    pub fn home_layer(&self) -> &LayerId {
        &self.home_layer
    }

    /// 是否声明了处理该运行时类型的处理器
    pub fn handles(&self, type_id: TypeId) -> bool {
        self.handlers.contains_key(&type_id)
    }

    fn invoke(&self, notification: &dyn Notification) -> Result<()> {
        match self.handlers.get(&notification.as_any().type_id()) {
            Some(handler) => handler(notification),
            None => Err(SimFlowError::handler(&format!(
                "subscriber '{}' has no handler for notification '{}'",
                self.name,
                notification.kind()
            ))),
        }
    }
}

/// 订阅者分发表构建器
pub struct SubscriptionBuilder {
    name: String,
    home_layer: LayerId,
    handlers: HashMap<TypeId, BoxedHandler>,
}

impl std::fmt::Debug for SubscriptionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionBuilder")
            .field("name", &self.name)
            .field("home_layer", &self.home_layer)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl SubscriptionBuilder {
    pub fn new(name: &str, home_layer: LayerId) -> Self {
        Self {
            name: name.to_string(),
            home_layer,
            handlers: HashMap::new(),
        }
    }

    /// 为通知类型 `T` 注册处理器
    ///
    /// 同一订阅者对同一类型注册两个处理器是配置错误：不做最特殊类型
    /// 优先，也不做扇出，直接在构建时拒绝歧义。
    pub fn on<T, F>(mut self, handler: F) -> Result<Self>
    where
        T: Notification,
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        if self.handlers.contains_key(&type_id) {
            return Err(SimFlowError::AmbiguousHandler {
                subscriber: self.name.clone(),
                kind: std::any::type_name::<T>().to_string(),
            });
        }

        self.handlers.insert(
            type_id,
            Arc::new(move |notification: &dyn Notification| {
                match notification.as_any().downcast_ref::<T>() {
                    Some(typed) => handler(typed),
                    None => Err(SimFlowError::handler(&format!(
                        "notification type mismatch (expected {})",
                        std::any::type_name::<T>()
                    ))),
                }
            }),
        );
        Ok(self)
    }

    pub fn build(self) -> Arc<Subscription> {
        Arc::new(Subscription {
            name: self.name,
            home_layer: self.home_layer,
            handlers: self.handlers,
        })
    }
}

/// 订阅者能力：声明归属层 + 一个或多个类型化处理器
pub trait Subscriber: Send + Sync {
    /// 归属执行层（构造时声明，之后不可变）
    fn home_layer(&self) -> LayerId;

    /// 构建此订阅者的分发表
    fn subscription(self: Arc<Self>) -> Result<Arc<Subscription>>;
}

/// 总线统计信息
#[derive(Debug, Clone, Default)]
pub struct BusMetrics {
    pub deliveries: u64,
    pub delivery_failures: u64,
    pub subscribers_registered: usize,
}

/// 层内通知总线
pub struct NotificationBus {
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    metrics: Mutex<BusMetrics>,
}

impl NotificationBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscriptions: RwLock::new(Vec::new()),
            metrics: Mutex::new(BusMetrics::default()),
        })
    }

    /// 登记订阅者分发表
    pub fn subscribe(&self, subscription: Arc<Subscription>) {
        let mut subscriptions = self.subscriptions.write();
        subscriptions.push(subscription.clone());
        self.metrics.lock().subscribers_registered = subscriptions.len();
        info!(
            "Subscriber '{}' registered on layer '{}'",
            subscription.name(),
            subscription.home_layer()
        );
    }

    /// 按订阅顺序返回声明了该类型处理器的订阅者
    pub fn matching(&self, type_id: TypeId) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read()
            .iter()
            .filter(|subscription| subscription.handles(type_id))
            .cloned()
            .collect()
    }

    /// 投递通知给单个订阅者
    ///
    /// 处理器失败立即向调用方抛出。订阅在投递排队之后被清除时跳过。
    pub fn deliver(
        &self,
        subscription: &Arc<Subscription>,
        notification: &dyn Notification,
    ) -> Result<()> {
        if !self.contains(subscription) {
            debug!(
                "Skipping delivery of '{}': subscriber '{}' was cleared",
                notification.kind(),
                subscription.name()
            );
            return Ok(());
        }

        debug!(
            "Delivering '{}' to subscriber '{}'",
            notification.kind(),
            subscription.name()
        );
        let result = subscription.invoke(notification);

        let mut metrics = self.metrics.lock();
        metrics.deliveries += 1;
        if result.is_err() {
            metrics.delivery_failures += 1;
        }
        drop(metrics);

        result
    }

    pub fn contains(&self, subscription: &Arc<Subscription>) -> bool {
        self.subscriptions
            .read()
            .iter()
            .any(|existing| Arc::ptr_eq(existing, subscription))
    }

    /// 清空订阅者登记
    pub fn clear(&self) {
        let mut subscriptions = self.subscriptions.write();
        let removed = subscriptions.len();
        subscriptions.clear();
        self.metrics.lock().subscribers_registered = 0;
        info!("Cleared {} subscriber(s) from bus", removed);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn metrics(&self) -> BusMetrics {
        self.metrics.lock().clone()
    }
}
