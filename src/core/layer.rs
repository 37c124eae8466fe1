//! 执行层协调
//!
//! `LayerScheduler` 装饰任意调度器：为经它调度的每个事件打上所属执行层
//! 的标签，并把自己登记进共享的协调注册表。`create_sibling` 为其他层
//! 标识构造共享同一注册表的兄弟调度器（各自独立驱动，通常在自己的
//! 线程上），使持有一个层引用的代码能够发现并定位另一层。

use crate::core::queue::Callback;
use crate::core::scheduler::{CancelToken, Scheduler, SchedulerMetrics, SchedulerState};
use crate::error::{Result, SimFlowError};
use crate::types::{LayerId, SimTime};
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::info;

/// 协调注册表
///
/// 显式共享的引用计数对象：在构造每个兄弟调度器时传入，绝不通过全局
/// 查找获得。仅在创建兄弟时写入，跨层投递定位目标调度器时读取。
pub struct CoordinationRegistry {
    layers: DashMap<LayerId, Weak<LayerScheduler>>,
}

impl CoordinationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            layers: DashMap::new(),
        })
    }

    /// 登记一个层调度器；同一层标识已有活动登记时是配置错误
    fn register(&self, scheduler: &Arc<LayerScheduler>) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.layers.entry(scheduler.layer().clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().upgrade().is_some() {
                    return Err(SimFlowError::DuplicateLayer {
                        layer: scheduler.layer().to_string(),
                    });
                }
                // 旧登记已失效，允许复用该层标识
                occupied.insert(Arc::downgrade(scheduler));
                Ok(())
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::downgrade(scheduler));
                Ok(())
            }
        }
    }

    /// 查找指定层当前活动的调度器
    pub fn lookup(&self, layer: &LayerId) -> Option<Arc<LayerScheduler>> {
        self.layers
            .get(layer)
            .and_then(|entry| entry.value().upgrade())
    }

    /// 当前活动的层数
    pub fn len(&self) -> usize {
        self.layers
            .iter()
            .filter(|entry| entry.value().upgrade().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 执行层调度器装饰器
pub struct LayerScheduler {
    layer: LayerId,
    inner: Arc<dyn Scheduler>,
    registry: Arc<CoordinationRegistry>,
}

impl std::fmt::Debug for LayerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerScheduler")
            .field("layer", &self.layer)
            .finish_non_exhaustive()
    }
}

impl LayerScheduler {
    /// 包装底层调度器并登记到协调注册表
    pub fn register(
        layer: LayerId,
        inner: Arc<dyn Scheduler>,
        registry: Arc<CoordinationRegistry>,
    ) -> Result<Arc<Self>> {
        let scheduler = Arc::new(Self {
            layer,
            inner,
            registry: registry.clone(),
        });
        registry.register(&scheduler)?;
        info!(
            "Execution layer '{}' registered with scheduler '{}'",
            scheduler.layer,
            scheduler.inner.name()
        );
        Ok(scheduler)
    }

    /// 为另一层标识构造共享同一注册表的兄弟调度器
    pub fn create_sibling(
        &self,
        layer: LayerId,
        inner: Arc<dyn Scheduler>,
    ) -> Result<Arc<Self>> {
        Self::register(layer, inner, self.registry.clone())
    }

    /// 查找兄弟层调度器
    pub fn sibling(&self, layer: &LayerId) -> Option<Arc<LayerScheduler>> {
        self.registry.lookup(layer)
    }

    pub fn layer(&self) -> &LayerId {
        &self.layer
    }

    pub fn registry(&self) -> &Arc<CoordinationRegistry> {
        &self.registry
    }

    fn tag(&self, label: &str) -> String {
        format!("{}::{}", self.layer, label)
    }
}

impl Scheduler for LayerScheduler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn schedule_at(&self, time: SimTime, label: &str, callback: Callback) -> Result<CancelToken> {
        self.inner.schedule_at(time, &self.tag(label), callback)
    }

    fn schedule_after(&self, delay: f64, label: &str, callback: Callback) -> Result<CancelToken> {
        self.inner.schedule_after(delay, &self.tag(label), callback)
    }

    fn schedule_now(&self, label: &str, callback: Callback) -> Result<CancelToken> {
        self.inner.schedule_now(&self.tag(label), callback)
    }

    fn schedule_daemon_after(
        &self,
        delay: f64,
        label: &str,
        callback: Callback,
    ) -> Result<CancelToken> {
        self.inner
            .schedule_daemon_after(delay, &self.tag(label), callback)
    }

    fn pause(&self) -> Result<()> {
        self.inner.pause()
    }

    fn resume(&self) -> Result<()> {
        self.inner.resume()
    }

    fn stop(&self) -> Result<()> {
        self.inner.stop()
    }

    fn now(&self) -> SimTime {
        self.inner.now()
    }

    fn state(&self) -> SchedulerState {
        self.inner.state()
    }

    fn has_pending_work(&self) -> bool {
        self.inner.has_pending_work()
    }

    fn metrics(&self) -> SchedulerMetrics {
        self.inner.metrics()
    }
}
