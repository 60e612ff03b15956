use super::dispatcher::{DispatchError, RequestDispatcher, RetryPolicy};
use super::health_checker::{HealthMonitor, ProbeResult};
use super::metrics::{MetricsRecorder, MetricsSnapshot};
use super::registry::{EndpointRegistry, EndpointSnapshot, HealthStatus};
use super::traits::{CanaryProbe, RpcCanary};
use anyhow::Result;
use parking_lot::Mutex;
use pylon_core::config::model::{EndpointAdmissionError, EndpointConfig};
use pylon_core::{Config, EndpointHandle, UpstreamError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 运行中的后台任务
struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// 路由服务
/// 整合注册表、健康检查器、调度器和指标收集器，提供统一的服务接口
pub struct RouterService {
    config: Arc<Config>,
    registry: Arc<EndpointRegistry>,
    metrics: Arc<MetricsRecorder>,
    dispatcher: Arc<RequestDispatcher>,
    monitor: Arc<HealthMonitor>,
    window: Duration,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl RouterService {
    /// 创建新的路由服务，使用配置中的JSON-RPC方法作为金丝雀探测
    pub fn new(config: Config) -> Result<Self> {
        let probe = Arc::new(RpcCanary::new(config.settings.canary_method.clone()));
        Self::with_probe(config, probe)
    }

    /// 使用自定义探测创建路由服务
    pub fn with_probe(config: Config, probe: Arc<dyn CanaryProbe>) -> Result<Self> {
        // 验证配置
        config.validate()?;

        let settings = &config.settings;
        let registry = Arc::new(EndpointRegistry::new(
            &config.endpoints,
            settings.request_timeout(),
        )?);
        let metrics = Arc::new(MetricsRecorder::new(settings.outcome_history_size));
        let dispatcher = Arc::new(RequestDispatcher::new(
            registry.clone(),
            metrics.clone(),
            RetryPolicy::from(&settings.retry),
        ));
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            probe,
            settings.health_check_interval(),
            settings.health_check_timeout(),
        ));
        let window = settings.window();

        Ok(Self {
            config: Arc::new(config),
            registry,
            metrics,
            dispatcher,
            monitor,
            window,
            tasks: Mutex::new(None),
        })
    }

    /// 启动健康检查与窗口重置后台任务，重复调用无副作用
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return;
        }

        info!("Starting router service");
        let cancel = CancellationToken::new();
        let handles = vec![
            self.monitor.clone().spawn(cancel.child_token()),
            spawn_window_reset(self.registry.clone(), self.window, cancel.child_token()),
        ];

        *tasks = Some(BackgroundTasks { cancel, handles });
        info!("Router service started successfully");
    }

    /// 停止所有后台任务并等待其退出
    pub async fn stop(&self) {
        let tasks = self.tasks.lock().take();
        let Some(tasks) = tasks else {
            return;
        };

        tasks.cancel.cancel();
        for handle in tasks.handles {
            if let Err(e) = handle.await {
                error!("Background task failed during shutdown: {}", e);
            }
        }
        info!("Router service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    /// 通过调度器执行一个工作单元
    pub async fn execute<T, F, Fut>(&self, work: F) -> Result<T, DispatchError>
    where
        F: FnMut(EndpointHandle) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        self.dispatcher.execute(work).await
    }

    pub fn get_health_status(&self) -> HealthStatus {
        self.registry.get_health_status()
    }

    pub fn get_metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(&self.registry)
    }

    /// 接纳一个动态发现的端点
    pub fn add_endpoint(
        &self,
        entry: EndpointConfig,
    ) -> Result<EndpointSnapshot, EndpointAdmissionError> {
        self.registry.add_endpoint(entry)
    }

    /// 手动触发一轮健康检查
    pub async fn check_now(&self) -> Vec<ProbeResult> {
        self.monitor.check_now().await
    }

    pub async fn check_endpoint(&self, name: &str) -> Option<ProbeResult> {
        self.monitor.check_endpoint(name).await
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.clone()
    }

    pub fn registry(&self) -> Arc<EndpointRegistry> {
        self.registry.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        self.metrics.clone()
    }

    pub fn dispatcher(&self) -> Arc<RequestDispatcher> {
        self.dispatcher.clone()
    }
}

/// 每个窗口结束时重置端点请求计数，首次重置发生在一个完整窗口之后
fn spawn_window_reset(
    registry: Arc<EndpointRegistry>,
    window: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + window, window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    registry.reset_window_counters();
                }
            }
        }

        debug!("Window reset task stopped");
    })
}
