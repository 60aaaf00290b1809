//! Runtime wiring of the spool.
//!
//! One [`Spool`] per process. It owns the persistence executor shared by all
//! features and the consent provider, and builds for each registered feature:
//!
//! - pending and granted [`BatchFileOrchestrator`]s behind a
//!   [`ConsentAwareFileOrchestrator`]
//! - a [`FeatureStorage`] for producers
//! - a [`BatchMetricsDispatcher`]
//! - an [`UploadScheduler`] and [`DataFlusher`] when the feature uploads
//!
//! Lifecycle events arrive through [`Spool::lifecycle_sender`]. `Terminated`
//! flushes and stops the spool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use spool_common::{
    AppLifecycleEvent, ConsentProvider, ConsentState, Error, InternalLogger, LifecycleListener,
    LogLevel, LogTarget, Result, SystemTimeProvider, TimeProvider, TracingLogger,
};
use spool_config::{ShutdownPolicy, SpoolConfig};
use spool_store::{
    create_batch_store, granted_dir_name, pending_dir_name, BackPressureStrategy,
    BatchFileOrchestrator, BatchMetricsDispatcher, ConsentAwareFileMigrator,
    ConsentAwareFileOrchestrator, Encryption, FeatureStorage, FileMover, PersistenceExecutor,
    RateBasedSampler, ShutdownReport,
};
use spool_upload::{
    DataFlusher, DataUploader, FlushReport, HttpUploader, RetentionPolicy, UploadScheduler,
};

const LIFECYCLE_POLL: Duration = Duration::from_millis(200);

/// Collaborators injected into a [`Spool`].
#[derive(Clone)]
pub struct SpoolOptions {
    pub logger: Arc<dyn InternalLogger>,
    pub time: Arc<dyn TimeProvider>,
    pub encryption: Option<Arc<dyn Encryption>>,
    pub initial_consent: ConsentState,
    /// Prefix each record with an `ev_size` meta block.
    pub event_meta: bool,
    /// Start each feature's upload worker on registration.
    pub start_uploads: bool,
}

impl Default for SpoolOptions {
    fn default() -> Self {
        Self {
            logger: Arc::new(TracingLogger::new()),
            time: Arc::new(SystemTimeProvider),
            encryption: None,
            initial_consent: ConsentState::Pending,
            event_meta: false,
            start_uploads: true,
        }
    }
}

/// Everything built for one feature.
pub struct FeatureHandle {
    name: String,
    storage: Arc<FeatureStorage>,
    metrics: Arc<BatchMetricsDispatcher>,
    scheduler: Option<Arc<UploadScheduler>>,
    flusher: Option<DataFlusher>,
}

impl FeatureHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &Arc<FeatureStorage> {
        &self.storage
    }

    pub fn metrics(&self) -> &Arc<BatchMetricsDispatcher> {
        &self.metrics
    }

    /// Upload scheduler, for features registered with an uploader.
    pub fn scheduler(&self) -> Option<&Arc<UploadScheduler>> {
        self.scheduler.as_ref()
    }
}

/// Outcome of [`Spool::flush_and_stop`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct StopReport {
    pub flushed: Vec<FlushReport>,
    pub reached_idle: bool,
    pub drained_tasks: usize,
    pub dropped_tasks: usize,
}

impl StopReport {
    fn with_shutdown(mut self, report: ShutdownReport) -> Self {
        self.reached_idle = report.reached_idle;
        self.drained_tasks = report.drained;
        self.dropped_tasks = report.dropped;
        self
    }
}

struct LifecyclePump {
    sender: mpsc::Sender<AppLifecycleEvent>,
    thread: thread::JoinHandle<()>,
}

pub struct Spool {
    config: SpoolConfig,
    options: SpoolOptions,
    executor: Arc<PersistenceExecutor>,
    consent: ConsentProvider,
    features: Mutex<HashMap<String, Arc<FeatureHandle>>>,
    lifecycle: Mutex<Option<LifecyclePump>>,
    /// Set once by the first `stop` or `flush_and_stop`.
    closing: AtomicBool,
    stopped: AtomicBool,
    this: Weak<Spool>,
}

impl Spool {
    /// Validate `config` and build the shared runtime.
    pub fn new(config: SpoolConfig, options: SpoolOptions) -> Result<Arc<Self>> {
        config.validate()?;
        let executor = Arc::new(PersistenceExecutor::new(
            "spool-persistence",
            BackPressureStrategy::from_config(&config.backpressure),
            options.logger.clone(),
        ));
        let consent = ConsentProvider::new(options.initial_consent);
        Ok(Arc::new_cyclic(|this| Spool {
            config,
            options,
            executor,
            consent,
            features: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(None),
            closing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            this: this.clone(),
        }))
    }

    pub fn config(&self) -> &SpoolConfig {
        &self.config
    }

    pub fn consent(&self) -> ConsentState {
        self.consent.consent()
    }

    pub fn set_consent(&self, consent: ConsentState) {
        self.consent.set_consent(consent);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// HTTP uploader for `feature` using the configured intake.
    pub fn http_uploader(&self, feature: &str) -> Result<Arc<dyn DataUploader>> {
        self.config.require_endpoint()?;
        let uploader = HttpUploader::new(feature, self.config.intake.clone(), self.options.logger.clone())?;
        Ok(Arc::new(uploader))
    }

    /// Build and register a feature. Without an uploader the feature only
    /// persists.
    pub fn register_feature(
        &self,
        name: &str,
        uploader: Option<Arc<dyn DataUploader>>,
    ) -> Result<Arc<FeatureHandle>> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(Error::Config(format!(
                "cannot register feature '{}' on a stopped spool",
                name
            )));
        }
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(Error::Config(format!("invalid feature name '{}'", name)));
        }

        let mut features = self.features.lock().unwrap_or_else(PoisonError::into_inner);
        if features.contains_key(name) {
            return Err(Error::Config(format!("feature '{}' already registered", name)));
        }

        let handle = Arc::new(self.build_feature(name, uploader)?);
        features.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    pub fn feature(&self, name: &str) -> Option<Arc<FeatureHandle>> {
        self.features
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Block until queued writes are persisted or `timeout` elapses.
    pub fn wait_to_idle(&self, timeout: Duration) -> bool {
        self.executor.wait_to_idle(timeout)
    }

    /// Sender feeding host lifecycle events into the spool.
    pub fn lifecycle_sender(&self) -> Result<mpsc::Sender<AppLifecycleEvent>> {
        let mut pump = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pump) = pump.as_ref() {
            return Ok(pump.sender.clone());
        }

        let (sender, receiver) = mpsc::channel();
        let spool = self.this.clone();
        let thread = thread::Builder::new()
            .name("spool-lifecycle".to_string())
            .spawn(move || lifecycle_loop(spool, receiver))
            .map_err(|e| Error::io("spool-lifecycle", e))?;
        *pump = Some(LifecyclePump {
            sender: sender.clone(),
            thread,
        });
        Ok(sender)
    }

    /// Stop uploads and shut the persistence executor down.
    ///
    /// Leftover writes are handled per the configured shutdown policy.
    /// Idempotent; later calls return an empty report.
    pub fn stop(&self) -> StopReport {
        if self.closing.swap(true, Ordering::SeqCst) {
            return StopReport::default();
        }
        let shutdown = self.close(self.config.shutdown.policy);
        self.finish_stop(shutdown)
    }

    /// Persist queued writes, upload every batch once, then stop.
    ///
    /// The executor is closed before the flush, so writes submitted while
    /// flushing are rejected with a log instead of landing in a batch that is
    /// about to be deleted.
    pub fn flush_and_stop(&self) -> StopReport {
        if self.closing.swap(true, Ordering::SeqCst) {
            return StopReport::default();
        }
        let shutdown = self.close(ShutdownPolicy::DrainToStorage);
        if !shutdown.reached_idle {
            self.options.logger.log(
                LogLevel::Warn,
                LogTarget::Maintainer,
                "flushing before all queued writes were persisted",
            );
        }

        let flushed = self
            .handles()
            .iter()
            .filter_map(|handle| handle.flusher.as_ref().map(DataFlusher::flush))
            .collect();
        StopReport {
            flushed,
            ..self.finish_stop(shutdown)
        }
    }

    fn close(&self, policy: ShutdownPolicy) -> ShutdownReport {
        self.stop_schedulers();
        self.consent.unregister_all();
        self.executor.shutdown(
            Duration::from_millis(self.config.shutdown.wait_timeout_ms),
            policy,
        )
    }

    fn finish_stop(&self, shutdown: ShutdownReport) -> StopReport {
        self.stopped.store(true, Ordering::SeqCst);
        self.options.logger.log(
            LogLevel::Debug,
            LogTarget::Maintainer,
            &format!(
                "spool stopped (idle: {}, drained: {}, dropped: {})",
                shutdown.reached_idle, shutdown.drained, shutdown.dropped
            ),
        );
        self.join_lifecycle_pump();
        StopReport::default().with_shutdown(shutdown)
    }

    fn handles(&self) -> Vec<Arc<FeatureHandle>> {
        let mut handles: Vec<_> = self
            .features
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        handles
    }

    fn stop_schedulers(&self) {
        for handle in self.handles() {
            if let Some(scheduler) = &handle.scheduler {
                scheduler.stop();
            }
        }
    }

    fn join_lifecycle_pump(&self) {
        let pump = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pump) = pump {
            drop(pump.sender);
            // `Terminated` stops the spool from the pump thread itself.
            if pump.thread.thread().id() != thread::current().id() {
                let _ = pump.thread.join();
            }
        }
    }

    fn dispatch_lifecycle(&self, event: AppLifecycleEvent) {
        for handle in self.handles() {
            handle.metrics.on_lifecycle_event(event);
        }
    }

    fn build_feature(
        &self,
        name: &str,
        uploader: Option<Arc<dyn DataUploader>>,
    ) -> Result<FeatureHandle> {
        let logger = self.options.logger.clone();
        let time = self.options.time.clone();
        let storage_dir = self.config.resolved_storage_dir();
        let persistence = self.config.file_persistence_config();
        let upload = self.config.upload_configuration();

        let metrics = Arc::new(BatchMetricsDispatcher::new(
            name,
            upload,
            persistence,
            Arc::new(RateBasedSampler::new(self.config.metrics.sample_rate)),
            time.clone(),
            logger.clone(),
        ));
        let pending = Arc::new(BatchFileOrchestrator::new(
            storage_dir.join(pending_dir_name(name)),
            persistence,
            metrics.clone(),
            time.clone(),
            logger.clone(),
        ));
        let granted = Arc::new(BatchFileOrchestrator::new(
            storage_dir.join(granted_dir_name(name)),
            persistence,
            metrics.clone(),
            time.clone(),
            logger.clone(),
        ));
        let orchestrator = Arc::new(ConsentAwareFileOrchestrator::new(
            self.consent.consent(),
            pending,
            granted,
            ConsentAwareFileMigrator::new(FileMover::new(logger.clone()), logger.clone()),
            self.executor.clone(),
        ));
        self.consent.register(orchestrator.clone());

        let storage = Arc::new(FeatureStorage::new(
            name,
            self.executor.clone(),
            orchestrator,
            create_batch_store(
                logger.clone(),
                self.options.encryption.clone(),
                self.options.event_meta,
            ),
            metrics.clone(),
            persistence,
            logger.clone(),
        ));

        let (scheduler, flusher) = match uploader {
            Some(uploader) => {
                let scheduler = Arc::new(UploadScheduler::new(
                    storage.clone(),
                    uploader.clone(),
                    RetentionPolicy::new(self.config.retention, time),
                    upload,
                    logger.clone(),
                ));
                if self.options.start_uploads {
                    scheduler.start()?;
                }
                let flusher = DataFlusher::new(storage.clone(), uploader, logger);
                (Some(scheduler), Some(flusher))
            }
            None => (None, None),
        };

        Ok(FeatureHandle {
            name: name.to_string(),
            storage,
            metrics,
            scheduler,
            flusher,
        })
    }
}

fn lifecycle_loop(spool: Weak<Spool>, events: mpsc::Receiver<AppLifecycleEvent>) {
    loop {
        let event = match events.recv_timeout(LIFECYCLE_POLL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                match spool.upgrade() {
                    Some(spool) if !spool.closing.load(Ordering::SeqCst) => continue,
                    _ => break,
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let Some(spool) = spool.upgrade() else {
            break;
        };
        match event {
            AppLifecycleEvent::Foreground | AppLifecycleEvent::Background => {
                spool.dispatch_lifecycle(event);
            }
            AppLifecycleEvent::Terminated => {
                spool.flush_and_stop();
                break;
            }
        }
    }
}

impl Drop for Spool {
    fn drop(&mut self) {
        if !self.closing.load(Ordering::SeqCst) {
            self.stop();
        }
    }
}
