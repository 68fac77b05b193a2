mod cache;
mod notifier;
mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::config::{ConfigSource, PollingConfig};
use crate::error::{PipewatchError, Result};
use crate::providers::gitlab::{GitLabClient, GitLabJob, GitLabPipeline, GitLabProvider, ProjectResolver};

pub use cache::JobCache;
pub use notifier::{Notification, Severity, Subject};
pub use scheduler::{InFlight, InFlightGuard, PollTimer};

const EVENT_CAPACITY: usize = 256;

/// Signals published to whoever renders the pipeline tree.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// Data may have changed; re-request the pipeline list and expanded children.
    Refresh,
    Notification(Notification),
    /// A fetch or action failed. The monitor stays usable.
    Error(String),
}

/// Polling, caching and transition detection for one GitLab project.
///
/// Two timers drive refreshes: the pipeline timer runs from the first
/// pipeline fetch until `dispose`, and the job timer runs while any expanded
/// pipeline still has active jobs. Neither fetches anything itself; both just
/// publish [`MonitorEvent::Refresh`] and let the consumer decide what to
/// re-request.
pub struct PipelineMonitor {
    config: Arc<dyn ConfigSource>,
    http: reqwest::Client,
    resolver: ProjectResolver,
    cache: Arc<Mutex<JobCache>>,
    events: broadcast::Sender<MonitorEvent>,
    refresh: InFlight,
    pipeline_timer: PollTimer,
    job_timer: PollTimer,
    log_interval: Duration,
}

impl PipelineMonitor {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: Arc<dyn ConfigSource>, polling: &PollingConfig) -> Result<Self> {
        let http = GitLabClient::http_client(polling.request_timeout())?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            config,
            http,
            resolver: ProjectResolver::new(),
            cache: Arc::new(Mutex::new(JobCache::new())),
            events,
            refresh: InFlight::new(),
            pipeline_timer: PollTimer::new("pipeline", polling.pipeline_interval()),
            job_timer: PollTimer::new("job", polling.job_interval()),
            log_interval: polling.log_interval(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Publishes a refresh right away, bypassing the timers.
    pub fn request_refresh(&self) {
        let _ = self.events.send(MonitorEvent::Refresh);
    }

    /// Claims the refresh slot. Timer ticks are skipped while the guard is held.
    pub fn begin_refresh(&self) -> Option<InFlightGuard> {
        self.refresh.try_begin()
    }

    pub fn log_interval(&self) -> Duration {
        self.log_interval
    }

    /// Stops both timers. Cached state is left for the next refresh to reuse.
    pub fn dispose(&self) {
        self.pipeline_timer.disarm();
        self.job_timer.disarm();
    }

    async fn connect(&self) -> Result<GitLabProvider> {
        let config = self.config.gitlab()?;
        GitLabProvider::connect(self.http.clone(), &config, &self.resolver).await
    }

    fn report(&self, context: &str, err: &PipewatchError) {
        warn!("{context}: {err}");
        let _ = self.events.send(MonitorEvent::Error(format!("{context}: {err}")));
    }

    fn publish(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            info!("{notification}");
            let _ = self.events.send(MonitorEvent::Notification(notification));
        }
    }

    /// Fetches the newest pipelines and notifies on finished transitions.
    ///
    /// Arms the pipeline timer on first success. On failure an error event is
    /// published and an empty list returned.
    pub async fn fetch_pipelines(&self) -> Vec<GitLabPipeline> {
        let provider = match self.connect().await {
            Ok(provider) => provider,
            Err(e) => {
                self.report("Failed to load pipelines", &e);
                return Vec::new();
            }
        };

        self.ensure_pipeline_timer();

        match provider.list_pipelines().await {
            Ok(pipelines) => {
                self.observe_pipelines(&pipelines);
                pipelines
            }
            Err(e) => {
                self.report("Failed to load pipelines", &e);
                Vec::new()
            }
        }
    }

    fn observe_pipelines(&self, pipelines: &[GitLabPipeline]) {
        let notifications: Vec<_> = {
            let mut cache = self.cache.lock();
            pipelines
                .iter()
                .filter_map(|pipeline| {
                    let previous = cache.record_pipeline_status(pipeline.id, &pipeline.status);
                    notifier::pipeline_transition(previous.as_deref(), pipeline)
                })
                .collect()
        };
        self.publish(notifications);
    }

    /// Returns the jobs of an expanded pipeline.
    ///
    /// Settled pipelines are served from cache; pipelines with active jobs are
    /// fetched live every time. On failure the last known list is returned.
    /// A response for a pipeline collapsed while it was loading is discarded.
    pub async fn fetch_children(&self, pipeline_id: u64) -> Vec<GitLabJob> {
        let epoch = {
            let cache = self.cache.lock();
            if let Some(jobs) = cache.cached_jobs(pipeline_id) {
                return jobs;
            }
            cache.epoch(pipeline_id)
        };

        let fetched = match self.connect().await {
            Ok(provider) => provider.list_jobs(pipeline_id).await,
            Err(e) => Err(e),
        };

        let jobs = match fetched {
            Ok(jobs) => jobs,
            Err(e) => {
                self.report(&format!("Failed to load jobs for pipeline #{pipeline_id}"), &e);
                return self.cache.lock().last_jobs(pipeline_id);
            }
        };

        let (has_active, notifications) = {
            let mut cache = self.cache.lock();
            if cache.epoch(pipeline_id) != epoch {
                debug!("Pipeline #{pipeline_id} collapsed while loading, dropping its jobs");
                return Vec::new();
            }

            let has_active = cache.store_jobs(pipeline_id, jobs.clone());
            let notifications: Vec<_> = jobs
                .iter()
                .filter_map(|job| {
                    let previous = cache.record_job_status(job.id, &job.status);
                    notifier::job_transition(previous.as_deref(), job, pipeline_id)
                })
                .collect();
            (has_active, notifications)
        };

        if has_active {
            self.ensure_job_timer();
        }
        self.publish(notifications);

        jobs
    }

    /// Forgets a collapsed pipeline's jobs; stops the job timer once nothing needs it.
    pub fn on_collapse(&self, pipeline_id: u64) {
        let idle = self.cache.lock().collapse(pipeline_id);
        debug!("Pipeline #{pipeline_id} collapsed");

        if idle {
            self.job_timer.disarm();
        }
    }

    /// Job metadata and raw log, fetched concurrently.
    pub async fn job_snapshot(&self, job_id: u64) -> Result<(GitLabJob, String)> {
        self.connect().await?.job_snapshot(job_id).await
    }

    pub async fn retry_pipeline(&self, pipeline_id: u64) -> Result<()> {
        self.connect().await?.retry_pipeline(pipeline_id).await?;
        info!("Retried pipeline #{pipeline_id}");
        self.invalidate_pipeline(pipeline_id);
        self.request_refresh();
        Ok(())
    }

    pub async fn cancel_pipeline(&self, pipeline_id: u64) -> Result<()> {
        self.connect().await?.cancel_pipeline(pipeline_id).await?;
        info!("Canceled pipeline #{pipeline_id}");
        self.invalidate_pipeline(pipeline_id);
        self.request_refresh();
        Ok(())
    }

    pub async fn retry_job(&self, job_id: u64) -> Result<()> {
        self.connect().await?.retry_job(job_id).await?;
        info!("Retried job #{job_id}");
        self.invalidate_job(job_id);
        self.request_refresh();
        Ok(())
    }

    pub async fn cancel_job(&self, job_id: u64) -> Result<()> {
        self.connect().await?.cancel_job(job_id).await?;
        info!("Canceled job #{job_id}");
        self.invalidate_job(job_id);
        self.request_refresh();
        Ok(())
    }

    fn invalidate_pipeline(&self, pipeline_id: u64) {
        if self.cache.lock().invalidate(pipeline_id) {
            debug!("Dropped cached jobs of pipeline #{pipeline_id}");
        }
    }

    fn invalidate_job(&self, job_id: u64) {
        let owner = self.cache.lock().pipeline_of(job_id);
        if let Some(pipeline_id) = owner {
            self.invalidate_pipeline(pipeline_id);
        }
    }

    fn ensure_pipeline_timer(&self) {
        if self.pipeline_timer.is_armed() {
            return;
        }

        let events = self.events.clone();
        let refresh = self.refresh.clone();
        self.pipeline_timer.arm(move || {
            let events = events.clone();
            let refresh = refresh.clone();
            async move {
                if refresh.is_busy() {
                    debug!("Refresh still in flight, skipping pipeline tick");
                    return;
                }
                let _ = events.send(MonitorEvent::Refresh);
            }
        });
    }

    fn ensure_job_timer(&self) {
        if self.job_timer.is_armed() {
            return;
        }

        let events = self.events.clone();
        let refresh = self.refresh.clone();
        let cache = Arc::clone(&self.cache);
        self.job_timer.arm(move || {
            let events = events.clone();
            let refresh = refresh.clone();
            let cache = Arc::clone(&cache);
            async move {
                let needed = cache.lock().has_refreshing();
                if !needed {
                    return;
                }
                if refresh.is_busy() {
                    debug!("Refresh still in flight, skipping job tick");
                    return;
                }
                let _ = events.send(MonitorEvent::Refresh);
            }
        });
    }
}
