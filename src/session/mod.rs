//! Live job log sessions.
//!
//! A session fetches a job's metadata and log together, renders them into a
//! [`LogView`], and keeps polling for as long as the job is active. Once the
//! job reaches a finished status the session stops polling for good and asks
//! the monitor to refresh the tree.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::ansi::LogRenderer;
use crate::error::{PipewatchError, Result};
use crate::monitor::{InFlight, PipelineMonitor, PollTimer};
use crate::providers::gitlab::GitLabJob;
use crate::status::is_finished;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the first fetch.
    Loading,
    /// Job still active; the log timer is armed.
    ActivePolling,
    /// Job finished. Only manual refreshes fetch from here on.
    Finished,
    /// The first fetch (or a retry of it) failed; nothing is polling.
    Error,
    Closed,
}

/// Where a session renders to.
pub trait LogView: Send + Sync {
    fn set_title(&self, title: &str);
    fn show_log(&self, rendered: &str);
    fn show_message(&self, message: &str);
    fn focus(&self);
}

const REFRESH_BUSY: &str = "Refresh already in progress";

pub fn session_title(job: &GitLabJob) -> String {
    format!("Job #{} · {} [{}]", job.id, job.name, job.status)
}

struct SessionInner {
    state: SessionState,
    job: Option<GitLabJob>,
}

pub struct LogSession {
    job_id: u64,
    monitor: Arc<PipelineMonitor>,
    view: Arc<dyn LogView>,
    renderer: Arc<dyn LogRenderer>,
    inner: Mutex<SessionInner>,
    timer: PollTimer,
    fetching: InFlight,
}

impl LogSession {
    fn new(
        job_id: u64,
        monitor: Arc<PipelineMonitor>,
        view: Arc<dyn LogView>,
        renderer: Arc<dyn LogRenderer>,
    ) -> Arc<Self> {
        let timer = PollTimer::new("log", monitor.log_interval());

        view.set_title(&format!("Job #{job_id}"));
        view.show_message("Loading job log...");

        Arc::new(Self {
            job_id,
            monitor,
            view,
            renderer,
            inner: Mutex::new(SessionInner {
                state: SessionState::Loading,
                job: None,
            }),
            timer,
            fetching: InFlight::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_polling(&self) -> bool {
        self.timer.is_armed()
    }

    /// Web page of the job, known after the first successful fetch.
    pub fn external_url(&self) -> Option<String> {
        self.inner
            .lock()
            .job
            .as_ref()
            .map(|job| job.web_url.clone())
            .filter(|url| !url.is_empty())
    }

    /// Opens the job page in the default browser. Returns false if the URL is not known yet.
    pub fn open_externally(&self) -> Result<bool> {
        let Some(url) = self.external_url() else {
            return Ok(false);
        };

        open::that(&url).map_err(PipewatchError::Io)?;
        info!("Opened {url}");
        Ok(true)
    }

    pub fn focus(&self) {
        self.view.focus();
    }

    /// Re-fetches once on request. Never re-arms polling once the job has finished.
    ///
    /// Returns false when a fetch was already running and this request was dropped.
    pub async fn refresh(self: &Arc<Self>) -> bool {
        let ran = self.fetch_and_render().await;
        if !ran {
            self.view.show_message(REFRESH_BUSY);
        }
        ran
    }

    /// Stops polling. Any fetch still in flight is discarded when it returns.
    pub fn close(&self) {
        self.inner.lock().state = SessionState::Closed;
        self.timer.disarm();
        debug!("Closed log session for job #{}", self.job_id);
    }

    /// Returns false if another fetch held the slot.
    async fn fetch_and_render(self: &Arc<Self>) -> bool {
        let Some(_guard) = self.fetching.try_begin() else {
            debug!("Log fetch for job #{} already in flight", self.job_id);
            return false;
        };

        if self.state() == SessionState::Closed {
            return true;
        }

        let snapshot = self.monitor.job_snapshot(self.job_id).await;

        match snapshot {
            Ok((job, log)) => self.apply_snapshot(job, &log),
            Err(e) => self.apply_failure(&e),
        }
        true
    }

    fn apply_snapshot(self: &Arc<Self>, job: GitLabJob, log: &str) {
        let finished = is_finished(&job.status);
        let title = session_title(&job);

        // arm while holding the state lock; close() takes it before disarming
        let previous = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            if previous == SessionState::Closed {
                return;
            }

            inner.state = if finished || previous == SessionState::Finished {
                SessionState::Finished
            } else {
                SessionState::ActivePolling
            };
            inner.job = Some(job);

            if inner.state == SessionState::ActivePolling {
                self.ensure_polling();
            } else {
                self.timer.disarm();
            }
            previous
        };

        self.view.set_title(&title);
        self.view.show_log(&self.renderer.render(log));

        if finished && previous == SessionState::ActivePolling {
            info!("Job #{} finished, refreshing pipelines", self.job_id);
            self.monitor.request_refresh();
        }
    }

    fn apply_failure(&self, err: &PipewatchError) {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                SessionState::Closed => return,
                SessionState::Loading | SessionState::Error => inner.state = SessionState::Error,
                SessionState::ActivePolling | SessionState::Finished => {}
            }
        }

        warn!("Failed to load log for job #{}: {err}", self.job_id);
        self.view.show_message(&format!("Failed to load job log: {err}"));
    }

    fn ensure_polling(self: &Arc<Self>) {
        if self.timer.is_armed() {
            return;
        }

        let session: Weak<Self> = Arc::downgrade(self);
        self.timer.arm(move || {
            let session = session.clone();
            async move {
                if let Some(session) = session.upgrade() {
                    session.fetch_and_render().await;
                }
            }
        });
    }
}

/// At most one live session per job.
pub struct LogSessions {
    monitor: Arc<PipelineMonitor>,
    renderer: Arc<dyn LogRenderer>,
    sessions: Mutex<HashMap<u64, Arc<LogSession>>>,
}

impl LogSessions {
    pub fn new(monitor: Arc<PipelineMonitor>, renderer: Arc<dyn LogRenderer>) -> Self {
        Self {
            monitor,
            renderer,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a session for `job_id`, or focuses the one already open.
    ///
    /// A new session performs its first fetch before this returns; an
    /// existing one is returned as-is without fetching.
    pub async fn open(&self, job_id: u64, view: Arc<dyn LogView>) -> Arc<LogSession> {
        let (session, created) = {
            let mut sessions = self.sessions.lock();
            match sessions.get(&job_id).filter(|s| s.state() != SessionState::Closed) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let session = LogSession::new(
                        job_id,
                        Arc::clone(&self.monitor),
                        view,
                        Arc::clone(&self.renderer),
                    );
                    sessions.insert(job_id, Arc::clone(&session));
                    (session, true)
                }
            }
        };

        if created {
            session.fetch_and_render().await;
        } else {
            debug!("Log session for job #{job_id} already open");
            session.focus();
        }

        session
    }

    /// Tears down the session for `job_id`. Returns false if none was open.
    pub fn close(&self, job_id: u64) -> bool {
        let removed = self.sessions.lock().remove(&job_id);
        match removed {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ansi::HtmlRenderer;
    use crate::auth::Token;
    use crate::config::{GitLabConfig, PollingConfig};
    use crate::monitor::MonitorEvent;
    use mockito::{Mock, Server};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum ViewCall {
        Title(String),
        Log(String),
        Message(String),
        Focus,
    }

    #[derive(Default)]
    struct RecordingView {
        calls: Mutex<Vec<ViewCall>>,
    }

    impl RecordingView {
        fn calls(&self) -> Vec<ViewCall> {
            self.calls.lock().clone()
        }

        fn last_title(&self) -> Option<String> {
            self.calls().into_iter().rev().find_map(|c| match c {
                ViewCall::Title(t) => Some(t),
                _ => None,
            })
        }

        fn messages(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    ViewCall::Message(m) => Some(m),
                    _ => None,
                })
                .collect()
        }

        fn focus_count(&self) -> usize {
            self.calls().iter().filter(|c| **c == ViewCall::Focus).count()
        }
    }

    impl LogView for RecordingView {
        fn set_title(&self, title: &str) {
            self.calls.lock().push(ViewCall::Title(title.to_string()));
        }

        fn show_log(&self, rendered: &str) {
            self.calls.lock().push(ViewCall::Log(rendered.to_string()));
        }

        fn show_message(&self, message: &str) {
            self.calls.lock().push(ViewCall::Message(message.to_string()));
        }

        fn focus(&self) {
            self.calls.lock().push(ViewCall::Focus);
        }
    }

    fn sessions_for(server: &Server, log_interval_ms: u64) -> LogSessions {
        let config = GitLabConfig {
            base_url: Some(server.url()),
            personal_access_token: Some(Token::from("secret")),
            project_id: Some(7),
            workspace: None,
        };
        let polling = PollingConfig {
            log_interval_ms,
            ..PollingConfig::default()
        };
        let monitor = PipelineMonitor::new(Arc::new(config), &polling).unwrap();
        LogSessions::new(Arc::new(monitor), Arc::new(HtmlRenderer))
    }

    async fn mock_job(server: &mut Server, status: &str, log: &str) -> (Mock, Mock) {
        let job = server
            .mock("GET", "/api/v4/projects/7/jobs/4")
            .match_header("private-token", "secret")
            .with_status(200)
            .with_body(format!(
                r#"{{"id": 4, "name": "deploy", "stage": "deploy", "status": "{status}", "web_url": "https://gitlab.example.com/g/p/-/jobs/4"}}"#
            ))
            .create_async()
            .await;
        let trace = server
            .mock("GET", "/api/v4/projects/7/jobs/4/trace")
            .with_status(200)
            .with_body(log)
            .create_async()
            .await;
        (job, trace)
    }

    async fn remove(mocks: (Mock, Mock)) {
        mocks.0.remove_async().await;
        mocks.1.remove_async().await;
    }

    async fn wait_for(session: &LogSession, state: SessionState) {
        for _ in 0..200 {
            if session.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session stuck in {:?}, expected {state:?}", session.state());
    }

    #[tokio::test]
    async fn test_open_finished_job_renders_without_polling() {
        let mut server = Server::new_async().await;
        mock_job(&mut server, "success", "\x1b[32mDeployed\x1b[0m").await;
        let sessions = sessions_for(&server, 10_000);
        let view = Arc::new(RecordingView::default());

        let session = sessions.open(4, view.clone()).await;

        assert_eq!(session.state(), SessionState::Finished);
        assert!(!session.is_polling());
        assert_eq!(view.last_title().as_deref(), Some("Job #4 · deploy [success]"));
        assert!(view.calls().contains(&ViewCall::Log(
            "<span style=\"color:#23d18b\">Deployed</span>".to_string()
        )));
        assert_eq!(
            session.external_url().as_deref(),
            Some("https://gitlab.example.com/g/p/-/jobs/4")
        );
    }

    #[tokio::test]
    async fn test_empty_log_shows_placeholder() {
        let mut server = Server::new_async().await;
        mock_job(&mut server, "created", "").await;
        let sessions = sessions_for(&server, 10_000);
        let view = Arc::new(RecordingView::default());

        let session = sessions.open(4, view.clone()).await;

        assert!(view.calls().contains(&ViewCall::Log("(empty job log)".to_string())));
        session.close();
    }

    #[tokio::test]
    async fn test_active_job_polls_until_finished() {
        let mut server = Server::new_async().await;
        let running = mock_job(&mut server, "running", "step 1\n").await;
        let sessions = sessions_for(&server, 30);
        let mut events = sessions.monitor.subscribe();
        let view = Arc::new(RecordingView::default());

        let session = sessions.open(4, view.clone()).await;
        assert_eq!(session.state(), SessionState::ActivePolling);
        assert!(session.is_polling());

        remove(running).await;
        mock_job(&mut server, "failed", "step 1\nboom\n").await;

        wait_for(&session, SessionState::Finished).await;
        assert!(!session.is_polling());
        assert_eq!(view.last_title().as_deref(), Some("Job #4 · deploy [failed]"));

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv()).await;
        assert!(matches!(event, Ok(Ok(MonitorEvent::Refresh))));
    }

    #[tokio::test]
    async fn test_finished_is_sticky_on_manual_refresh() {
        let mut server = Server::new_async().await;
        let done = mock_job(&mut server, "success", "ok\n").await;
        let sessions = sessions_for(&server, 30);
        let view = Arc::new(RecordingView::default());

        let session = sessions.open(4, view.clone()).await;
        assert_eq!(session.state(), SessionState::Finished);
        remove(done).await;

        // a retried job can report an active status again
        let (job, trace) = mock_job(&mut server, "running", "again\n").await;
        session.refresh().await;

        job.assert_async().await;
        trace.assert_async().await;
        assert_eq!(session.state(), SessionState::Finished);
        assert!(!session.is_polling());
        assert_eq!(view.last_title().as_deref(), Some("Job #4 · deploy [running]"));
    }

    fn running_job() -> GitLabJob {
        GitLabJob {
            id: 4,
            name: "deploy".to_string(),
            stage: "deploy".to_string(),
            status: "running".to_string(),
            web_url: String::new(),
            started_at: None,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn test_snapshot_after_close_never_arms_timer() {
        let server = Server::new_async().await;
        let sessions = sessions_for(&server, 30);
        let view = Arc::new(RecordingView::default());
        let session = LogSession::new(
            4,
            Arc::clone(&sessions.monitor),
            view.clone(),
            Arc::new(HtmlRenderer),
        );

        session.apply_snapshot(running_job(), "step\n");
        assert_eq!(session.state(), SessionState::ActivePolling);
        assert!(session.is_polling());

        session.close();
        session.apply_snapshot(running_job(), "step\nstep 2\n");

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_polling());
        assert!(!view.calls().contains(&ViewCall::Log("step\nstep 2\n".to_string())));
    }

    #[tokio::test]
    async fn test_manual_refresh_reports_busy_fetch() {
        let mut server = Server::new_async().await;
        mock_job(&mut server, "success", "ok\n").await;
        let sessions = sessions_for(&server, 10_000);
        let view = Arc::new(RecordingView::default());
        let session = sessions.open(4, view.clone()).await;

        let guard = session.fetching.try_begin().unwrap();
        assert!(!session.refresh().await);
        assert_eq!(view.messages().last().map(String::as_str), Some(REFRESH_BUSY));

        drop(guard);
        assert!(session.refresh().await);
    }

    #[tokio::test]
    async fn test_open_failure_is_error_without_timer() {
        let mut server = Server::new_async().await;
        let failing = (
            server
                .mock("GET", "/api/v4/projects/7/jobs/4")
                .with_status(404)
                .with_body(r#"{"message":"404 Not found"}"#)
                .create_async()
                .await,
            server
                .mock("GET", "/api/v4/projects/7/jobs/4/trace")
                .with_status(404)
                .create_async()
                .await,
        );
        let sessions = sessions_for(&server, 30);
        let view = Arc::new(RecordingView::default());

        let session = sessions.open(4, view.clone()).await;

        assert_eq!(session.state(), SessionState::Error);
        assert!(!session.is_polling());
        let messages = view.messages();
        assert!(messages
            .last()
            .is_some_and(|m| m.starts_with("Failed to load job log: ") && m.contains("404")));
        assert!(session.external_url().is_none());
        assert!(!session.open_externally().unwrap());

        remove(failing).await;
        mock_job(&mut server, "running", "retrying\n").await;

        session.refresh().await;
        assert_eq!(session.state(), SessionState::ActivePolling);
        assert!(session.is_polling());
        session.close();
    }

    #[tokio::test]
    async fn test_poll_failure_keeps_polling() {
        let mut server = Server::new_async().await;
        let running = mock_job(&mut server, "running", "step 1\n").await;
        let sessions = sessions_for(&server, 30);
        let view = Arc::new(RecordingView::default());

        let session = sessions.open(4, view.clone()).await;
        remove(running).await;

        server
            .mock("GET", "/api/v4/projects/7/jobs/4")
            .with_status(500)
            .with_body("oops")
            .create_async()
            .await;
        server
            .mock("GET", "/api/v4/projects/7/jobs/4/trace")
            .with_status(500)
            .with_body("oops")
            .create_async()
            .await;

        for _ in 0..200 {
            if !view.messages().iter().all(|m| m == "Loading job log...") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(view
            .messages()
            .iter()
            .any(|m| m.starts_with("Failed to load job log: ")));
        assert_eq!(session.state(), SessionState::ActivePolling);
        assert!(session.is_polling());
        session.close();
    }

    #[tokio::test]
    async fn test_second_open_focuses_existing_session() {
        let mut server = Server::new_async().await;
        let (job, trace) = mock_job(&mut server, "success", "ok\n").await;
        let sessions = sessions_for(&server, 10_000);
        let first_view = Arc::new(RecordingView::default());
        let second_view = Arc::new(RecordingView::default());

        let first = sessions.open(4, first_view.clone()).await;
        let second = sessions.open(4, second_view.clone()).await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(sessions.sessions.lock().len(), 1);
        assert_eq!(first_view.focus_count(), 1);
        assert!(second_view.calls().is_empty());
        job.assert_async().await;
        trace.assert_async().await;
    }

    #[tokio::test]
    async fn test_close_stops_timer_and_allows_reopen() {
        let mut server = Server::new_async().await;
        mock_job(&mut server, "running", "step\n").await;
        let sessions = sessions_for(&server, 30);
        let view = Arc::new(RecordingView::default());

        let session = sessions.open(4, view.clone()).await;
        assert!(session.is_polling());

        assert!(sessions.close(4));
        assert!(!sessions.close(4));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_polling());
        assert!(!sessions.sessions.lock().contains_key(&4));

        let calls_after_close = view.calls().len();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(view.calls().len(), calls_after_close);

        let reopened = sessions.open(4, Arc::new(RecordingView::default())).await;
        assert!(!Arc::ptr_eq(&session, &reopened));
        assert!(sessions.close(4));
        assert!(sessions.sessions.lock().is_empty());
    }
}
