use anyhow::Result;
use clap::{Parser, Subcommand};
use console::Term;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::ansi::{HtmlRenderer, LogRenderer, TerminalRenderer};
use crate::config::{Config, ConfigFile, GitLabOverrides};
use crate::monitor::{MonitorEvent, PipelineMonitor};
use crate::output::{
    bright_green, bright_red, create_spinner, dim, print_notification, render_tree, PipelineTree,
    TerminalLogView,
};
use crate::session::LogSessions;

#[derive(Parser)]
#[command(name = "pipewatch")]
#[command(author, version, about = "GitLab pipeline monitor", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML, JSON or YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// GitLab base URL
    #[arg(short, long, global = true, env = "GITLAB_URL")]
    url: Option<String>,

    /// Personal access token
    #[arg(short, long, global = true, env = "GITLAB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Project ID; detected from the git remote when omitted
    #[arg(short = 'P', long, global = true, env = "GITLAB_PROJECT_ID")]
    project: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the newest pipelines and the jobs of expanded ones
    Watch {
        /// Pipeline to expand on start (repeatable)
        #[arg(short, long = "expand")]
        expand: Vec<u64>,

        /// Print the tree once and exit
        #[arg(long, default_value_t = false)]
        once: bool,
    },
    /// Follow a job log until the job finishes
    Log {
        job_id: u64,

        /// Emit the log as HTML with colored spans
        #[arg(long, default_value_t = false)]
        html: bool,
    },
    RetryPipeline { pipeline_id: u64 },
    CancelPipeline { pipeline_id: u64 },
    RetryJob { job_id: u64 },
    CancelJob { job_id: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchCommand {
    Expand(u64),
    Collapse(u64),
    Refresh,
    Quit,
}

const WATCH_HELP: &str = "commands: expand <id> | collapse <id> | refresh | quit";
const LOG_HELP: &str = "commands: r (refresh) | o (open in browser) | q (quit)";

fn parse_watch_command(line: &str) -> Option<WatchCommand> {
    let mut parts = line.split_whitespace();
    let command = parts.next()?;
    let id = parts.next().and_then(|id| id.trim_start_matches('#').parse().ok());

    match (command, id) {
        ("expand" | "e", Some(id)) => Some(WatchCommand::Expand(id)),
        ("collapse" | "c", Some(id)) => Some(WatchCommand::Collapse(id)),
        ("refresh" | "r", None) => Some(WatchCommand::Refresh),
        ("quit" | "q", None) => Some(WatchCommand::Quit),
        _ => None,
    }
}

impl Cli {
    fn build_monitor(&self) -> Result<PipelineMonitor> {
        let polling = Config::load(self.config.as_deref())?.polling;
        let source = ConfigFile::new(
            self.config.clone(),
            GitLabOverrides {
                base_url: self.url.clone(),
                token: self.token.clone(),
                project_id: self.project,
            },
        );

        Ok(PipelineMonitor::new(Arc::new(source), &polling)?)
    }

    async fn redraw(tree: &PipelineTree) {
        let Some(nodes) = tree.refresh().await else {
            return;
        };

        let term = Term::stdout();
        if term.is_term() {
            let _ = term.clear_screen();
        }
        println!("{}", render_tree(&nodes));
        eprintln!("{}", dim(WATCH_HELP));
    }

    async fn execute_watch(&self, monitor: &Arc<PipelineMonitor>, expand: &[u64], once: bool) -> Result<()> {
        let tree = PipelineTree::new(Arc::clone(monitor));
        for pipeline_id in expand {
            tree.expand(*pipeline_id);
        }

        let mut events = monitor.subscribe();
        Self::redraw(&tree).await;

        if once {
            while let Ok(event) = events.try_recv() {
                if let MonitorEvent::Error(message) = event {
                    eprintln!("{}", bright_red(message));
                }
            }
            return Ok(());
        }

        info!("Watching pipelines");
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(MonitorEvent::Refresh) => Self::redraw(&tree).await,
                    Ok(MonitorEvent::Notification(notification)) => print_notification(&notification),
                    Ok(MonitorEvent::Error(message)) => eprintln!("{}", bright_red(message)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {skipped} monitor events");
                        Self::redraw(&tree).await;
                    }
                    Err(RecvError::Closed) => break,
                },
                line = stdin.next_line(), if stdin_open => match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match parse_watch_command(&line) {
                        Some(WatchCommand::Expand(id)) => {
                            tree.expand(id);
                            Self::redraw(&tree).await;
                        }
                        Some(WatchCommand::Collapse(id)) => {
                            tree.collapse(id);
                            Self::redraw(&tree).await;
                        }
                        Some(WatchCommand::Refresh) => monitor.request_refresh(),
                        Some(WatchCommand::Quit) => break,
                        None => eprintln!("{}", dim(WATCH_HELP)),
                    },
                    None => stdin_open = false,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        Ok(())
    }

    async fn execute_log(&self, monitor: &Arc<PipelineMonitor>, job_id: u64, html: bool) -> Result<()> {
        let renderer: Arc<dyn LogRenderer> = if html {
            Arc::new(HtmlRenderer)
        } else {
            Arc::new(TerminalRenderer)
        };
        let sessions = LogSessions::new(Arc::clone(monitor), renderer);
        let view = TerminalLogView::with_spinner(create_spinner(format!("Fetching job #{job_id}")));
        let session = sessions.open(job_id, Arc::new(view)).await;

        let mut events = monitor.subscribe();
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        eprintln!("{}", dim(LOG_HELP));

        loop {
            // without stdin there is nothing left to wait for once polling stops
            if !stdin_open && !session.is_polling() {
                break;
            }

            tokio::select! {
                line = stdin.next_line(), if stdin_open => match line?.as_deref().map(str::trim) {
                    Some("r") => {
                        session.refresh().await;
                    }
                    Some("o") => match session.open_externally() {
                        Ok(true) => {}
                        Ok(false) => eprintln!("{}", dim("Job URL not known yet")),
                        Err(e) => eprintln!("{}", bright_red(format!("Failed to open browser: {e}"))),
                    },
                    Some("q") => break,
                    Some("") => {}
                    Some(_) => eprintln!("{}", dim(LOG_HELP)),
                    None => stdin_open = false,
                },
                // a finished session signals through the monitor
                _ = events.recv() => {}
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        sessions.close(job_id);
        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        let monitor = Arc::new(self.build_monitor()?);

        let result = match &self.command {
            Commands::Watch { expand, once } => self.execute_watch(&monitor, expand, *once).await,
            Commands::Log { job_id, html } => self.execute_log(&monitor, *job_id, *html).await,
            Commands::RetryPipeline { pipeline_id } => {
                monitor.retry_pipeline(*pipeline_id).await?;
                println!("{} Retried pipeline #{pipeline_id}", bright_green("✓"));
                Ok(())
            }
            Commands::CancelPipeline { pipeline_id } => {
                monitor.cancel_pipeline(*pipeline_id).await?;
                println!("{} Canceled pipeline #{pipeline_id}", bright_green("✓"));
                Ok(())
            }
            Commands::RetryJob { job_id } => {
                monitor.retry_job(*job_id).await?;
                println!("{} Retried job #{job_id}", bright_green("✓"));
                Ok(())
            }
            Commands::CancelJob { job_id } => {
                monitor.cancel_job(*job_id).await?;
                println!("{} Canceled job #{job_id}", bright_green("✓"));
                Ok(())
            }
        };

        monitor.dispose();
        result
    }
}
