use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use futures::future::join_all;
use indexmap::IndexSet;
use log::debug;
use parking_lot::Mutex;

use crate::monitor::PipelineMonitor;
use crate::providers::gitlab::{GitLabJob, GitLabPipeline};
use crate::status::is_finished;

use super::styling::{dim, glyph};
use super::tables::{color_coded_status_cell, create_cyan_header, create_table};

/// What a node allows: finished nodes can be retried, running ones canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Finished,
    Running,
    Other,
}

impl NodeClass {
    pub fn for_status(status: &str) -> Self {
        if is_finished(status) {
            return Self::Finished;
        }
        match status.to_lowercase().as_str() {
            "running" | "pending" => Self::Running,
            _ => Self::Other,
        }
    }

    pub fn can_retry(self) -> bool {
        self == Self::Finished
    }

    pub fn can_cancel(self) -> bool {
        self == Self::Running
    }

    fn action_hint(self) -> &'static str {
        if self.can_retry() {
            "retry"
        } else if self.can_cancel() {
            "cancel"
        } else {
            ""
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub id: u64,
    pub label: String,
    pub description: String,
    pub status: String,
    pub class: NodeClass,
    pub url: String,
    pub children: Vec<TreeNode>,
}

fn local_time(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn pipeline_node(pipeline: &GitLabPipeline, jobs: &[GitLabJob]) -> TreeNode {
    TreeNode {
        id: pipeline.id,
        label: format!("#{} [{}]", pipeline.id, pipeline.status),
        description: format!("{} · {}", pipeline.ref_, local_time(&pipeline.created_at)),
        status: pipeline.status.clone(),
        class: NodeClass::for_status(&pipeline.status),
        url: pipeline.web_url.clone(),
        children: jobs.iter().map(job_node).collect(),
    }
}

pub fn job_node(job: &GitLabJob) -> TreeNode {
    let description = match job.finished_at.as_ref().or(job.started_at.as_ref()) {
        Some(at) => format!("{} · {}", job.stage, local_time(at)),
        None => job.stage.clone(),
    };

    TreeNode {
        id: job.id,
        label: format!("{} [{}]", job.name, job.status),
        description,
        status: job.status.clone(),
        class: NodeClass::for_status(&job.status),
        url: job.web_url.clone(),
        children: Vec::new(),
    }
}

/// Projects monitor data into display nodes.
///
/// Keeps the set of expanded pipelines in expansion order; only those have
/// their jobs requested on refresh.
pub struct PipelineTree {
    monitor: Arc<PipelineMonitor>,
    expanded: Mutex<IndexSet<u64>>,
}

impl PipelineTree {
    pub fn new(monitor: Arc<PipelineMonitor>) -> Self {
        Self {
            monitor,
            expanded: Mutex::new(IndexSet::new()),
        }
    }

    /// Returns false if the pipeline was already expanded.
    pub fn expand(&self, pipeline_id: u64) -> bool {
        self.expanded.lock().insert(pipeline_id)
    }

    /// Returns false if the pipeline was not expanded.
    pub fn collapse(&self, pipeline_id: u64) -> bool {
        let removed = self.expanded.lock().shift_remove(&pipeline_id);
        if removed {
            self.monitor.on_collapse(pipeline_id);
        }
        removed
    }

    pub fn expanded(&self) -> Vec<u64> {
        self.expanded.lock().iter().copied().collect()
    }

    /// Re-derives the whole tree.
    ///
    /// Returns `None` when another refresh is still running.
    pub async fn refresh(&self) -> Option<Vec<TreeNode>> {
        let Some(_guard) = self.monitor.begin_refresh() else {
            debug!("Tree refresh already in flight");
            return None;
        };

        let pipelines = self.monitor.fetch_pipelines().await;

        let visible: Vec<u64> = self
            .expanded()
            .into_iter()
            .filter(|id| pipelines.iter().any(|p| p.id == *id))
            .collect();

        let children = join_all(visible.iter().map(|id| self.monitor.fetch_children(*id))).await;
        let mut jobs: HashMap<u64, Vec<GitLabJob>> = visible.into_iter().zip(children).collect();

        Some(
            pipelines
                .iter()
                .map(|pipeline| {
                    let pipeline_jobs = jobs.remove(&pipeline.id).unwrap_or_default();
                    pipeline_node(pipeline, &pipeline_jobs)
                })
                .collect(),
        )
    }
}

/// Renders the tree as a table, jobs indented under their pipeline.
pub fn render_tree(nodes: &[TreeNode]) -> String {
    if nodes.is_empty() {
        return dim("No pipelines").to_string();
    }

    let mut table = create_table();
    table.set_header(create_cyan_header(&["", "Pipeline / Job", "Details", "ID", "Action"]));

    for node in nodes {
        table.add_row(vec![
            color_coded_status_cell(glyph(&node.status).to_string(), &node.status),
            color_coded_status_cell(node.label.clone(), &node.status),
            comfy_table::Cell::new(&node.description),
            comfy_table::Cell::new(node.id),
            comfy_table::Cell::new(node.class.action_hint()),
        ]);

        for child in &node.children {
            table.add_row(vec![
                comfy_table::Cell::new(""),
                color_coded_status_cell(
                    format!("  {} {}", glyph(&child.status), child.label),
                    &child.status,
                ),
                comfy_table::Cell::new(&child.description),
                comfy_table::Cell::new(child.id),
                comfy_table::Cell::new(child.class.action_hint()),
            ]);
        }
    }

    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Token;
    use crate::config::{GitLabConfig, PollingConfig};
    use chrono::TimeZone;
    use mockito::{Matcher, Server};

    fn create_test_pipeline(id: u64, status: &str) -> GitLabPipeline {
        GitLabPipeline {
            id,
            status: status.to_string(),
            ref_: "main".to_string(),
            web_url: format!("https://gitlab.example.com/g/p/-/pipelines/{id}"),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        }
    }

    fn create_test_job(id: u64, status: &str) -> GitLabJob {
        GitLabJob {
            id,
            name: "rspec".to_string(),
            stage: "test".to_string(),
            status: status.to_string(),
            web_url: String::new(),
            started_at: None,
            finished_at: None,
        }
    }

    fn tree_for(server: &Server) -> PipelineTree {
        let config = GitLabConfig {
            base_url: Some(server.url()),
            personal_access_token: Some(Token::from("secret")),
            project_id: Some(7),
            workspace: None,
        };
        let monitor = PipelineMonitor::new(Arc::new(config), &PollingConfig::default()).unwrap();
        PipelineTree::new(Arc::new(monitor))
    }

    #[test]
    fn test_node_class() {
        assert_eq!(NodeClass::for_status("Success"), NodeClass::Finished);
        assert_eq!(NodeClass::for_status("manual"), NodeClass::Finished);
        assert_eq!(NodeClass::for_status("running"), NodeClass::Running);
        assert_eq!(NodeClass::for_status("pending"), NodeClass::Running);
        assert_eq!(NodeClass::for_status("created"), NodeClass::Other);
        assert!(NodeClass::Finished.can_retry());
        assert!(!NodeClass::Finished.can_cancel());
        assert!(NodeClass::Running.can_cancel());
        assert!(!NodeClass::Other.can_retry());
    }

    #[test]
    fn test_pipeline_node_label() {
        let node = pipeline_node(&create_test_pipeline(42, "failed"), &[]);
        assert_eq!(node.label, "#42 [failed]");
        assert!(node.description.starts_with("main · "));
        assert_eq!(node.class, NodeClass::Finished);
        assert!(node.children.is_empty());
    }

    #[test]
    fn test_job_node_description_prefers_finished_time() {
        let mut job = create_test_job(3, "success");
        assert_eq!(job_node(&job).description, "test");

        job.started_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
        job.finished_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        let expected = format!("test · {}", local_time(job.finished_at.as_ref().unwrap()));
        assert_eq!(job_node(&job).description, expected);
        assert_eq!(job_node(&job).label, "rspec [success]");
    }

    #[test]
    fn test_render_tree_lists_children() {
        let pipeline = create_test_pipeline(42, "running");
        let nodes = vec![pipeline_node(&pipeline, &[create_test_job(3, "running")])];
        let rendered = console::strip_ansi_codes(&render_tree(&nodes)).to_string();
        assert!(rendered.contains("#42 [running]"));
        assert!(rendered.contains("rspec [running]"));
        assert!(rendered.contains("cancel"));
        assert!(!rendered.contains("retry"));
    }

    #[tokio::test]
    async fn test_refresh_fetches_children_of_expanded_pipelines_only() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/7/pipelines")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"[
                    {"id": 2, "status": "running", "ref": "main", "created_at": "2024-05-01T08:00:00Z"},
                    {"id": 1, "status": "success", "ref": "main", "created_at": "2024-05-01T07:00:00Z"}
                ]"#,
            )
            .create_async()
            .await;
        let jobs = server
            .mock("GET", "/api/v4/projects/7/pipelines/2/jobs")
            .with_status(200)
            .with_body(r#"[{"id": 20, "name": "build", "stage": "build", "status": "running"}]"#)
            .expect(1)
            .create_async()
            .await;
        let untouched = server
            .mock("GET", "/api/v4/projects/7/pipelines/1/jobs")
            .expect(0)
            .create_async()
            .await;

        let tree = tree_for(&server);
        assert!(tree.expand(2));
        assert!(!tree.expand(2));

        let nodes = tree.refresh().await.unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].children.len(), 1);
        assert_eq!(nodes[0].children[0].label, "build [running]");
        assert!(nodes[1].children.is_empty());
        jobs.assert_async().await;
        untouched.assert_async().await;
        tree.monitor.dispose();
    }

    #[tokio::test]
    async fn test_refresh_skipped_while_in_flight() {
        let server = Server::new_async().await;
        let tree = tree_for(&server);

        let _guard = tree.monitor.begin_refresh().unwrap();
        assert!(tree.refresh().await.is_none());
    }

    #[tokio::test]
    async fn test_collapse_forgets_expansion() {
        let server = Server::new_async().await;
        let tree = tree_for(&server);

        tree.expand(5);
        tree.expand(3);
        assert_eq!(tree.expanded(), vec![5, 3]);

        assert!(tree.collapse(5));
        assert!(!tree.collapse(5));
        assert_eq!(tree.expanded(), vec![3]);
    }
}
