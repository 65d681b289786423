//! Scheduler poller
//!
//! Owns the attached projects and drives at most one [`SchedulerOp`] per
//! project. Each tick advances every in-flight op and starts a get-work op
//! for each idle project whose backoff window has passed.

use anyhow::Result;
use chrono::{DateTime, Utc};
use gridlink_client::Transport;
use gridlink_core::domain::project::Project;
use gridlink_core::domain::reply::SchedulerReply;
use std::sync::Arc;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::config::Config;
use crate::scheduler::op::{PollOutcome, SchedulerOp};

struct ProjectSlot {
    project: Project,
    op: Option<SchedulerOp>,
}

/// What one tick did
#[derive(Debug, Default)]
pub struct TickSummary {
    pub started: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Replies of the negotiations that succeeded, tagged with the master URL
    pub replies: Vec<(String, SchedulerReply)>,
}

/// Poll loop over all attached projects
pub struct SchedulerPoller {
    config: Config,
    transport: Arc<dyn Transport>,
    policy: BackoffPolicy,
    slots: Vec<ProjectSlot>,
}

impl SchedulerPoller {
    /// Creates a poller for the given projects
    pub fn new(config: Config, transport: Arc<dyn Transport>, projects: Vec<Project>) -> Self {
        let policy = BackoffPolicy::new(config.backoff.clone());
        let slots = projects
            .into_iter()
            .map(|project| ProjectSlot { project, op: None })
            .collect();

        Self {
            config,
            transport,
            policy,
            slots,
        }
    }

    /// Attached projects, in configuration order
    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.slots.iter().map(|slot| &slot.project)
    }

    /// Number of negotiations currently in flight
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|slot| slot.op.is_some()).count()
    }

    /// Runs the poll loop until Ctrl-C
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Starting scheduler poller for {} project(s) (interval: {:?})",
            self.slots.len(),
            self.config.poll_interval
        );

        let mut interval = time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let summary = self.tick(Utc::now());
                    if summary.succeeded > 0 || summary.failed > 0 {
                        info!(
                            "Poll cycle: {} succeeded, {} failed, {} in flight",
                            summary.succeeded,
                            summary.failed,
                            self.active()
                        );
                    }
                    for (project, reply) in &summary.replies {
                        debug!(
                            "{}: {} workunit(s), {} result(s), {} file(s)",
                            project,
                            reply.workunits.len(),
                            reply.results.len(),
                            reply.file_infos.len()
                        );
                    }
                }
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                    info!("Shutting down, abandoning {} in-flight request(s)", self.active());
                    // Dropping the ops abandons their requests
                    for slot in &mut self.slots {
                        slot.op = None;
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Performs a single poll cycle
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();

        for slot in &mut self.slots {
            if let Some(op) = slot.op.as_mut() {
                match op.poll(&mut slot.project, now) {
                    PollOutcome::Running => continue,
                    PollOutcome::Succeeded => {
                        summary.succeeded += 1;
                        if let Some(reply) = op.take_reply() {
                            summary
                                .replies
                                .push((slot.project.master_url().to_string(), reply));
                        }
                    }
                    PollOutcome::Failed => {
                        summary.failed += 1;
                    }
                }
                slot.op = None;
                continue;
            }

            if !slot.project.can_contact(now) || slot.project.is_busy() {
                continue;
            }

            let mut op = SchedulerOp::new(Arc::clone(&self.transport), self.policy.clone())
                .with_work_buffer(self.config.work_buffer);

            if let Err(e) = op.init_get_work(&slot.project) {
                error!("Failed to initialize operation for {}: {}", slot.project.label(), e);
                continue;
            }

            match op.start_op(&mut slot.project, now) {
                Ok(()) => {
                    summary.started += 1;
                    slot.op = Some(op);
                }
                Err(e) if e.feeds_backoff() => {
                    // Already backed off inside the op
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!("Cannot contact {}: {}", slot.project.label(), e);
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use chrono::TimeDelta;
    use gridlink_client::TransportError;

    const REPLY: &str = r#"{"hostid": 5, "request_delay": 600, "results": [{"name": "r", "wu_name": "w"}]}"#;

    fn poller(transport: &Arc<ScriptedTransport>, projects: Vec<Project>) -> SchedulerPoller {
        let config = Config::new(
            projects
                .iter()
                .map(|p| p.master_url().to_string())
                .collect(),
        );
        SchedulerPoller::new(config, transport.clone(), projects)
    }

    fn project(master: &str, sched: &str) -> Project {
        Project::new(master).with_scheduler_urls(vec![sched.to_string()])
    }

    #[test]
    fn test_tick_runs_one_op_per_project() {
        let transport = ScriptedTransport::new(1);
        transport.respond(Ok(REPLY));
        transport.respond(Ok(REPLY));
        let mut poller = poller(
            &transport,
            vec![
                project("http://a.example.org/", "http://a.example.org/sched"),
                project("http://b.example.org/", "http://b.example.org/sched"),
            ],
        );
        let now = Utc::now();

        let summary = poller.tick(now);
        assert_eq!(summary.started, 2);
        assert_eq!(poller.active(), 2);
        assert!(poller.projects().all(|p| p.is_busy()));

        // Still in flight: nothing new is started
        let summary = poller.tick(now);
        assert_eq!(summary.started, 0);
        assert_eq!(transport.started().len(), 2);

        let summary = poller.tick(now);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.replies.len(), 2);
        assert_eq!(summary.replies[0].0, "http://a.example.org/");
        assert_eq!(poller.active(), 0);
        assert!(poller.projects().all(|p| !p.is_busy() && p.host_id == 5));
    }

    #[test]
    fn test_tick_respects_backoff_window() {
        let transport = ScriptedTransport::new(0);
        transport.respond(Err(TransportError::Timeout));
        let mut poller = poller(
            &transport,
            vec![project("http://a.example.org/", "http://a.example.org/sched")],
        );
        let now = Utc::now();

        assert_eq!(poller.tick(now).started, 1);
        assert_eq!(poller.tick(now).failed, 1);

        // Backed off for at least the minimum delay
        assert_eq!(poller.tick(now + TimeDelta::seconds(30)).started, 0);
        assert_eq!(transport.started().len(), 1);

        let project = poller.projects().next().unwrap();
        assert_eq!(project.nrpc_failures, 1);
        assert!(project.last_error.is_some());
    }

    #[test]
    fn test_project_without_urls_is_skipped() {
        let transport = ScriptedTransport::new(0);
        let mut poller = poller(&transport, vec![Project::new("")]);

        let summary = poller.tick(Utc::now());
        assert_eq!(summary.started, 0);
        assert_eq!(summary.failed, 0);
        assert!(transport.started().is_empty());
    }

    #[test]
    fn test_dropping_poller_abandons_requests() {
        let transport = ScriptedTransport::new(10);
        transport.respond(Ok(REPLY));
        let mut poller = poller(
            &transport,
            vec![project("http://a.example.org/", "http://a.example.org/sched")],
        );

        poller.tick(Utc::now());
        drop(poller);

        assert_eq!(transport.abandoned().len(), 1);
    }
}
