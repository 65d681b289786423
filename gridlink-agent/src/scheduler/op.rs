//! Scheduler operation
//!
//! One negotiation with one project, as a three-state machine:
//!
//! ```text
//!            start_op                   master fetched
//!   Idle ───────────────► FetchingMaster ──────────────► RunningRpc
//!    ▲  │                       │                           │
//!    │  └───────────────────────┼─────── start_op ──────────┘
//!    │         failure          │          reply / failure  │
//!    └──────────────────────────┴───────────────────────────┘
//! ```
//!
//! The caller initializes the op for a mode, starts it, then polls it until
//! it reports a terminal outcome. The op never blocks: all waiting happens
//! inside the transport.
//!
//! Only one op may advance a given project at a time. `start_op` takes the
//! project's lease and the op holds it until the terminal transition, so a
//! second op on the same project fails fast with `ProjectBusy`. URL merges,
//! the round-robin index and master-fetch bookkeeping are staged inside the
//! op and written to the project only at the terminal transition; dropping
//! an op mid-flight abandons its request and leaves the project untouched.

use chrono::{DateTime, TimeDelta, Utc};
use gridlink_client::{HttpRequest, RequestHandle, Transport, TransportError, TransportPoll};
use gridlink_core::domain::project::{Project, ProjectLease};
use gridlink_core::domain::reply::SchedulerReply;
use gridlink_core::dto::request::{ReportedResult, RequestMode, SchedulerRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::{Result, SchedulerError};
use crate::master::{merge_urls, parse_master_document};
use crate::reply::parse_reply;

/// Seconds of work requested when no buffer size is configured
pub const DEFAULT_WORK_BUFFER: Duration = Duration::from_secs(60 * 60 * 24);

/// Observable state of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    Idle,
    FetchingMaster,
    RunningRpc,
}

impl std::fmt::Display for OpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpState::Idle => write!(f, "idle"),
            OpState::FetchingMaster => write!(f, "fetching master"),
            OpState::RunningRpc => write!(f, "running rpc"),
        }
    }
}

/// What a call to [`SchedulerOp::poll`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    FetchingMaster { request: RequestHandle },
    RunningRpc { request: RequestHandle },
}

/// Something that moves the machine forward
#[derive(Debug)]
enum Event {
    MasterFetched(Vec<u8>),
    RpcReplied(Vec<u8>),
    TransportFailed(TransportError),
}

/// Project mutations held back until the terminal transition
#[derive(Debug, Default)]
struct Staged {
    urls: Option<Vec<String>>,
    url_index: Option<usize>,
    master_fetched_at: Option<DateTime<Utc>>,
}

impl Staged {
    fn commit(self, project: &mut Project) {
        if let Some(urls) = self.urls {
            project.scheduler_urls = urls;
        }
        if let Some(index) = self.url_index {
            project.last_url_index = Some(index);
        }
        if let Some(at) = self.master_fetched_at {
            project.master_fetch_attempts = project.master_fetch_attempts.saturating_add(1);
            project.last_master_fetch = Some(at);
        }
    }
}

/// Picks the URL after the last one used, wrapping around
///
/// Returns `None` for an empty list.
pub fn select_url_index(len: usize, last_used: Option<usize>) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some(match last_used {
        Some(index) => (index + 1) % len,
        None => 0,
    })
}

/// `now + delay`, saturating at the latest representable time
fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// One negotiation with a scheduling server
pub struct SchedulerOp {
    transport: Arc<dyn Transport>,
    policy: BackoffPolicy,
    work_buffer: Duration,

    mode: Option<RequestMode>,
    bound_to: Option<String>,
    work_req_seconds: f64,
    reported_results: Vec<ReportedResult>,

    stage: Stage,
    staged: Staged,
    lease: Option<ProjectLease>,

    outcome: Option<PollOutcome>,
    reply: Option<SchedulerReply>,
    last_error: Option<String>,
}

impl SchedulerOp {
    /// Creates an idle operation
    pub fn new(transport: Arc<dyn Transport>, policy: BackoffPolicy) -> Self {
        Self {
            transport,
            policy,
            work_buffer: DEFAULT_WORK_BUFFER,
            mode: None,
            bound_to: None,
            work_req_seconds: 0.0,
            reported_results: Vec::new(),
            stage: Stage::Idle,
            staged: Staged::default(),
            lease: None,
            outcome: None,
            reply: None,
            last_error: None,
        }
    }

    /// Sets how many seconds of queued work the client aims to hold
    pub fn with_work_buffer(mut self, work_buffer: Duration) -> Self {
        self.work_buffer = work_buffer;
        self
    }

    // =============================================================================
    // Setup
    // =============================================================================

    /// Configures the op to fetch work from `project`
    ///
    /// Does not contact the network; call [`start_op`](Self::start_op) next.
    pub fn init_get_work(&mut self, project: &Project) -> Result<()> {
        self.init(project, RequestMode::GetWork, self.work_buffer.as_secs_f64())
    }

    /// Configures the op to return results to `project`
    ///
    /// `time_budget` is the compute time, in seconds, already queued locally.
    /// Work is requested as a side effect only for the part of the buffer it
    /// does not cover.
    pub fn init_return_results(&mut self, project: &Project, time_budget: f64) -> Result<()> {
        let budget = if time_budget.is_finite() {
            time_budget.max(0.0)
        } else {
            0.0
        };
        let shortfall = (self.work_buffer.as_secs_f64() - budget).max(0.0);
        self.init(project, RequestMode::ReturnResults, shortfall)
    }

    fn init(&mut self, project: &Project, mode: RequestMode, work_req_seconds: f64) -> Result<()> {
        if self.stage != Stage::Idle {
            return Err(SchedulerError::InProgress);
        }

        self.mode = Some(mode);
        self.bound_to = Some(project.master_url().to_string());
        self.work_req_seconds = work_req_seconds;
        self.reported_results.clear();
        self.staged = Staged::default();
        self.outcome = None;
        self.reply = None;
        self.last_error = None;

        debug!(
            "Initialized {} for {} ({:.0}s of work wanted)",
            mode,
            project.label(),
            work_req_seconds
        );
        Ok(())
    }

    /// Attaches finished results to the next request
    pub fn report_results(&mut self, results: Vec<ReportedResult>) -> Result<()> {
        if self.stage != Stage::Idle {
            return Err(SchedulerError::InProgress);
        }
        self.reported_results.extend(results);
        Ok(())
    }

    // =============================================================================
    // Driving
    // =============================================================================

    /// Commits to the negotiation and issues the first request
    ///
    /// Fetches the master document first when the project has no scheduler
    /// URL or the backoff policy says a refetch is due; otherwise posts to
    /// the next scheduler URL in round-robin order.
    ///
    /// # Errors
    /// - `NoUsableUrl` if the project has neither scheduler nor master URL;
    ///   no request is made and no counter moves
    /// - `ProjectBusy`, `NotInitialized`, `InProgress`, `WrongProject` for
    ///   caller mistakes
    /// - a transport error if the first request could not be issued; this
    ///   already counts as a failed negotiation and `poll` reports `Failed`
    pub fn start_op(&mut self, project: &mut Project, now: DateTime<Utc>) -> Result<()> {
        if self.stage != Stage::Idle {
            return Err(SchedulerError::InProgress);
        }
        if self.mode.is_none() {
            return Err(SchedulerError::NotInitialized);
        }
        self.check_bound(project)?;

        if project.scheduler_urls.is_empty() && !project.has_master_url() {
            let err = SchedulerError::NoUsableUrl {
                project: project.label().to_string(),
            };
            self.last_error = Some(err.to_string());
            return Err(err);
        }

        let lease = project.try_lease().ok_or_else(|| SchedulerError::ProjectBusy {
            project: project.label().to_string(),
        })?;
        self.lease = Some(lease);

        let needs_master = project.has_master_url()
            && (project.scheduler_urls.is_empty()
                || self.policy.project_master_fetch_due(project, now));

        let started = if needs_master {
            self.start_master_fetch(project, now)
        } else {
            self.start_rpc(project)
        };

        if let Err(err) = started {
            self.fail(project, err.clone(), now);
            return Err(err);
        }
        Ok(())
    }

    /// Advances the operation without blocking
    ///
    /// Once the op has reached a terminal outcome, further polls return the
    /// same outcome and touch nothing. Polling an op that was never started
    /// reports `Failed`, and so does polling with a project other than the
    /// one the op is bound to: the request is abandoned and neither project
    /// is changed.
    pub fn poll(&mut self, project: &mut Project, now: DateTime<Utc>) -> PollOutcome {
        if let Some(outcome) = self.outcome {
            return outcome;
        }

        let request = match self.stage {
            Stage::Idle => {
                debug!("Poll on an operation that was never started");
                self.last_error = Some("no scheduler operation in progress".to_string());
                return PollOutcome::Failed;
            }
            Stage::FetchingMaster { request } | Stage::RunningRpc { request } => request,
        };

        if let Err(err) = self.check_bound(project) {
            warn!("Abandoning scheduler operation: {}", err);
            self.cancel();
            self.last_error = Some(err.to_string());
            self.outcome = Some(PollOutcome::Failed);
            return PollOutcome::Failed;
        }

        let event = match self.transport.poll(request) {
            TransportPoll::Pending(phase) => {
                debug!("Request {} for {} still {}", request, project.label(), phase);
                return PollOutcome::Running;
            }
            TransportPoll::Done(Ok(body)) => match self.stage {
                Stage::FetchingMaster { .. } => Event::MasterFetched(body),
                _ => Event::RpcReplied(body),
            },
            TransportPoll::Done(Err(err)) => Event::TransportFailed(err),
        };

        self.step(project, event, now)
    }

    /// The transition function: applies one event to the current stage
    fn step(&mut self, project: &mut Project, event: Event, now: DateTime<Utc>) -> PollOutcome {
        match (self.stage, event) {
            (Stage::FetchingMaster { .. }, Event::MasterFetched(body)) => {
                match self.on_master_fetched(project, &body) {
                    Ok(()) => PollOutcome::Running,
                    Err(err) => self.fail(project, err, now),
                }
            }
            (Stage::RunningRpc { .. }, Event::RpcReplied(body)) => match parse_reply(&body) {
                Ok(reply) => self.succeed(project, reply, now),
                Err(err) => self.fail(project, err.into(), now),
            },
            (Stage::Idle, _) => PollOutcome::Failed,
            (_, Event::TransportFailed(err)) => self.fail(project, err.into(), now),
            (stage, event) => {
                warn!("Ignoring {:?} in stage {:?}", event, stage);
                PollOutcome::Running
            }
        }
    }

    /// Records a failed negotiation and pushes the project's next contact out
    ///
    /// Used internally after transport and parse failures, and by callers
    /// that reject a reply for their own reasons.
    pub fn backoff(&mut self, project: &mut Project, message: &str, now: DateTime<Utc>) {
        project.nrpc_failures = project.nrpc_failures.saturating_add(1);
        let delay = self.policy.retry_delay(project.nrpc_failures);
        project.min_rpc_time = after(now, delay);
        project.last_error = Some(message.to_string());
        self.last_error = Some(message.to_string());

        warn!(
            "Scheduler RPC to {} failed ({} in a row), retrying in {:?}: {}",
            project.label(),
            project.nrpc_failures,
            delay,
            message
        );
    }

    /// Abandons any in-flight request and returns to `Idle`
    ///
    /// The project is left exactly as it was before `start_op`.
    pub fn cancel(&mut self) {
        if let Stage::FetchingMaster { request } | Stage::RunningRpc { request } = self.stage {
            self.transport.abandon(request);
        }
        self.stage = Stage::Idle;
        self.staged = Staged::default();
        self.lease = None;
        self.mode = None;
    }

    // =============================================================================
    // Accessors
    // =============================================================================

    pub fn state(&self) -> OpState {
        match self.stage {
            Stage::Idle => OpState::Idle,
            Stage::FetchingMaster { .. } => OpState::FetchingMaster,
            Stage::RunningRpc { .. } => OpState::RunningRpc,
        }
    }

    pub fn mode(&self) -> Option<RequestMode> {
        self.mode
    }

    /// Whether the request will also ask for new work
    pub fn wants_work(&self) -> bool {
        self.mode.is_some() && self.work_req_seconds > 0.0
    }

    /// Terminal outcome of the last negotiation, if it has finished
    pub fn outcome(&self) -> Option<PollOutcome> {
        self.outcome
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Hands the parsed reply of a successful negotiation to the caller
    pub fn take_reply(&mut self) -> Option<SchedulerReply> {
        self.reply.take()
    }

    // =============================================================================
    // Transitions
    // =============================================================================

    fn check_bound(&self, project: &Project) -> Result<()> {
        match &self.bound_to {
            Some(expected) if expected != project.master_url() => Err(SchedulerError::WrongProject {
                expected: expected.clone(),
                actual: project.master_url().to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn start_master_fetch(&mut self, project: &Project, now: DateTime<Utc>) -> Result<()> {
        info!("Fetching master file for {}", project.label());

        self.staged.master_fetched_at = Some(now);
        let request = self
            .transport
            .start(HttpRequest::get(project.master_url()))?;
        self.stage = Stage::FetchingMaster { request };
        Ok(())
    }

    fn start_rpc(&mut self, project: &Project) -> Result<()> {
        let urls = self.staged.urls.as_ref().unwrap_or(&project.scheduler_urls);
        let index = select_url_index(urls.len(), project.last_url_index).ok_or_else(|| {
            SchedulerError::NoSchedulers {
                project: project.label().to_string(),
            }
        })?;
        let url = urls[index].clone();

        let mode = self.mode.ok_or(SchedulerError::NotInitialized)?;
        let request = SchedulerRequest {
            mode,
            authenticator: project.authenticator.clone(),
            hostid: project.host_id,
            work_req_seconds: self.work_req_seconds,
            reported_results: self.reported_results.clone(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let body =
            serde_json::to_vec(&request).map_err(|e| SchedulerError::Request(e.to_string()))?;

        info!(
            "Sending scheduler request to {} ({}, {} result(s), {:.0}s of work)",
            url,
            mode,
            request.reported_results.len(),
            request.work_req_seconds
        );

        self.staged.url_index = Some(index);
        let request = self
            .transport
            .start(HttpRequest::post(url, body, "application/json"))?;
        self.stage = Stage::RunningRpc { request };
        Ok(())
    }

    /// `FetchingMaster → RunningRpc`
    fn on_master_fetched(&mut self, project: &Project, body: &[u8]) -> Result<()> {
        let fetched = parse_master_document(body)?;

        if fetched.is_empty() {
            info!("Master file for {} lists no schedulers", project.label());
        } else if let Some(merged) = merge_urls(&project.scheduler_urls, &fetched) {
            info!(
                "Master file for {} added {} scheduler URL(s)",
                project.label(),
                merged.len() - project.scheduler_urls.len()
            );
            self.staged.urls = Some(merged);
        } else {
            debug!("Scheduler URLs for {} unchanged", project.label());
        }

        self.start_rpc(project)
    }

    /// `RunningRpc → Idle` on success
    fn succeed(&mut self, project: &mut Project, reply: SchedulerReply, now: DateTime<Utc>) -> PollOutcome {
        std::mem::take(&mut self.staged).commit(project);

        project.nrpc_failures = 0;
        project.master_fetch_attempts = 0;
        project.last_error = None;
        project.min_rpc_time = after(
            now,
            Duration::try_from_secs_f64(reply.request_delay).unwrap_or(Duration::MAX),
        );
        if reply.hostid != 0 {
            project.host_id = reply.hostid;
        }
        if !reply.project_name.is_empty() {
            project.name = reply.project_name.clone();
        }

        if reply.has_urgent_message() {
            warn!("Message from {}: {}", project.label(), reply.message);
        } else if !reply.message.is_empty() {
            info!("Message from {}: {}", project.label(), reply.message);
        }

        info!(
            "Scheduler RPC to {} succeeded: {} new result(s), {} ack(s)",
            project.label(),
            reply.results.len(),
            reply.result_acks.len()
        );

        self.reply = Some(reply);
        self.finish(PollOutcome::Succeeded)
    }

    /// Any state `→ Idle` on failure
    fn fail(&mut self, project: &mut Project, err: SchedulerError, now: DateTime<Utc>) -> PollOutcome {
        std::mem::take(&mut self.staged).commit(project);

        let message = err.to_string();
        if err.feeds_backoff() {
            self.backoff(project, &message, now);
        } else {
            warn!("Scheduler operation for {} failed: {}", project.label(), message);
            project.last_error = Some(message.clone());
            self.last_error = Some(message);
        }

        self.finish(PollOutcome::Failed)
    }

    fn finish(&mut self, outcome: PollOutcome) -> PollOutcome {
        self.stage = Stage::Idle;
        self.lease = None;
        self.mode = None;
        self.outcome = Some(outcome);
        outcome
    }
}

impl Drop for SchedulerOp {
    fn drop(&mut self) {
        self.cancel();
    }
}
