//! # Task Dispatcher
//!
//! Fans a target list out across identity sessions.
//!
//! 1. Unauthenticated sessions are left out.
//! 2. Follow campaigns cap each session at its remaining follow quota and
//!    its following headroom; a session with no room on either is left out.
//!    Other kinds are uncapped: a worker that finds the daily limit reached
//!    reports `skipped_quota` for the rest of its session's chunk without
//!    touching the remote.
//! 3. Targets and sessions are shuffled, then partitioned into near-even
//!    chunks; follow capacity one session cannot use goes to the others.
//! 4. Each session works its chunk with up to `worker_budget` workers, each
//!    holding one of the session's long-lived slots while it acts and
//!    while it sleeps the post-action delay.
//!
//! Identity-fatal errors and ledger failures stop only the affected
//! session. With safe mode off, an exhausted retry budget stops the whole
//! dispatch: in-flight actions drain and the partial report comes back
//! inside [`DispatchError::Fatal`].

use crate::campaign::Campaign;
use crate::delay::sleep_or_cancel;
use crate::error::{ActionError, DispatchError};
use crate::ledger::TargetLedger;
use crate::metrics::MetricsCollector;
use crate::session::IdentitySession;
use crate::types::{ActionKind, OutcomeStatus, Target, TaskOutcome};
use crate::utils::lock_unpoisoned;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<TaskOutcome>,
    /// Sessions left out before any work: unauthenticated, or no follow capacity
    pub excluded: Vec<String>,
    /// Targets that received no outcome: beyond total follow capacity, or stranded
    /// when a session halted or the dispatch was cancelled
    pub unprocessed: Vec<Target>,
    pub elapsed: Duration,
}

impl DispatchReport {
    pub fn successes(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Success))
    }

    pub fn failures(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::SkippedQuota))
    }

    /// Successful outcomes for one identity.
    pub fn successes_for(&self, identity: &str) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.identity == identity && o.is_success())
            .count()
    }

    pub fn outcomes_for<'a>(&'a self, identity: &'a str) -> impl Iterator<Item = &'a TaskOutcome> + 'a {
        self.outcomes.iter().filter(move |o| o.identity == identity)
    }

    fn count(&self, pred: impl Fn(&OutcomeStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

#[derive(Debug)]
struct FatalFailure {
    identity: String,
    target: Target,
    error: ActionError,
}

/// Everything one worker needs, cloned per worker.
#[derive(Clone)]
struct WorkerContext {
    session: Arc<IdentitySession>,
    campaign: Arc<Campaign>,
    queue: Arc<Mutex<VecDeque<Target>>>,
    /// Set once the session's quota for the campaign kind runs out
    exhausted: Arc<AtomicBool>,
    /// Stops this session only
    halt: CancellationToken,
    /// Stops the whole dispatch
    abort: CancellationToken,
    ledger: Option<Arc<TargetLedger>>,
    metrics: Option<Arc<MetricsCollector>>,
    fatal: Arc<Mutex<Option<FatalFailure>>>,
}

#[derive(Debug, Default)]
struct WorkerReport {
    outcomes: Vec<TaskOutcome>,
    unprocessed: Vec<Target>,
}

impl WorkerReport {
    fn merge(&mut self, other: WorkerReport) {
        self.outcomes.extend(other.outcomes);
        self.unprocessed.extend(other.unprocessed);
    }
}

#[derive(Debug)]
pub struct TaskDispatcher {
    ledger: Option<Arc<TargetLedger>>,
    metrics: Option<Arc<MetricsCollector>>,
    rng: Mutex<StdRng>,
}

impl Default for TaskDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskDispatcher {
    pub fn new() -> Self {
        Self {
            ledger: None,
            metrics: None,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Completed targets are recorded here and skipped on later dispatches.
    pub fn with_ledger(mut self, ledger: Arc<TargetLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Deterministic shuffling for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn ledger(&self) -> Option<&Arc<TargetLedger>> {
        self.ledger.as_ref()
    }

    pub async fn dispatch(
        &self,
        targets: Vec<Target>,
        sessions: &[Arc<IdentitySession>],
        campaign: &Campaign,
        worker_budget: usize,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, DispatchError> {
        let started = Instant::now();
        let kind = campaign.kind();
        let mut report = DispatchReport::default();

        let mut seen = HashSet::new();
        let mut targets: Vec<Target> = targets
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        if let Some(ledger) = &self.ledger {
            let before = targets.len();
            targets = ledger.exclude_completed(targets).await;
            if targets.len() < before {
                info!("Skipping {} targets already completed", before - targets.len());
            }
        }

        let mut active: Vec<Arc<IdentitySession>> = Vec::new();
        for session in sessions {
            if session.is_authenticated() {
                active.push(session.clone());
            } else {
                warn!(identity = %session.handle(), "Excluded from dispatch: not authenticated");
                report.excluded.push(session.handle().to_string());
            }
        }

        if targets.is_empty() {
            info!("Nothing to dispatch: no pending targets");
            report.elapsed = started.elapsed();
            return Ok(report);
        }

        let abort = cancel.child_token();
        let mut capped: Vec<(Arc<IdentitySession>, usize)> = Vec::new();
        for session in active {
            match self.capacity(&session, kind, targets.len(), &abort).await {
                Some(cap) if cap > 0 => capped.push((session, cap)),
                Some(_) => {
                    info!(identity = %session.handle(), "Excluded from {} dispatch: no capacity left", kind);
                    report.excluded.push(session.handle().to_string());
                }
                None => report.excluded.push(session.handle().to_string()),
            }
        }

        {
            let mut rng = lock_unpoisoned(&self.rng);
            targets.shuffle(&mut *rng);
            capped.shuffle(&mut *rng);
        }

        let caps: Vec<usize> = capped.iter().map(|(_, cap)| *cap).collect();
        let (chunks, overflow) = partition(targets, &caps);
        if !overflow.is_empty() {
            warn!(
                "{} targets exceed the combined {} capacity of this dispatch",
                overflow.len(),
                kind
            );
        }
        report.unprocessed.extend(overflow);

        info!(
            "Dispatching {} campaign: {} sessions, {} workers each",
            kind,
            capped.len(),
            worker_budget.max(1)
        );

        let campaign = Arc::new(campaign.clone());
        let fatal: Arc<Mutex<Option<FatalFailure>>> = Arc::new(Mutex::new(None));
        let mut set = JoinSet::new();

        for ((session, _), chunk) in capped.into_iter().zip(chunks) {
            if chunk.is_empty() {
                continue;
            }
            let span = tracing::info_span!("identity", handle = %session.handle());
            let ctx = WorkerContext {
                session,
                campaign: campaign.clone(),
                queue: Arc::new(Mutex::new(chunk.into_iter().collect())),
                exhausted: Arc::new(AtomicBool::new(false)),
                halt: abort.child_token(),
                abort: abort.clone(),
                ledger: self.ledger.clone(),
                metrics: self.metrics.clone(),
                fatal: fatal.clone(),
            };
            set.spawn(run_session(ctx, worker_budget.max(1)).instrument(span));
        }

        while let Some(res) = set.join_next().await {
            match res {
                Ok(session_report) => {
                    report.outcomes.extend(session_report.outcomes);
                    report.unprocessed.extend(session_report.unprocessed);
                }
                Err(e) => error!("A session task panicked or failed to join: {:?}", e),
            }
        }

        report.elapsed = started.elapsed();
        info!(
            "Dispatch finished in {:.1}s: {} success, {} failed, {} skipped",
            report.elapsed.as_secs_f64(),
            report.successes(),
            report.failures(),
            report.skipped()
        );

        let failure = lock_unpoisoned(&fatal).take();
        match failure {
            Some(failure) => Err(DispatchError::Fatal {
                identity: failure.identity,
                target: failure.target,
                source: failure.error,
                report: Box::new(report),
            }),
            None => Ok(report),
        }
    }

    /// How many targets `session` may take. `None` means the capacity check
    /// itself failed and the session sits this dispatch out.
    ///
    /// Only follow campaigns are capped, by remaining quota and following
    /// headroom. Other kinds take an even share and report targets past the
    /// daily limit as `skipped_quota`.
    async fn capacity(
        &self,
        session: &IdentitySession,
        kind: ActionKind,
        available: usize,
        cancel: &CancellationToken,
    ) -> Option<usize> {
        if kind != ActionKind::Follow {
            return Some(available);
        }
        let quota = session
            .quota()
            .remaining(kind)
            .map_or(available, |left| left as usize);
        if quota == 0 {
            return Some(0);
        }

        match session.following_headroom(cancel).await {
            Ok(headroom) => {
                debug!(identity = %session.handle(), "Following headroom: {}", headroom);
                let headroom = usize::try_from(headroom).unwrap_or(usize::MAX);
                Some(quota.min(headroom).min(available))
            }
            Err(e) => {
                warn!(identity = %session.handle(), "Excluded from follow dispatch: {}", e);
                None
            }
        }
    }
}

/// Split `targets` into one chunk per capacity entry.
///
/// Without binding caps, chunk sizes differ by at most one. A chunk never
/// exceeds its cap; what a capped chunk cannot take is spread over chunks
/// with room left. Targets beyond the total capacity come back as overflow.
pub fn partition(targets: Vec<Target>, caps: &[usize]) -> (Vec<Vec<Target>>, Vec<Target>) {
    let mut sizes = vec![0usize; caps.len()];
    let mut remaining = targets.len();
    let mut open: Vec<usize> = (0..caps.len()).filter(|&i| caps[i] > 0).collect();

    while remaining > 0 && !open.is_empty() {
        let share = remaining / open.len();
        let extra = remaining % open.len();
        let mut given = 0;
        let mut still_open = Vec::with_capacity(open.len());
        for (pos, &idx) in open.iter().enumerate() {
            let want = share + usize::from(pos < extra);
            let take = want.min(caps[idx] - sizes[idx]);
            sizes[idx] += take;
            given += take;
            if sizes[idx] < caps[idx] {
                still_open.push(idx);
            }
        }
        if given == 0 {
            break;
        }
        remaining -= given;
        open = still_open;
    }

    let mut rest = targets.into_iter();
    let chunks = sizes
        .iter()
        .map(|&size| rest.by_ref().take(size).collect())
        .collect();
    (chunks, rest.collect())
}

async fn run_session(ctx: WorkerContext, worker_budget: usize) -> WorkerReport {
    let queued = lock_unpoisoned(&ctx.queue).len();
    let workers = worker_budget.min(queued);
    debug!("Starting {} workers for {} targets", workers, queued);

    let mut set = JoinSet::new();
    for worker_id in 1..=workers {
        let span = tracing::info_span!("worker", worker_id = format!("{:02}", worker_id));
        set.spawn(run_worker(ctx.clone(), worker_id).instrument(span));
    }

    let mut report = WorkerReport::default();
    while let Some(res) = set.join_next().await {
        match res {
            Ok(worker_report) => report.merge(worker_report),
            Err(e) => error!("A worker task panicked or failed to join: {:?}", e),
        }
    }

    let leftover: Vec<Target> = lock_unpoisoned(&ctx.queue).drain(..).collect();
    report.unprocessed.extend(leftover);
    report
}

async fn run_worker(ctx: WorkerContext, worker_id: usize) -> WorkerReport {
    let handle = ctx.session.handle().to_string();
    let kind = ctx.campaign.kind();
    let mut report = WorkerReport::default();

    loop {
        let permit = tokio::select! {
            biased;
            _ = ctx.halt.cancelled() => None,
            permit = ctx.session.slots().clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            break;
        };

        let Some(target) = lock_unpoisoned(&ctx.queue).pop_front() else {
            break;
        };

        if ctx.exhausted.load(Ordering::SeqCst) {
            let status = OutcomeStatus::SkippedQuota;
            report.outcomes.push(record(&ctx, &target, status, Duration::ZERO));
            log_outcome(&handle, worker_id, kind, &target, status, Duration::ZERO);
            continue;
        }

        let started = Instant::now();
        let result = match ctx.session.perform(&ctx.campaign, &target, &ctx.halt).await {
            Ok(()) => mark_completed(ctx.ledger.as_deref(), &target).await,
            Err(e) => Err(e),
        };

        let status = match result {
            Ok(()) => OutcomeStatus::Success,
            Err(e @ ActionError::Ledger(_)) => {
                error!("Ledger update failed for {}, stopping {}: {}", target, handle, e);
                ctx.halt.cancel();
                OutcomeStatus::Failed(e.kind())
            }
            Err(ActionError::Cancelled) => {
                report.unprocessed.push(target);
                break;
            }
            Err(ActionError::QuotaExceeded { .. }) => {
                if !ctx.exhausted.swap(true, Ordering::SeqCst) {
                    info!("Daily {} limit reached for {}", kind, handle);
                }
                OutcomeStatus::SkippedQuota
            }
            Err(e) if e.is_identity_fatal() => {
                error!("{} can no longer act this run: {}", handle, e);
                ctx.halt.cancel();
                OutcomeStatus::Failed(e.kind())
            }
            Err(e) if e.is_dispatch_fatal() => {
                let kind = e.kind();
                let mut fatal = lock_unpoisoned(&ctx.fatal);
                if fatal.is_none() {
                    *fatal = Some(FatalFailure {
                        identity: handle.clone(),
                        target: target.clone(),
                        error: e,
                    });
                }
                drop(fatal);
                ctx.abort.cancel();
                OutcomeStatus::Failed(kind)
            }
            Err(e) => OutcomeStatus::Failed(e.kind()),
        };

        let elapsed = started.elapsed();
        report.outcomes.push(record(&ctx, &target, status, elapsed));
        log_outcome(&handle, worker_id, kind, &target, status, elapsed);

        if status != OutcomeStatus::SkippedQuota {
            let delay = ctx.session.delays().next_delay(kind);
            if !sleep_or_cancel(delay, &ctx.halt).await {
                break;
            }
        }
    }

    report
}

/// Record a successful action in the ledger, when one is attached.
async fn mark_completed(ledger: Option<&TargetLedger>, target: &str) -> Result<(), ActionError> {
    if let Some(ledger) = ledger {
        ledger.complete(target).await?;
    }
    Ok(())
}

fn record(ctx: &WorkerContext, target: &str, status: OutcomeStatus, elapsed: Duration) -> TaskOutcome {
    let kind = ctx.campaign.kind();
    if let Some(metrics) = &ctx.metrics {
        metrics.record_outcome(kind, status, elapsed);
    }
    TaskOutcome::new(ctx.session.handle(), target, kind, status)
}

fn log_outcome(
    handle: &str,
    worker_id: usize,
    kind: ActionKind,
    target: &str,
    status: OutcomeStatus,
    elapsed: Duration,
) {
    match status {
        OutcomeStatus::Failed(_) => warn!(
            target: "task_result",
            "[ID:{}][WK:{:02}] {} [{}] {} in {:.1}s",
            handle,
            worker_id,
            status,
            kind,
            target,
            elapsed.as_secs_f64()
        ),
        _ => info!(
            target: "task_result",
            "[ID:{}][WK:{:02}] {} [{}] {} in {:.1}s",
            handle,
            worker_id,
            status,
            kind,
            target,
            elapsed.as_secs_f64()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(n: usize) -> Vec<Target> {
        (0..n).map(|i| format!("user{}", i)).collect()
    }

    fn sizes(chunks: &[Vec<Target>]) -> Vec<usize> {
        chunks.iter().map(Vec::len).collect()
    }

    #[test]
    fn test_partition_even_without_caps() {
        let (chunks, overflow) = partition(targets(11), &[usize::MAX, usize::MAX, usize::MAX]);
        assert_eq!(sizes(&chunks), vec![4, 4, 3]);
        assert!(overflow.is_empty());
    }

    #[test]
    fn test_partition_redistributes_capped_share() {
        let (chunks, overflow) = partition(targets(10), &[2, 100]);
        assert_eq!(sizes(&chunks), vec![2, 8]);
        assert!(overflow.is_empty());
    }

    #[test]
    fn test_partition_overflow_beyond_capacity() {
        let (chunks, overflow) = partition(targets(10), &[3, 0, 4]);
        assert_eq!(sizes(&chunks), vec![3, 0, 4]);
        assert_eq!(overflow.len(), 3);
    }

    #[test]
    fn test_partition_keeps_every_target_once() {
        let input = targets(17);
        let (chunks, overflow) = partition(input.clone(), &[5, 5, 5]);
        let mut seen: Vec<Target> = chunks.into_iter().flatten().chain(overflow).collect();
        seen.sort();
        let mut expected = input;
        expected.sort();
        assert_eq!(seen, expected);
    }
}
