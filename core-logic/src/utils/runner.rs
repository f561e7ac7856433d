use crate::campaign::Campaign;
use crate::dispatcher::{DispatchReport, TaskDispatcher};
use crate::error::{CoreError, DispatchError};
use crate::session::IdentitySession;
use crate::types::Target;
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};

/// Runs one campaign to completion with graceful shutdown.
pub struct CampaignRunner {
    dispatcher: TaskDispatcher,
    sessions: Vec<Arc<IdentitySession>>,
    worker_budget: usize,
}

impl CampaignRunner {
    pub fn new(dispatcher: TaskDispatcher, sessions: Vec<Arc<IdentitySession>>, worker_budget: usize) -> Self {
        Self {
            dispatcher,
            sessions,
            worker_budget,
        }
    }

    /// Run until the targets are done or Ctrl+C is pressed.
    ///
    /// With no explicit targets, the dispatcher's ledger supplies the
    /// pending list.
    pub async fn run(&self, campaign: &Campaign, targets: Option<Vec<Target>>) -> Result<DispatchReport, CoreError> {
        self.run_until(campaign, targets, async {
            match signal::ctrl_c().await {
                Ok(()) => info!("🛑 Received Ctrl+C. Initiating graceful shutdown..."),
                Err(err) => {
                    error!("Unable to listen for shutdown signal: {}", err);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }

    /// Run until the targets are done or `shutdown` resolves, whichever
    /// comes first. In-flight actions finish before this returns.
    pub async fn run_until<S>(
        &self,
        campaign: &Campaign,
        targets: Option<Vec<Target>>,
        shutdown: S,
    ) -> Result<DispatchReport, CoreError>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let targets = match targets {
            Some(targets) => targets,
            None => match self.dispatcher.ledger() {
                Some(ledger) => ledger.resume_targets().await,
                None => Vec::new(),
            },
        };

        let token = CancellationToken::new();
        let cloned_token = token.clone();
        let watcher = tokio::spawn(async move {
            shutdown.await;
            cloned_token.cancel();
        });

        let kind = campaign.kind();
        info!(
            "Starting {} campaign: {} targets across {} identities",
            kind,
            targets.len(),
            self.sessions.len()
        );

        let span = tracing::info_span!("campaign", kind = %kind);
        let result = self
            .dispatcher
            .dispatch(targets, &self.sessions, campaign, self.worker_budget, &token)
            .instrument(span)
            .await;
        watcher.abort();

        let report = match &result {
            Ok(report) => report,
            Err(DispatchError::Fatal { report, .. }) => report.as_ref(),
        };
        summarize(report, token.is_cancelled());

        result.map_err(CoreError::from)
    }
}

fn summarize(report: &DispatchReport, interrupted: bool) {
    let total = report.outcomes.len();
    let rate = if total > 0 {
        (report.successes() as f64 / total as f64) * 100.0
    } else {
        0.0
    };

    if interrupted {
        info!("🛑 Shutdown Complete. {} targets left pending.", report.unprocessed.len());
    }
    info!(
        "Total Time: {:.1}s | Total Success: {} | Total Fail: {} | Skipped: {} | Success Rate: {:.2}%",
        report.elapsed.as_secs_f64(),
        report.successes(),
        report.failures(),
        report.skipped(),
        rate
    );
}
