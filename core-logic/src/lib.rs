//! # Engage Core - Multi-Identity Engagement Engine
//!
//! Runs a campaign (follow, like, comment, DM, story view, scraping) against
//! a target list from many authenticated identities concurrently, without
//! breaching per-identity daily quotas and without repeating work after a
//! crash.
//!
//! ## Modules
//!
//! - [`config`] - Engine settings, daily limits, delay tables
//! - [`error`] - Typed error handling with thiserror
//! - [`quota`] - Per-identity daily action counters with reservations
//! - [`executor`] - Retrying, rate-limit-aware remote call wrapper
//! - [`ledger`] - Crash-safe pending/completed target files
//! - [`session`] - One identity's client, quota, and campaign verbs
//! - [`dispatcher`] - Partitions targets across identities and runs workers
//! - [`metrics`] - Outcome counters and JSON export

pub mod accounts;
pub mod campaign;
pub mod config;
pub mod delay;
pub mod dispatcher;
pub mod engagement;
pub mod error;
pub mod executor;
pub mod identity;
pub mod ledger;
pub mod metrics;
pub mod quota;
pub mod remote;
pub mod scrape;
pub mod session;
pub mod types;
pub(crate) mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use accounts::{Account, AccountLoader, Credentials, SessionStore};
pub use campaign::{personalize, Campaign};
pub use config::{ConfigStore, DailyLimits, Delays, EngineConfig, Jitter, ProxyConfig};
pub use delay::DelayPolicy;
pub use dispatcher::{partition, DispatchReport, TaskDispatcher};
pub use engagement::{EngagementTally, HighlightOrder};
pub use error::{
    ActionError, ConfigError, CoreError, DispatchError, ErrorKind, LedgerError, RemoteError,
};
pub use executor::{RetryPolicy, SafeRequestExecutor};
pub use identity::Identity;
pub use ledger::{write_targets, TargetLedger};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use quota::{Clock, ManualClock, QuotaReservation, QuotaTracker, SystemClock};
pub use remote::{Comment, Highlight, Location, Media, RemoteClient, RemoteResult, Story, UserInfo};
pub use scrape::{AudienceScrape, EngagementSummary, LocationScrape, TaggedScrape};
pub use session::{IdentitySession, StoryTally};
pub use types::{ActionKind, AuthState, OutcomeStatus, TaskOutcome, Target};

pub use utils::{setup_logger, CampaignRunner};
