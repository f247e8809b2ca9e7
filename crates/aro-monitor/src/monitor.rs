use std::fmt::Display;

use chrono::{DateTime, Utc};

use crate::config::{Config, WatchConfig};
use crate::differ::{self, DiffOptions};
use crate::fetcher::{Fetcher, NetworkError};
use crate::notify::{Alert, DeliveryPolicy, DispatchReport, Dispatcher, NotificationError};
use crate::parser::{self, ParseError};
use crate::store::{StateStore, StateStoreError};
use crate::types::UnitListing;

/// Where a monitoring pass currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Parsing,
    Diffing,
    Notifying,
    Persisting,
    Failed,
}

impl Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Fetching => "fetching",
            RunState::Parsing => "parsing",
            RunState::Diffing => "diffing",
            RunState::Notifying => "notifying",
            RunState::Persisting => "persisting",
            RunState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// A failure that ends the run. The state file is left as it was.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    StateStore(#[from] StateStoreError),
}

impl RunError {
    /// The state the run was in when it failed.
    pub fn phase(&self) -> RunState {
        match self {
            RunError::Network(_) => RunState::Fetching,
            RunError::Parse(_) => RunState::Parsing,
            RunError::StateStore(
                StateStoreError::Read { .. }
                | StateStoreError::Corrupt { .. }
                | StateStoreError::UnsupportedVersion { .. },
            ) => RunState::Diffing,
            RunError::StateStore(_) => RunState::Persisting,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to set up notifications: {0}")]
    Notifier(#[from] NotificationError),
}

/// What one successful pass saw and did.
#[derive(Debug)]
pub struct RunReport {
    pub checked_at: DateTime<Utc>,
    /// Matching units parsed from the page.
    pub units: Vec<UnitListing>,
    /// Units that were due for an alert, sorted by id.
    pub notifiable: Vec<UnitListing>,
    pub dispatch: DispatchReport,
    pub persisted: bool,
}

impl RunReport {
    pub fn notifiable_ids(&self) -> Vec<&str> {
        self.notifiable.iter().map(|u| u.unit_id.as_str()).collect()
    }

    /// Non-fatal channel errors collected during the run.
    pub fn failures(&self) -> Vec<String> {
        self.dispatch
            .failures()
            .map(|(channel, e)| format!("{}: {}", channel, e))
            .collect()
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} unit(s) parsed, {} notifiable, delivery: {}",
            self.units.len(),
            self.notifiable.len(),
            self.dispatch
        )
    }
}

/// Sequences one monitoring pass: fetch, parse, diff, notify, persist.
pub struct Monitor {
    fetcher: Fetcher,
    store: StateStore,
    dispatcher: Dispatcher,
    listings_url: String,
    options: DiffOptions,
    dry_run: bool,
    state: RunState,
}

impl Monitor {
    pub fn new(
        fetcher: Fetcher,
        store: StateStore,
        dispatcher: Dispatcher,
        listings_url: &str,
    ) -> Self {
        Self {
            fetcher,
            store,
            dispatcher,
            listings_url: listings_url.to_string(),
            options: DiffOptions::default(),
            dry_run: false,
            state: RunState::Idle,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, SetupError> {
        let dispatcher = Dispatcher::from_config(config)?;
        Self::watching(&config.watch, dispatcher)
    }

    /// A dry-run monitor that needs no notification credentials.
    pub fn observer(watch: &WatchConfig) -> Result<Self, SetupError> {
        Ok(Self::watching(watch, Dispatcher::new(DeliveryPolicy::default()))?.dry_run(true))
    }

    fn watching(watch: &WatchConfig, dispatcher: Dispatcher) -> Result<Self, SetupError> {
        let fetcher = Fetcher::new(&watch.fetch)?;
        Ok(Self::new(
            fetcher,
            StateStore::new(&watch.state_path),
            dispatcher,
            &watch.fetch.listings_url,
        )
        .with_options(DiffOptions {
            realert_on_content_change: watch.realert_on_content_change,
        }))
    }

    pub fn with_options(mut self, options: DiffOptions) -> Self {
        self.options = options;
        self
    }

    /// Fetch, parse and diff only. Nothing is sent and the state file is not written.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub async fn run(&mut self) -> Result<RunReport, RunError> {
        match self.pass().await {
            Ok(report) => {
                self.transition(RunState::Idle);
                log::info!("Run complete: {}", report);
                for failure in report.failures() {
                    log::warn!("Notification failure: {}", failure);
                }
                Ok(report)
            }
            Err(e) => {
                let phase = e.phase();
                self.transition(RunState::Failed);
                log::error!("Run failed while {}: {}", phase, e);
                Err(e)
            }
        }
    }

    async fn pass(&mut self) -> Result<RunReport, RunError> {
        let checked_at = Utc::now();

        self.transition(RunState::Fetching);
        let html = self.fetcher.fetch(&self.listings_url).await?;

        self.transition(RunState::Parsing);
        let units = parser::parse_listings(&html)?;

        self.transition(RunState::Diffing);
        let previous = self.store.load()?;
        let notifiable = differ::diff(&units, &previous, self.options);

        self.transition(RunState::Notifying);
        let alert = Alert::new(notifiable, &self.listings_url);
        let dispatch = if self.dry_run {
            for unit in &alert.units {
                log::info!("Dry run, would notify: {}", unit);
            }
            DispatchReport::default()
        } else {
            self.dispatcher.notify(&alert).await
        };

        let persisted = if self.dry_run {
            false
        } else {
            self.transition(RunState::Persisting);
            let notified: &[UnitListing] = if dispatch.attempted() {
                &alert.units
            } else {
                &[]
            };
            let next = differ::record_run(&previous, &units, notified, checked_at);
            self.store.save(&next)?;
            true
        };

        Ok(RunReport {
            checked_at,
            units,
            notifiable: alert.units,
            dispatch,
            persisted,
        })
    }

    fn transition(&mut self, next: RunState) {
        log::debug!("Run state: {} -> {}", self.state, next);
        self.state = next;
    }
}
