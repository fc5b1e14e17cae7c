//! Server event stream over SSH.
//!
//! `ssh -p <port> <user>@<host> gerrit stream-events` prints one JSON object
//! per line, tagged by `type`. Each recognised event invalidates the live
//! views of the change it names; unknown event types are ignored.
//!
//! Support is checked speculatively by running the stream with a short
//! timeout. Being killed by that timeout means the server accepted the
//! command and kept the stream open; exiting on its own means it did not.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::{GerritConfig, StreamEventsConfig};
use crate::process::{CancellationFlag, CommandError, CommandRunner, CommandSpec, ExitKind};
use crate::retry::{Reconnect, RetryConfig, retry};
use crate::session::GerritSession;

/// How long the support check keeps the stream open before declaring success.
pub const SUPPORT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay before the single support check retry.
pub const SUPPORT_CHECK_RETRY_DELAY: Duration = Duration::from_secs(2);

/// The change an event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventChange {
    pub project: String,
    pub branch: String,
    /// The `Change-Id`.
    pub id: String,
    pub number: u64,
    #[serde(default)]
    pub subject: Option<String>,
}

impl EventChange {
    /// Ids under which a consumer may have requested this change.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        vec![
            format!("{}~{}~{}", self.project, self.branch, self.id),
            self.number.to_string(),
            self.id.clone(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefUpdate {
    pub project: String,
    #[serde(rename = "refName")]
    pub ref_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    CommentAdded { change: EventChange },
    ChangeMerged { change: EventChange },
    PatchsetCreated { change: EventChange },
    ChangeAbandoned { change: EventChange },
    ChangeRestored { change: EventChange },
    ReviewerAdded { change: EventChange },
    TopicChanged { change: EventChange },
    WipStateChanged { change: EventChange },
    PrivateStateChanged { change: EventChange },
    HashtagsChanged { change: EventChange },
    RefUpdated {
        #[serde(rename = "refUpdate")]
        ref_update: RefUpdate,
    },
    #[serde(other)]
    Unknown,
}

/// What an event makes stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// The change, its files and its comments.
    Change(Vec<String>),
    /// Every live search.
    ChangeLists,
}

impl StreamEvent {
    #[must_use]
    pub fn change(&self) -> Option<&EventChange> {
        match self {
            StreamEvent::CommentAdded { change }
            | StreamEvent::ChangeMerged { change }
            | StreamEvent::PatchsetCreated { change }
            | StreamEvent::ChangeAbandoned { change }
            | StreamEvent::ChangeRestored { change }
            | StreamEvent::ReviewerAdded { change }
            | StreamEvent::TopicChanged { change }
            | StreamEvent::WipStateChanged { change }
            | StreamEvent::PrivateStateChanged { change }
            | StreamEvent::HashtagsChanged { change } => Some(change),
            StreamEvent::RefUpdated { .. } | StreamEvent::Unknown => None,
        }
    }

    #[must_use]
    pub fn invalidations(&self) -> Vec<Invalidation> {
        match self {
            StreamEvent::RefUpdated { ref_update } if !ref_update.ref_name.starts_with("refs/changes/") => {
                Vec::new()
            }
            StreamEvent::RefUpdated { .. } => vec![Invalidation::ChangeLists],
            StreamEvent::Unknown => Vec::new(),
            other => other
                .change()
                .map(|change| vec![Invalidation::Change(change.ids()), Invalidation::ChangeLists])
                .unwrap_or_default(),
        }
    }
}

/// Parse one line of the stream. Blank and malformed lines yield `None`.
#[must_use]
pub fn parse_event(line: &str) -> Option<StreamEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::debug!(error = %err, "skipping malformed stream event");
            None
        }
    }
}

/// Apply an event's invalidations to the session.
pub async fn apply_event(session: &GerritSession, event: &StreamEvent) {
    for invalidation in event.invalidations() {
        match invalidation {
            Invalidation::Change(ids) => {
                for id in ids {
                    session.invalidate_change(&id).await;
                }
            }
            Invalidation::ChangeLists => {
                session.invalidate_change_lists().await;
            }
        }
    }
}

/// Consume lines until the sender closes or `cancel` is set. Returns the
/// number of recognised events.
pub async fn process_lines(
    session: &GerritSession,
    mut lines: mpsc::Receiver<String>,
    cancel: &CancellationFlag,
) -> usize {
    let mut handled = 0;
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            () = cancel.cancelled() => break,
        };
        let Some(line) = line else {
            break;
        };
        let Some(event) = parse_event(&line) else {
            continue;
        };
        if event == StreamEvent::Unknown {
            continue;
        }
        tracing::debug!(?event, "stream event");
        apply_event(session, &event).await;
        handled += 1;
    }
    handled
}

#[derive(Debug, thiserror::Error)]
pub enum SupportCheckError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("stream-events exited early ({0})")]
    Rejected(ExitKind),
}

/// Runs the SSH event stream for a session.
pub struct StreamEventsDriver {
    runner: Arc<dyn CommandRunner>,
    destination: String,
    port: u16,
    reconnect: RetryConfig,
    support_retry: RetryConfig,
}

impl StreamEventsDriver {
    /// Build a driver from configuration. `None` when the feature is off or
    /// no SSH host can be derived.
    #[must_use]
    pub fn from_config(config: &GerritConfig, runner: Arc<dyn CommandRunner>) -> Option<Self> {
        let stream = &config.stream_events;
        if !stream.enabled {
            return None;
        }
        let host = stream.ssh_host.clone().or_else(|| {
            config
                .url
                .as_deref()
                .and_then(|u| url::Url::parse(u).ok())
                .and_then(|u| u.host_str().map(str::to_string))
        })?;
        let user = stream.ssh_user.clone().or_else(|| config.username.clone());
        Some(Self::new(runner, &host, user.as_deref(), stream))
    }

    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        host: &str,
        user: Option<&str>,
        config: &StreamEventsConfig,
    ) -> Self {
        let destination = match user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        };
        Self {
            runner,
            destination,
            port: config.ssh_port,
            reconnect: RetryConfig::default(),
            support_retry: RetryConfig::once(SUPPORT_CHECK_RETRY_DELAY),
        }
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: RetryConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_support_retry(mut self, support_retry: RetryConfig) -> Self {
        self.support_retry = support_retry;
        self
    }

    #[must_use]
    pub fn command(&self) -> CommandSpec {
        CommandSpec::new(
            "ssh",
            [
                "-p".to_string(),
                self.port.to_string(),
                self.destination.clone(),
                "gerrit".to_string(),
                "stream-events".to_string(),
            ],
        )
    }

    async fn check_support_once(&self) -> Result<(), SupportCheckError> {
        let spec = self.command().timeout(SUPPORT_CHECK_TIMEOUT);
        let output = self.runner.run(&spec).await?;
        match output.exit {
            ExitKind::TimedOut => Ok(()),
            exit => {
                tracing::debug!(%exit, stderr = %output.stderr.trim(), "stream-events rejected");
                Err(SupportCheckError::Rejected(exit))
            }
        }
    }

    /// Whether the server accepts `gerrit stream-events` from us. Retries
    /// once before giving up.
    pub async fn is_supported(&self) -> bool {
        let result = retry("stream-events support check", &self.support_retry, || {
            self.check_support_once()
        })
        .await;
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::info!(error = %err, "stream events unavailable, disabling");
                false
            }
        }
    }

    /// Stream events into `session` until `cancel` is set, reconnecting with
    /// backoff. The backoff resets whenever a connection delivered events.
    /// Returns the total number of events handled.
    pub async fn run(&self, session: &GerritSession, cancel: &CancellationFlag) -> usize {
        let mut total = 0;
        let mut reconnect = Reconnect::new(self.reconnect.clone());
        while !cancel.is_cancelled() {
            let (tx, rx) = mpsc::channel(64);
            let spec = self.command();
            let (exit, handled) = tokio::join!(
                self.runner.stream_lines(&spec, tx),
                process_lines(session, rx, cancel)
            );
            total += handled;
            match exit {
                Ok(exit) => tracing::info!(%exit, handled, "event stream closed"),
                Err(err) => tracing::warn!(error = %err, "event stream failed"),
            }
            if cancel.is_cancelled() {
                break;
            }

            if handled > 0 {
                reconnect.reset();
            }
            let Some(delay) = reconnect.next_delay() else {
                tracing::warn!("giving up on event stream");
                break;
            };
            tracing::debug!(?delay, "reconnecting event stream");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => break,
            }
        }
        total
    }
}
