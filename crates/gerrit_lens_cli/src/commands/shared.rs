//! Session setup shared by the commands.

use std::path::PathBuf;
use std::sync::Arc;

use gerrit_lens::config::ConfigNag;
use gerrit_lens::host::TracingNotifier;
use gerrit_lens::{GerritApi, GerritChange, GerritSession, WithValues};

use crate::config::Config;

/// Connect to the configured server.
pub(crate) fn open_session(config: &Config) -> Result<GerritSession, Box<dyn std::error::Error>> {
    ConfigNag::new()
        .check(&config.gerrit, &TracingNotifier)
        .map_err(|e| format!("{e}. Set [gerrit] url, username and password in gerrit-lens.toml"))?;
    let api = GerritApi::from_config(&config.gerrit)?.with_notifier(Arc::new(TracingNotifier));
    Ok(GerritSession::with_refetch_interval(
        Some(api),
        config.gerrit.refetch_interval(),
    ))
}

/// Fetch a change or fail with a readable message.
pub(crate) async fn require_change(
    session: &GerritSession,
    change: &str,
    with: WithValues,
) -> Result<Arc<GerritChange>, Box<dyn std::error::Error>> {
    session
        .get_change(change, &with)
        .await
        .ok_or_else(|| format!("Change '{change}' not found").into())
}

/// Repository root, defaulting to the current directory.
pub(crate) fn repo_root(repo: Option<PathBuf>) -> Result<PathBuf, std::io::Error> {
    match repo {
        Some(path) => Ok(path),
        None => std::env::current_dir(),
    }
}
