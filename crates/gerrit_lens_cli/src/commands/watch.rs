//! Live view of changes fed by server events.

use std::sync::Arc;

use gerrit_lens::process::{CancellationFlag, TokioRunner};
use gerrit_lens::stream_events::StreamEventsDriver;
use gerrit_lens::subscriptions::{SubscribeOptions, listener};
use gerrit_lens::{GerritChange, Subscribable, WithValue, WithValues};

use crate::commands::change::ChangeRow;
use crate::commands::shared::open_session;
use crate::config::Config;
use crate::shutdown::setup_shutdown_handler;

pub(crate) async fn handle_watch(
    config: &Config,
    changes: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let session = open_session(config)?;
    let driver = StreamEventsDriver::from_config(&config.gerrit, Arc::new(TokioRunner))
        .ok_or("Stream events are disabled or no SSH host is configured")?;
    if !driver.is_supported().await {
        return Err("Could not connect to the Gerrit event stream over SSH".into());
    }

    let with = WithValues::from([WithValue::Labels, WithValue::DetailedAccounts]);
    let handler = listener(|change: &Option<Arc<GerritChange>>| match change {
        Some(change) => {
            let row = ChangeRow::from_change(change);
            println!(
                "[{}] {} {} ({}) updated {}",
                row.number, row.status, row.subject, row.owner, row.updated
            );
        }
        None => tracing::warn!("change could not be loaded"),
    });

    // Fetchers unsubscribe on drop; keep them for the whole session.
    let mut fetchers = Vec::with_capacity(changes.len());
    for change in changes {
        let fetcher = session.change_fetcher(change, with.clone());
        fetcher
            .subscribe(
                &handler,
                SubscribeOptions {
                    once: false,
                    on_initial: true,
                },
            )
            .await;
        fetchers.push(fetcher);
    }

    let cancel = CancellationFlag::new();
    setup_shutdown_handler(cancel.clone());
    let handled = driver.run(&session, &cancel).await;
    tracing::info!(handled, "event stream finished");
    drop(fetchers);
    Ok(())
}
