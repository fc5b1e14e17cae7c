use gerrit_lens::thread::threads_by_path;
use gerrit_lens::{CommentThread, GerritComment};
use serde::Serialize;
use tabled::Tabled;

use crate::commands::output::{OutputFormat, print_rows, truncate};
use crate::commands::shared::open_session;
use crate::config::Config;

#[derive(Debug, Clone, Serialize, Tabled)]
struct ThreadRow {
    #[tabled(rename = "File")]
    path: String,
    #[tabled(rename = "Line")]
    line: String,
    #[tabled(rename = "State")]
    state: &'static str,
    #[tabled(rename = "Replies")]
    replies: usize,
    #[tabled(rename = "Last")]
    last: String,
}

fn thread_state(thread: &CommentThread) -> &'static str {
    match (thread.resolved(), thread.has_draft()) {
        (_, true) => "draft",
        (true, false) => "resolved",
        (false, false) => "unresolved",
    }
}

fn last_message(comment: Option<&GerritComment>) -> String {
    comment
        .map(|c| {
            let author = c.author().map(|a| a.display_name()).unwrap_or_default();
            truncate(&format!("{author}: {}", c.message()), 60)
        })
        .unwrap_or_default()
}

pub(crate) async fn handle_comments(
    config: &Config,
    change: &str,
    unresolved: bool,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = open_session(config)?;
    let map = session
        .comments(change)
        .await
        .ok_or_else(|| format!("Could not load comments of change '{change}'"))?;

    let threads: Vec<CommentThread> = threads_by_path(&map)
        .into_values()
        .flatten()
        .filter(|t| !unresolved || !t.resolved())
        .collect();

    if output == OutputFormat::Json {
        let comments: Vec<&Vec<GerritComment>> = threads.iter().map(|t| &t.comments).collect();
        println!("{}", serde_json::to_string_pretty(&comments)?);
        return Ok(());
    }

    let rows: Vec<ThreadRow> = threads
        .iter()
        .map(|thread| ThreadRow {
            path: thread.path.clone(),
            line: thread.line().map(|l| l.to_string()).unwrap_or_default(),
            state: thread_state(thread),
            replies: thread.comments.len().saturating_sub(1),
            last: last_message(thread.last()),
        })
        .collect();
    print_rows(&rows, output)?;
    Ok(())
}
