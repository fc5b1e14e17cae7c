use std::path::PathBuf;
use std::sync::Arc;

use gerrit_lens::git::{GitCommit, GitRepo};
use gerrit_lens::host::JsonFileStore;
use gerrit_lens::process::TokioRunner;
use gerrit_lens::quick_checkout::{QuickCheckout, QuickCheckoutEntry};
use gerrit_lens::{WithValue, WithValues};
use serde::Serialize;
use tabled::Tabled;

use crate::CheckoutAction;
use crate::commands::output::{OutputFormat, print_rows, truncate};
use crate::commands::shared::{open_session, repo_root, require_change};
use crate::config::Config;

#[derive(Debug, Clone, Serialize, Tabled)]
struct EntryRow {
    #[tabled(rename = "Change")]
    change: u64,
    #[tabled(rename = "PS")]
    patchset: u32,
    #[tabled(rename = "Subject")]
    subject: String,
    #[tabled(rename = "Return To")]
    original_ref: String,
    #[tabled(rename = "Stashed")]
    stashed: bool,
    #[tabled(rename = "Created")]
    created: String,
}

impl From<&QuickCheckoutEntry> for EntryRow {
    fn from(entry: &QuickCheckoutEntry) -> Self {
        Self {
            change: entry.change_number,
            patchset: entry.patchset,
            subject: truncate(&entry.subject, 50),
            original_ref: entry.original_ref.clone(),
            stashed: entry.stash_message.is_some(),
            created: entry.created.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
struct CommitRow {
    #[tabled(rename = "Sha")]
    sha: String,
    #[tabled(rename = "Subject")]
    subject: String,
    #[tabled(rename = "Author")]
    author: String,
    #[tabled(rename = "Change-Id")]
    change_id: String,
}

impl From<&GitCommit> for CommitRow {
    fn from(commit: &GitCommit) -> Self {
        Self {
            sha: commit.sha.chars().take(10).collect(),
            subject: truncate(commit.subject(), 50),
            author: commit.author_name.clone(),
            change_id: commit.change_id.clone().unwrap_or_default(),
        }
    }
}

fn quick_checkout(config: &Config, repo: Option<PathBuf>) -> Result<QuickCheckout, Box<dyn std::error::Error>> {
    let root = repo_root(repo)?;
    let state_file = config
        .state_file()
        .ok_or("Could not determine a state directory; set [checkout] state_file")?;
    let git = GitRepo::new(Arc::new(TokioRunner), root);
    Ok(QuickCheckout::new(git, Arc::new(JsonFileStore::new(state_file))))
}

pub(crate) async fn handle_checkout(
    config: &Config,
    action: CheckoutAction,
    repo: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let quick = quick_checkout(config, repo)?;
    match action {
        CheckoutAction::Push { change } => {
            let session = open_session(config)?;
            let change =
                require_change(&session, &change, WithValues::from([WithValue::CurrentRevision]))
                    .await?;
            let entry = quick.push(&session, &change).await?;
            println!(
                "Checked out change {} patchset {} (was on {})",
                entry.change_number, entry.patchset, entry.original_ref
            );
        }
        CheckoutAction::List { output } => {
            let rows: Vec<EntryRow> = quick.entries().iter().map(EntryRow::from).collect();
            print_rows(&rows, output)?;
        }
        CheckoutAction::Pop { number } => match quick.pop(number).await? {
            Some(entry) => println!("Back on {}", entry.original_ref),
            None => return Err(format!("No quick checkout of change {number}").into()),
        },
        CheckoutAction::Drop { number } => match quick.drop_entry(number).await? {
            Some(entry) => println!("Dropped quick checkout of change {}", entry.change_number),
            None => return Err(format!("No quick checkout of change {number}").into()),
        },
    }
    Ok(())
}

pub(crate) async fn handle_log(
    count: u32,
    repo: Option<PathBuf>,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let git = GitRepo::new(Arc::new(TokioRunner), repo_root(repo)?);
    let commits = git.log(count).await?;
    let rows: Vec<CommitRow> = commits.iter().map(CommitRow::from).collect();
    print_rows(&rows, output)?;
    Ok(())
}
