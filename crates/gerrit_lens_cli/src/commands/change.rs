use gerrit_lens::api::types::ChangeStatus;
use gerrit_lens::entity::LabelStatus;
use gerrit_lens::{ChangeQuery, FetchContext, GerritChange, Subscribable, WithValue, WithValues};
use serde::Serialize;
use tabled::Tabled;

use crate::commands::output::{OutputFormat, Property, print_rows, truncate};
use crate::commands::shared::{open_session, require_change};
use crate::config::Config;

/// Options of the `changes` command.
#[derive(Debug, Clone)]
pub(crate) struct Search {
    pub filters: Vec<String>,
    pub query: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Search {
    /// Each filter argument is one group of whitespace-separated terms.
    pub(crate) fn to_query(&self) -> ChangeQuery {
        let groups = self
            .filters
            .iter()
            .map(|group| group.split_whitespace().map(str::to_string).collect())
            .collect();
        let mut query = ChangeQuery::new(groups)
            .page(self.offset, self.limit)
            .with(WithValues::from([WithValue::Labels, WithValue::DetailedAccounts]));
        if let Some(text) = &self.query {
            query = query.text(text.clone());
        }
        query
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub(crate) struct ChangeRow {
    #[tabled(rename = "Number")]
    pub number: u64,
    #[tabled(rename = "Subject")]
    pub subject: String,
    #[tabled(rename = "Owner")]
    pub owner: String,
    #[tabled(rename = "Project")]
    pub project: String,
    #[tabled(rename = "Branch")]
    pub branch: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Updated")]
    pub updated: String,
}

impl ChangeRow {
    pub(crate) fn from_change(change: &GerritChange) -> Self {
        Self {
            number: change.number(),
            subject: truncate(change.subject(), 60),
            owner: change.owner().display_name(),
            project: change.project().to_string(),
            branch: change.branch().to_string(),
            status: status_name(change.status(), change.work_in_progress()).to_string(),
            updated: change.updated().format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
struct LabelRow {
    #[tabled(rename = "Label")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "By")]
    by: String,
}

fn status_name(status: ChangeStatus, work_in_progress: bool) -> &'static str {
    match status {
        ChangeStatus::New if work_in_progress => "WIP",
        ChangeStatus::New => "Open",
        ChangeStatus::Merged => "Merged",
        ChangeStatus::Abandoned => "Abandoned",
    }
}

fn label_status_name(status: LabelStatus) -> &'static str {
    match status {
        LabelStatus::Approved => "approved",
        LabelStatus::Rejected => "rejected",
        LabelStatus::Recommended => "recommended",
        LabelStatus::Disliked => "disliked",
        LabelStatus::Neutral => "",
    }
}

pub(crate) async fn handle_change(
    config: &Config,
    change: &str,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = open_session(config)?;
    let with = WithValues::from([WithValue::Labels, WithValue::CurrentRevision]);
    let change = require_change(&session, change, with).await?;
    let ctx = FetchContext::new();

    let labels = change.labels(&session, &ctx).await.unwrap_or_default();
    let owner = change
        .detailed_owner(&session, &ctx)
        .await
        .unwrap_or_else(|| change.owner());
    let patchset = change
        .current_revision(&session, &ctx)
        .await
        .map(|r| r.number().to_string())
        .unwrap_or_default();

    if output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(change.info())?);
        return Ok(());
    }

    let mut properties = vec![
        Property::new("Number", change.number()),
        Property::new("Subject", change.subject()),
        Property::new("Status", status_name(change.status(), change.work_in_progress())),
        Property::new("Owner", owner.display_name()),
        Property::new("Project", change.project()),
        Property::new("Branch", change.branch()),
        Property::new("Patchset", patchset),
        Property::new("Change-Id", change.change_id()),
        Property::new("Updated", change.updated().format("%Y-%m-%d %H:%M:%S UTC")),
        Property::new(
            "Size",
            format!("+{} -{}", change.insertions(), change.deletions()),
        ),
    ];
    if let Some(topic) = change.topic() {
        properties.push(Property::new("Topic", topic));
    }
    print_rows(&properties, OutputFormat::Table)?;

    let rows: Vec<LabelRow> = labels
        .values()
        .map(|label| LabelRow {
            name: label.name.clone(),
            status: label_status_name(label.status).to_string(),
            by: label
                .by
                .as_ref()
                .map(|user| user.display_name())
                .unwrap_or_default(),
        })
        .collect();
    if !rows.is_empty() {
        print_rows(&rows, OutputFormat::Table)?;
    }
    Ok(())
}

pub(crate) async fn handle_changes(
    config: &Config,
    search: Search,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = open_session(config)?;
    let fetcher = session.change_list_fetcher(search.to_query());
    let list = fetcher
        .get_value(false)
        .await
        .ok_or("Change search failed")?;

    let rows: Vec<ChangeRow> = list
        .changes
        .iter()
        .map(|change| ChangeRow::from_change(change))
        .collect();
    print_rows(&rows, output)?;
    if list.more && output == OutputFormat::Table {
        println!(
            "More results available: --offset {}",
            search.offset + search.limit
        );
    }
    Ok(())
}
