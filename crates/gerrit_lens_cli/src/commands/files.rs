use gerrit_lens::api::types::FileStatus;
use gerrit_lens::subscriptions::FilesKey;
use gerrit_lens::{FetchContext, GerritFile, WithValue, WithValues};
use serde::Serialize;
use tabled::Tabled;

use crate::commands::output::{OutputFormat, print_rows};
use crate::commands::shared::{open_session, require_change};
use crate::config::Config;

#[derive(Debug, Clone, Serialize, Tabled)]
struct FileRow {
    #[tabled(rename = "St")]
    status: &'static str,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "+")]
    inserted: u32,
    #[tabled(rename = "-")]
    deleted: u32,
}

fn status_letter(status: FileStatus) -> &'static str {
    match status {
        FileStatus::Added => "A",
        FileStatus::Deleted => "D",
        FileStatus::Renamed => "R",
        FileStatus::Copied => "C",
        FileStatus::Rewritten => "W",
        FileStatus::Modified => "M",
    }
}

impl FileRow {
    fn from_file(file: &GerritFile) -> Self {
        let path = match file.status() {
            FileStatus::Renamed | FileStatus::Copied => {
                format!("{} → {}", file.old_path(), file.path)
            }
            _ => file.path.clone(),
        };
        Self {
            status: status_letter(file.status()),
            path,
            inserted: file.info.lines_inserted,
            deleted: file.info.lines_deleted,
        }
    }
}

pub(crate) async fn handle_files(
    config: &Config,
    change: &str,
    patchset: Option<u32>,
    base: Option<u32>,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = open_session(config)?;
    let change = require_change(&session, change, WithValues::from([WithValue::CurrentRevision]))
        .await?;
    let ctx = FetchContext::new();

    let revision = match patchset {
        Some(number) => change.revision_by_number(number, &session, &ctx).await,
        None => change.current_revision(&session, &ctx).await,
    }
    .ok_or("Revision not found")?;

    let files = match base {
        Some(number) => {
            let base = change
                .revision_by_number(number, &session, &ctx)
                .await
                .ok_or_else(|| format!("Patchset {number} not found"))?;
            let key = FilesKey::new(change.id(), revision.descriptor(), Some(base.descriptor()));
            session.files(change.project(), key).await
        }
        None => revision.files(&session, &ctx).await,
    }
    .ok_or("Could not load the file list")?;

    let rows: Vec<FileRow> = files
        .iter()
        .filter(|f| !f.is_magic())
        .map(FileRow::from_file)
        .collect();
    print_rows(&rows, output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_letters_match_gerrit() {
        assert_eq!(status_letter(FileStatus::Added), "A");
        assert_eq!(status_letter(FileStatus::default()), "M");
    }
}
