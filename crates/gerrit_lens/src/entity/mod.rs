//! Domain wrappers around Gerrit wire types.

mod change;
mod comment;
mod fetchable;
mod file;
mod label;
mod project;
mod revision;
mod user;

pub use change::GerritChange;
pub use comment::{CommentKind, CommentMap, GerritComment, comment_map_from, merge_comment_maps};
pub use fetchable::FetchContext;
pub use file::GerritFile;
pub use label::{DetailedLabel, GerritLabel, LabelStatus, LabelVote};
pub use project::{GerritGroup, GerritProject};
pub use revision::{GerritCommit, GerritRevision, RevisionDescriptor};
pub use user::{DetailedUser, GerritUser};
