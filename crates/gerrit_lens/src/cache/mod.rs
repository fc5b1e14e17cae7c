//! Process-wide caches shared by every subscription manager.

mod changes;
mod files;

pub use changes::ChangeCache;
pub use files::{FileContentCache, FileContentKey};
