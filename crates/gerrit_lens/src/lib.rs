//! Gerrit Lens - the core of a Gerrit code-review client.
//!
//! This library talks to the Gerrit REST API and keeps a live, shared view of
//! changes, file lists and comments for a front end to render.
//!
//! # Features
//!
//! - `reqwest` (default) - HTTP transport backed by `reqwest`, plus
//!   [`GerritApi::from_config`] and [`GerritSession::from_config`].
//! - `test-util` - in-memory [`http::MockTransport`] and
//!   [`process::ScriptedRunner`] for downstream tests.
//!
//! # Example
//!
//! ```ignore
//! use gerrit_lens::{GerritConfig, GerritSession, Subscribable, WithValue, WithValues};
//!
//! let session = GerritSession::from_config(&config)?;
//! let change = session.change_fetcher("12345", WithValues::from([WithValue::Labels]));
//! let handler = gerrit_lens::subscriptions::listener(|change| println!("{change:?}"));
//! change.subscribe(&handler, Default::default()).await;
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod entity;
pub mod git;
pub mod host;
pub mod http;
pub mod process;
pub mod quick_checkout;
pub mod retry;
pub mod session;
pub mod stream_events;
pub mod subscriptions;
pub mod thread;

pub use api::{ChangeQuery, GerritApi, GerritError, WithValue, WithValues};
pub use config::{ConfigError, GerritConfig};
pub use entity::{FetchContext, GerritChange, GerritComment, GerritFile, GerritRevision, GerritUser};
pub use session::GerritSession;
pub use subscriptions::{Subscribable, SubscribableExt};
pub use thread::{CommentThread, build_threads};
