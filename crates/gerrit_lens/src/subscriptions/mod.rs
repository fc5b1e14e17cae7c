//! Live, shared views of Gerrit data.

mod base;
mod change;
mod change_list;
mod comments;
mod compose;
mod files;

pub use base::{
    FetchState, Fetcher, Field, Getter, Listener, Matcher, SubscribeOptions, Subscribable,
    SubscriberId, SubscriptionKey, SubscriptionManager, ValueFuture, getter, listener,
};
pub use change::{ChangeFetcher, ChangeKey, ChangePattern, ChangeSubscriptions};
pub use change_list::{ChangeList, ChangeListFetcher, ChangeListPattern, ChangeListSubscriptions};
pub use comments::{
    CommentManagers, CommentSubscriptions, CommentsFetcher, CommentsKey, CommentsPattern,
};
pub use compose::{
    JoinedSubscription, MappedSubscription, SubscribableExt, join_subscribables, map_subscription,
};
pub use files::{FileSubscriptions, FilesFetcher, FilesKey, FilesPattern};
