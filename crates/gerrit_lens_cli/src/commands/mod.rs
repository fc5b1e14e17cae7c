pub(crate) mod change;
pub(crate) mod checkout;
pub(crate) mod comments;
pub(crate) mod files;
pub(crate) mod meta;
pub(crate) mod output;
pub(crate) mod shared;
pub(crate) mod watch;
