//! One module per CLI command

mod add;
mod chat;
mod index;
mod search;
mod serve;
mod status;

pub(crate) use add::cmd_add;
pub(crate) use chat::cmd_chat;
pub(crate) use index::cmd_index;
pub(crate) use search::cmd_search;
pub(crate) use serve::cmd_serve;
pub(crate) use status::{cmd_stats, cmd_status};
