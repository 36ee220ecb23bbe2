//! CLI command implementations

mod admin;
mod table;

pub use admin::{cmd_config_init, cmd_config_show, load_config};
pub use table::{cmd_check, cmd_delete, cmd_get, cmd_insert, cmd_next_id, cmd_select, cmd_set};
