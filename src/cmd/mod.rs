//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `run`    | `Run`, `Plan`    |
//! | `show`   | `Show`, `List`   |
//! | `config` | `Config`         |

pub mod config;
pub mod run;
pub mod show;

pub use config::cmd_config;
pub use run::{cmd_plan, cmd_run};
pub use show::{cmd_list, cmd_show};
