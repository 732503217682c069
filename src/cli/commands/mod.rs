mod config;
mod run;

pub use config::ConfigCommand;
pub use run::{Operation, RunArgs};

pub use config::handle_config;
pub use run::handle_run;
