mod init_model;
mod run;

pub use init_model::{InitModelArgs, handle_init_model};
pub use run::{RunArgs, handle_run, run_batch_to_file};
