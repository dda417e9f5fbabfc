#[cfg(test)]
#[macro_use]
extern crate is_close;

pub mod backends;
pub mod config;
pub mod data_type;
pub mod generator;
pub mod kv_cache;
pub mod logits_buffer;
pub mod parameters;
pub mod session;
pub mod stats;
pub mod tokenizer;

pub use backends::Token;
pub use data_type::{ArrayElement, DataType};
pub use logits_buffer::{LogitsBuffer, LogitsBufferError};
pub use session::{FinishReason, Output, Runner, RunnerError};
