//! Command-line interface for comment-harvest.

mod commands;
pub mod progress;

pub use commands::{is_verbose, run};
#[allow(unused_imports)]
pub use progress::progress_println;
