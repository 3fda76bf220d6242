//! HTTP request handlers.

mod health;
mod results;
mod runs;

pub use health::{health_check, metrics_handler};
pub use results::{ack_result, next_result};
pub use runs::submit_run;
