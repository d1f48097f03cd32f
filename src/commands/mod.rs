mod check;
mod common;
mod extract;
mod metrics;
mod update;

pub use check::{CheckArgs, check};
pub use extract::{ExtractArgs, extract};
pub use metrics::{MetricsArgs, list_metrics};
pub use update::{UpdateArgs, update};
