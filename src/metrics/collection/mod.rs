//! Built-in metric collection.

mod changed_lines;
mod function_db;
mod total_counts;

pub use changed_lines::ChangedLines;
pub use function_db::FunctionDb;
pub use total_counts::TotalCounts;
