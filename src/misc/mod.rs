//! Small shared helpers.

mod path_utils;

pub use path_utils::sanitize_path_component;
