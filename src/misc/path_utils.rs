/// Sanitize a string for use as a single path component.
///
/// Package names, version strings, and result keys all end up in file names;
/// this strips traversal sequences and characters that are unsafe on common
/// filesystems.
///
/// ```
/// use verdiff::misc::sanitize_path_component;
///
/// assert_eq!(sanitize_path_component("0.0.1"), "0.0.1");
/// assert_eq!(sanitize_path_component("EMPTY..0.0.1"), "EMPTY__0.0.1");
/// assert_eq!(sanitize_path_component("../../etc/passwd"), "______etc_passwd");
/// ```
#[must_use]
pub fn sanitize_path_component(s: &str) -> String {
    // Replace ".." (also the delta-key separator) but allow single "." so
    // version strings like "0.0.1" survive unchanged.
    let s = s.replace("..", "__");
    s.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_strings_pass_through() {
        assert_eq!(sanitize_path_component("0.0.1"), "0.0.1");
        assert_eq!(sanitize_path_component("1.0.0rc1"), "1.0.0rc1");
    }

    #[test]
    fn delta_keys_lose_their_separator() {
        assert_eq!(sanitize_path_component("0.0.1..0.0.2"), "0.0.1__0.0.2");
        assert_eq!(sanitize_path_component("EMPTY..0.0.1"), "EMPTY__0.0.1");
    }

    #[test]
    fn traversal_and_dangerous_chars() {
        assert_eq!(sanitize_path_component(".."), "__");
        assert_eq!(sanitize_path_component("../etc"), "___etc");
        assert_eq!(sanitize_path_component("foo/bar"), "foo_bar");
        assert_eq!(sanitize_path_component("foo:bar?"), "foo_bar_");
    }
}
