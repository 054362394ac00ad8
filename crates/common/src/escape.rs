//! Filename escape discipline.
//!
//! PDDL identifiers cannot carry `.`, so filenames are escaped by
//! substituting `_dot_` at every boundary. This is the single encode/decode
//! pair; all conversions between the symbolic namespace and the physical
//! file system route through these two functions.

/// Marker substituted for `.` in the symbolic namespace.
pub const DOT_MARKER: &str = "_dot_";

/// Escape a physical filename into the symbolic namespace.
///
/// `report.txt` becomes `report_dot_txt`. Names without dots pass through
/// unchanged.
pub fn escape(name: &str) -> String {
    name.replace('.', DOT_MARKER)
}

/// Decode a symbolic identifier back into a physical filename.
///
/// Inverse of [`escape`] for any name that did not already contain the
/// marker text.
pub fn unescape(name: &str) -> String {
    name.replace(DOT_MARKER, ".")
}

/// True when the identifier carries an escaped dot.
pub fn is_escaped(name: &str) -> bool {
    name.contains(DOT_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_escape_basic() {
        assert_eq!(escape("report.txt"), "report_dot_txt");
        assert_eq!(escape("archive.tar.gz"), "archive_dot_tar_dot_gz");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn test_unescape_basic() {
        assert_eq!(unescape("report_dot_txt"), "report.txt");
        assert_eq!(unescape("plain"), "plain");
    }

    #[test]
    fn test_is_escaped() {
        assert!(is_escaped("report_dot_txt"));
        assert!(!is_escaped("report"));
    }

    proptest! {
        #[test]
        fn test_escape_roundtrip(name in "[a-z0-9_]{0,12}(\\.[a-z0-9]{1,4}){0,3}") {
            // Bijection holds for any name not already carrying the marker.
            prop_assume!(!name.contains(DOT_MARKER));
            prop_assert_eq!(unescape(&escape(&name)), name);
        }

        #[test]
        fn test_escaped_names_have_no_dots(name in "\\PC{0,24}") {
            prop_assert!(!escape(&name).contains('.'));
        }
    }
}
