//! Test-name allowlists discovered from Python test sources.

use std::collections::BTreeSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static TEST_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:async\s+)?def\s+(test_[A-Za-z0-9_]+)\s*\(").expect("valid regex")
});

/// Names of every `def test_*` function in `source`.
pub fn scan_source(source: &str) -> impl Iterator<Item = &str> {
    TEST_DEF
        .captures_iter(source)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
}

/// Union of test functions across `files`; unreadable files contribute nothing.
pub fn discover<P: AsRef<Path>>(files: &[P]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for file in files {
        let path = file.as_ref();
        match std::fs::read_to_string(path) {
            Ok(source) => {
                let before = names.len();
                names.extend(scan_source(&source).map(str::to_string));
                debug!(path = %path.display(), found = names.len() - before, "scanned test source");
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "test source not readable");
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
import pytest

@pytest.mark.t1
def test_t1_01_admin_login(driver):
    pass

    def test_nested_helper_is_still_listed():
        pass

def helper_test_not_listed():
    pass

async def test_async_case():
    pass

# def test_commented_out(): is not at line start after whitespace
"#;

    #[test]
    fn test_scan_finds_only_test_functions() {
        let found: Vec<&str> = scan_source(SOURCE).collect();
        assert_eq!(
            found,
            vec![
                "test_t1_01_admin_login",
                "test_nested_helper_is_still_listed",
                "test_async_case"
            ]
        );
    }

    #[test]
    fn test_discover_merges_files_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.py");
        let b = dir.path().join("b.py");
        std::fs::write(&a, "def test_one():\n    pass\n").unwrap();
        std::fs::write(&b, "def test_two():\n    pass\ndef test_one():\n    pass\n").unwrap();
        let missing = dir.path().join("missing.py");

        let names = discover(&[a, b, missing]);
        assert_eq!(names.len(), 2);
        assert!(names.contains("test_one"));
        assert!(names.contains("test_two"));
    }
}
