//! Suffix-based protection of paths from eviction and expiration.

use std::path::Path;
use std::sync::Arc;

/// Immutable set of path suffixes.
///
/// Matching is an exact, case-sensitive suffix comparison on the raw path
/// bytes; there is no globbing. Cloning shares the underlying rules.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    suffixes: Arc<[String]>,
}

impl ExclusionRules {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut rules: Vec<String> = Vec::new();
        for suffix in suffixes {
            let suffix = suffix.into();
            if !suffix.is_empty() && !rules.contains(&suffix) {
                rules.push(suffix);
            }
        }
        Self {
            suffixes: rules.into(),
        }
    }

    /// True iff `path` ends with any configured suffix.
    pub fn is_excluded(&self, path: &Path) -> bool {
        is_excluded(path, &self.suffixes)
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }
}

/// True iff `path` ends with any string in `rules`.
pub fn is_excluded(path: &Path, rules: &[String]) -> bool {
    let bytes = path.as_os_str().as_encoded_bytes();
    rules
        .iter()
        .any(|suffix| bytes.ends_with(suffix.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_suffix_match() {
        let rules = ExclusionRules::new([".keep", "README.md"]);

        assert!(rules.is_excluded(Path::new("/data/run1/results.keep")));
        assert!(rules.is_excluded(Path::new("/data/README.md")));
        assert!(!rules.is_excluded(Path::new("/data/results.keeper")));
        assert!(!rules.is_excluded(Path::new("/data/capture.bin")));
    }

    #[test]
    fn test_match_is_raw_suffix_not_extension() {
        // "keep" also protects "safekeep" and "x.keep"; no path-component logic.
        let rules = ExclusionRules::new(["keep"]);
        assert!(rules.is_excluded(Path::new("/data/safekeep")));
        assert!(rules.is_excluded(Path::new("/data/x.keep")));
        assert!(!rules.is_excluded(Path::new("/data/keep/inner.bin")));
    }

    #[test]
    fn test_case_sensitive() {
        let rules = ExclusionRules::new([".KEEP"]);
        assert!(!rules.is_excluded(Path::new("/data/a.keep")));
        assert!(rules.is_excluded(Path::new("/data/a.KEEP")));
    }

    #[test]
    fn test_no_globbing() {
        let rules = ExclusionRules::new(["*.log"]);
        assert!(!rules.is_excluded(Path::new("/var/app.log")));
        assert!(rules.is_excluded(Path::new("/var/odd*.log")));
    }

    #[test]
    fn test_empty_rules_exclude_nothing() {
        let rules = ExclusionRules::default();
        assert!(rules.is_empty());
        assert!(!rules.is_excluded(Path::new("/data/anything")));
    }

    #[test]
    fn test_duplicates_and_empty_strings_dropped() {
        let rules = ExclusionRules::new([".keep", "", ".keep", ".lock"]);
        assert_eq!(rules.suffixes(), &[".keep".to_string(), ".lock".to_string()]);
    }

    #[test]
    fn test_free_function() {
        let rules = vec![".tmp".to_string()];
        assert!(is_excluded(&PathBuf::from("a/b.tmp"), &rules));
        assert!(!is_excluded(&PathBuf::from("a/b.tmpx"), &rules));
    }

    #[test]
    fn test_shared_across_threads() {
        let rules = ExclusionRules::new([".keep"]);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let rules = rules.clone();
                std::thread::spawn(move || {
                    rules.is_excluded(Path::new(&format!("/data/{i}.keep")))
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
