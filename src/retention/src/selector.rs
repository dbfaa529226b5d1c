//! Oldest-eligible-file selection.

use std::path::Path;

use crate::error::Result;
use crate::exclusion::ExclusionRules;
use crate::scan::{TrackedFile, TreeScan, scan_tree};

/// The eligible file with the oldest modification time, if any.
///
/// Ties go to the first file in walk order. `None` is a valid outcome: the
/// tree holds nothing but excluded files (or nothing at all).
pub fn select_victim(root: &Path, rules: &ExclusionRules) -> Result<Option<TrackedFile>> {
    let scan = scan_tree(root)?;
    Ok(oldest_eligible(&scan, rules).cloned())
}

/// [`select_victim`] over an existing scan.
pub fn oldest_eligible<'a>(scan: &'a TreeScan, rules: &ExclusionRules) -> Option<&'a TrackedFile> {
    let mut oldest: Option<&TrackedFile> = None;
    for file in scan.files.iter().filter(|f| !rules.is_excluded(&f.path)) {
        match oldest {
            Some(current) if file.modified >= current.modified => {}
            _ => oldest = Some(file),
        }
    }
    oldest
}

/// Every eligible file, oldest first, ties in walk order.
///
/// Lets a size check evict several files from one walk. The first element is
/// always what [`oldest_eligible`] returns for the same scan.
pub fn eviction_order(scan: &TreeScan, rules: &ExclusionRules) -> Vec<TrackedFile> {
    let mut eligible: Vec<TrackedFile> = scan
        .files
        .iter()
        .filter(|f| !rules.is_excluded(&f.path))
        .cloned()
        .collect();
    // stable sort keeps walk order among equal mtimes
    eligible.sort_by_key(|f| f.modified);
    eligible
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn write_with_mtime(path: &Path, len: usize, secs: u64) {
        fs::write(path, vec![0u8; len]).unwrap();
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(at(secs))
            .unwrap();
    }

    fn tracked(path: &str, secs: u64) -> TrackedFile {
        TrackedFile {
            path: PathBuf::from(path),
            size_bytes: 1,
            modified: at(secs),
        }
    }

    #[test]
    fn test_selects_oldest() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(&dir.path().join("new.bin"), 10, 2_000);
        write_with_mtime(&dir.path().join("old.bin"), 10, 1_000);
        fs::create_dir(dir.path().join("sub")).unwrap();
        write_with_mtime(&dir.path().join("sub/mid.bin"), 10, 1_500);

        let victim = select_victim(dir.path(), &ExclusionRules::default())
            .unwrap()
            .unwrap();
        assert_eq!(victim.path, dir.path().join("old.bin"));
    }

    #[test]
    fn test_skips_excluded() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(&dir.path().join("ancient.keep"), 10, 1);
        write_with_mtime(&dir.path().join("recent.bin"), 10, 5_000);

        let rules = ExclusionRules::new([".keep"]);
        let victim = select_victim(dir.path(), &rules).unwrap().unwrap();
        assert_eq!(victim.path, dir.path().join("recent.bin"));
    }

    #[test]
    fn test_none_when_only_excluded() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(&dir.path().join("c.keep"), 1000, 1);

        let rules = ExclusionRules::new([".keep"]);
        assert!(select_victim(dir.path(), &rules).unwrap().is_none());
        assert!(select_victim(dir.path(), &ExclusionRules::default()).unwrap().is_some());
    }

    #[test]
    fn test_tie_break_is_first_in_walk_order() {
        let scan = TreeScan {
            files: vec![tracked("/r/a", 5), tracked("/r/b", 5), tracked("/r/c", 9)],
            total_bytes: 3,
            skipped: 0,
        };
        let rules = ExclusionRules::default();

        assert_eq!(oldest_eligible(&scan, &rules).unwrap().path, PathBuf::from("/r/a"));

        let order: Vec<_> = eviction_order(&scan, &rules)
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(
            order,
            vec![PathBuf::from("/r/a"), PathBuf::from("/r/b"), PathBuf::from("/r/c")]
        );
    }

    #[test]
    fn test_tie_break_on_disk_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.bin", "a.bin", "c.bin"] {
            write_with_mtime(&dir.path().join(name), 1, 100);
        }
        let rules = ExclusionRules::default();
        for _ in 0..3 {
            let victim = select_victim(dir.path(), &rules).unwrap().unwrap();
            assert_eq!(victim.path, dir.path().join("a.bin"));
        }
    }

    #[test]
    fn test_eviction_order_filters_and_sorts() {
        let scan = TreeScan {
            files: vec![
                tracked("/r/z.bin", 3),
                tracked("/r/x.keep", 1),
                tracked("/r/y.bin", 2),
            ],
            total_bytes: 3,
            skipped: 0,
        };
        let rules = ExclusionRules::new([".keep"]);

        let order: Vec<_> = eviction_order(&scan, &rules)
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(order, vec![PathBuf::from("/r/y.bin"), PathBuf::from("/r/z.bin")]);
    }
}
