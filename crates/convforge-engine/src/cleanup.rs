//! End-of-run removal of files named by cleanup-flagged parameters.

use std::io::ErrorKind;
use std::path::Path;

use convforge_common::ContextKind;
use tracing::{debug, warn};

use crate::context::ContextStore;
use crate::workspace::Workspace;

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Paths removed in this pass.
    pub removed: usize,
    /// Paths that were already gone.
    pub missing: usize,
    /// Paths that could not be removed.
    pub failed: usize,
}

/// Remove every file or directory named by a dynamic or tmp parameter whose
/// policy applies to the run outcome.
///
/// Relative values resolve against the working directory. Paths that no
/// longer exist are skipped, so running twice is harmless. Removal errors
/// are logged, never returned.
pub fn cleanup(store: &ContextStore, workspace: &Workspace, run_failed: bool) -> CleanupReport {
    let mut report = CleanupReport::default();

    for kind in [ContextKind::Dynamic, ContextKind::Tmp] {
        for (name, param) in store.all_parameters(kind) {
            if !param.cleanup.applies(run_failed) || param.value.trim().is_empty() {
                continue;
            }
            let path = workspace.resolve(param.value.trim());
            match remove_path(&path) {
                Ok(()) => {
                    debug!(parameter = %format!("{kind}.{name}"), path = %path.display(), "removed");
                    report.removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => report.missing += 1,
                Err(e) => {
                    warn!(
                        parameter = %format!("{kind}.{name}"),
                        path = %path.display(),
                        error = %e,
                        "cleanup failed"
                    );
                    report.failed += 1;
                }
            }
        }
    }

    report
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convforge_common::{CleanupPolicy, Scope};

    fn setup() -> (tempfile::TempDir, Workspace, ContextStore) {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path(), None).unwrap();
        let mut store = ContextStore::new();

        std::fs::write(dir.path().join("always.tmp"), "x").unwrap();
        std::fs::write(dir.path().join("on-fail.tmp"), "x").unwrap();
        std::fs::write(dir.path().join("keep.mov"), "x").unwrap();
        std::fs::create_dir(dir.path().join("frames")).unwrap();
        std::fs::write(dir.path().join("frames").join("f1.png"), "x").unwrap();

        store.set_tmp("always", "always.tmp", CleanupPolicy::DeleteOnExit);
        store.set_tmp("frames", "frames", CleanupPolicy::DeleteOnExit);
        store
            .add_parameter(
                ContextKind::Dynamic,
                &Scope::global(),
                "partial",
                "on-fail.tmp",
                CleanupPolicy::DeleteOnFail,
            )
            .unwrap();
        store.set_dynamic("output", "keep.mov");

        (dir, workspace, store)
    }

    #[test]
    fn test_success_keeps_delete_on_fail() {
        let (dir, workspace, store) = setup();

        let report = cleanup(&store, &workspace, false);
        assert_eq!(report.removed, 2);
        assert!(!dir.path().join("always.tmp").exists());
        assert!(!dir.path().join("frames").exists());
        assert!(dir.path().join("on-fail.tmp").exists());
        assert!(dir.path().join("keep.mov").exists());
    }

    #[test]
    fn test_failure_removes_both() {
        let (dir, workspace, store) = setup();

        let report = cleanup(&store, &workspace, true);
        assert_eq!(report.removed, 3);
        assert!(!dir.path().join("on-fail.tmp").exists());
        assert!(dir.path().join("keep.mov").exists());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let (_dir, workspace, store) = setup();

        let first = cleanup(&store, &workspace, true);
        let second = cleanup(&store, &workspace, true);

        assert_eq!(first.removed, 3);
        assert_eq!(second.removed, 0);
        assert_eq!(second.missing, 3);
        assert_eq!(second.failed, 0);
    }
}
