//! Working directory and diagnostic log layout for a conversion run.

use std::path::{Path, PathBuf};

use convforge_common::Result;
use tempfile::TempDir;

/// Directory every process of a run is started in.
///
/// Relative output paths resolve against the working directory, and each
/// started process gets its own diagnostic log under the log directory.
///
/// # Example
///
/// ```no_run
/// use convforge_engine::Workspace;
///
/// let workspace = Workspace::new("/srv/convert/job-42", None)?;
/// assert_eq!(
///     workspace.resolve("video.mov"),
///     std::path::Path::new("/srv/convert/job-42/video.mov")
/// );
/// # Ok::<(), convforge_common::Error>(())
/// ```
#[derive(Debug)]
pub struct Workspace {
    working_dir: PathBuf,
    log_dir: PathBuf,
    // Held so the directory lives as long as the workspace.
    temp_dir: Option<TempDir>,
}

impl Workspace {
    /// Use an existing (or to-be-created) working directory.
    ///
    /// `log_dir` defaults to `<working_dir>/logs`; a relative `log_dir` is
    /// taken relative to the working directory. Both are created.
    pub fn new<P: AsRef<Path>>(working_dir: P, log_dir: Option<&Path>) -> Result<Self> {
        Self::build(working_dir.as_ref().to_path_buf(), log_dir, None)
    }

    /// Create a fresh temporary working directory, removed on drop.
    pub fn temporary(log_dir: Option<&Path>) -> Result<Self> {
        let temp_dir = tempfile::Builder::new().prefix("convforge-").tempdir()?;
        Self::build(temp_dir.path().to_path_buf(), log_dir, Some(temp_dir))
    }

    fn build(
        working_dir: PathBuf,
        log_dir: Option<&Path>,
        temp_dir: Option<TempDir>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&working_dir)?;
        let log_dir = match log_dir {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => working_dir.join(dir),
            None => working_dir.join("logs"),
        };
        std::fs::create_dir_all(&log_dir)?;

        Ok(Self {
            working_dir,
            log_dir,
            temp_dir,
        })
    }

    /// The working directory.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// The diagnostic log directory.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Whether the working directory is removed when the workspace drops.
    pub fn is_temporary(&self) -> bool {
        self.temp_dir.is_some()
    }

    /// Resolve a path against the working directory.
    pub fn resolve<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    /// Log file for the process with sequence number `seq`.
    pub fn diagnostic_log(&self, seq: u64, program: &str) -> PathBuf {
        let program: String = program
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.log_dir.join(format!("{seq:04}-{program}.log"))
    }
}
