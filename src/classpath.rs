use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

pub const ARCHIVE_SUFFIX: &str = ".jar";

/// Platform separator between classpath entries
pub const PATH_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

/// Ordered dependency archives. On duplicate class names the first entry wins,
/// so the order of enumeration is preserved as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classpath {
    entries: Vec<PathBuf>,
}

impl Classpath {
    pub fn new(entries: Vec<PathBuf>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classpath string with `dir` searched before every archive
    pub fn with_leading(&self, dir: &Path) -> String {
        let mut joined = dir.display().to_string();
        if !self.is_empty() {
            joined.push(PATH_SEPARATOR);
            joined.push_str(&self.to_string());
        }
        joined
    }
}

impl fmt::Display for Classpath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, "{PATH_SEPARATOR}")?;
            }
            write!(f, "{}", entry.display())?;
        }
        Ok(())
    }
}

/// Lists every `*.jar` file in `deps_dir` in filesystem order, as absolute paths.
/// A missing or unreadable directory yields an empty classpath.
pub fn enumerate_archives(deps_dir: &Path) -> Classpath {
    let entries = match std::fs::read_dir(deps_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("No dependency archives in {}: {e}", deps_dir.display());
            return Classpath::default();
        }
    };

    let archives = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(ARCHIVE_SUFFIX))
        })
        .map(|path| std::path::absolute(&path).unwrap_or(path))
        .collect();

    Classpath::new(archives)
}

/// Process-wide classpath, resolved on first use and shared by all requests
pub struct ClasspathCache {
    deps_dir: PathBuf,
    fetch_command: Vec<String>,
    cached: RwLock<Option<Arc<Classpath>>>,
    /// Serializes bootstrap so concurrent misses trigger a single fetch
    bootstrap_gate: Mutex<()>,
}

impl ClasspathCache {
    pub fn new(deps_dir: impl Into<PathBuf>, fetch_command: Vec<String>) -> Self {
        Self {
            deps_dir: deps_dir.into(),
            fetch_command,
            cached: RwLock::new(None),
            bootstrap_gate: Mutex::new(()),
        }
    }

    pub fn deps_dir(&self) -> &Path {
        &self.deps_dir
    }

    /// Returns the cached classpath, fetching dependencies first if the directory is absent
    pub async fn resolve(&self) -> Arc<Classpath> {
        if let Some(classpath) = self.cached() {
            return classpath;
        }

        let _gate = self.bootstrap_gate.lock().await;
        if let Some(classpath) = self.cached() {
            return classpath;
        }

        if !self.deps_dir.exists() {
            self.fetch_dependencies().await;
        }

        let classpath = Arc::new(enumerate_archives(&self.deps_dir));
        if self.deps_dir.exists() {
            log::info!(
                "Resolved classpath with {} archive(s) from {}",
                classpath.entries().len(),
                self.deps_dir.display()
            );
            *self.cached.write() = Some(Arc::clone(&classpath));
        } else {
            // not cached: the next request retries the fetch
            log::warn!(
                "Dependency directory {} still missing after fetch",
                self.deps_dir.display()
            );
        }
        classpath
    }

    fn cached(&self) -> Option<Arc<Classpath>> {
        self.cached.read().clone()
    }

    /// Drops the cached classpath; the next `resolve` re-enumerates the directory
    pub fn invalidate(&self) {
        if self.cached.write().take().is_some() {
            log::info!("Classpath cache invalidated");
        }
    }

    async fn fetch_dependencies(&self) {
        let Some((program, args)) = self.fetch_command.split_first() else {
            log::debug!("No dependency fetch command configured");
            return;
        };

        log::info!("Fetching dependencies with `{}`", self.fetch_command.join(" "));
        match tokio::process::Command::new(program).args(args).status().await {
            Ok(status) if status.success() => log::info!("Dependency fetch finished"),
            Ok(status) => log::warn!("Dependency fetch exited with {status}"),
            Err(e) => log::error!("Failed to launch dependency fetch `{program}`: {e}"),
        }
    }
}
