use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use chrono::Local;
use uuid::Uuid;

use crate::analyzer::{UnitIdentity, is_identifier};
use crate::config::WorkspaceMode;

/// Conventional source-tree prefix for packaged sources
pub const SOURCE_TREE_PREFIX: &str = "src/main/java";
pub const SOURCE_EXTENSION: &str = "java";

/// Materializes submitted sources on disk
#[derive(Debug, Clone)]
pub struct WorkspaceBuilder {
    build_root: PathBuf,
    mode: WorkspaceMode,
    keep: bool,
}

impl WorkspaceBuilder {
    pub fn new(build_root: impl AsRef<Path>, mode: WorkspaceMode, keep: bool) -> Result<Self> {
        let build_root = std::path::absolute(build_root.as_ref()).with_context(|| {
            format!("invalid build root {}", build_root.as_ref().display())
        })?;
        Ok(Self {
            build_root,
            mode,
            keep,
        })
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    /// Creates the workspace for one request and writes the source file into it
    pub async fn materialize(&self, identity: &UnitIdentity, code: &str) -> Result<Workspace> {
        let (root, ephemeral) = match self.mode {
            WorkspaceMode::Shared => (self.build_root.clone(), false),
            WorkspaceMode::PerRequest => (self.build_root.join(request_dir_name()), !self.keep),
        };
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create workspace {}", root.display()))?;

        // constructed early so a failed write still cleans up
        let mut workspace = Workspace {
            source_file: PathBuf::new(),
            root,
            ephemeral,
        };
        let source_dir = prepare_source_dir(&workspace.root, identity).await?;
        workspace.source_file = write_source_file(&source_dir, identity, code).await?;

        log::debug!("Wrote {}", workspace.source_file.display());
        Ok(workspace)
    }
}

/// On-disk tree holding one source file and its compiled output
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    source_file: PathBuf,
    /// Removed on drop
    ephemeral: bool,
}

impl Workspace {
    /// Build root of this request: compiler output directory and head of the runtime classpath
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    /// Removes an ephemeral workspace without blocking the runtime.
    /// Dropping without calling this still cleans up, synchronously.
    pub async fn cleanup(mut self) {
        if !self.ephemeral {
            return;
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.root).await {
            log::warn!("Failed to clean up workspace {}: {e}", self.root.display());
        }
        self.ephemeral = false;
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.ephemeral {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            log::warn!("Failed to clean up workspace {}: {e}", self.root.display());
        }
    }
}

/// Directory that receives the source file of `identity` under `root`.
///
/// Every package segment and the type name must be identifiers, so the
/// result always stays inside `root`.
pub fn source_dir(root: &Path, identity: &UnitIdentity) -> Result<PathBuf> {
    if !is_identifier(&identity.type_name) {
        bail!("invalid type name `{}`", identity.type_name);
    }
    if identity.package_name.is_empty() {
        return Ok(root.to_path_buf());
    }
    if let Some(segment) = identity
        .package_name
        .split('.')
        .find(|segment| !is_identifier(segment))
    {
        bail!(
            "invalid package name `{}`: `{segment}` is not an identifier",
            identity.package_name
        );
    }

    let dir = root.join(SOURCE_TREE_PREFIX).join(identity.package_path());
    ensure!(
        dir.starts_with(root),
        "package directory {} is outside the workspace",
        dir.display()
    );
    Ok(dir)
}

/// Creates the source directory and any missing ancestors; existing ones are reused
pub async fn prepare_source_dir(root: &Path, identity: &UnitIdentity) -> Result<PathBuf> {
    let dir = source_dir(root, identity)?;
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("failed to create source directory {}", dir.display()))?;
    Ok(dir)
}

/// Writes `<type>.java`, replacing any previous content
pub async fn write_source_file(
    dir: &Path,
    identity: &UnitIdentity,
    code: &str,
) -> Result<PathBuf> {
    let path = dir.join(format!("{}.{SOURCE_EXTENSION}", identity.type_name));
    tokio::fs::write(&path, code)
        .await
        .with_context(|| format!("failed to write source file {}", path.display()))?;
    Ok(path)
}

fn request_dir_name() -> String {
    format!(
        "{}-{}",
        Local::now().format("%y%m%d-%H-%M-%S"),
        Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_source_dir_layout() {
        let root = Path::new("/build");
        assert_eq!(
            source_dir(root, &UnitIdentity::new("", "Main")).unwrap(),
            PathBuf::from("/build")
        );
        assert_eq!(
            source_dir(root, &UnitIdentity::new("com.acme.tools", "Main")).unwrap(),
            PathBuf::from("/build/src/main/java/com/acme/tools")
        );
    }

    #[test]
    fn test_source_dir_rejects_path_like_packages() {
        let root = Path::new("/build");
        for package in ["x./tmp/evil", "a..b", "..", "a.b/../../c", "com.acme.", "com. acme"] {
            let err = source_dir(root, &UnitIdentity::new(package, "Main")).unwrap_err();
            assert!(
                err.to_string().starts_with("invalid package name"),
                "{package}: {err}"
            );
        }
        assert!(source_dir(root, &UnitIdentity::new("", "../Main")).is_err());
    }

    #[tokio::test]
    async fn test_absolute_package_segment_stays_inside_build_root() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let builder =
            WorkspaceBuilder::new(dir.path(), WorkspaceMode::PerRequest, false).unwrap();
        let package = format!("x.{}", outside.path().display());
        let identity = UnitIdentity::new(package, "Evil");

        let err = builder.materialize(&identity, "public class Evil {}").await.unwrap_err();
        assert!(format!("{err:#}").contains("invalid package name"));
        assert_eq!(std::fs::read_dir(outside.path()).unwrap().count(), 0);
        // the rejected request left no workspace behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_per_request_workspace() {
        let dir = tempdir().unwrap();
        let builder =
            WorkspaceBuilder::new(dir.path(), WorkspaceMode::PerRequest, false).unwrap();
        let workspace = builder
            .materialize(&UnitIdentity::new("a.b", "C"), "x")
            .await
            .unwrap();
        let root = workspace.root().to_path_buf();
        assert!(root.exists());

        workspace.cleanup().await;
        assert!(!root.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_shared_workspace() {
        let dir = tempdir().unwrap();
        let builder = WorkspaceBuilder::new(dir.path(), WorkspaceMode::Shared, false).unwrap();
        let workspace = builder
            .materialize(&UnitIdentity::new("", "Main"), "x")
            .await
            .unwrap();
        workspace.cleanup().await;
        assert!(dir.path().join("Main.java").exists());
    }

    #[tokio::test]
    async fn test_shared_workspace_is_idempotent() {
        let dir = tempdir().unwrap();
        let builder = WorkspaceBuilder::new(dir.path(), WorkspaceMode::Shared, false).unwrap();
        let identity = UnitIdentity::new("com.acme", "App");

        let first = builder.materialize(&identity, "first").await.unwrap();
        let first_path = first.source_file().to_path_buf();
        drop(first);
        let second = builder.materialize(&identity, "second").await.unwrap();

        assert_eq!(first_path, second.source_file());
        assert_eq!(second.root(), dir.path());
        assert_eq!(
            second.source_file(),
            dir.path().join("src/main/java/com/acme/App.java")
        );
        assert_eq!(std::fs::read_to_string(second.source_file()).unwrap(), "second");
        drop(second);
        // shared workspaces are never cleaned up
        assert!(dir.path().join("src/main/java/com/acme/App.java").exists());
    }

    #[tokio::test]
    async fn test_root_package_writes_into_root() {
        let dir = tempdir().unwrap();
        let builder = WorkspaceBuilder::new(dir.path(), WorkspaceMode::Shared, false).unwrap();
        let workspace = builder
            .materialize(&UnitIdentity::new("", "Main"), "class Main {}")
            .await
            .unwrap();
        assert_eq!(workspace.source_file(), dir.path().join("Main.java"));
    }

    #[tokio::test]
    async fn test_per_request_workspaces_do_not_collide() {
        let dir = tempdir().unwrap();
        let builder =
            WorkspaceBuilder::new(dir.path(), WorkspaceMode::PerRequest, false).unwrap();
        let identity = UnitIdentity::new("", "Main");

        let a = builder.materialize(&identity, "a").await.unwrap();
        let b = builder.materialize(&identity, "b").await.unwrap();
        assert_ne!(a.root(), b.root());
        assert!(a.root().starts_with(dir.path()));
        assert_eq!(std::fs::read_to_string(a.source_file()).unwrap(), "a");
        assert_eq!(std::fs::read_to_string(b.source_file()).unwrap(), "b");

        let a_root = a.root().to_path_buf();
        drop(a);
        assert!(!a_root.exists());
        assert!(b.root().exists());
    }

    #[tokio::test]
    async fn test_kept_per_request_workspace_survives() {
        let dir = tempdir().unwrap();
        let builder = WorkspaceBuilder::new(dir.path(), WorkspaceMode::PerRequest, true).unwrap();
        let workspace = builder
            .materialize(&UnitIdentity::new("", "Main"), "x")
            .await
            .unwrap();
        let root = workspace.root().to_path_buf();
        drop(workspace);
        assert!(root.join("Main.java").exists());
    }

    #[tokio::test]
    async fn test_unwritable_root_reports_path() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();
        let builder = WorkspaceBuilder::new(&blocker, WorkspaceMode::Shared, false).unwrap();

        let err = builder
            .materialize(&UnitIdentity::new("a.b", "C"), "x")
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("file"));
    }
}
