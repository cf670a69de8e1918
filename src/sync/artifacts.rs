//! Per-run diagnostic output.

use std::path::Path;

/// Empty `dir` and create it again. Failures are logged and otherwise
/// ignored; screenshots are a debugging aid, not part of the run.
pub fn reset_dir(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to clear artifact directory");
        }
    }
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "Failed to create artifact directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reset_dir_removes_previous_run() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let dir = tmp.path().join("screenshots");
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("dashboard.png"), b"old")?;

        reset_dir(&dir);

        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_reset_dir_creates_missing() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let dir = tmp.path().join("a").join("b");

        reset_dir(&dir);

        assert!(dir.is_dir());
        Ok(())
    }

    #[test]
    fn test_reset_dir_swallows_errors() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"not a dir")?;

        // A path under a regular file can be neither removed nor created.
        reset_dir(&blocker.join("screenshots"));
        Ok(())
    }
}
