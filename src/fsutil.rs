//! Small filesystem helpers shared by the acquirer, pool and executor.

use std::io;
use std::path::Path;

use tracing::warn;

/// Recursively copies `src` into `dst`, creating directories as needed.
/// Existing files in `dst` are overwritten — this is what overlays a
/// scene's sources onto a sandbox that already holds the template.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Removes every top-level entry of `root` whose name is not in `keep`.
///
/// Cleanup must never mask the result of the build that triggered it, so
/// each removal failure is logged and swallowed.
pub fn scrub_dir(root: &Path, keep: &[&str]) {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cannot scan {} for cleanup: {e}", root.display());
            return;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        if keep.iter().any(|k| name == std::ffi::OsStr::new(k)) {
            continue;
        }
        remove_best_effort(&entry.path());
    }
}

/// Removes a file or directory tree, logging instead of failing.
pub fn remove_best_effort(path: &Path) {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    if let Err(e) = result {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("cannot remove {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_tree_nested() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("src/systems")).unwrap();
        std::fs::write(src.path().join("game.ts"), "// root").unwrap();
        std::fs::write(src.path().join("src/systems/spin.ts"), "// nested").unwrap();

        copy_tree(src.path(), dst.path()).unwrap();

        assert!(dst.path().join("game.ts").exists());
        assert_eq!(
            std::fs::read_to_string(dst.path().join("src/systems/spin.ts")).unwrap(),
            "// nested"
        );
    }

    #[test]
    fn test_copy_tree_overwrites() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("tsconfig.json"), "new").unwrap();
        std::fs::write(dst.path().join("tsconfig.json"), "old").unwrap();

        copy_tree(src.path(), dst.path()).unwrap();

        assert_eq!(
            std::fs::read_to_string(dst.path().join("tsconfig.json")).unwrap(),
            "new"
        );
    }

    #[test]
    fn test_scrub_dir_honors_keep_set() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::write(dir.path().join("game.js"), "artifact").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/@dcl")).unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/game.ts"), "source").unwrap();

        scrub_dir(dir.path(), &["package.json", "node_modules"]);

        assert!(dir.path().join("package.json").exists());
        assert!(dir.path().join("node_modules/@dcl").exists());
        assert!(!dir.path().join("game.js").exists());
        assert!(!dir.path().join("src").exists());
    }

    #[test]
    fn test_remove_best_effort_missing_path_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        remove_best_effort(&dir.path().join("never-existed"));
    }
}
