use crate::error::{DeferError, Result};
use crate::mount::split_path;
use std::path::Path;

pub fn validate_root(root: &Path) -> Result<()> {
    if !root.exists() {
        return Err(DeferError::Config(format!(
            "Root directory {} does not exist",
            root.display()
        )));
    }
    if !root.is_dir() {
        return Err(DeferError::Config(format!(
            "Root {} is not a directory",
            root.display()
        )));
    }
    Ok(())
}

pub fn validate_mount_path(path: &str) -> Result<()> {
    for byte in path.bytes() {
        if byte < 32 || byte == 127 {
            return Err(DeferError::InvalidArgument(
                "Path contains control characters".to_string(),
            ));
        }
    }
    split_path(path).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_paths() {
        assert!(validate_mount_path("/a/b").is_ok());
        assert!(validate_mount_path("a/b").is_err());
        assert!(validate_mount_path("/a\tb").is_err());
        assert!(validate_mount_path("/a/../b").is_err());
    }

    #[test]
    fn test_root_must_be_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_root(dir.path()).is_ok());
        let file = dir.path().join("f");
        std::fs::write(&file, b"").unwrap();
        assert!(validate_root(&file).is_err());
        assert!(validate_root(&dir.path().join("missing")).is_err());
    }
}
