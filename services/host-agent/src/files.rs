//! Writing plan-delivered files onto the host filesystem.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::debug;

use helmsman_plan::DeliveredFile;

/// Write every delivered file under `root`, creating parent directories
/// as needed. File names are absolute paths rooted at `root`.
pub async fn deliver_files(root: &Path, files: &[DeliveredFile]) -> Result<()> {
    for file in files {
        let path = rooted(root, &file.name);
        let contents = BASE64
            .decode(&file.contents)
            .with_context(|| format!("invalid contents for {}", file.name))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(&path, &contents)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        debug!(path = %path.display(), bytes = contents.len(), "Delivered file");
    }
    Ok(())
}

fn rooted(root: &Path, name: &str) -> PathBuf {
    root.join(name.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_files_land_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![DeliveredFile {
            name: "/etc/kubernetes/cloud-config.json".to_string(),
            contents: BASE64.encode(b"[Global]"),
        }];

        deliver_files(dir.path(), &files).await.unwrap();

        let written = dir.path().join("etc/kubernetes/cloud-config.json");
        assert_eq!(std::fs::read(written).unwrap(), b"[Global]");
    }

    #[tokio::test]
    async fn test_invalid_base64_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![DeliveredFile {
            name: "/etc/x".to_string(),
            contents: "not base64!!!".to_string(),
        }];

        assert!(deliver_files(dir.path(), &files).await.is_err());
    }
}
