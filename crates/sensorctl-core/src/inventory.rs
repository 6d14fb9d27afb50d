//! Local inventory file
//!
//! A newline-delimited list of sensor names this operator owns. Names are
//! appended when a sensor is created and removed when it is deleted or the
//! control plane reports it gone.

use std::path::{Path, PathBuf};

use crate::error::InventoryError;
use crate::types::numeric_suffix;

/// Handle to the newline-delimited sensors file
#[derive(Debug, Clone)]
pub struct InventoryFile {
    path: PathBuf,
}

impl InventoryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all sensor names. A missing file is an empty inventory.
    pub async fn read(&self) -> Result<Vec<String>, InventoryError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(InventoryError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Read all names ordered oldest first by their numeric suffix
    pub async fn read_sorted(&self) -> Result<Vec<String>, InventoryError> {
        let mut names = self.read().await?;
        names.sort_by_key(|name| numeric_suffix(name));
        Ok(names)
    }

    /// Append a name unless it is already present
    pub async fn add(&self, name: &str) -> Result<(), InventoryError> {
        let mut names = self.read().await?;
        if names.iter().any(|n| n == name) {
            return Ok(());
        }
        names.push(name.to_string());
        self.write_all(&names).await
    }

    /// Remove a name. Returns whether it was present.
    pub async fn remove(&self, name: &str) -> Result<bool, InventoryError> {
        let names = self.read().await?;
        let before = names.len();
        let kept: Vec<String> = names.into_iter().filter(|n| n != name).collect();
        if kept.len() == before {
            return Ok(false);
        }
        self.write_all(&kept).await?;
        tracing::debug!("Removed {} from inventory {:?}", name, self.path);
        Ok(true)
    }

    async fn write_all(&self, names: &[String]) -> Result<(), InventoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| InventoryError::Write {
                        path: self.path.clone(),
                        source,
                    })?;
            }
        }

        let mut content = names.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|source| InventoryError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let inventory = InventoryFile::new(dir.path().join(".sensors"));
        assert!(inventory.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let inventory = InventoryFile::new(dir.path().join(".sensors"));

        inventory.add("ec2-sensor-2").await.unwrap();
        inventory.add("ec2-sensor-1").await.unwrap();
        inventory.add("ec2-sensor-2").await.unwrap();

        assert_eq!(
            inventory.read().await.unwrap(),
            vec!["ec2-sensor-2".to_string(), "ec2-sensor-1".to_string()]
        );
        assert_eq!(
            inventory.read_sorted().await.unwrap(),
            vec!["ec2-sensor-1".to_string(), "ec2-sensor-2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".sensors");
        tokio::fs::write(&path, "a-1\n\n  b-2  \nc-3\n").await.unwrap();
        let inventory = InventoryFile::new(&path);

        assert!(inventory.remove("b-2").await.unwrap());
        assert!(!inventory.remove("missing").await.unwrap());
        assert_eq!(
            inventory.read().await.unwrap(),
            vec!["a-1".to_string(), "c-3".to_string()]
        );
    }
}
