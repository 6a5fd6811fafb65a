use crate::error::Error;
use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};

/// Reference images on disk, laid out as `<root>/<identity>/<identity>.jpg`.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

/// Reject names that cannot safely name a folder.
pub fn validate_identity(name: &str) -> Result<&str, Error> {
    let trimmed = name.trim();
    let bad = trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::InvalidIdentity(name.to_string()));
    }
    Ok(trimmed)
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn identity_dir(&self, identity: &str) -> PathBuf {
        self.root.join(identity)
    }

    pub fn reference_path(&self, identity: &str) -> PathBuf {
        self.identity_dir(identity).join(format!("{}.jpg", identity))
    }

    pub fn ensure_identity_dir(&self, identity: &str) -> Result<PathBuf> {
        let dir = self.identity_dir(identity);
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(dir)
    }

    /// Write `frame` as the identity's only reference image, replacing any
    /// earlier one.
    pub fn save_reference(&self, identity: &str, frame: &RgbImage) -> Result<PathBuf> {
        self.ensure_identity_dir(identity)?;
        let path = self.reference_path(identity);
        frame
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    /// Every identity folder, sorted by name. A missing root is empty.
    pub fn identities(&self) -> Result<Vec<(String, PathBuf)>> {
        if !self.root.exists() {
            return Ok(vec![]);
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("listing {}", self.root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            out.push((name, entry.path()));
        }
        out.sort();
        Ok(out)
    }

    /// Image files in an identity folder, sorted by name.
    pub fn images(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if ImageFormat::from_path(&path).is_ok() {
                out.push(path);
            } else {
                log::debug!("skipping non-image {}", path.display());
            }
        }
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_names() {
        assert_eq!(validate_identity("  Alice ").ok(), Some("Alice"));
        assert_eq!(validate_identity("Mary Jane").ok(), Some("Mary Jane"));
        for bad in ["", "   ", ".", "..", "a/b", "a\\b"] {
            assert!(matches!(
                validate_identity(bad),
                Err(Error::InvalidIdentity(_))
            ));
        }
    }

    #[test]
    fn layout() {
        let store = ImageStore::new("student_images");
        assert_eq!(
            store.reference_path("Bob"),
            PathBuf::from("student_images/Bob/Bob.jpg")
        );
    }

    #[test]
    fn missing_root_lists_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ImageStore::new(dir.path().join("student_images"));
        assert!(store.identities()?.is_empty());
        Ok(())
    }

    #[test]
    fn listing_is_sorted_and_filtered() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ImageStore::new(dir.path());
        for name in ["Zed", "Amy"] {
            store.save_reference(name, &RgbImage::new(4, 4))?;
        }
        std::fs::write(dir.path().join("stray.txt"), "x")?;
        std::fs::write(store.identity_dir("Amy").join("notes.txt"), "x")?;

        let ids: Vec<String> = store.identities()?.into_iter().map(|(n, _)| n).collect();
        assert_eq!(ids, vec!["Amy", "Zed"]);
        let images = store.images(&store.identity_dir("Amy"))?;
        assert_eq!(images, vec![store.reference_path("Amy")]);
        Ok(())
    }
}
