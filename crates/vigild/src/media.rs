//! Photo storage on the local filesystem.

use std::fs;
use std::path::{Path, PathBuf};

use vigil_core::{MediaStore, SinkError};

const IDENTITY_DIR: &str = "identities";
const ACCESS_DIR: &str = "access";

/// Stores photos as plain files under a root directory:
/// `identities/<identity_id>.<ext>` and `access/<digest>.<ext>`.
#[derive(Debug, Clone)]
pub struct DirMediaStore {
    root: PathBuf,
}

impl DirMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Delete the reference photo of `identity_id`. Returns whether one existed.
    pub fn remove_reference_photo(&self, identity_id: &str) -> Result<bool, SinkError> {
        let dir = self.root.join(IDENTITY_DIR);
        let stem = file_stem(identity_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        let mut removed = false;
        for entry in entries {
            let path = entry?.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(stem.as_str()) {
                fs::remove_file(&path)?;
                tracing::debug!(path = %path.display(), "reference photo removed");
                removed = true;
            }
        }
        Ok(removed)
    }

    fn write(&self, subdir: &str, name: &str, image: &[u8]) -> Result<String, SinkError> {
        let dir = self.root.join(subdir);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.{}", file_stem(name), extension(image)));
        fs::write(&path, image)?;
        Ok(path.to_string_lossy().into_owned())
    }
}

impl MediaStore for DirMediaStore {
    fn store_reference_photo(&self, identity_id: &str, image: &[u8]) -> Result<String, SinkError> {
        self.write(IDENTITY_DIR, identity_id, image)
    }

    fn store_access_image(&self, image_reference: &str, image: &[u8]) -> Result<String, SinkError> {
        let digest = image_reference
            .split_once(':')
            .map_or(image_reference, |(_, digest)| digest);
        self.write(ACCESS_DIR, digest, image)
    }
}

/// Keep names to a safe file-name alphabet.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn extension(image: &[u8]) -> &'static str {
    image::guess_format(image)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin")
}
