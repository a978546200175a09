//! Shared path validation used by the CLI argument builder and the
//! option reconciler.

use std::path::Path;

use crate::error::PathError;

/// Image files recognized inside dataset subset folders. Matched
/// case-sensitively, without the leading dot.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "bmp", "gif", "jpeg", "jpg", "webp"];

/// Accepted base model checkpoint formats.
pub const MODEL_EXTENSIONS: &[&str] = &["ckpt", "safetensors"];

/// Accepted formats for network weights to resume training from.
pub const RESUME_EXTENSIONS: &[&str] = &["pt", "ckpt", "safetensors"];

/// Accepted config document format for the CLI path.
pub const JSON_EXTENSIONS: &[&str] = &["json"];

/// What a path-valued option must point at. An empty extension set means
/// a directory is required.
#[derive(Debug, Clone, Copy)]
pub enum PathKind {
    Directory,
    File(&'static [&'static str]),
}

/// Check that `path` exists and is of the requested kind. Extension
/// matching is case-sensitive.
pub fn ensure_path(path: &Path, name: &str, kind: PathKind) -> Result<(), PathError> {
    if !path.exists() {
        return Err(PathError::Missing {
            name: name.to_string(),
            path: path.to_path_buf(),
        });
    }
    match kind {
        PathKind::Directory => {
            if path.is_file() {
                return Err(PathError::ExpectedDirectory {
                    name: name.to_string(),
                    path: path.to_path_buf(),
                });
            }
        }
        PathKind::File(accepted) => {
            if path.is_dir() {
                return Err(PathError::ExpectedFile {
                    name: name.to_string(),
                    path: path.to_path_buf(),
                });
            }
            if !has_extension(path, accepted) {
                return Err(PathError::UnacceptedExtension {
                    name: name.to_string(),
                    path: path.to_path_buf(),
                    accepted,
                });
            }
        }
    }
    Ok(())
}

/// Case-sensitive extension check against one of the accepted sets.
pub fn has_extension(path: &Path, accepted: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| accepted.contains(&ext))
}
