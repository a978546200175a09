//! Dataset folder inspection and step derivation.
//!
//! A dataset root holds one subfolder per image class, named
//! `<repeats>_<label>`. The repeat prefix weights that class's
//! contribution to the trainable step count.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::PathError;
use crate::paths::{ensure_path, has_extension, PathKind, IMAGE_EXTENSIONS};

/// One image-class folder, immutable once computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSubset {
    pub repeats: u32,
    pub image_count: usize,
    pub path: PathBuf,
}

/// Scan the immediate children of `root` for `<repeats>_<label>`
/// folders. Folders that don't match the pattern are skipped with a
/// warning; a missing or non-directory root is fatal.
pub fn inspect_dataset(root: &Path) -> Result<Vec<DatasetSubset>, PathError> {
    ensure_path(root, "dataset folder", PathKind::Directory)?;
    let entries = fs::read_dir(root).map_err(|source| PathError::Unreadable {
        name: "dataset folder".to_string(),
        path: root.to_path_buf(),
        source,
    })?;

    let mut subsets = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| PathError::Unreadable {
            name: "dataset folder".to_string(),
            path: root.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match parse_repeats(&name) {
            Some(repeats) => {
                let image_count = count_images(&path)?;
                subsets.push(DatasetSubset {
                    repeats,
                    image_count,
                    path,
                });
            }
            None => {
                warn!("folder {name} is not in the x_name format, skipping");
            }
        }
    }
    subsets.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(subsets)
}

/// Repeat prefix of a `<repeats>_<label>` folder name. Must be a
/// positive integer.
fn parse_repeats(name: &str) -> Option<u32> {
    let (prefix, _label) = name.split_once('_')?;
    match prefix.parse::<u32>() {
        Ok(repeats) if repeats > 0 => Some(repeats),
        _ => None,
    }
}

/// Direct child files with a recognized image extension. Nested folders
/// are not recursed into.
fn count_images(dir: &Path) -> Result<usize, PathError> {
    let entries = fs::read_dir(dir).map_err(|source| PathError::Unreadable {
        name: "subset folder".to_string(),
        path: dir.to_path_buf(),
        source,
    })?;
    let mut count = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && has_extension(&path, IMAGE_EXTENSIONS) {
            count += 1;
        }
    }
    Ok(count)
}

/// Trainable step count for a dataset layout:
/// `floor(sum(repeats * images) / batch_size) * num_epochs`.
///
/// No subsets yields 0, which is a valid if degenerate result; callers
/// that don't want a zero-step job must guard for it. An empty batch
/// size field reads as 0 and is treated as 1.
pub fn total_steps(subsets: &[DatasetSubset], batch_size: u32, num_epochs: u32) -> u32 {
    let per_epoch: u64 = subsets
        .iter()
        .map(|subset| u64::from(subset.repeats) * subset.image_count as u64)
        .sum();
    let batch = u64::from(batch_size.max(1));
    ((per_epoch / batch) * u64::from(num_epochs)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn subset_dir(root: &Path, name: &str, images: &[&str]) {
        let dir = root.join(name);
        fs::create_dir(&dir).unwrap();
        for image in images {
            fs::write(dir.join(image), b"").unwrap();
        }
    }

    #[test]
    fn example_layout_yields_75_steps() {
        let root = tempfile::tempdir().unwrap();
        subset_dir(root.path(), "10_catA", &["a.png", "b.jpg", "c.webp", "d.jpeg"]);
        subset_dir(root.path(), "5_catB", &["x.png", "y.bmp"]);

        let subsets = inspect_dataset(root.path()).unwrap();
        assert_eq!(subsets.len(), 2);
        // sum = 10*4 + 5*2 = 50, floor(50/2) * 3 = 75
        assert_eq!(total_steps(&subsets, 2, 3), 75);
    }

    #[test]
    fn malformed_folder_names_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        subset_dir(root.path(), "catA", &["a.png"]);
        subset_dir(root.path(), "abc_catA", &["b.png"]);
        subset_dir(root.path(), "3_good", &["c.png"]);
        fs::write(root.path().join("stray.png"), b"").unwrap();

        let subsets = inspect_dataset(root.path()).unwrap();
        assert_eq!(subsets.len(), 1);
        assert_eq!(subsets[0].repeats, 3);
        assert_eq!(subsets[0].image_count, 1);
    }

    #[test]
    fn image_extensions_are_case_sensitive() {
        let root = tempfile::tempdir().unwrap();
        subset_dir(root.path(), "2_mixed", &["a.png", "b.PNG", "c.txt"]);

        let subsets = inspect_dataset(root.path()).unwrap();
        assert_eq!(subsets[0].image_count, 1);
    }

    #[test]
    fn nested_folders_are_not_recursed() {
        let root = tempfile::tempdir().unwrap();
        subset_dir(root.path(), "2_outer", &["a.png"]);
        let inner = root.path().join("2_outer").join("inner");
        fs::create_dir(&inner).unwrap();
        fs::write(inner.join("hidden.png"), b"").unwrap();

        let subsets = inspect_dataset(root.path()).unwrap();
        assert_eq!(subsets[0].image_count, 1);
    }

    #[test]
    fn empty_dataset_is_zero_steps_not_an_error() {
        let root = tempfile::tempdir().unwrap();
        let subsets = inspect_dataset(root.path()).unwrap();
        assert!(subsets.is_empty());
        assert_eq!(total_steps(&subsets, 2, 10), 0);
    }

    #[test]
    fn missing_root_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("gone");
        assert!(matches!(
            inspect_dataset(&missing),
            Err(PathError::Missing { .. })
        ));
    }

    #[test]
    fn file_root_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("data");
        fs::write(&file, b"").unwrap();
        assert!(matches!(
            inspect_dataset(&file),
            Err(PathError::ExpectedDirectory { .. })
        ));
    }

    #[test]
    fn truncating_division_happens_before_epochs() {
        let root = tempfile::tempdir().unwrap();
        subset_dir(root.path(), "1_thing", &["a.png", "b.png", "c.png"]);
        let subsets = inspect_dataset(root.path()).unwrap();
        // floor(3/2) * 4 = 4, not floor(3*4/2) = 6
        assert_eq!(total_steps(&subsets, 2, 4), 4);
    }
}
