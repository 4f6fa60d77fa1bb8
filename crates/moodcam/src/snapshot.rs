//! JPEG snapshots named `{prefix}_{YYYYmmdd_HHMMSS}.jpg`.

use chrono::{Local, NaiveDateTime};
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("failed to create snapshot directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Somewhere to persist un-annotated frames.
pub trait SnapshotSink {
    /// Save `image` under `prefix`; returns where it was written.
    fn save(&mut self, prefix: &str, image: &RgbImage) -> Result<PathBuf, SnapshotError>;
}

/// `happy_20240131_142501.jpg`
pub fn snapshot_file_name(prefix: &str, at: &NaiveDateTime) -> String {
    format!("{prefix}_{}.jpg", at.format(TIMESTAMP_FORMAT))
}

/// Snapshot directory on disk.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Create `dir` (and parents) if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| SnapshotError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Two snapshots with the same prefix in the same second get `_1`, `_2`, ...
    /// suffixes instead of overwriting each other.
    fn unused_path(&self, prefix: &str, at: &NaiveDateTime) -> PathBuf {
        let name = snapshot_file_name(prefix, at);
        let mut path = self.dir.join(&name);
        let stem = name.trim_end_matches(".jpg").to_string();
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{stem}_{n}.jpg"));
            n += 1;
        }
        path
    }

    pub fn save_at(
        &self,
        prefix: &str,
        image: &RgbImage,
        at: &NaiveDateTime,
    ) -> Result<PathBuf, SnapshotError> {
        let path = self.unused_path(prefix, at);
        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|source| SnapshotError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

impl SnapshotSink for SnapshotStore {
    fn save(&mut self, prefix: &str, image: &RgbImage) -> Result<PathBuf, SnapshotError> {
        self.save_at(prefix, image, &Local::now().naive_local())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::Rgb;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(14, 25, 1)
            .unwrap()
    }

    #[test]
    fn test_file_name_format() {
        assert_eq!(snapshot_file_name("happy", &at()), "happy_20240131_142501.jpg");
        assert_eq!(snapshot_file_name("manual", &at()), "manual_20240131_142501.jpg");
    }

    #[test]
    fn test_create_makes_nested_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a/b/emotion_snapshots");
        let store = SnapshotStore::create(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(store.dir(), dir.as_path());
    }

    #[test]
    fn test_save_writes_decodable_jpeg() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::create(tmp.path()).unwrap();
        let image = RgbImage::from_pixel(32, 24, Rgb([200, 100, 50]));

        let path = store.save_at("surprise", &image, &at()).unwrap();
        assert_eq!(path, tmp.path().join("surprise_20240131_142501.jpg"));

        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn test_same_second_does_not_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::create(tmp.path()).unwrap();
        let image = RgbImage::new(8, 8);

        let first = store.save_at("manual", &image, &at()).unwrap();
        let second = store.save_at("manual", &image, &at()).unwrap();
        assert_ne!(first, second);
        assert_eq!(second, tmp.path().join("manual_20240131_142501_1.jpg"));
    }

    #[test]
    fn test_create_fails_when_path_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            SnapshotStore::create(&file),
            Err(SnapshotError::CreateDir { .. })
        ));
    }
}
