use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::image::GeneratedImage;

/// File-name prefix used when the caller gives no image type.
pub const DEFAULT_KIND: &str = "generated";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `<kind-or-"generated">_<YYYYmmdd_HHMMSS>[_<index>].png`
pub fn output_file_name(kind: Option<&str>, timestamp: &DateTime<Local>, index: Option<usize>) -> String {
    let kind = kind.unwrap_or(DEFAULT_KIND);
    let stamp = timestamp.format(TIMESTAMP_FORMAT);
    match index {
        Some(index) => format!("{}_{}_{}.png", kind, stamp, index),
        None => format!("{}_{}.png", kind, stamp),
    }
}

pub fn output_path(
    dir: &Path,
    kind: Option<&str>,
    timestamp: &DateTime<Local>,
    index: Option<usize>,
) -> PathBuf {
    dir.join(output_file_name(kind, timestamp, index))
}

/// Saves a batch under one timestamp, indexing file names only when there is more than one image.
pub fn save_images(dir: &Path, kind: Option<&str>, images: &[GeneratedImage]) -> Result<Vec<PathBuf>> {
    let indexed = images.len() > 1;
    save_batch(dir, kind, images, indexed)
}

/// Saves a batch under one timestamp, always indexing file names.
pub fn save_images_indexed(
    dir: &Path,
    kind: Option<&str>,
    images: &[GeneratedImage],
) -> Result<Vec<PathBuf>> {
    save_batch(dir, kind, images, true)
}

fn save_batch(
    dir: &Path,
    kind: Option<&str>,
    images: &[GeneratedImage],
    indexed: bool,
) -> Result<Vec<PathBuf>> {
    save_batch_at(dir, kind, &Local::now(), images, indexed)
}

/// Names that already exist are never overwritten; the batch moves on to the
/// next free index under the same timestamp.
fn save_batch_at(
    dir: &Path,
    kind: Option<&str>,
    timestamp: &DateTime<Local>,
    images: &[GeneratedImage],
    indexed: bool,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut slot = indexed.then_some(0);
    images
        .iter()
        .map(|image| {
            let bytes = image.encode_png()?;
            let (path, mut file) = claim_slot(dir, kind, timestamp, &mut slot)?;
            file.write_all(&bytes)?;
            Ok(path)
        })
        .collect()
}

/// Creates the first free file at or after `slot` and advances `slot` past it.
fn claim_slot(
    dir: &Path,
    kind: Option<&str>,
    timestamp: &DateTime<Local>,
    slot: &mut Option<usize>,
) -> Result<(PathBuf, File)> {
    loop {
        let path = output_path(dir, kind, timestamp, *slot);
        let next = Some(slot.map_or(1, |index| index + 1));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                *slot = next;
                return Ok((path, file));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => *slot = next,
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn file_names_follow_kind_timestamp_index() {
        assert_eq!(output_file_name(Some("animal"), &at(), None), "animal_20240309_140507.png");
        assert_eq!(output_file_name(None, &at(), Some(2)), "generated_20240309_140507_2.png");
        assert_eq!(
            output_path(Path::new("assets/animal"), Some("animal"), &at(), Some(0)),
            PathBuf::from("assets/animal/animal_20240309_140507_0.png")
        );
    }

    #[test]
    fn single_image_batches_are_not_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let image = GeneratedImage::new(vec![0; 12], 2, 2).unwrap();

        let single = save_images(dir.path(), Some("object"), &[image.clone()]).unwrap();
        let name = single[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("object_") && name.matches('_').count() == 2, "{name}");
        assert!(single[0].exists());

        let many = save_images(&dir.path().join("nested"), None, &[image.clone(), image]).unwrap();
        assert!(many[0].to_string_lossy().ends_with("_0.png"));
        assert!(many[1].to_string_lossy().ends_with("_1.png"));
        assert!(many.iter().all(|p| p.exists()));
    }

    #[test]
    fn indexed_batches_always_carry_an_index() {
        let dir = tempfile::tempdir().unwrap();
        let image = GeneratedImage::new(vec![0; 12], 2, 2).unwrap();
        let paths = save_images_indexed(dir.path(), None, &[image]).unwrap();
        let name = paths[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("generated_") && name.ends_with("_0.png"), "{name}");
    }

    #[test]
    fn batches_sharing_a_timestamp_never_overwrite_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let first = GeneratedImage::new(vec![10; 12], 2, 2).unwrap();
        let second = GeneratedImage::new(vec![250; 12], 2, 2).unwrap();

        let a = save_batch_at(dir.path(), None, &at(), &[first.clone(), first.clone()], true).unwrap();
        let b = save_batch_at(dir.path(), None, &at(), &[second.clone()], true).unwrap();
        assert_eq!(b, vec![output_path(dir.path(), None, &at(), Some(2))]);
        assert!(a.iter().all(|p| !b.contains(p)));

        let single = save_batch_at(dir.path(), Some("object"), &at(), &[first.clone()], false).unwrap();
        let again = save_batch_at(dir.path(), Some("object"), &at(), &[second], false).unwrap();
        assert_eq!(single[0], dir.path().join("object_20240309_140507.png"));
        assert_eq!(again[0], dir.path().join("object_20240309_140507_1.png"));

        let kept = ::image::open(&a[0]).unwrap().to_rgb8();
        assert_eq!(kept.into_raw(), first.to_rgb_image().unwrap().into_raw());
    }
}
