use crate::header::RawSlice;

use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Slices sharing one series identifier, in traversal order.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesGroup {
    pub series_uid: String,
    pub slices: Vec<RawSlice>,
}

impl SeriesGroup {
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// The slice whose metadata stands for the whole series.
    pub fn representative(&self) -> Option<&RawSlice> {
        self.slices.first()
    }
}

/// Recursively scan `root` and group every parseable DICOM file by series.
///
/// Groups are returned in the order their first file was encountered and each
/// group is non-empty. Files that fail header parsing are skipped.
///
/// # Errors
///
/// Fails only when `root` itself cannot be read.
pub fn scan_directory(root: impl AsRef<Path>) -> io::Result<Vec<SeriesGroup>> {
    let root = root.as_ref();
    fs::read_dir(root)?;

    let paths: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();

    let slices: Vec<Option<RawSlice>> = paths.par_iter().map(RawSlice::read).collect();

    let mut skipped = 0usize;
    let mut groups: Vec<SeriesGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for slice in slices {
        let Some(slice) = slice else {
            skipped += 1;
            continue;
        };
        match index.get(&slice.series_uid) {
            Some(&position) => groups[position].slices.push(slice),
            None => {
                index.insert(slice.series_uid.clone(), groups.len());
                groups.push(SeriesGroup {
                    series_uid: slice.series_uid.clone(),
                    slices: vec![slice],
                });
            }
        }
    }

    debug!(
        "Scanned {} files under {}: {} series, {} skipped",
        paths.len(),
        root.display(),
        groups.len(),
        skipped
    );
    Ok(groups)
}
