use std::path::{Path, PathBuf};

use shared::RiceVariety;
use walkdir::WalkDir;

use super::EvaluationError;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelledSample {
    pub path: PathBuf,
    pub label: RiceVariety,
}

/// Collects up to `max_per_class` images from `root/<Variety>/` for every
/// variety, in variety order and sorted by file name within a class.
pub fn load_dataset(root: &Path, max_per_class: usize) -> Result<Vec<LabelledSample>, EvaluationError> {
    if !root.is_dir() {
        return Err(EvaluationError::Io {
            path: root.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "dataset directory not found"),
        });
    }

    let mut samples = Vec::new();
    for variety in RiceVariety::ALL {
        let class_dir = root.join(variety.to_string());
        if !class_dir.is_dir() {
            log::warn!("Directory {} not found", class_dir.display());
            continue;
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&class_dir)
            .follow_links(false)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for entry in walker {
            if files.len() >= max_per_class {
                break;
            }
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && is_image(entry.path()) {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => log::warn!("Error accessing entry in {}: {}", class_dir.display(), e),
            }
        }

        log::info!("Loading {} images for {}", files.len(), variety);
        samples.extend(files.into_iter().map(|path| LabelledSample {
            path,
            label: variety,
        }));
    }

    if samples.is_empty() {
        return Err(EvaluationError::EmptyDataset(root.to_path_buf()));
    }
    Ok(samples)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
