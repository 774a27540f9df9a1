use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Expand the given paths into image files.
///
/// Files are taken as-is; directories are walked recursively and filtered by
/// extension. Directory results are sorted for consistent ordering.
pub fn discover_images(paths: &[PathBuf], extensions: &[String]) -> Vec<PathBuf> {
    let mut images = Vec::new();

    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.into_path())
                .filter(|p| p.is_file() && has_extension(p, extensions))
                .collect();
            found.sort();
            images.extend(found);
        } else {
            images.push(path.clone());
        }
    }

    images
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            extensions.iter().any(|e| e.to_lowercase() == ext_lower)
        })
        .unwrap_or(false)
}
