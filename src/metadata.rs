//! Dataset metadata feed
//!
//! The planner and code agent learn about the available data from a folder
//! of Markdown documents, concatenated into one text blob.

use std::path::Path;

/// Load every `*.md` file in `dir`, in file-name order
///
/// Each document is preceded by a header made from its file stem, e.g.
/// `soi_immigall_schema.md` becomes `# SOI IMMIGALL SCHEMA`.
pub fn load_metadata_text(dir: &Path) -> std::io::Result<String> {
    let mut files: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().map_or(false, |ext| ext == "md"))
        .collect();
    files.sort();

    let mut parts = Vec::with_capacity(files.len() * 3);
    for path in files {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().replace('_', " ").to_uppercase())
            .unwrap_or_default();
        parts.push(format!("\n# {}\n", stem));
        parts.push(std::fs::read_to_string(&path)?);
        parts.push("\n".to_string());
    }

    Ok(parts.join("\n"))
}
