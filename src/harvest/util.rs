use crate::error::HarvestError;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Replace `path` with `contents` via a sibling temp file and rename, so a
/// crash mid-write leaves the previous file intact.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), HarvestError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|err| HarvestError::persistence(parent, err))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|err| HarvestError::persistence(parent, err))?;
    tmp.write_all(contents.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|err| HarvestError::persistence(path, err))?;
    tmp.persist(path)
        .map_err(|err| HarvestError::persistence(path, err.error))?;
    Ok(())
}

/// Collapse whitespace and strip control characters for single-line output.
pub fn single_line(input: &str, max_chars: usize) -> String {
    let clean = input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}
