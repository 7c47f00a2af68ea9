//! Directory Scanner (C12): recursive walk that discovers ingestible files
//! and reports byte/extension aggregates before ingestion starts
//!
//! Grounded on the `DevsHero-NeuroSiphon::scanner` module (`WalkBuilder`
//! with `standard_filters`, a custom `Override` for excluded directory
//! names, single-stat-per-file, deterministic sort by path) adapted from
//! code-repository scanning to document-directory scanning: file-type
//! filtering comes from `extractor::is_supported_extension` rather than an
//! extension allowlist, and aggregation is by extension/directory instead
//! of just total bytes.

use crate::error::Result;
use crate::extractor::is_supported_extension;
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Emit a progress log line every this many files walked, so a scan of a
/// large tree isn't silent for minutes
const PROGRESS_INTERVAL: usize = 1000;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ScanReport {
    pub files: Vec<PathBuf>,
    pub bytes_by_extension: HashMap<String, u64>,
    pub bytes_by_directory: HashMap<String, u64>,
    pub total_files: usize,
    pub total_bytes: u64,
}

fn excluded_dir_overrides(root: &Path, exclude_dir_names: &[String]) -> Result<Override> {
    let mut builder = OverrideBuilder::new(root);
    for name in exclude_dir_names {
        let name = name.trim().trim_matches('/');
        if name.is_empty() {
            continue;
        }
        builder.add(&format!("**/{name}"))?;
        builder.add(&format!("**/{name}/**"))?;
    }
    Ok(builder.build()?)
}

/// Walk `root`, collecting paths the extractor can handle along with
/// per-extension and per-directory byte totals. Files are visited in
/// deterministic (sorted) order so repeated scans of an unchanged tree
/// discover files in the same sequence.
pub fn scan(root: &Path, exclude_dir_names: &[String]) -> Result<ScanReport> {
    let overrides = excluded_dir_overrides(root, exclude_dir_names)?;
    let walker = WalkBuilder::new(root)
        .standard_filters(true)
        .overrides(overrides)
        .build();

    let mut files = Vec::new();
    let mut bytes_by_extension: HashMap<String, u64> = HashMap::new();
    let mut bytes_by_directory: HashMap<String, u64> = HashMap::new();
    let mut total_bytes = 0u64;
    let mut walked = 0usize;

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }

        let path = entry.into_path();
        walked += 1;
        if walked % PROGRESS_INTERVAL == 0 {
            info!(walked, "scanning directory tree");
        }

        if !is_supported_extension(&path) {
            continue;
        }

        let bytes = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(_) => continue,
        };

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let directory = path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        *bytes_by_extension.entry(extension).or_insert(0) += bytes;
        *bytes_by_directory.entry(directory).or_insert(0) += bytes;
        total_bytes += bytes;
        files.push(path);
    }

    // §4.12: directories ordered by descending total size, documents
    // grouped by parent directory; directories of equal size and files
    // within the same directory are tie-broken alphabetically for a
    // deterministic order across repeated scans.
    files.sort_by(|a, b| {
        let dir_a = a.parent().map(|p| p.display().to_string()).unwrap_or_default();
        let dir_b = b.parent().map(|p| p.display().to_string()).unwrap_or_default();
        let size_a = bytes_by_directory.get(&dir_a).copied().unwrap_or(0);
        let size_b = bytes_by_directory.get(&dir_b).copied().unwrap_or(0);
        size_b
            .cmp(&size_a)
            .then_with(|| dir_a.cmp(&dir_b))
            .then_with(|| a.cmp(b))
    });

    info!(total_files = files.len(), total_bytes, "directory scan complete");

    Ok(ScanReport {
        total_files: files.len(),
        total_bytes,
        files,
        bytes_by_extension,
        bytes_by_directory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_scan_finds_supported_files_and_skips_unsupported() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello world").unwrap();
        std::fs::write(dir.path().join("b.exe"), [0u8; 10]).unwrap();

        let report = scan(dir.path(), &[]).unwrap();
        assert_eq!(report.total_files, 1);
        assert!(report.files[0].ends_with("a.txt"));
    }

    #[test]
    fn test_scan_excludes_named_directories() {
        let dir = tempdir().unwrap();
        let excluded = dir.path().join("node_modules");
        std::fs::create_dir(&excluded).unwrap();
        let mut f = std::fs::File::create(excluded.join("x.txt")).unwrap();
        writeln!(f, "hidden").unwrap();
        std::fs::write(dir.path().join("visible.txt"), "visible").unwrap();

        let report = scan(dir.path(), &["node_modules".to_string()]).unwrap();
        assert_eq!(report.total_files, 1);
        assert!(report.files[0].ends_with("visible.txt"));
    }

    #[test]
    fn test_scan_aggregates_bytes_by_extension() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "12345").unwrap();
        std::fs::write(dir.path().join("b.txt"), "1234567890").unwrap();

        let report = scan(dir.path(), &[]).unwrap();
        assert_eq!(report.bytes_by_extension.get("txt"), Some(&15));
        assert_eq!(report.total_bytes, 15);
    }

    #[test]
    fn test_scan_orders_files_alphabetically_within_a_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("z.txt"), "z").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();

        let report = scan(dir.path(), &[]).unwrap();
        let names: Vec<_> = report
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt".to_string(), "z.txt".to_string()]);
    }

    #[test]
    fn test_scan_groups_by_directory_ordered_by_descending_size() {
        let dir = tempdir().unwrap();
        let small = dir.path().join("small");
        let big = dir.path().join("big");
        std::fs::create_dir(&small).unwrap();
        std::fs::create_dir(&big).unwrap();
        std::fs::write(small.join("s.txt"), "12345").unwrap();
        std::fs::write(big.join("b1.txt"), "1234567890").unwrap();
        std::fs::write(big.join("b2.txt"), "1234567890").unwrap();

        let report = scan(dir.path(), &[]).unwrap();
        let names: Vec<_> = report
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        // "big" (20 bytes) sorts entirely before "small" (5 bytes); files
        // within "big" keep their own alphabetical order.
        assert_eq!(names, vec!["b1.txt".to_string(), "b2.txt".to_string(), "s.txt".to_string()]);
    }
}
