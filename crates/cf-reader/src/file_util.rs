//! File discovery for multi-file datasets.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use cf_common::{CfError, CfResult};

/// Split a selector into its directory and trailing component. The
/// trailing component is a literal file name or a regex fragment
/// matching basenames, depending on the caller.
pub fn split_selector(selector: &str) -> (PathBuf, String) {
    let path = Path::new(selector);
    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    (dir, name)
}

/// Enumerate the files in `dir` whose basename fully matches
/// `pattern`, sorted lexicographically. The sort order defines the
/// global time ordering, so it must be stable across runs.
pub fn locate_files(dir: &Path, pattern: &str) -> CfResult<Vec<String>> {
    let regex = Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| CfError::Config(format!("invalid files regex \"{}\": {}", pattern, e)))?;

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if regex.is_match(name) {
                files.push(name.to_string());
            }
        }
    }

    if files.is_empty() {
        return Err(CfError::Config(format!(
            "no files matching \"{}\" in {}",
            pattern,
            dir.display()
        )));
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_selector() {
        let (dir, name) = split_selector("/data/cam5/cam5.*\\.nc");
        assert_eq!(dir, PathBuf::from("/data/cam5"));
        assert_eq!(name, "cam5.*\\.nc");

        let (dir, name) = split_selector("file.nc");
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, "file.nc");
    }

    #[test]
    fn test_locate_files_sorts_and_filters() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        for name in ["b_02.nc", "a_01.nc", "c_03.nc", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let files = locate_files(dir.path(), ".*\\.nc").unwrap();
        assert_eq!(files, vec!["a_01.nc", "b_02.nc", "c_03.nc"]);

        // full match only: the pattern must cover the whole basename
        assert!(locate_files(dir.path(), "a_01").is_err());
    }
}
