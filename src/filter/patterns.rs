//! Regular-expression pattern sets loaded from a directory of list files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use fancy_regex::Regex;

use crate::error::FilterError;

/// A reloadable set of patterns.
///
/// Every file under the directory (recursively) contributes one pattern per
/// line; blank lines and lines starting with `#` or `[` are skipped.
pub struct FilterSet {
    dir: Option<PathBuf>,
    patterns: RwLock<Vec<Regex>>,
}

impl FilterSet {
    /// A set that matches nothing.
    pub fn empty() -> Self {
        Self {
            dir: None,
            patterns: RwLock::new(Vec::new()),
        }
    }

    /// Load every pattern file under `dir`.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, FilterError> {
        let dir = dir.into();
        let patterns = read_dir_patterns(&dir)?;

        Ok(Self {
            dir: Some(dir),
            patterns: RwLock::new(patterns),
        })
    }

    /// Build a fixed set from pattern strings.
    pub fn from_patterns<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            dir: None,
            patterns: RwLock::new(patterns.into_iter().filter_map(compile).collect()),
        }
    }

    /// Re-read the pattern files, replacing the current set.
    ///
    /// Returns the number of patterns now loaded. On error the previous set
    /// stays in place.
    pub fn reload(&self) -> Result<usize, FilterError> {
        let Some(dir) = &self.dir else {
            return Ok(self.len());
        };
        let fresh = read_dir_patterns(dir)?;
        let count = fresh.len();
        if let Ok(mut patterns) = self.patterns.write() {
            *patterns = fresh;
        }
        Ok(count)
    }

    /// Check whether any pattern matches `input`.
    pub fn matches(&self, input: &str) -> bool {
        let Ok(patterns) = self.patterns.read() else {
            return false;
        };
        patterns
            .iter()
            .any(|re| re.is_match(input).unwrap_or(false))
    }

    /// Returns the number of patterns in the set.
    pub fn len(&self) -> usize {
        self.patterns.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!("skipping invalid filter pattern {:?}: {}", pattern, e);
            None
        }
    }
}

fn read_dir_patterns(dir: &Path) -> Result<Vec<Regex>, FilterError> {
    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    files.sort();

    let mut patterns = Vec::new();
    for file in files {
        let contents = fs::read_to_string(&file).map_err(|source| FilterError::Read {
            path: file.clone(),
            source,
        })?;
        patterns.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('['))
                .filter_map(compile),
        );
    }

    Ok(patterns)
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), FilterError> {
    let read_err = |source| FilterError::Read {
        path: dir.to_path_buf(),
        source,
    };

    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_patterns_matches_regex() {
        let set = FilterSet::from_patterns([r"example\.com", r"^vpn\."]);

        assert_eq!(set.len(), 2);
        assert!(set.matches("example.com"));
        assert!(set.matches("www.example.com"));
        assert!(set.matches("vpn.corp.net"));
        assert!(!set.matches("other.org"));
        assert!(!set.matches("examplexcom.org"));
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let set = FilterSet::from_patterns(["(unclosed", "ok"]);

        assert_eq!(set.len(), 1);
        assert!(set.matches("ok.example"));
    }

    #[test]
    fn empty_matches_nothing() {
        let set = FilterSet::empty();

        assert!(set.is_empty());
        assert!(!set.matches(""));
        assert!(!set.matches("example.com"));
    }

    #[test]
    fn load_reads_nested_files_and_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("main.list"),
            "# comment\n[section]\n\nexample\\.com\n",
        )
        .unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("more.list"), "corp\\.net\r\n").unwrap();

        let set = FilterSet::load(dir.path()).unwrap();

        assert_eq!(set.len(), 2);
        assert!(set.matches("example.com"));
        assert!(set.matches("mail.corp.net"));
        assert!(!set.matches("section"));
    }

    #[test]
    fn load_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();

        assert!(FilterSet::load(dir.path().join("absent")).is_err());
    }

    #[test]
    fn reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("list");
        fs::write(&file, "example\\.com\n").unwrap();
        let set = FilterSet::load(dir.path()).unwrap();
        assert!(!set.matches("other.org"));

        fs::write(&file, "example\\.com\nother\\.org\n").unwrap();

        assert_eq!(set.reload().unwrap(), 2);
        assert!(set.matches("other.org"));
    }
}
