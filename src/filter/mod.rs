//! Domain filtering.
//!
//! Decides whether a resolved name is routed through the hooks. Only the
//! whitelist gates hook dispatch; the blacklist is loaded and reloadable so
//! callers can consult it, but the query path does not.

mod patterns;

use std::path::PathBuf;

pub use patterns::FilterSet;

use crate::error::FilterError;

/// Whitelist and blacklist pattern sets.
pub struct DomainFilter {
    whitelist: FilterSet,
    blacklist: FilterSet,
}

impl DomainFilter {
    pub fn new(whitelist: FilterSet, blacklist: FilterSet) -> Self {
        Self {
            whitelist,
            blacklist,
        }
    }

    /// Load both sets; a missing directory setting yields an empty set.
    pub fn load(
        whitelist_dir: Option<PathBuf>,
        blacklist_dir: Option<PathBuf>,
    ) -> Result<Self, FilterError> {
        let load = |dir: Option<PathBuf>| match dir {
            Some(dir) => FilterSet::load(dir),
            None => Ok(FilterSet::empty()),
        };

        Ok(Self::new(load(whitelist_dir)?, load(blacklist_dir)?))
    }

    /// Whether `name` (a domain or IP literal) is on the whitelist.
    pub fn allows(&self, name: &str) -> bool {
        self.whitelist.matches(trim_root(name))
    }

    /// Whether `name` is on the blacklist.
    pub fn denies(&self, name: &str) -> bool {
        self.blacklist.matches(trim_root(name))
    }

    /// Reload both sets from disk.
    pub fn reload(&self) -> Result<(usize, usize), FilterError> {
        Ok((self.whitelist.reload()?, self.blacklist.reload()?))
    }

    pub fn whitelist_len(&self) -> usize {
        self.whitelist.len()
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }
}

impl Default for DomainFilter {
    fn default() -> Self {
        Self::new(FilterSet::empty(), FilterSet::empty())
    }
}

fn trim_root(name: &str) -> &str {
    match name.strip_suffix('.') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_consults_whitelist_only() {
        let filter = DomainFilter::new(
            FilterSet::from_patterns([r"example\.com$"]),
            FilterSet::from_patterns([r"example\.com$", r"other\.org$"]),
        );

        assert!(filter.allows("example.com."));
        assert!(filter.allows("www.example.com"));
        assert!(!filter.allows("other.org."));
        assert!(filter.denies("other.org."));
    }

    #[test]
    fn default_allows_nothing() {
        let filter = DomainFilter::default();

        assert!(!filter.allows("example.com."));
        assert!(!filter.denies("example.com."));
    }

    #[test]
    fn load_without_dirs_is_empty() {
        let filter = DomainFilter::load(None, None).unwrap();

        assert_eq!(filter.whitelist_len(), 0);
        assert_eq!(filter.blacklist_len(), 0);
        assert_eq!(filter.reload().unwrap(), (0, 0));
    }

    #[test]
    fn trim_root_keeps_bare_root() {
        assert_eq!(trim_root("example.com."), "example.com");
        assert_eq!(trim_root("."), ".");
        assert_eq!(trim_root("1.2.3.4"), "1.2.3.4");
    }
}
