//! Cache key schema.
//!
//! Keys are shared with other tools writing into the same store, so the
//! layout is fixed and case-sensitive:
//!
//! - principal lookup: `<path>:<KIND>:<principal>`
//! - negative marker: `<path>:<KIND>-NEG:<principal>`
//! - directory quota: `<path>`

use crate::models::PrincipalKind;
use std::fmt;

/// Suffix appended to the kind label of negative keys.
pub const NEGATIVE_MARKER: &str = "-NEG:";

/// Deterministic cache key for one lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Principal {
        path: String,
        kind: PrincipalKind,
        name: String,
    },
    Directory {
        path: String,
    },
}

impl CacheKey {
    pub fn principal(path: impl Into<String>, kind: PrincipalKind, name: impl Into<String>) -> Self {
        CacheKey::Principal {
            path: path.into(),
            kind,
            name: name.into(),
        }
    }

    pub fn user(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::principal(path, PrincipalKind::User, name)
    }

    pub fn group(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::principal(path, PrincipalKind::Group, name)
    }

    pub fn directory(path: impl Into<String>) -> Self {
        CacheKey::Directory { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            CacheKey::Principal { path, .. } | CacheKey::Directory { path } => path,
        }
    }

    /// Positive key string.
    pub fn positive(&self) -> String {
        match self {
            CacheKey::Principal { path, kind, name } => {
                format!("{}:{}:{}", path, kind.key_label(), name)
            }
            CacheKey::Directory { path } => path.clone(),
        }
    }

    /// Negative key string. Directory keys have no negative form.
    pub fn negative(&self) -> Option<String> {
        match self {
            CacheKey::Principal { path, kind, name } => {
                Some(format!("{}:{}-NEG:{}", path, kind.key_label(), name))
            }
            CacheKey::Directory { .. } => None,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.positive())
    }
}

/// Whether a raw key is a negative marker.
pub fn is_negative_key(key: &str) -> bool {
    key.contains(NEGATIVE_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_keys() {
        let key = CacheKey::user("/ifs/home", "bob");
        assert_eq!(key.positive(), "/ifs/home:USER:bob");
        assert_eq!(key.negative().as_deref(), Some("/ifs/home:USER-NEG:bob"));

        let key = CacheKey::group("/data/projA", "teamA");
        assert_eq!(key.positive(), "/data/projA:GROUP:teamA");
        assert_eq!(key.negative().as_deref(), Some("/data/projA:GROUP-NEG:teamA"));
    }

    #[test]
    fn test_directory_key_is_bare_path() {
        let key = CacheKey::directory("/vast/lab");
        assert_eq!(key.positive(), "/vast/lab");
        assert_eq!(key.negative(), None);
        assert_eq!(key.to_string(), "/vast/lab");
    }

    #[test]
    fn test_is_negative_key() {
        assert!(is_negative_key("/data/projA:GROUP-NEG:teamA"));
        assert!(!is_negative_key("/data/projA:GROUP:teamA"));
        assert!(!is_negative_key("/data/NEG"));
    }
}
