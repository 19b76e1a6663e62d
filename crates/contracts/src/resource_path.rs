//! ResourcePath - Cheap-to-clone canonical resource path
//!
//! Uses Arc<str> internally for O(1) clone operations.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// Canonical resource path, also used as the per-path queue key.
///
/// Internally uses `Arc<str>` so cloning only increments a reference count.
/// Events move between the normalizer, the queue, worker tasks and the
/// outcome stream, and each hop clones the path.
///
/// Canonicalization (leading `/`, no trailing slash, single decoding) is the
/// normalizer's job; this type only carries the result.
///
/// # Examples
/// ```
/// use contracts::ResourcePath;
///
/// let path: ResourcePath = "/docs/report.txt".into();
/// let path2 = path.clone();  // O(1) - just increments ref count
/// assert_eq!(path, path2);
/// assert_eq!(path.as_str(), "/docs/report.txt");
/// ```
#[derive(Clone)]
pub struct ResourcePath(Arc<str>);

impl ResourcePath {
    /// Create a new ResourcePath from a string slice.
    #[inline]
    pub fn new(s: &str) -> Self {
        Self(Arc::from(s))
    }

    /// Get the underlying string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path as UTF-8 bytes (broker payload).
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Whether this path equals `prefix` or lies underneath it.
    ///
    /// `/docs` contains `/docs` and `/docs/a`, but not `/docsx`.
    pub fn is_under(&self, prefix: &str) -> bool {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        match self.0.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

impl Deref for ResourcePath {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for ResourcePath {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ResourcePath {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourcePath {
    #[inline]
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for ResourcePath {
    #[inline]
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourcePath({:?})", self.0)
    }
}

impl PartialEq for ResourcePath {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        // Fast path: same Arc pointer
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for ResourcePath {}

impl PartialEq<str> for ResourcePath {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl PartialEq<&str> for ResourcePath {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == *other
    }
}

// Same as str hash so HashMap<ResourcePath, _> can be queried with &str
impl Hash for ResourcePath {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl Serialize for ResourcePath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ResourcePath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_clone_is_cheap() {
        let p1: ResourcePath = "/a/b".into();
        let p2 = p1.clone();
        assert_eq!(p1.as_str().as_ptr(), p2.as_str().as_ptr());
    }

    #[test]
    fn test_hashmap_lookup_by_str() {
        let mut map: HashMap<ResourcePath, u32> = HashMap::new();
        map.insert("/x".into(), 1);
        assert_eq!(map.get("/x"), Some(&1));
        assert_eq!(map.get("/y"), None);
    }

    #[test]
    fn test_is_under() {
        let path: ResourcePath = "/docs/2024/report.txt".into();
        assert!(path.is_under("/docs"));
        assert!(path.is_under("/docs/"));
        assert!(path.is_under("/"));
        assert!(path.is_under("/docs/2024/report.txt"));
        assert!(!path.is_under("/doc"));
        assert!(!path.is_under("/other"));
    }

    #[test]
    fn test_serde() {
        let path: ResourcePath = "/a".into();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/a\"");
        let parsed: ResourcePath = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, path);
    }
}
