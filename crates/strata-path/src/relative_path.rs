use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::helpers::{
    self, cmp_parts, ends_with_str, eq_ignore_case, file_name_str, hash_ignore_case, join_str,
    parent_str, starts_with_str, walk_parts,
};
use crate::{OsFamily, PathError};

/// A sanitized path without a root component. The empty string is the empty
/// relative path, which is the identity of [`join`](RelativePath::join) and
/// the parent of every single-segment path.
#[derive(Clone, Default)]
pub struct RelativePath(String);

impl RelativePath {
    pub fn empty() -> Self {
        RelativePath(String::new())
    }

    /// Sanitizes `input` and validates that it has no root.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let sanitized = helpers::sanitize(input);
        if helpers::is_rooted(&sanitized) {
            return Err(PathError::NotRelative(input.to_owned()));
        }
        Ok(RelativePath(sanitized))
    }

    /// Wraps a string that is already sanitized and rootless.
    pub fn from_sanitized(path: impl Into<String>) -> Self {
        let path = path.into();
        debug_assert!(helpers::is_sanitized(&path), "not sanitized: {path:?}");
        debug_assert!(!helpers::is_rooted(&path), "unexpected root: {path:?}");
        RelativePath(path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The parent; the empty relative path when there is none left.
    pub fn parent(&self) -> RelativePath {
        RelativePath(parent_str(&self.0).to_owned())
    }

    /// The last segment; empty for the empty path.
    pub fn name(&self) -> RelativePath {
        RelativePath(file_name_str(&self.0).to_owned())
    }

    pub fn file_name(&self) -> &str {
        file_name_str(&self.0)
    }

    /// The extension of the last segment, without the dot; empty when absent.
    pub fn extension(&self) -> &str {
        helpers::extension_str(self.file_name())
    }

    pub fn with_extension(&self, extension: &str) -> RelativePath {
        if self.is_empty() {
            return self.clone();
        }
        let name = helpers::set_extension(self.file_name(), extension);
        RelativePath(join_str(parent_str(&self.0), &name))
    }

    pub fn append_extension(&self, extension: &str) -> RelativePath {
        if self.is_empty() {
            return self.clone();
        }
        let name = helpers::push_extension(self.file_name(), extension);
        RelativePath(join_str(parent_str(&self.0), &name))
    }

    pub fn join(&self, path: &RelativePath) -> RelativePath {
        RelativePath(join_str(&self.0, &path.0))
    }

    /// Prefix test respecting segment boundaries; true on equality.
    pub fn starts_with(&self, prefix: &RelativePath) -> bool {
        prefix.is_empty() || starts_with_str(&self.0, &prefix.0)
    }

    /// Suffix test respecting segment boundaries; true for the empty suffix.
    pub fn ends_with(&self, suffix: &RelativePath) -> bool {
        ends_with_str(&self.0, &suffix.0)
    }

    /// Renders with the separator of the target OS family.
    pub fn to_native_separators(&self, os: OsFamily) -> String {
        match os {
            OsFamily::Unix => self.0.clone(),
            OsFamily::Windows => self.0.replace('/', "\\"),
        }
    }

    pub fn parts(&self) -> impl DoubleEndedIterator<Item = &str> + '_ {
        walk_parts(&self.0)
    }

    pub fn depth(&self) -> usize {
        self.parts().count()
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelativePath({:?})", self.0)
    }
}

impl AsRef<str> for RelativePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq for RelativePath {
    fn eq(&self, other: &Self) -> bool {
        eq_ignore_case(&self.0, &other.0)
    }
}

impl Eq for RelativePath {}

impl Hash for RelativePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_ignore_case(&self.0, state);
    }
}

impl PartialOrd for RelativePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RelativePath {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_parts(walk_parts(&self.0), walk_parts(&other.0))
    }
}

impl FromStr for RelativePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelativePath::parse(s)
    }
}

impl Serialize for RelativePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RelativePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RelativePath::parse(&raw).map_err(D::Error::custom)
    }
}
