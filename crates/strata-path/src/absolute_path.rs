use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::helpers::{
    self, cmp_parts, ends_with_str, eq_ignore_case, file_name_index, hash_ignore_case,
    in_folder_str, join_str, parent_str, relativize, root_length, starts_with_str, walk_parts,
};
use crate::{OsFamily, PathError, RelativePath, RootType};

/// A sanitized absolute path.
///
/// Conceptually the pair `(directory, file_name)`: the directory part is
/// always rooted, and the file name is empty exactly when the path is a bare
/// root. Equality, ordering and hashing are ASCII-case-insensitive and agree
/// with each other.
///
/// ```
/// use strata_path::AbsolutePath;
///
/// let path = AbsolutePath::parse("C:\\Data\\save.bin").unwrap();
/// assert_eq!(path.as_str(), "C:/Data/save.bin");
/// assert_eq!(path.directory(), "C:/Data");
/// assert_eq!(path.file_name(), "save.bin");
/// assert_eq!(path, AbsolutePath::parse("c:/data/SAVE.BIN").unwrap());
/// ```
#[derive(Clone)]
pub struct AbsolutePath(String);

impl AbsolutePath {
    /// Sanitizes `input` and validates that it is rooted.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let sanitized = helpers::sanitize(input);
        if !helpers::is_rooted(&sanitized) {
            return Err(PathError::NotAbsolute(input.to_owned()));
        }
        Ok(AbsolutePath(sanitized))
    }

    /// Wraps a string that is already sanitized and rooted.
    pub fn from_sanitized(path: impl Into<String>) -> Self {
        let path = path.into();
        debug_assert!(helpers::is_sanitized(&path), "not sanitized: {path:?}");
        debug_assert!(helpers::is_rooted(&path), "not rooted: {path:?}");
        AbsolutePath(path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The directory part; for a bare root, the root itself.
    pub fn directory(&self) -> &str {
        parent_str(&self.0)
    }

    /// The last segment; empty iff this path is a bare root.
    pub fn file_name(&self) -> &str {
        &self.0[file_name_index(&self.0)..]
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == root_length(&self.0)
    }

    pub fn root_type(&self) -> RootType {
        helpers::root_type(&self.0)
    }

    /// The bare root this path descends from.
    pub fn root(&self) -> AbsolutePath {
        AbsolutePath(self.0[..root_length(&self.0)].to_owned())
    }

    /// The parent directory. A root is its own parent.
    pub fn parent(&self) -> AbsolutePath {
        AbsolutePath(parent_str(&self.0).to_owned())
    }

    /// The file name as a relative path; empty iff this path is a root.
    pub fn name(&self) -> RelativePath {
        RelativePath::from_sanitized(self.file_name().to_owned())
    }

    /// The extension of the file name, without the dot; empty when absent.
    pub fn extension(&self) -> &str {
        helpers::extension_str(self.file_name())
    }

    /// Replaces the extension of the file name. No-op on a bare root.
    pub fn with_extension(&self, extension: &str) -> AbsolutePath {
        if self.is_root() {
            return self.clone();
        }
        let name = helpers::set_extension(self.file_name(), extension);
        AbsolutePath(join_str(self.directory(), &name))
    }

    /// Appends `extension` to the file name (`a.txt` + `bak` = `a.txt.bak`).
    pub fn append_extension(&self, extension: &str) -> AbsolutePath {
        if self.is_root() {
            return self.clone();
        }
        let name = helpers::push_extension(self.file_name(), extension);
        AbsolutePath(join_str(self.directory(), &name))
    }

    pub fn join(&self, path: &RelativePath) -> AbsolutePath {
        AbsolutePath(join_str(&self.0, path.as_str()))
    }

    /// The path of `self` relative to `base`.
    ///
    /// Fails with [`PathError::NotInFolder`] when `base` is not an ancestor
    /// (or equal, which yields the empty relative path).
    pub fn relative_to(&self, base: &AbsolutePath) -> Result<RelativePath, PathError> {
        relativize(&self.0, &base.0).map(|rest| RelativePath::from_sanitized(rest.to_owned()))
    }

    /// Prefix test respecting segment boundaries; true on equality.
    pub fn starts_with(&self, prefix: &AbsolutePath) -> bool {
        starts_with_str(&self.0, &prefix.0)
    }

    /// Suffix test respecting segment boundaries; true for the empty suffix.
    pub fn ends_with(&self, suffix: &RelativePath) -> bool {
        ends_with_str(&self.0, suffix.as_str())
    }

    /// Strict-descendant test: true iff `parent` is a proper ancestor.
    pub fn in_folder(&self, parent: &AbsolutePath) -> bool {
        in_folder_str(&self.0, &parent.0)
    }

    /// Renders with the separator of the target OS family.
    pub fn to_native_separators(&self, os: OsFamily) -> String {
        match os {
            OsFamily::Unix => self.0.clone(),
            OsFamily::Windows => self.0.replace('/', "\\"),
        }
    }

    /// The segments after the root, in order.
    pub fn parts(&self) -> impl DoubleEndedIterator<Item = &str> + '_ {
        let mut it = walk_parts(&self.0);
        it.next();
        it
    }

    /// Number of segments after the root.
    pub fn depth(&self) -> usize {
        self.parts().count()
    }

    /// This path, every ancestor directory, and finally the root.
    pub fn get_all_parents(&self) -> impl Iterator<Item = AbsolutePath> {
        iter::successors(Some(self.clone()), |p| {
            (!p.is_root()).then(|| p.parent())
        })
    }
}

impl fmt::Display for AbsolutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AbsolutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AbsolutePath({:?})", self.0)
    }
}

impl PartialEq for AbsolutePath {
    fn eq(&self, other: &Self) -> bool {
        eq_ignore_case(&self.0, &other.0)
    }
}

impl Eq for AbsolutePath {}

impl Hash for AbsolutePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_ignore_case(&self.0, state);
    }
}

impl PartialOrd for AbsolutePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AbsolutePath {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_parts(walk_parts(&self.0), walk_parts(&other.0))
    }
}

impl FromStr for AbsolutePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AbsolutePath::parse(s)
    }
}

impl Serialize for AbsolutePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AbsolutePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AbsolutePath::parse(&raw).map_err(D::Error::custom)
    }
}
