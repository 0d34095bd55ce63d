//! String-level path arithmetic.
//!
//! Everything in this module operates on sanitized path strings: forward
//! slashes only, no duplicated separators, no trailing separator except on a
//! bare root, no trailing whitespace, uppercase DOS drive letters. The sole
//! entry point that accepts arbitrary strings is [`sanitize`].

use std::cmp::Ordering;
use std::hash::Hasher;

use crate::root::{parse_root, RootType};
use crate::PathError;

/// Brings an arbitrary path string into canonical form.
///
/// Backslashes become forward slashes, separator runs collapse (a leading
/// `//` is preserved for UNC and DOS device roots), trailing whitespace and
/// separators are trimmed (bare roots keep theirs), DOS drive letters are
/// uppercased, and a root spelled without its trailing separator gains one.
///
/// Idempotent: `sanitize(&sanitize(x)) == sanitize(x)`.
pub fn sanitize(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let bytes = input.as_bytes();
    let mut leading = 0;
    while leading < bytes.len() && (bytes[leading] == b'/' || bytes[leading] == b'\\') {
        leading += 1;
    }

    let mut out = String::with_capacity(input.len() + 1);
    // A leading run of exactly two separators introduces a UNC or DOS device
    // root; any other run is an over-spelled single separator.
    if leading == 2 {
        out.push_str("//");
    } else if leading > 0 {
        out.push('/');
    }
    let mut prev_sep = leading > 0;
    for ch in input[leading..].chars() {
        if ch == '/' || ch == '\\' {
            if !prev_sep {
                out.push('/');
            }
            prev_sep = true;
        } else {
            out.push(ch);
            prev_sep = false;
        }
    }

    // Interleaved so that `C:/foo /` ends up as `C:/foo`, not `C:/foo `.
    loop {
        let trimmed = out.trim_end().len();
        if trimmed < out.len() {
            out.truncate(trimmed);
            continue;
        }
        if out.ends_with('/') {
            let (_, root_len) = parse_root(&out);
            if out.len() > root_len {
                out.pop();
                continue;
            }
        }
        break;
    }

    if out == "//" {
        out.truncate(1);
    }

    let (root, root_len) = parse_root(&out);
    if root.is_rooted() && root_len == out.len() && !out.ends_with('/') {
        out.push('/');
    }

    uppercase_drive_letter(&mut out);

    out
}

/// Whether `path` is already in the canonical form produced by [`sanitize`].
pub fn is_sanitized(path: &str) -> bool {
    sanitize(path) == path
}

fn uppercase_drive_letter(path: &mut String) {
    let idx = {
        let b = path.as_bytes();
        if b.len() >= 2
            && b[0].is_ascii_lowercase()
            && b[1] == b':'
            && (b.len() == 2 || b[2] == b'/')
        {
            Some(0)
        } else if crate::root::has_device_prefix(path)
            && b.len() >= 6
            && b[4].is_ascii_lowercase()
            && b[5] == b':'
            && (b.len() == 6 || b[6] == b'/')
        {
            Some(4)
        } else {
            None
        }
    };
    if let Some(i) = idx {
        let upper = path.as_bytes()[i].to_ascii_uppercase() as char;
        path.replace_range(i..i + 1, upper.encode_utf8(&mut [0u8; 4]));
    }
}

/// Joins two sanitized paths. `b` must not be rooted.
pub fn join_str(a: &str, b: &str) -> String {
    debug_assert!(is_sanitized(a), "join lhs not sanitized: {a:?}");
    debug_assert!(is_sanitized(b), "join rhs not sanitized: {b:?}");
    debug_assert!(!is_rooted(b), "join rhs must be relative: {b:?}");
    if a.is_empty() {
        return b.to_owned();
    }
    if b.is_empty() {
        return a.to_owned();
    }
    let mut out = String::with_capacity(a.len() + b.len() + 1);
    out.push_str(a);
    if !a.ends_with('/') {
        out.push('/');
    }
    out.push_str(b);
    out
}

/// Strips `parent` off the front of `child`, yielding the relative remainder.
///
/// Matching is case-insensitive and respects segment boundaries; `child ==
/// parent` yields the empty relative path.
pub fn relativize<'a>(child: &'a str, parent: &str) -> Result<&'a str, PathError> {
    if eq_ignore_case(child, parent) {
        return Ok("");
    }
    if child.len() > parent.len() && eq_ignore_case(&child[..parent.len()], parent) {
        let rest = &child[parent.len()..];
        if parent.ends_with('/') {
            return Ok(rest);
        }
        if let Some(stripped) = rest.strip_prefix('/') {
            return Ok(stripped);
        }
    }
    Err(PathError::NotInFolder {
        child: child.to_owned(),
        parent: parent.to_owned(),
    })
}

/// Whether `child` lies strictly inside the directory `parent`.
///
/// Segment boundaries are respected, so `/foobar` is not inside `/foo`.
pub fn in_folder_str(child: &str, parent: &str) -> bool {
    if child.len() <= parent.len() || !eq_ignore_case(&child[..parent.len()], parent) {
        return false;
    }
    parent.ends_with('/') || child.as_bytes()[parent.len()] == b'/'
}

/// Whether `path` begins with `prefix` on a segment boundary. Unlike
/// [`in_folder_str`] this accepts equality.
pub fn starts_with_str(path: &str, prefix: &str) -> bool {
    eq_ignore_case(path, prefix) || in_folder_str(path, prefix)
}

/// Whether `path` ends with the relative `suffix` on a segment boundary.
pub fn ends_with_str(path: &str, suffix: &str) -> bool {
    if suffix.is_empty() {
        return true;
    }
    if path.len() < suffix.len() || !eq_ignore_case(&path[path.len() - suffix.len()..], suffix) {
        return false;
    }
    let boundary = path.len() - suffix.len();
    if boundary == 0 {
        return true;
    }
    path.as_bytes()[boundary - 1] == b'/' || boundary == root_length(path)
}

pub fn is_rooted(path: &str) -> bool {
    parse_root(path).0.is_rooted()
}

pub fn root_type(path: &str) -> RootType {
    parse_root(path).0
}

pub fn root_length(path: &str) -> usize {
    parse_root(path).1
}

/// ASCII-ordinal case-insensitive equality; the comparison rule shared by
/// equality, ordering and hashing of all path values.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .all(|(x, y)| x.to_ascii_lowercase() == y.to_ascii_lowercase())
}

/// ASCII-ordinal case-insensitive comparison.
pub fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    for (x, y) in a.bytes().zip(b.bytes()) {
        match x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase()) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// Feeds the case-folded bytes of `s` into `state`. Strings that are equal
/// under [`eq_ignore_case`] hash identically.
pub fn hash_ignore_case<H: Hasher>(s: &str, state: &mut H) {
    for b in s.bytes() {
        state.write_u8(b.to_ascii_lowercase());
    }
}

/// Part-wise comparison of two segment sequences under the case-insensitive
/// rule; used for ordering path values.
pub fn cmp_parts<'a>(
    mut a: impl Iterator<Item = &'a str>,
    mut b: impl Iterator<Item = &'a str>,
) -> Ordering {
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match cmp_ignore_case(x, y) {
                Ordering::Equal => {}
                other => return other,
            },
        }
    }
}

/// Iterates the segments of a sanitized path in order. A root part is
/// emitted as a single leading segment (`"/"`, `"C:/"`, `"//Server/"`).
pub fn walk_parts(path: &str) -> impl DoubleEndedIterator<Item = &str> + '_ {
    let (_, root_len) = parse_root(path);
    let root = (root_len > 0).then(|| &path[..root_len]);
    root.into_iter()
        .chain(path[root_len..].split('/').filter(|s| !s.is_empty()))
}

/// Materializes [`walk_parts`] into a vector.
pub fn get_parts(path: &str) -> Vec<&str> {
    walk_parts(path).collect()
}

/// Index at which the file name of a sanitized path starts. For a bare root
/// this is `path.len()` (the file name is empty).
pub fn file_name_index(path: &str) -> usize {
    let (_, root_len) = parse_root(path);
    if path.len() == root_len {
        return path.len();
    }
    match path.rfind('/') {
        Some(i) if i + 1 > root_len => i + 1,
        _ => root_len,
    }
}

/// The last segment of a sanitized path; empty for a bare root.
pub fn file_name_str(path: &str) -> &str {
    &path[file_name_index(path)..]
}

/// The directory part of a sanitized path. `parent_str(root) == root`, and
/// the parent of a single-segment relative path is the empty string.
pub fn parent_str(path: &str) -> &str {
    let (_, root_len) = parse_root(path);
    let name_start = file_name_index(path);
    if name_start <= root_len {
        return &path[..root_len];
    }
    // Name follows a separator; the directory stops before it, except when
    // the directory is the root itself (which keeps its separator).
    let end = name_start - 1;
    if end < root_len {
        &path[..root_len]
    } else if end == root_len {
        // e.g. "/foo": the separator before the name belongs to the root.
        &path[..root_len.max(1)]
    } else {
        &path[..end]
    }
}

/// Extension of a file name, without the dot. A leading dot marks a hidden
/// file, not an extension.
pub(crate) fn extension_str(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) if i > 0 => &name[i + 1..],
        _ => "",
    }
}

fn stem_str(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    }
}

/// Replaces the extension of `name` with `ext` (accepted with or without a
/// leading dot; empty strips the extension).
pub(crate) fn set_extension(name: &str, ext: &str) -> String {
    let ext = ext.strip_prefix('.').unwrap_or(ext);
    let stem = stem_str(name);
    if ext.is_empty() {
        stem.to_owned()
    } else {
        format!("{stem}.{ext}")
    }
}

/// Appends `ext` as an additional extension (`a.txt` + `bak` = `a.txt.bak`).
pub(crate) fn push_extension(name: &str, ext: &str) -> String {
    let ext = ext.strip_prefix('.').unwrap_or(ext);
    if ext.is_empty() {
        name.to_owned()
    } else {
        format!("{name}.{ext}")
    }
}
