use std::fmt;

/// Classification of the prefix that anchors an absolute path.
///
/// Sanitized paths spell every root with forward slashes, so the DOS device
/// prefixes appear as `//./` or `//?/` rather than their native `\\.\` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootType {
    /// No root; the path is relative.
    None,
    /// `/`
    Unix,
    /// `C:/`
    Dos,
    /// `//Server/`
    Unc,
    /// `//./C:/` or `//?/C:/`
    DosDeviceDrive,
    /// `//./Volume{01234567-89ab-cdef-0123-456789abcdef}/`
    DosDeviceVolume,
}

impl RootType {
    /// Canonical length of the root part, where it is fixed.
    ///
    /// UNC roots have no fixed length (the server name varies) and relative
    /// paths have no root at all; both return `None`.
    pub fn canonical_length(&self) -> Option<usize> {
        match self {
            RootType::None | RootType::Unc => None,
            RootType::Unix => Some(1),
            RootType::Dos => Some(3),
            RootType::DosDeviceDrive => Some(7),
            RootType::DosDeviceVolume => Some(49),
        }
    }

    pub fn is_rooted(&self) -> bool {
        !matches!(self, RootType::None)
    }

    /// True for the root kinds that originate on DOS-like systems.
    pub fn is_dos_like(&self) -> bool {
        matches!(
            self,
            RootType::Dos | RootType::Unc | RootType::DosDeviceDrive | RootType::DosDeviceVolume
        )
    }
}

impl fmt::Display for RootType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RootType::None => "none",
            RootType::Unix => "unix",
            RootType::Dos => "dos",
            RootType::Unc => "unc",
            RootType::DosDeviceDrive => "dos-device-drive",
            RootType::DosDeviceVolume => "dos-device-volume",
        };
        f.write_str(name)
    }
}

/// `//./` or `//?/`. The two spellings are semantically equivalent.
pub(crate) fn has_device_prefix(path: &str) -> bool {
    let b = path.as_bytes();
    b.len() >= 4 && &b[..2] == b"//" && (b[2] == b'.' || b[2] == b'?') && b[3] == b'/'
}

fn is_guid(text: &str) -> bool {
    text.len() == 36
        && text.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_hexdigit(),
        })
}

/// Determines the root type of `path` and the length of its root part.
///
/// Tolerates roots spelled without their trailing separator (`C:`,
/// `//Server`) so that sanitization can recognize and complete them; on a
/// sanitized path the returned length is always the canonical one.
pub(crate) fn parse_root(path: &str) -> (RootType, usize) {
    let b = path.as_bytes();
    if b.is_empty() {
        return (RootType::None, 0);
    }
    if b.starts_with(b"//") {
        if has_device_prefix(path) {
            if b.len() >= 7 && b[4].is_ascii_alphabetic() && b[5] == b':' && b[6] == b'/' {
                return (RootType::DosDeviceDrive, 7);
            }
            if b.len() == 6 && b[4].is_ascii_alphabetic() && b[5] == b':' {
                return (RootType::DosDeviceDrive, 6);
            }
            if path.len() >= 48
                && path[4..11].eq_ignore_ascii_case("Volume{")
                && is_guid(&path[11..47])
                && b[47] == b'}'
            {
                return if b.len() >= 49 && b[48] == b'/' {
                    (RootType::DosDeviceVolume, 49)
                } else {
                    (RootType::DosDeviceVolume, 48)
                };
            }
            // Other device paths (`//./pipe/...`) degrade to UNC treatment.
        }
        return match path[2..].find('/') {
            Some(i) => (RootType::Unc, 3 + i),
            None => (RootType::Unc, path.len()),
        };
    }
    if b[0] == b'/' {
        return (RootType::Unix, 1);
    }
    if b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':' {
        if b.len() == 2 {
            return (RootType::Dos, 2);
        }
        if b[2] == b'/' {
            return (RootType::Dos, 3);
        }
    }
    (RootType::None, 0)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("/", RootType::Unix, 1)]
    #[test_case("/foo/bar", RootType::Unix, 1)]
    #[test_case("C:/", RootType::Dos, 3)]
    #[test_case("C:/foo", RootType::Dos, 3)]
    #[test_case("//Server/", RootType::Unc, 9)]
    #[test_case("//Server/share/x", RootType::Unc, 9)]
    #[test_case("//./C:/", RootType::DosDeviceDrive, 7; "device drive dot prefix")]
    #[test_case("//?/C:/", RootType::DosDeviceDrive, 7; "device drive question prefix")]
    #[test_case("//?/C:/foo", RootType::DosDeviceDrive, 7; "device drive question prefix with trailing path")]
    #[test_case(
        "//./Volume{01234567-89ab-cdef-0123-456789abcdef}/",
        RootType::DosDeviceVolume,
        49
    )]
    #[test_case(
        "//./Volume{01234567-89ab-cdef-0123-456789abcdef}/foo",
        RootType::DosDeviceVolume,
        49
    )]
    #[test_case("foo/bar", RootType::None, 0)]
    #[test_case("", RootType::None, 0)]
    fn classification(path: &str, root: RootType, len: usize) {
        assert_eq!(parse_root(path), (root, len));
    }

    #[test]
    fn device_dot_and_question_are_equivalent() {
        let (dot, _) = parse_root("//./C:/x");
        let (question, _) = parse_root("//?/C:/x");
        assert_eq!(dot, question);
    }

    #[test]
    fn malformed_volume_guid_degrades_to_unc() {
        let (root, _) = parse_root("//./Volume{not-a-guid}/foo");
        assert_eq!(root, RootType::Unc);
    }

    #[test]
    fn canonical_lengths() {
        assert_eq!(RootType::Dos.canonical_length(), Some(3));
        assert_eq!(RootType::DosDeviceDrive.canonical_length(), Some(7));
        assert_eq!(RootType::DosDeviceVolume.canonical_length(), Some(49));
        assert_eq!(RootType::Unc.canonical_length(), None);
    }
}
