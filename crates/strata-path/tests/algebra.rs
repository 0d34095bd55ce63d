//! Algebraic laws of the path types.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use strata_path::{is_sanitized, sanitize, AbsolutePath, RelativePath};
use test_case::test_case;

fn abs(s: &str) -> AbsolutePath {
    AbsolutePath::parse(s).unwrap()
}

fn rel(s: &str) -> RelativePath {
    RelativePath::parse(s).unwrap()
}

#[test_case("C:\\foo\\\\bar\\")]
#[test_case("/a/b/../c")]
#[test_case("\\\\Server\\share\\  ")]
#[test_case("//?/C:/x/")]
#[test_case("relative\\path")]
#[test_case("")]
fn sanitize_is_idempotent_and_produces_sanitized(input: &str) {
    let once = sanitize(input);
    assert_eq!(sanitize(&once), once);
    assert!(is_sanitized(&once));
}

#[test]
fn sanitize_wire_examples() {
    assert_eq!(sanitize("C:\\foo\\\\bar\\"), "C:/foo/bar");
    assert_eq!(
        sanitize("\\\\?\\Volume{01234567-89ab-cdef-0123-456789abcdef}\\foo"),
        "//?/Volume{01234567-89ab-cdef-0123-456789abcdef}/foo"
    );
}

#[test_case("/base", "a"; "single segment")]
#[test_case("/base", "a/b/c.txt"; "nested")]
#[test_case("C:/Data", "Save Games/slot1.bin"; "dos with spaces")]
#[test_case("//Server/share", "x/y"; "unc")]
fn join_relativize_roundtrip(base: &str, relative: &str) {
    let base = abs(base);
    let relative = rel(relative);
    assert_eq!(
        base.join(&relative).relative_to(&base).unwrap(),
        relative
    );
}

#[test_case("/foo/bar.txt")]
#[test_case("C:/x/y")]
#[test_case("//Server/share/file")]
fn parent_join_name_roundtrip(path: &str) {
    let path = abs(path);
    assert_eq!(path.parent().join(&path.name()), path);
}

#[test_case("/a/b/c")]
#[test_case("C:/a")]
#[test_case("/")]
fn root_is_a_fixed_point_of_parent(path: &str) {
    let root = abs(path).root();
    assert_eq!(root.parent(), root);
}

#[test]
fn in_folder_respects_segment_boundaries() {
    assert!(!abs("/foobar").in_folder(&abs("/foo")));
    assert!(!abs("/foobar").starts_with(&abs("/foo")));
    assert!(abs("/foo/bar").in_folder(&abs("/foo")));
}

#[test]
fn equal_paths_hash_equally() {
    let digest = |p: &AbsolutePath| {
        let mut hasher = DefaultHasher::new();
        p.hash(&mut hasher);
        hasher.finish()
    };
    let pairs = [
        ("/Foo/Bar", "/foo/bar"),
        ("C:/Game/Data", "c:/game/data"),
        ("//Server/Share/x", "//server/share/X"),
    ];
    for (a, b) in pairs {
        let (a, b) = (abs(a), abs(b));
        assert_eq!(a, b);
        assert_eq!(digest(&a), digest(&b));
    }
}
