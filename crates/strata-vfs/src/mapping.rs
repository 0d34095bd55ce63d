//! Path rewriting applied at every filesystem entry point.

use std::collections::HashMap;

use strata_path::AbsolutePath;

use crate::known_paths::KnownPath;

/// Rewrite tables consulted before an operation is dispatched to a backend.
///
/// A requested path is rewritten by direct lookup first, otherwise by
/// rebasing onto the deepest mapped ancestor. `unmap` is the inverse and is
/// applied to paths handed back to the caller, so user code never observes
/// backend-space paths.
#[derive(Default, Clone)]
pub struct PathMappings {
    forward: HashMap<AbsolutePath, AbsolutePath>,
    reverse: HashMap<AbsolutePath, AbsolutePath>,
    known: HashMap<KnownPath, AbsolutePath>,
}

impl PathMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.known.is_empty()
    }

    pub fn add_mapping(&mut self, from: AbsolutePath, to: AbsolutePath) {
        self.reverse.insert(to.clone(), from.clone());
        self.forward.insert(from, to);
    }

    pub fn add_known_path(&mut self, known: KnownPath, to: AbsolutePath) {
        self.known.insert(known, to);
    }

    pub fn known(&self, known: KnownPath) -> Option<&AbsolutePath> {
        self.known.get(&known)
    }

    pub fn map(&self, path: &AbsolutePath) -> AbsolutePath {
        Self::rewrite(&self.forward, path)
    }

    pub fn unmap(&self, path: &AbsolutePath) -> AbsolutePath {
        Self::rewrite(&self.reverse, path)
    }

    fn rewrite(table: &HashMap<AbsolutePath, AbsolutePath>, path: &AbsolutePath) -> AbsolutePath {
        if table.is_empty() {
            return path.clone();
        }
        if let Some(target) = table.get(path) {
            return target.clone();
        }
        // Deepest mapped ancestor wins.
        for ancestor in path.get_all_parents().skip(1) {
            if let Some(target) = table.get(&ancestor) {
                let rest = path
                    .relative_to(&ancestor)
                    .expect("ancestor comes from get_all_parents");
                return target.join(&rest);
            }
        }
        path.clone()
    }
}
