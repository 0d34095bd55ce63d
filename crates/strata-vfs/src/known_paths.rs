//! Well-known locations identified by a closed enumeration.

use std::env;
use std::path::PathBuf;

use strata_path::AbsolutePath;

/// A well-known location on the host.
///
/// On Unix the XDG identifiers honor their environment variables with the
/// usual fallbacks (`$HOME/.config`, `$HOME/.cache`, `$HOME/.local/share`,
/// `$HOME/.local/state`, and the temp directory for `XDG_RUNTIME_DIR`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownPath {
    EntryDirectory,
    CurrentDirectory,
    CommonApplicationData,
    ProgramFiles,
    ProgramFilesX86,
    CommonProgramFiles,
    CommonProgramFilesX86,
    Temp,
    HomeDirectory,
    ApplicationData,
    LocalApplicationData,
    MyDocuments,
    MyGames,
    XdgConfigHome,
    XdgCacheHome,
    XdgDataHome,
    XdgStateHome,
    XdgRuntimeDir,
}

impl KnownPath {
    pub fn name(&self) -> &'static str {
        match self {
            KnownPath::EntryDirectory => "entry-dir",
            KnownPath::CurrentDirectory => "current-dir",
            KnownPath::CommonApplicationData => "common-appdata",
            KnownPath::ProgramFiles => "program-files",
            KnownPath::ProgramFilesX86 => "program-files-x86",
            KnownPath::CommonProgramFiles => "common-program-files",
            KnownPath::CommonProgramFilesX86 => "common-program-files-x86",
            KnownPath::Temp => "temp",
            KnownPath::HomeDirectory => "home",
            KnownPath::ApplicationData => "appdata",
            KnownPath::LocalApplicationData => "local-appdata",
            KnownPath::MyDocuments => "my-documents",
            KnownPath::MyGames => "my-games",
            KnownPath::XdgConfigHome => "XDG_CONFIG_HOME",
            KnownPath::XdgCacheHome => "XDG_CACHE_HOME",
            KnownPath::XdgDataHome => "XDG_DATA_HOME",
            KnownPath::XdgStateHome => "XDG_STATE_HOME",
            KnownPath::XdgRuntimeDir => "XDG_RUNTIME_DIR",
        }
    }
}

fn to_absolute(path: PathBuf) -> Option<AbsolutePath> {
    AbsolutePath::parse(&path.to_string_lossy()).ok()
}

/// `$var` when set to an absolute path, otherwise `$HOME/<fallback>`.
fn xdg_dir(var: &str, fallback: &str) -> Option<AbsolutePath> {
    if let Some(from_env) = env::var_os(var).and_then(|v| to_absolute(PathBuf::from(v))) {
        return Some(from_env);
    }
    let home = to_absolute(dirs_next::home_dir()?)?;
    let rel = strata_path::RelativePath::parse(fallback).ok()?;
    Some(home.join(&rel))
}

/// Resolves `known` against the host. `None` when the location does not
/// exist on this platform.
pub(crate) fn resolve(known: KnownPath) -> Option<AbsolutePath> {
    match known {
        KnownPath::EntryDirectory => {
            let exe = env::current_exe().ok()?;
            to_absolute(exe.parent()?.to_path_buf())
        }
        KnownPath::CurrentDirectory => to_absolute(env::current_dir().ok()?),
        KnownPath::Temp => to_absolute(env::temp_dir()),
        KnownPath::HomeDirectory => to_absolute(dirs_next::home_dir()?),
        KnownPath::ApplicationData => to_absolute(dirs_next::config_dir()?),
        KnownPath::LocalApplicationData => to_absolute(dirs_next::data_local_dir()?),
        KnownPath::MyDocuments => to_absolute(dirs_next::document_dir()?),
        KnownPath::MyGames => {
            let docs = to_absolute(dirs_next::document_dir()?)?;
            let rel = strata_path::RelativePath::parse("My Games").ok()?;
            Some(docs.join(&rel))
        }
        KnownPath::CommonApplicationData => {
            if cfg!(windows) {
                env::var_os("ProgramData").and_then(|v| to_absolute(PathBuf::from(v)))
            } else {
                AbsolutePath::parse("/usr/share").ok()
            }
        }
        KnownPath::ProgramFiles => program_files_var("ProgramFiles"),
        KnownPath::ProgramFilesX86 => program_files_var("ProgramFiles(x86)"),
        KnownPath::CommonProgramFiles => program_files_var("CommonProgramFiles"),
        KnownPath::CommonProgramFilesX86 => program_files_var("CommonProgramFiles(x86)"),
        KnownPath::XdgConfigHome => xdg_dir("XDG_CONFIG_HOME", ".config"),
        KnownPath::XdgCacheHome => xdg_dir("XDG_CACHE_HOME", ".cache"),
        KnownPath::XdgDataHome => xdg_dir("XDG_DATA_HOME", ".local/share"),
        KnownPath::XdgStateHome => xdg_dir("XDG_STATE_HOME", ".local/state"),
        KnownPath::XdgRuntimeDir => {
            if let Some(from_env) =
                env::var_os("XDG_RUNTIME_DIR").and_then(|v| to_absolute(PathBuf::from(v)))
            {
                return Some(from_env);
            }
            to_absolute(env::temp_dir())
        }
    }
}

/// Windows-only locations published through environment variables.
fn program_files_var(var: &str) -> Option<AbsolutePath> {
    if !cfg!(windows) {
        return None;
    }
    env::var_os(var).and_then(|v| to_absolute(PathBuf::from(v)))
}
