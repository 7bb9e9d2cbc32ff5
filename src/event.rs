//! Filesystem events as seen by the directory watcher
//!
//! `notify` reports a rich, platform-flavoured event tree. The watcher only
//! needs five kinds, so raw events are flattened here into [`FsEvent`]s.

use std::fmt;
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::EventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

impl FsEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsEventKind::Create => "CREATE",
            FsEventKind::Write => "WRITE",
            FsEventKind::Remove => "REMOVE",
            FsEventKind::Rename => "RENAME",
            FsEventKind::Chmod => "CHMOD",
        }
    }
}

impl fmt::Display for FsEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single change to a single path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
    pub kind: FsEventKind,
}

impl FsEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FsEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Base name of the path, used as the remote record name
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// Flatten a `notify` event into zero or more [`FsEvent`]s
///
/// A rename observed from both ends becomes a `Rename` of the old path
/// followed by a `Create` of the new one. A rename whose direction is unknown
/// is resolved by checking whether the path still exists.
pub fn translate(event: &notify::Event) -> Vec<FsEvent> {
    let paths = &event.paths;
    let each = |kind: FsEventKind| -> Vec<FsEvent> {
        paths.iter().map(|p| FsEvent::new(p, kind)).collect()
    };

    match &event.kind {
        EventKind::Create(_) => each(FsEventKind::Create),
        EventKind::Remove(_) => each(FsEventKind::Remove),
        EventKind::Modify(ModifyKind::Metadata(_)) => each(FsEventKind::Chmod),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => each(FsEventKind::Rename),
            RenameMode::To => each(FsEventKind::Create),
            RenameMode::Both => match paths.as_slice() {
                [from, to, ..] => vec![
                    FsEvent::new(from, FsEventKind::Rename),
                    FsEvent::new(to, FsEventKind::Create),
                ],
                _ => each(FsEventKind::Rename),
            },
            RenameMode::Any | RenameMode::Other => paths
                .iter()
                .map(|p| FsEvent::new(p, rename_direction(p)))
                .collect(),
        },
        EventKind::Modify(_) => each(FsEventKind::Write),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

fn rename_direction(path: &Path) -> FsEventKind {
    if path.exists() {
        FsEventKind::Create
    } else {
        FsEventKind::Rename
    }
}
