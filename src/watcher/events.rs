//! Filesystem event types and translation from raw notifications.

use std::path::PathBuf;

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind};

/// A change the index must react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    /// A path appeared.
    Created { path: PathBuf, is_dir: bool },
    /// A path disappeared.
    Deleted { path: PathBuf, is_dir: bool },
    /// A path was renamed within the watched tree.
    Moved {
        from: PathBuf,
        to: PathBuf,
        is_dir: bool,
    },
    /// Contents or attributes of an existing path changed.
    Modified { path: PathBuf },
}

impl FsEvent {
    /// The path the event leaves behind (the destination for moves).
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Created { path, .. } | Self::Deleted { path, .. } | Self::Modified { path } => {
                path
            }
            Self::Moved { to, .. } => to,
        }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Deleted { .. } => "deleted",
            Self::Moved { .. } => "moved",
            Self::Modified { .. } => "modified",
        }
    }
}

/// Turns raw `notify` events into [`FsEvent`]s.
///
/// Backends report a rename as two halves (`From` then `To`) sharing a
/// tracker id, sometimes followed by a combined `Both` event. The halves are
/// paired here; a `From` that never gets its `To` becomes a deletion when
/// the next event arrives or [`flush`](Self::flush) is called.
#[derive(Debug, Default)]
pub struct EventTranslator {
    pending_from: Option<(PathBuf, Option<usize>)>,
    last_move: Option<(PathBuf, PathBuf)>,
}

impl EventTranslator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a rename half is waiting for its partner.
    #[must_use]
    pub const fn has_pending(&self) -> bool {
        self.pending_from.is_some()
    }

    /// Resolve a pending unpaired `From` as a deletion.
    pub fn flush(&mut self) -> Option<FsEvent> {
        self.pending_from.take().map(|(path, _)| FsEvent::Deleted {
            is_dir: false,
            path,
        })
    }

    /// Translate one raw event, in arrival order.
    pub fn translate(&mut self, event: Event) -> Vec<FsEvent> {
        let tracker = event.attrs.tracker();
        let mut out = Vec::new();

        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                out.extend(self.flush());
                self.last_move = None;
                if let Some(path) = event.paths.into_iter().next() {
                    self.pending_from = Some((path, tracker));
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                self.last_move = None;
                let Some(to) = event.paths.into_iter().next() else {
                    return out;
                };
                match self.pending_from.take() {
                    Some((from, pending)) if pending == tracker => {
                        out.extend(self.moved(from, to));
                    }
                    unpaired => {
                        if let Some((path, _)) = unpaired {
                            out.push(FsEvent::Deleted {
                                path,
                                is_dir: false,
                            });
                        }
                        out.push(FsEvent::Created {
                            is_dir: to.is_dir(),
                            path: to,
                        });
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut paths = event.paths.into_iter();
                let (Some(from), Some(to)) = (paths.next(), paths.next()) else {
                    return out;
                };
                if self.last_move.take() == Some((from.clone(), to.clone())) {
                    return out;
                }
                if self
                    .pending_from
                    .as_ref()
                    .is_some_and(|(pending, _)| *pending == from)
                {
                    self.pending_from = None;
                }
                out.extend(self.flush());
                out.extend(self.moved(from, to));
                // a Both is never followed by a duplicate of itself
                self.last_move = None;
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                out.extend(self.flush());
                self.last_move = None;
                for path in event.paths {
                    out.push(if path.exists() {
                        FsEvent::Created {
                            is_dir: path.is_dir(),
                            path,
                        }
                    } else {
                        FsEvent::Deleted {
                            path,
                            is_dir: false,
                        }
                    });
                }
            }
            EventKind::Create(kind) => {
                out.extend(self.flush());
                self.last_move = None;
                for path in event.paths {
                    let is_dir = matches!(kind, CreateKind::Folder) || path.is_dir();
                    out.push(FsEvent::Created { path, is_dir });
                }
            }
            EventKind::Remove(kind) => {
                out.extend(self.flush());
                self.last_move = None;
                let is_dir = matches!(kind, RemoveKind::Folder);
                for path in event.paths {
                    out.push(FsEvent::Deleted { path, is_dir });
                }
            }
            EventKind::Modify(_) | EventKind::Any => {
                out.extend(self.flush());
                self.last_move = None;
                out.extend(event.paths.into_iter().map(|path| FsEvent::Modified { path }));
            }
            EventKind::Access(_) | EventKind::Other => {}
        }

        out
    }

    fn moved(&mut self, from: PathBuf, to: PathBuf) -> Option<FsEvent> {
        if from == to {
            return None;
        }
        self.last_move = Some((from.clone(), to.clone()));
        Some(FsEvent::Moved {
            is_dir: to.is_dir(),
            from,
            to,
        })
    }
}
