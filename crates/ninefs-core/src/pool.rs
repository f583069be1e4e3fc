// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Process-wide pool of interned paths and their open handles.
//!
//! Every canonical path string maps to at most one live [`Path`], and every
//! open descriptor against it lives in that path's handle table. Reference
//! counts are manual: the pool must observe "decrement reached zero" and
//! "removed from the map" as one atomic step under its own lock, which is
//! exactly the guarantee `Arc::strong_count` cannot give. `Arc` is only the
//! allocation vehicle; the logical count decides removal and destruction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ninefs_proto::QidType;
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::FsResult;
use crate::ioctx::IoCtx;
use crate::types::{HandleId, User};

struct PathInner {
    refcount: u32,
    handles: HashMap<HandleId, Arc<IoCtx>>,
}

/// An interned, reference-counted path. Obtained from
/// [`PathPool::intern`] and returned with [`PathPool::release`]; every
/// intern must be matched by exactly one release.
pub struct Path {
    name: String,
    inner: Mutex<PathInner>,
}

impl Path {
    /// The canonical path string.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current logical reference count (diagnostics only).
    pub fn refcount(&self) -> u32 {
        self.inner.lock().unwrap().refcount
    }
}

impl std::fmt::Debug for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Path")
            .field("name", &self.name)
            .field("refcount", &inner.refcount)
            .field("handles", &inner.handles.len())
            .finish()
    }
}

/// Per-path observability record, see [`PathPool::snapshot`].
#[derive(Clone, Debug, Serialize)]
pub struct PathStats {
    pub path: String,
    pub refcount: u32,
    /// Number of distinct open handles.
    pub handles: u32,
    /// Summed reference count across those handles.
    pub handle_refs: u32,
}

/// The process-wide path pool. One instance lives for the whole server.
pub struct PathPool {
    paths: Mutex<HashMap<String, Arc<Path>>>,
    next_handle_id: AtomicU64,
}

impl PathPool {
    pub fn new() -> Self {
        PathPool {
            paths: Mutex::new(HashMap::new()),
            next_handle_id: AtomicU64::new(1),
        }
    }

    /// Intern `name`: return the existing path with its count bumped, or
    /// insert a fresh one. Lookup-or-insert is a single operation under the
    /// pool lock, so two concurrent interns of the same string always agree
    /// on one instance.
    pub fn intern(&self, name: &str) -> Arc<Path> {
        let mut paths = self.paths.lock().unwrap();
        if let Some(path) = paths.get(name) {
            path.inner.lock().unwrap().refcount += 1;
            return Arc::clone(path);
        }
        trace!(path = name, "interning new path");
        let path = Arc::new(Path {
            name: name.to_owned(),
            inner: Mutex::new(PathInner {
                refcount: 1,
                handles: HashMap::new(),
            }),
        });
        paths.insert(name.to_owned(), Arc::clone(&path));
        path
    }

    /// Intern the child of an already interned path.
    pub fn intern_join(&self, base: &Path, child: &str) -> Arc<Path> {
        self.intern(&format!("{}/{}", base.name, child))
    }

    /// Drop one reference. The decrement and the conditional map removal
    /// happen under the pool lock, so a concurrent intern can never observe
    /// a path that is about to be freed.
    pub fn release(&self, path: Arc<Path>) {
        let mut paths = self.paths.lock().unwrap();
        let remaining = {
            let mut inner = path.inner.lock().unwrap();
            inner.refcount -= 1;
            inner.refcount
        };
        if remaining == 0 {
            trace!(path = path.name.as_str(), "releasing last path reference");
            paths.remove(&path.name);
        }
    }

    /// Open a handle against `path`, or reuse a compatible one.
    ///
    /// With `share` set and a read-only request, an existing regular-file
    /// handle with identical open flags and the same owning uid is reused.
    /// Directory handles are never shared: the stream cursor is private.
    /// Candidates are interchangeable, so the first match wins.
    ///
    /// The real open on the miss path runs with no lock held; the table is
    /// re-locked only to insert the result.
    pub fn open(
        &self,
        path: &Arc<Path>,
        user: &Arc<User>,
        flags: i32,
        mode: u32,
        share: bool,
    ) -> FsResult<Arc<IoCtx>> {
        if share && flags & libc::O_ACCMODE == libc::O_RDONLY {
            let inner = path.inner.lock().unwrap();
            for ctx in inner.handles.values() {
                if ctx.qid().type_ != QidType::File {
                    continue;
                }
                if ctx.flags() != flags {
                    continue;
                }
                if ctx.user().uid != user.uid {
                    continue;
                }
                ctx.incref();
                debug!(path = path.name.as_str(), uid = user.uid, "sharing read-only handle");
                return Ok(Arc::clone(ctx));
            }
        }
        let id = HandleId(self.next_handle_id.fetch_add(1, Ordering::Relaxed));
        let ctx = Arc::new(IoCtx::open(id, Arc::clone(user), &path.name, flags, mode)?);
        path.inner
            .lock()
            .unwrap()
            .handles
            .insert(id, Arc::clone(&ctx));
        Ok(ctx)
    }

    /// Close a handle reference. The decrement and the conditional unlink
    /// happen under the path lock; the real close runs after it is dropped
    /// so slow storage never blocks unrelated access to the same path.
    pub fn close(&self, path: &Path, ctx: Arc<IoCtx>) -> FsResult<()> {
        let remaining = {
            let mut inner = path.inner.lock().unwrap();
            let remaining = ctx.decref();
            if remaining == 0 {
                inner.handles.remove(&ctx.id());
            }
            remaining
        };
        if remaining == 0 {
            // The caller's Arc and the table's were the last two; unwrap to
            // close destructively and surface the native close error.
            if let Ok(ctx) = Arc::try_unwrap(ctx) {
                ctx.destroy()?;
            }
        }
        Ok(())
    }

    /// Live diagnostics: per interned path, its reference count plus the
    /// count and summed reference count of its handles. Not used for
    /// control flow.
    pub fn snapshot(&self) -> Vec<PathStats> {
        let paths = self.paths.lock().unwrap();
        paths
            .values()
            .map(|path| {
                let inner = path.inner.lock().unwrap();
                PathStats {
                    path: path.name.clone(),
                    refcount: inner.refcount,
                    handles: inner.handles.len() as u32,
                    handle_refs: inner.handles.values().map(|c| c.refcount()).sum(),
                }
            })
            .collect()
    }

    /// Number of interned paths (diagnostics only).
    pub fn len(&self) -> usize {
        self.paths.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PathPool {
    fn default() -> Self {
        Self::new()
    }
}
