//! Explicit ownership scopes.
//!
//! A `Scope` collects release callbacks and runs each of them exactly once,
//! newest first, when it is disposed. Pointers and containers register a
//! callback on the scope they are created in; that callback gives back the
//! one usage count the scope owns.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{PointerError, Result};

type Release = Box<dyn FnOnce() + Send>;

struct ScopeInner {
    name: Arc<str>,
    /// `None` once disposed.
    releases: Mutex<Option<Vec<Release>>>,
}

#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.inner.releases.lock().as_ref().map(Vec::len);
        f.debug_struct("Scope")
            .field("name", &self.inner.name)
            .field("pending_releases", &pending)
            .finish()
    }
}

impl Scope {
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            inner: Arc::new(ScopeInner {
                name: Arc::from(name),
                releases: Mutex::new(Some(Vec::new())),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn origin(&self) -> Arc<str> {
        self.inner.name.clone()
    }

    /// Creates a scope that is disposed together with this one.
    pub fn child(&self, name: &str) -> Result<Scope> {
        let child = Scope::new(format!("{}/{}", self.inner.name, name));
        let registered = child.clone();
        self.on_dispose(move || registered.dispose())?;
        Ok(child)
    }

    /// Registers a callback to run when the scope is disposed.
    pub fn on_dispose(&self, release: impl FnOnce() + Send + 'static) -> Result<()> {
        match self.inner.releases.lock().as_mut() {
            Some(releases) => {
                releases.push(Box::new(release));
                Ok(())
            }
            None => Err(PointerError::ScopeDisposed(self.inner.name.to_string())),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.releases.lock().is_none()
    }

    /// Runs every registered callback, newest first. Later calls do nothing.
    pub fn dispose(&self) {
        let releases = self.inner.releases.lock().take();
        let Some(releases) = releases else {
            return;
        };
        for release in releases.into_iter().rev() {
            release();
        }
    }
}
