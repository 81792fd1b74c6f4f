//! Shared physical sessions.
//!
//! Two logical stages on one dual-module controller share a single library
//! session. The primary stage is the [`Ownership::Owner`]: it opens the
//! session, registers it here and closes it on disconnect. The secondary stage
//! is a [`Ownership::Borrower`]: it looks the session up by locator and never
//! opens or closes anything.
//!
//! The registry only does bookkeeping. Opening and closing the library
//! session is done by the stage.

use crate::ctl::DeviceHandle;
use daq_core::error::{StageError, StageResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Role of a logical stage with respect to the physical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Opened the session and closes it
    Owner,
    /// Uses the owner's session, never closes it
    Borrower,
}

/// A live library session on one physical locator.
#[derive(Debug)]
pub struct Session {
    locator: String,
    handle: DeviceHandle,
    open: AtomicBool,
}

impl Session {
    /// Physical locator.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Library handle.
    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    /// False once the owner has closed the session.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

/// A stage's reference to a session, tagged with its ownership.
#[derive(Debug, Clone)]
pub struct SessionLease {
    session: Arc<Session>,
    ownership: Ownership,
}

impl SessionLease {
    /// Shared session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Library handle of the session.
    pub fn handle(&self) -> DeviceHandle {
        self.session.handle
    }

    /// Owner or borrower.
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Whether this lease closes the session on release.
    pub fn is_owner(&self) -> bool {
        self.ownership == Ownership::Owner
    }

    /// The handle, or [`StageError::NotConnected`] if the session was closed
    /// underneath this lease.
    pub fn live_handle(&self, stage: &str) -> StageResult<DeviceHandle> {
        if self.session.is_open() {
            Ok(self.session.handle)
        } else {
            Err(StageError::not_connected(stage))
        }
    }
}

/// Open sessions keyed by physical locator.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`StageError::FatalProtocol`] if `locator` already has an open
    /// session. Owners call this before opening.
    pub fn ensure_unowned(&self, locator: &str) -> StageResult<()> {
        if self.sessions.lock().contains_key(locator) {
            return Err(StageError::FatalProtocol(format!(
                "a session on '{locator}' is already open; only one owner per controller is allowed"
            )));
        }
        Ok(())
    }

    /// Record a session the caller has just opened.
    ///
    /// Fails with [`StageError::FatalProtocol`] when the locator is already
    /// registered or another live session reported the same handle. The
    /// handle is not closed on failure: a colliding handle belongs to the live
    /// session.
    pub fn register_owner(&self, locator: &str, handle: DeviceHandle) -> StageResult<SessionLease> {
        let mut sessions = self.sessions.lock();

        if sessions.contains_key(locator) {
            return Err(StageError::FatalProtocol(format!(
                "a session on '{locator}' is already open; only one owner per controller is allowed"
            )));
        }
        if let Some(other) = sessions.values().find(|s| s.handle == handle) {
            return Err(StageError::FatalProtocol(format!(
                "library returned handle {handle} for '{locator}', which is already in use by '{}'",
                other.locator
            )));
        }

        let session = Arc::new(Session {
            locator: locator.to_string(),
            handle,
            open: AtomicBool::new(true),
        });
        sessions.insert(locator.to_string(), Arc::clone(&session));

        Ok(SessionLease {
            session,
            ownership: Ownership::Owner,
        })
    }

    /// Borrow the owner's session on `locator`.
    pub fn borrow(&self, stage: &str, locator: &str) -> StageResult<SessionLease> {
        self.sessions
            .lock()
            .get(locator)
            .map(|session| SessionLease {
                session: Arc::clone(session),
                ownership: Ownership::Borrower,
            })
            .ok_or_else(|| StageError::Connection {
                stage: stage.to_string(),
                reason: format!("no open session on '{locator}'; connect the _Ch1-3 stage first"),
            })
    }

    /// Drop a lease. For an owner lease the session is unregistered and marked
    /// closed, and `true` is returned: the caller must close the library
    /// session. Borrower leases are just dropped.
    pub fn release(&self, lease: SessionLease) -> bool {
        if lease.ownership != Ownership::Owner {
            return false;
        }

        let mut sessions = self.sessions.lock();
        if sessions
            .get(&lease.session.locator)
            .is_some_and(|s| Arc::ptr_eq(s, &lease.session))
        {
            sessions.remove(&lease.session.locator);
        }
        lease.session.mark_closed();
        true
    }

    /// Whether `locator` has an open owner session.
    pub fn is_open(&self, locator: &str) -> bool {
        self.sessions.lock().contains_key(locator)
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrower_sees_owner_session() {
        let registry = SessionRegistry::new();
        let owner = registry.register_owner("LOC", 1).unwrap();
        let borrower = registry.borrow("LOC_Ch4-6", "LOC").unwrap();

        assert!(owner.is_owner());
        assert_eq!(borrower.ownership(), Ownership::Borrower);
        assert_eq!(borrower.handle(), 1);
        assert_eq!(borrower.live_handle("LOC_Ch4-6").unwrap(), 1);
    }

    #[test]
    fn borrow_without_owner_is_connection_error() {
        let registry = SessionRegistry::new();
        let err = registry.borrow("LOC_Ch4-6", "LOC").unwrap_err();
        assert!(matches!(err, StageError::Connection { .. }));
    }

    #[test]
    fn second_owner_is_fatal() {
        let registry = SessionRegistry::new();
        registry.register_owner("LOC", 1).unwrap();

        assert!(matches!(
            registry.ensure_unowned("LOC"),
            Err(StageError::FatalProtocol(_))
        ));
        assert!(matches!(
            registry.register_owner("LOC", 2),
            Err(StageError::FatalProtocol(_))
        ));
    }

    #[test]
    fn duplicate_handle_is_fatal() {
        let registry = SessionRegistry::new();
        registry.register_owner("LOC-A", 1).unwrap();
        let err = registry.register_owner("LOC-B", 1).unwrap_err();
        assert!(matches!(err, StageError::FatalProtocol(_)));
        assert!(!registry.is_open("LOC-B"));
    }

    #[test]
    fn releasing_owner_invalidates_borrowers() {
        let registry = SessionRegistry::new();
        let owner = registry.register_owner("LOC", 1).unwrap();
        let borrower = registry.borrow("LOC_Ch4-6", "LOC").unwrap();

        assert!(!registry.release(borrower.clone()));
        assert!(registry.is_open("LOC"));

        assert!(registry.release(owner));
        assert!(registry.is_empty());
        assert!(matches!(
            borrower.live_handle("LOC_Ch4-6"),
            Err(StageError::NotConnected { .. })
        ));
    }
}
