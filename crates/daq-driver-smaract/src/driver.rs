//! MCS2 driver availability.
//!
//! [`McsDriver`] is the injected capability provider every stage and the
//! discovery routine are built with. It is either loaded (wraps a
//! [`McsControl`] implementation) or unavailable (the vendor library could not
//! be loaded). All hardware-touching operations check it first.

use crate::ctl::McsControl;
use crate::session::SessionRegistry;
use daq_core::error::{StageError, StageResult};
use std::fmt;
use std::sync::Arc;

/// Driver type key, also used in error messages.
pub const DRIVER_NAME: &str = "smaract_mcs2";

enum Availability {
    Loaded(Arc<dyn McsControl>),
    Unavailable(String),
}

struct Inner {
    availability: Availability,
    sessions: SessionRegistry,
}

/// Shared handle to the MCS2 control library. Clones share one session registry.
#[derive(Clone)]
pub struct McsDriver {
    inner: Arc<Inner>,
}

impl McsDriver {
    /// Gate backed by a control library.
    pub fn loaded(control: Arc<dyn McsControl>) -> Self {
        Self::with_availability(Availability::Loaded(control))
    }

    /// A driver whose library failed to load. `reason` ends up in every
    /// [`StageError::DriverUnavailable`] it produces.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::with_availability(Availability::Unavailable(reason.into()))
    }

    fn with_availability(availability: Availability) -> Self {
        Self {
            inner: Arc::new(Inner {
                availability,
                sessions: SessionRegistry::new(),
            }),
        }
    }

    /// Whether a control library is present.
    pub fn is_loaded(&self) -> bool {
        matches!(self.inner.availability, Availability::Loaded(_))
    }

    /// The control library, or [`StageError::DriverUnavailable`].
    pub fn control(&self) -> StageResult<&Arc<dyn McsControl>> {
        match &self.inner.availability {
            Availability::Loaded(control) => Ok(control),
            Availability::Unavailable(reason) => Err(StageError::DriverUnavailable {
                driver: DRIVER_NAME.to_string(),
                reason: reason.clone(),
            }),
        }
    }

    /// Sessions shared by every stage on this driver.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }
}

impl fmt::Debug for McsDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner.availability {
            Availability::Loaded(_) => "loaded".to_string(),
            Availability::Unavailable(reason) => format!("unavailable ({reason})"),
        };
        f.debug_struct("McsDriver")
            .field("state", &state)
            .field("open_sessions", &self.inner.sessions.len())
            .finish()
    }
}
