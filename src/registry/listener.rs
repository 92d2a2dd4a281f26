//! Listener registrations and their per-payload attachments

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, Weak},
};

use crate::{
    error::Result,
    filter::PayloadFilter,
    payload::{OpenContext, Payload},
};

/// Private state a listener keeps for one attached payload
pub type ListenerState = Box<dyn Any + Send>;

/// Answer of a listener to a newly opened payload
pub enum OpenOutcome {
    /// Attach to the payload and keep this state for it
    Continue(ListenerState),
    /// Not interested in this payload
    Stop,
    /// Failed to open, logged and ignored
    Error,
}

impl fmt::Debug for OpenOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue(_) => f.write_str("Continue(..)"),
            Self::Stop => f.write_str("Stop"),
            Self::Error => f.write_str("Error"),
        }
    }
}

/// Consumer of payload byte streams.
///
/// `open` is called once per matching payload when it opens, `write` with
/// every chunk of the body in order, and `close` once at the end of the
/// payload or when the registration goes away. A failed `write` closes
/// this listener for that payload only.
pub trait PayloadListener: Send + Sync {
    fn open(&self, ctx: &mut OpenContext<'_>) -> OpenOutcome;

    fn write(&self, state: &mut ListenerState, data: &[u8]) -> Result<()>;

    fn close(&self, state: ListenerState) -> Result<()>;
}

/// A listener subscription, global or scoped to one type
pub struct Registration {
    owner: String,
    filter: Option<Box<dyn PayloadFilter>>,
    listener: Arc<dyn PayloadListener>,
    /// Payloads this registration is attached to, by payload id
    ploads: Mutex<HashMap<u64, Weak<Payload>>>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("owner", &self.owner)
            .field("filter", &self.filter.is_some())
            .field("attached", &self.attached_count())
            .finish()
    }
}

impl Registration {
    pub(crate) fn new(
        owner: impl Into<String>,
        filter: Option<Box<dyn PayloadFilter>>,
        listener: Arc<dyn PayloadListener>,
    ) -> Self {
        Self {
            owner: owner.into(),
            filter,
            listener,
            ploads: Mutex::new(HashMap::new()),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn filter(&self) -> Option<&dyn PayloadFilter> {
        self.filter.as_deref()
    }

    pub fn listener(&self) -> &Arc<dyn PayloadListener> {
        &self.listener
    }

    pub(crate) fn attach(&self, pload: &Arc<Payload>) {
        self.ploads
            .lock()
            .unwrap()
            .insert(pload.id(), Arc::downgrade(pload));
    }

    pub(crate) fn detach(&self, pload_id: u64) {
        self.ploads.lock().unwrap().remove(&pload_id);
    }

    /// Empty the index, returning the payloads still alive
    pub(crate) fn drain_ploads(&self) -> Vec<Arc<Payload>> {
        let drained: Vec<Weak<Payload>> = {
            let mut ploads = self.ploads.lock().unwrap();
            ploads.drain().map(|(_, pload)| pload).collect()
        };
        drained.iter().filter_map(Weak::upgrade).collect()
    }

    /// Number of payloads currently attached
    pub fn attached_count(&self) -> usize {
        self.ploads.lock().unwrap().len()
    }
}

/// A registration attached to one payload, with the listener's state
pub(crate) struct Listener {
    pub(crate) reg: Arc<Registration>,
    pub(crate) state: ListenerState,
}
