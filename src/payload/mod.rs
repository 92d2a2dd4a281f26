//! The payload object: a streaming sink for one extracted binary object
//!
//! A payload buffers its first bytes until its content type is stable
//! (declared MIME type, magic sniffing, analyzer verdict), then opens once:
//! matching listeners are attached, an optional [`Store`] is created, and
//! every later [`Payload::append`] streams straight through to them.
//!
//! Calls on one payload must be serialized by the caller (typically the
//! owning session's lock). The internal mutex only makes the payload
//! shareable with its store and the listener registrations.

mod append;
mod context;

pub use context::{AnalysisContext, OpenContext, PayloadView};

use std::{
    any::Any,
    fmt,
    ops::{BitOr, BitOrAssign},
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use log::{debug, warn};

use crate::{
    data::DataRecord,
    decoder::{Decoder, PloadBuffer},
    error::{PloadError, Result},
    event::Event,
    mime::MimeType,
    registry::{Listener, PloadRegistry, PloadType, Registration},
    store::Store,
};

/// Opaque per-payload state owned by an analyzer
pub type AnalyzerState = Box<dyn Any + Send>;

/// Payload state bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PloadFlags(u8);

impl PloadFlags {
    pub const NONE: Self = Self(0);
    /// Classification still pending
    pub const NEED_ANALYSIS: Self = Self(1 << 0);
    /// Listener fan-out happened
    pub const OPENED: Self = Self(1 << 1);
    /// Content sniffing requested
    pub const NEED_MAGIC: Self = Self(1 << 2);
    /// Unrecoverable error, appends are ignored
    pub const IS_ERR: Self = Self(1 << 3);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for PloadFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PloadFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Mutable state, guarded by the payload mutex
pub(crate) struct PayloadState {
    flags: PloadFlags,
    ptype: Option<Arc<PloadType>>,
    mime_type: Option<MimeType>,
    filename: Option<String>,
    expected_size: usize,
    buffer: PloadBuffer,
    decoder: Option<Box<dyn Decoder>>,
    store: Option<Arc<Store>>,
    analyzer_state: Option<AnalyzerState>,
    data: Option<DataRecord>,
    listeners: Vec<Listener>,
    parent: Option<Weak<Payload>>,
    ended: bool,
}

impl PayloadState {
    fn decoder_mut(&mut self) -> Option<&mut dyn Decoder> {
        match &mut self.decoder {
            Some(decoder) => Some(decoder.as_mut()),
            None => None,
        }
    }

    fn set_filename(&mut self, name: &str) {
        let base = name.rsplit('/').next().unwrap_or(name);
        if !base.is_empty() {
            self.filename = Some(base.to_string());
        }
    }

    fn ensure_unclassified(&self) -> Result<()> {
        if self.flags.contains(PloadFlags::NEED_ANALYSIS) {
            Ok(())
        } else {
            Err(PloadError::AlreadyClassified)
        }
    }
}

/// One extracted binary object
pub struct Payload {
    id: u64,
    registry: Arc<PloadRegistry>,
    event: Arc<Event>,
    state: Mutex<PayloadState>,
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("id", &self.id)
            .field("event", &self.event.name())
            .finish()
    }
}

impl Payload {
    /// Allocate a payload for `related_event`. The payload keeps the event
    /// alive for as long as it exists.
    pub fn alloc(
        registry: &Arc<PloadRegistry>,
        related_event: Arc<Event>,
        flags: PloadFlags,
    ) -> Arc<Self> {
        let id = registry.next_payload_id();
        registry.stats().record_alloc();

        let state = PayloadState {
            flags: flags | PloadFlags::NEED_ANALYSIS,
            ptype: None,
            mime_type: None,
            filename: None,
            expected_size: 0,
            buffer: PloadBuffer::new(registry.page_size()),
            decoder: None,
            store: None,
            analyzer_state: None,
            data: None,
            listeners: Vec::new(),
            parent: None,
            ended: false,
        };

        Arc::new(Self {
            id,
            registry: Arc::clone(registry),
            event: related_event,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PayloadState> {
        self.state.lock().unwrap()
    }

    /// Declare the MIME type, e.g. from a Content-Type header.
    ///
    /// Also picks up the filename from the `name` parameter if none is set,
    /// and binds the registered type mapped to that MIME type.
    pub fn set_mime_type(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.ensure_unclassified()?;

        let mime = MimeType::parse(name)
            .ok_or_else(|| PloadError::invalid_parameter("mime_type", "Empty MIME type"))?;

        if state.filename.is_none() {
            if let Some(param) = mime.param("name") {
                let param = param.to_string();
                state.set_filename(&param);
            }
        }

        if let Some(ptype) = self.registry.type_for_mime(mime.name()) {
            state.ptype = Some(ptype);
        }
        state.mime_type = Some(mime);
        Ok(())
    }

    /// Bind a registered type by name
    pub fn set_type(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.ensure_unclassified()?;

        let ptype = self
            .registry
            .find_type(name)
            .ok_or_else(|| PloadError::unknown_type(name))?;
        state.ptype = Some(ptype);
        Ok(())
    }

    /// Declare the transfer encoding. Must precede any buffered bytes and
    /// can only be set once.
    pub fn set_encoding(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.ensure_unclassified()?;

        if !state.buffer.is_empty() {
            return Err(PloadError::AlreadyBuffered);
        }

        if state.decoder.is_some() {
            return Err(PloadError::invalid_parameter(
                "encoding",
                "Decoder already assigned",
            ));
        }

        if self.registry.config().is_noop_encoding(name) {
            return Ok(());
        }

        match self.registry.decoder_for(name) {
            Some(decoder) => {
                debug!("Payload {} decoding {}", self.id, name);
                state.decoder = Some(decoder);
                Ok(())
            }
            None => {
                warn!("No decoder for encoding {} of payload {}", name, self.id);
                state.flags.insert(PloadFlags::IS_ERR);
                Err(PloadError::unknown_encoding(name))
            }
        }
    }

    /// Size hint from the producing protocol
    pub fn set_expected_size(&self, size: usize) -> Result<()> {
        let mut state = self.lock();
        state.ensure_unclassified()?;
        state.expected_size = size;
        Ok(())
    }

    /// Set the filename, keeping only its last path component. An empty
    /// basename leaves the filename untouched.
    pub fn set_filename(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.ensure_unclassified()?;
        state.set_filename(name);
        Ok(())
    }

    /// Record the enclosing payload, e.g. a multipart container
    pub fn set_parent(&self, parent: &Arc<Payload>) {
        self.lock().parent = Some(Arc::downgrade(parent));
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn related_event(&self) -> &Arc<Event> {
        &self.event
    }

    pub fn registry(&self) -> &Arc<PloadRegistry> {
        &self.registry
    }

    pub fn flags(&self) -> PloadFlags {
        self.lock().flags
    }

    pub fn is_opened(&self) -> bool {
        self.flags().contains(PloadFlags::OPENED)
    }

    pub fn is_error(&self) -> bool {
        self.flags().contains(PloadFlags::IS_ERR)
    }

    pub fn pload_type(&self) -> Option<Arc<PloadType>> {
        self.lock().ptype.clone()
    }

    pub fn mime_type(&self) -> Option<MimeType> {
        self.lock().mime_type.clone()
    }

    pub fn filename(&self) -> Option<String> {
        self.lock().filename.clone()
    }

    pub fn expected_size(&self) -> usize {
        self.lock().expected_size
    }

    /// Structured fields filled in by the analyzer
    pub fn data(&self) -> Option<DataRecord> {
        self.lock().data.clone()
    }

    pub fn parent(&self) -> Option<Arc<Payload>> {
        self.lock().parent.as_ref().and_then(Weak::upgrade)
    }

    /// The store, once one was requested and the payload opened
    pub fn store(&self) -> Option<Arc<Store>> {
        self.lock().store.clone()
    }

    /// Number of listeners currently attached
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Bytes held in the in-memory buffer
    pub fn buffered_len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// End of payload: close every listener, finalize the store and release
    /// the decoder, buffer and pending analyzer state.
    pub fn end(&self) -> Result<()> {
        let mut state = self.lock();
        if state.ended {
            return Err(PloadError::PayloadEnded);
        }
        state.ended = true;

        for listener in state.listeners.drain(..) {
            listener.reg.detach(self.id);
            if let Err(e) = listener.reg.listener().close(listener.state) {
                warn!(
                    "Error while closing listener {} of payload {} : {}",
                    listener.reg.owner(),
                    self.id,
                    e
                );
            }
        }

        if let Some(store) = state.store.take() {
            store.end();
        }

        state.decoder = None;
        state.buffer.release();

        if let Some(analyzer_state) = state.analyzer_state.take() {
            let analyzer = state.ptype.as_ref().and_then(|t| t.analyzer());
            if let Some(analyzer) = analyzer {
                analyzer.cleanup(&PayloadView::new(self, &state), analyzer_state);
            }
        }

        self.registry.stats().record_end();
        debug!("Payload {} ended", self.id);
        Ok(())
    }

    /// Remove and return the attachment belonging to `reg`
    pub(crate) fn detach_registration(&self, reg: &Arc<Registration>) -> Option<Listener> {
        let mut state = self.lock();
        let pos = state
            .listeners
            .iter()
            .position(|l| Arc::ptr_eq(&l.reg, reg))?;
        Some(state.listeners.remove(pos))
    }
}
