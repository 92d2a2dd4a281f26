//! Borrowed views of a payload handed to filters, listeners and analyzers

use std::sync::Arc;

use log::debug;

use crate::{
    data::DataRecord, event::Event, mime::MimeType, registry::PloadType, store::Store,
};

use super::{AnalyzerState, Payload, PayloadState, PloadFlags};

/// Read-only view of a payload while its state is locked
pub struct PayloadView<'a> {
    pload: &'a Payload,
    state: &'a PayloadState,
}

impl<'a> PayloadView<'a> {
    pub(crate) fn new(pload: &'a Payload, state: &'a PayloadState) -> Self {
        Self { pload, state }
    }

    pub fn id(&self) -> u64 {
        self.pload.id
    }

    /// The event the payload was extracted from
    pub fn event(&self) -> &'a Event {
        &self.pload.event
    }

    pub fn flags(&self) -> PloadFlags {
        self.state.flags
    }

    pub fn pload_type(&self) -> Option<&'a Arc<PloadType>> {
        self.state.ptype.as_ref()
    }

    pub fn mime_type(&self) -> Option<&'a MimeType> {
        self.state.mime_type.as_ref()
    }

    pub fn filename(&self) -> Option<&'a str> {
        self.state.filename.as_deref()
    }

    pub fn expected_size(&self) -> usize {
        self.state.expected_size
    }

    /// Structured fields from the analyzer
    pub fn data(&self) -> Option<&'a DataRecord> {
        self.state.data.as_ref()
    }
}

/// Handed to a listener's `open`. Only exists before the payload is
/// opened, which is the one point where a store can be requested.
pub struct OpenContext<'a> {
    pload: &'a Arc<Payload>,
    state: &'a mut PayloadState,
}

impl<'a> OpenContext<'a> {
    pub(crate) fn new(pload: &'a Arc<Payload>, state: &'a mut PayloadState) -> Self {
        Self { pload, state }
    }

    pub fn view(&self) -> PayloadView<'_> {
        PayloadView::new(self.pload, self.state)
    }

    /// Request disk persistence. All listeners share the same store; it is
    /// opened and seeded with the buffered bytes once every listener had
    /// its `open` call. The caller must keep the returned handle: a store
    /// nobody holds after the open round is discarded.
    pub fn store(&mut self) -> Arc<Store> {
        let pload = self.pload;
        let store = self.state.store.get_or_insert_with(|| {
            let registry = pload.registry();
            debug!("Payload {} requested a store", pload.id());
            Store::new(Arc::clone(pload), registry.config(), registry.page_size())
        });
        Arc::clone(store)
    }
}

/// Handed to an analyzer while it classifies the payload
pub struct AnalysisContext<'a> {
    pload: &'a Payload,
    state: &'a mut PayloadState,
}

impl<'a> AnalysisContext<'a> {
    pub(crate) fn new(pload: &'a Payload, state: &'a mut PayloadState) -> Self {
        Self { pload, state }
    }

    pub fn view(&self) -> PayloadView<'_> {
        PayloadView::new(self.pload, self.state)
    }

    /// The structured record allocated from the analyzer's schema
    pub fn data_mut(&mut self) -> Option<&mut DataRecord> {
        self.state.data.as_mut()
    }

    /// State kept between analysis attempts on this payload
    pub fn state(&mut self) -> &mut Option<AnalyzerState> {
        &mut self.state.analyzer_state
    }

    /// Downcast the analyzer state, creating it with `init` if absent
    pub fn state_or_insert_with<T, F>(&mut self, init: F) -> Option<&mut T>
    where
        T: Send + 'static,
        F: FnOnce() -> T,
    {
        self.state
            .analyzer_state
            .get_or_insert_with(|| Box::new(init()))
            .downcast_mut::<T>()
    }

    /// Set the filename discovered in the content
    pub fn set_filename(&mut self, name: &str) {
        self.state.set_filename(name);
    }
}
