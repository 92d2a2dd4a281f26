//! The streaming append state machine

use std::sync::Arc;

use log::{debug, error, trace, warn};

use crate::{
    analyzer::AnalysisOutcome,
    data::DataRecord,
    decoder::PloadBuffer,
    error::{PloadError, Result},
    mime::MimeType,
    registry::{Listener, OpenOutcome},
};

use super::{AnalysisContext, OpenContext, Payload, PayloadState, PayloadView, PloadFlags};

impl Payload {
    /// Feed the next bytes of the payload body.
    ///
    /// Before the payload opens, bytes are buffered (and decoded) until the
    /// sniffer and analyzer settle on a type. The first call that gets past
    /// classification opens the payload: listeners are attached, an
    /// optional store is seeded, and the data seen so far is dispatched.
    /// Afterwards bytes go straight to the store and the listeners.
    ///
    /// Once the payload is in error every call is a no-op.
    pub fn append(self: &Arc<Self>, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if state.flags.contains(PloadFlags::IS_ERR) {
            return Ok(());
        }
        if state.ended {
            return Err(PloadError::PayloadEnded);
        }

        self.registry.stats().record_bytes(data.len());

        let result = if state.flags.contains(PloadFlags::OPENED) {
            self.append_opened(&mut state, data)
        } else {
            self.append_unopened(&mut state, data)
        };

        if let Err(e) = &result {
            state.flags.insert(PloadFlags::IS_ERR);
            error!(
                "Payload {} ({}) failed : {}",
                self.id,
                state.filename.as_deref().unwrap_or("unnamed"),
                e
            );
        }
        result
    }

    fn append_opened(&self, state: &mut PayloadState, data: &[u8]) -> Result<()> {
        if let Some(store) = state.store.clone() {
            let mut writer = store.writer();
            let range = writer.append(state.decoder_mut(), data)?;
            if !state.listeners.is_empty() {
                self.dispatch(state, writer.written(range));
            }
            return Ok(());
        }

        if state.listeners.is_empty() {
            return Ok(());
        }

        if state.decoder.is_some() {
            let mut buf = PloadBuffer::new(self.registry.page_size());
            buf.append(state.decoder_mut(), data)?;
            self.dispatch(state, buf.as_slice());
        } else {
            self.dispatch(state, data);
        }
        Ok(())
    }

    fn append_unopened(self: &Arc<Self>, state: &mut PayloadState, data: &[u8]) -> Result<()> {
        let mut buf = std::mem::replace(
            &mut state.buffer,
            PloadBuffer::new(self.registry.page_size()),
        );

        let buffered = !buf.is_empty() || state.decoder.is_some();
        if buffered {
            buf.append(state.decoder_mut(), data)?;
        }
        let current: &[u8] = if buffered { buf.as_slice() } else { data };

        if state.flags.contains(PloadFlags::NEED_MAGIC) {
            let mut threshold = self.registry.config().magic_min_size;
            if state.expected_size > 0 && state.expected_size < threshold {
                threshold = state.expected_size;
            }

            if current.len() < threshold {
                trace!(
                    "Payload {} has {} of {} bytes needed for magic",
                    self.id,
                    current.len(),
                    threshold
                );
                if !buffered {
                    buf.append(None, data)?;
                }
                state.buffer = buf;
                return Ok(());
            }

            match self.registry.sniffer().sniff(current) {
                Some(name) => self.apply_magic(state, &name),
                None => debug!("No magic match for payload {}", self.id),
            }
            state.flags.remove(PloadFlags::NEED_MAGIC);
        }

        if state.flags.contains(PloadFlags::NEED_ANALYSIS) {
            let analyzer = state.ptype.as_ref().and_then(|t| t.analyzer().cloned());
            match analyzer {
                None => state.flags.remove(PloadFlags::NEED_ANALYSIS),
                Some(analyzer) => {
                    if state.data.is_none() {
                        state.data = analyzer.schema().map(DataRecord::new);
                    }

                    let outcome = {
                        let mut ctx = AnalysisContext::new(self, state);
                        analyzer.analyze(&mut ctx, current)
                    };

                    if outcome != AnalysisOutcome::NeedMore {
                        if let Some(analyzer_state) = state.analyzer_state.take() {
                            analyzer.cleanup(&PayloadView::new(self, state), analyzer_state);
                        }
                    }

                    match outcome {
                        AnalysisOutcome::Error => {
                            return Err(PloadError::analysis(format!(
                                "Analyzer of type {} failed on payload {}",
                                state.ptype.as_ref().map_or("?", |t| t.name()),
                                self.id
                            )));
                        }
                        AnalysisOutcome::Rejected => {
                            debug!("Payload {} rejected by its analyzer", self.id);
                            state.ptype = None;
                            state.data = None;
                            state.flags.remove(PloadFlags::NEED_ANALYSIS);
                        }
                        AnalysisOutcome::Accepted => {
                            state.flags.remove(PloadFlags::NEED_ANALYSIS);
                            if let Some(ptype) = &state.ptype {
                                ptype.record_analyzed();
                            }
                        }
                        AnalysisOutcome::NeedMore => {
                            if !buffered {
                                buf.append(None, data)?;
                            }
                            state.buffer = buf;
                            return Ok(());
                        }
                    }
                }
            }
        }

        self.open_listeners(state);

        if state.store.as_ref().is_some_and(|s| Arc::strong_count(s) == 1) {
            debug!("Store of payload {} was released by its listeners", self.id);
            state.store = None;
        }

        if let Some(store) = state.store.clone() {
            store.open()?;
            store.writer().append(None, current)?;
            self.registry.stats().record_store();
        }

        self.dispatch(state, current);
        Ok(())
    }

    /// Adopt a sniffed MIME type when nothing specific was declared
    fn apply_magic(&self, state: &mut PayloadState, name: &str) {
        let Some(magic) = MimeType::parse(name) else {
            return;
        };
        let config = self.registry.config();

        let replace = match &state.mime_type {
            None => true,
            Some(existing) => {
                existing.name() != magic.name()
                    && config.is_generic_mime(existing.name())
                    && !config.is_generic_mime(magic.name())
            }
        };
        if !replace {
            return;
        }

        debug!("Payload {} sniffed as {}", self.id, magic.name());
        if let Some(ptype) = self.registry.type_for_mime(magic.name()) {
            state.ptype = Some(ptype);
        }
        state.mime_type = Some(magic);
    }

    /// Attach every matching listener and mark the payload opened
    fn open_listeners(self: &Arc<Self>, state: &mut PayloadState) {
        let mut candidates = self.registry.global_listeners();
        if let Some(ptype) = &state.ptype {
            candidates.extend(ptype.listeners());
        }

        for reg in candidates {
            if let Some(filter) = reg.filter() {
                if !filter.matches(&PayloadView::new(self, state)) {
                    continue;
                }
            }

            let outcome = {
                let mut ctx = OpenContext::new(self, state);
                reg.listener().open(&mut ctx)
            };

            match outcome {
                OpenOutcome::Continue(listener_state) => {
                    reg.attach(self);
                    state.listeners.push(Listener {
                        reg,
                        state: listener_state,
                    });
                    self.registry.stats().record_listener_open();
                }
                OpenOutcome::Stop => {}
                OpenOutcome::Error => {
                    error!(
                        "Listener {} errored out when opening payload {}",
                        reg.owner(),
                        self.id
                    );
                }
            }
        }

        state.flags.insert(PloadFlags::OPENED);
        debug!(
            "Payload {} opened with {} listener(s)",
            self.id,
            state.listeners.len()
        );
    }

    /// Write `data` to every attached listener, closing the ones that fail
    fn dispatch(&self, state: &mut PayloadState, data: &[u8]) {
        let mut i = 0;
        while i < state.listeners.len() {
            let listener = &mut state.listeners[i];
            match listener.reg.listener().write(&mut listener.state, data) {
                Ok(()) => i += 1,
                Err(e) => {
                    warn!(
                        "Error while writing to listener {} of payload {} : {}",
                        listener.reg.owner(),
                        self.id,
                        e
                    );
                    let listener = state.listeners.remove(i);
                    listener.reg.detach(self.id);
                    if let Err(e) = listener.reg.listener().close(listener.state) {
                        warn!("Error while closing listener {} : {}", listener.reg.owner(), e);
                    }
                    self.registry.stats().record_write_failure();
                }
            }
        }
    }
}
