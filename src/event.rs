//! Session events that payloads originate from

use crate::data::DataRecord;

/// An analysis event produced by a protocol or session tracker.
///
/// Payloads hold a strong reference to the event they were extracted from,
/// keeping it alive for filter evaluation until the payload is dropped.
#[derive(Debug, Clone)]
pub struct Event {
    name: String,
    source: String,
    data: Option<DataRecord>,
}

impl Event {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            data: None,
        }
    }

    /// Attach structured fields
    pub fn with_data(mut self, data: DataRecord) -> Self {
        self.data = Some(data);
        self
    }

    /// Event name, e.g. `sip_call` or `http_request`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the protocol or module that emitted the event
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn data(&self) -> Option<&DataRecord> {
        self.data.as_ref()
    }
}
