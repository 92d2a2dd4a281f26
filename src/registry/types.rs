//! Registered payload types

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock, RwLock,
    },
};

use crate::analyzer::Analyzer;

use super::listener::Registration;

/// Broad content class of a payload type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PloadClass {
    Other,
    Application,
    Audio,
    Image,
    Video,
    Document,
}

impl PloadClass {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "other" => Some(Self::Other),
            "application" => Some(Self::Application),
            "audio" => Some(Self::Audio),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "document" => Some(Self::Document),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Other => "other",
            Self::Application => "application",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
        }
    }
}

impl fmt::Display for PloadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A registry entry describing one kind of payload.
///
/// The descriptive fields never change after registration. The analyzer can
/// be bound once, and the listener list only changes while the engine is
/// paused.
pub struct PloadType {
    name: String,
    description: String,
    extension: String,
    class: PloadClass,
    analyzer: OnceLock<Arc<dyn Analyzer>>,
    listeners: RwLock<Vec<Arc<Registration>>>,
    analyzed: AtomicU64,
}

impl fmt::Debug for PloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PloadType")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("analyzer", &self.analyzer.get().is_some())
            .finish()
    }
}

impl PloadType {
    pub(crate) fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        extension: impl Into<String>,
        class: PloadClass,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            extension: extension.into(),
            class,
            analyzer: OnceLock::new(),
            listeners: RwLock::new(Vec::new()),
            analyzed: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Default filename extension
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn class(&self) -> PloadClass {
        self.class
    }

    pub fn analyzer(&self) -> Option<&Arc<dyn Analyzer>> {
        self.analyzer.get()
    }

    /// Returns false if an analyzer was already bound
    pub(crate) fn bind_analyzer(&self, analyzer: Arc<dyn Analyzer>) -> bool {
        self.analyzer.set(analyzer).is_ok()
    }

    /// Registrations scoped to this type, most recent first
    pub fn listeners(&self) -> Vec<Arc<Registration>> {
        self.listeners.read().unwrap().clone()
    }

    pub(crate) fn listener_table(&self) -> &RwLock<Vec<Arc<Registration>>> {
        &self.listeners
    }

    pub(crate) fn record_analyzed(&self) {
        self.analyzed.fetch_add(1, Ordering::Relaxed);
    }

    /// Payloads accepted by this type's analyzer
    pub fn analyzed_count(&self) -> u64 {
        self.analyzed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_names() {
        assert_eq!(PloadClass::from_name("Image"), Some(PloadClass::Image));
        assert_eq!(PloadClass::from_name("spreadsheet"), None);
        assert_eq!(PloadClass::Document.to_string(), "document");
    }
}
