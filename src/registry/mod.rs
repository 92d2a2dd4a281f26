//! Process-wide payload registry
//!
//! Holds the tables the payload pipeline looks things up in: registered
//! types, the MIME to type mapping, listener registrations, decoders and
//! the magic sniffer. Each table has its own lock. A registry is created
//! once with [`PloadRegistry::new`] and torn down with
//! [`PloadRegistry::shutdown`].

mod listener;
mod stats;
mod types;

pub use listener::{ListenerState, OpenOutcome, PayloadListener, Registration};
pub use stats::{PloadStats, PloadStatsSnapshot};
pub use types::{PloadClass, PloadType};

pub(crate) use listener::Listener;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use log::{debug, info, warn};

use crate::{
    analyzer::Analyzer,
    config::{page_size, PloadConfig, TypesResource},
    decoder::{base64::Base64Decoder, Decoder, DecoderFactory},
    error::{PloadError, Result},
    event::Event,
    filter::PayloadFilter,
    magic::{MagicSniffer, SignatureSniffer},
    payload::{Payload, PloadFlags},
};

/// Registry of payload types, listeners and decoders
pub struct PloadRegistry {
    config: PloadConfig,
    page_size: usize,
    /// Types by name
    types: RwLock<HashMap<String, Arc<PloadType>>>,
    /// Types by lowercase MIME type
    mime_types: RwLock<HashMap<String, Arc<PloadType>>>,
    /// Registrations for every payload, most recent first
    global_listeners: RwLock<Vec<Arc<Registration>>>,
    /// Decoder factories by lowercase encoding name
    decoders: RwLock<HashMap<String, DecoderFactory>>,
    sniffer: RwLock<Arc<dyn MagicSniffer>>,
    /// Listener changes are only allowed while paused
    paused: AtomicBool,
    next_pload_id: AtomicU64,
    stats: PloadStats,
}

impl std::fmt::Debug for PloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PloadRegistry")
            .field("types", &self.types.read().unwrap().len())
            .field("paused", &self.is_paused())
            .finish()
    }
}

impl PloadRegistry {
    /// Build the registry from a types resource. The registry starts
    /// paused so listeners can be registered before traffic flows.
    pub fn new(config: PloadConfig, resource: &TypesResource) -> Result<Arc<Self>> {
        config.validate()?;

        let mut types = HashMap::new();
        for def in &resource.payload_types {
            let Some(class) = PloadClass::from_name(&def.class) else {
                warn!("Unknown class {} for payload type {}, skipping", def.class, def.name);
                continue;
            };
            if types.contains_key(&def.name) {
                warn!("Payload type {} registered twice, keeping the first", def.name);
                continue;
            }
            let ptype = PloadType::new(&def.name, &def.description, &def.extension, class);
            types.insert(def.name.clone(), Arc::new(ptype));
        }

        let mut mime_types = HashMap::new();
        for def in &resource.mime_types {
            match types.get(&def.name) {
                Some(ptype) => {
                    mime_types.insert(def.mime.to_ascii_lowercase(), Arc::clone(ptype));
                }
                None => warn!(
                    "MIME type {} maps to unknown payload type {}, skipping",
                    def.mime, def.name
                ),
            }
        }

        let mut decoders: HashMap<String, DecoderFactory> = HashMap::new();
        decoders.insert("base64".to_string(), Base64Decoder::boxed);

        info!(
            "Payload registry ready with {} types and {} MIME mappings",
            types.len(),
            mime_types.len()
        );

        Ok(Arc::new(Self {
            config,
            page_size: page_size(),
            types: RwLock::new(types),
            mime_types: RwLock::new(mime_types),
            global_listeners: RwLock::new(Vec::new()),
            decoders: RwLock::new(decoders),
            sniffer: RwLock::new(Arc::new(SignatureSniffer::new())),
            paused: AtomicBool::new(true),
            next_pload_id: AtomicU64::new(1),
            stats: PloadStats::new(),
        }))
    }

    /// Default configuration with the bundled types resource
    pub fn with_defaults() -> Result<Arc<Self>> {
        Self::new(PloadConfig::default(), &TypesResource::bundled()?)
    }

    /// Allocate a payload for `event`
    pub fn alloc(self: &Arc<Self>, event: Arc<Event>, flags: PloadFlags) -> Arc<Payload> {
        Payload::alloc(self, event, flags)
    }

    pub(crate) fn next_payload_id(&self) -> u64 {
        self.next_pload_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn config(&self) -> &PloadConfig {
        &self.config
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn stats(&self) -> &PloadStats {
        &self.stats
    }

    pub fn sniffer(&self) -> Arc<dyn MagicSniffer> {
        Arc::clone(&self.sniffer.read().unwrap())
    }

    /// Replace the content sniffer
    pub fn set_sniffer(&self, sniffer: Arc<dyn MagicSniffer>) {
        *self.sniffer.write().unwrap() = sniffer;
    }

    pub fn find_type(&self, name: &str) -> Option<Arc<PloadType>> {
        self.types.read().unwrap().get(name).cloned()
    }

    /// Type registered for a MIME type, ignoring case
    pub fn type_for_mime(&self, mime: &str) -> Option<Arc<PloadType>> {
        self.mime_types
            .read()
            .unwrap()
            .get(&mime.to_ascii_lowercase())
            .cloned()
    }

    /// All registered types, sorted by name
    pub fn types(&self) -> Vec<Arc<PloadType>> {
        let mut types: Vec<_> = self.types.read().unwrap().values().cloned().collect();
        types.sort_by(|a, b| a.name().cmp(b.name()));
        types
    }

    /// Bind an analyzer to a type. Each type takes at most one.
    pub fn set_analyzer(&self, type_name: &str, analyzer: Arc<dyn Analyzer>) -> Result<()> {
        let ptype = self
            .find_type(type_name)
            .ok_or_else(|| PloadError::unknown_type(type_name))?;

        if !ptype.bind_analyzer(analyzer) {
            return Err(PloadError::AnalyzerExists {
                name: type_name.to_string(),
            });
        }
        debug!("Analyzer bound to payload type {}", type_name);
        Ok(())
    }

    /// Register a decoder for a transfer encoding, replacing any previous one
    pub fn register_decoder(&self, encoding: &str, factory: DecoderFactory) {
        self.decoders
            .write()
            .unwrap()
            .insert(encoding.to_ascii_lowercase(), factory);
    }

    /// Fresh decoder instance for `encoding`
    pub fn decoder_for(&self, encoding: &str) -> Option<Box<dyn Decoder>> {
        let factory = *self
            .decoders
            .read()
            .unwrap()
            .get(&encoding.to_ascii_lowercase())?;
        Some(factory())
    }

    pub(crate) fn global_listeners(&self) -> Vec<Arc<Registration>> {
        self.global_listeners.read().unwrap().clone()
    }

    /// Stop traffic so listeners can be changed
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn ensure_paused(&self) -> Result<()> {
        if self.is_paused() {
            Ok(())
        } else {
            Err(PloadError::EngineRunning)
        }
    }

    /// Register a listener for every payload (`type_name` of `None`) or for
    /// payloads of one type. Only payloads opening after this call are seen.
    pub fn listen_start(
        &self,
        owner: &str,
        type_name: Option<&str>,
        filter: Option<Box<dyn PayloadFilter>>,
        listener: Arc<dyn PayloadListener>,
    ) -> Result<Arc<Registration>> {
        self.ensure_paused()?;

        let reg = Arc::new(Registration::new(owner, filter, listener));
        match type_name {
            None => self.global_listeners.write().unwrap().insert(0, Arc::clone(&reg)),
            Some(name) => {
                let ptype = self
                    .find_type(name)
                    .ok_or_else(|| PloadError::unknown_type(name))?;
                ptype
                    .listener_table()
                    .write()
                    .unwrap()
                    .insert(0, Arc::clone(&reg));
            }
        }

        debug!("Listener {} registered for {}", owner, type_name.unwrap_or("any"));
        Ok(reg)
    }

    /// Remove the registration of `owner`, closing it on every payload it
    /// is still attached to
    pub fn listen_stop(&self, owner: &str, type_name: Option<&str>) -> Result<()> {
        self.ensure_paused()?;

        let reg = match type_name {
            None => take_registration(&self.global_listeners, owner),
            Some(name) => {
                let ptype = self
                    .find_type(name)
                    .ok_or_else(|| PloadError::unknown_type(name))?;
                take_registration(ptype.listener_table(), owner)
            }
        };

        let reg = reg
            .ok_or_else(|| PloadError::listener_not_found(owner, type_name.unwrap_or("any")))?;
        close_registration(&reg);

        debug!("Listener {} unregistered from {}", owner, type_name.unwrap_or("any"));
        Ok(())
    }

    /// Drop every registration, closing the listeners still attached
    pub fn shutdown(&self) {
        let mut regs: Vec<Arc<Registration>> =
            self.global_listeners.write().unwrap().drain(..).collect();
        for ptype in self.types.read().unwrap().values() {
            regs.extend(ptype.listener_table().write().unwrap().drain(..));
        }

        for reg in &regs {
            close_registration(reg);
        }
        info!("Payload registry shut down, {} registrations dropped", regs.len());
    }
}

fn take_registration(
    table: &RwLock<Vec<Arc<Registration>>>,
    owner: &str,
) -> Option<Arc<Registration>> {
    let mut table = table.write().unwrap();
    let pos = table.iter().position(|r| r.owner() == owner)?;
    Some(table.remove(pos))
}

/// Close `reg` on every payload it is still attached to
fn close_registration(reg: &Arc<Registration>) {
    for pload in reg.drain_ploads() {
        let Some(listener) = pload.detach_registration(reg) else {
            continue;
        };
        if let Err(e) = reg.listener().close(listener.state) {
            warn!(
                "Error while closing listener {} of payload {} : {}",
                reg.owner(),
                pload.id(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<PloadRegistry> {
        let resource = TypesResource::from_toml_str(
            r#"
[[payload_types]]
name = "gif"
description = "GIF image"
extension = "gif"
class = "image"

[[payload_types]]
name = "weird"
description = "Bad class"
extension = "w"
class = "hologram"

[[mime_types]]
name = "gif"
mime = "image/gif"

[[mime_types]]
name = "weird"
mime = "x/weird"
"#,
        )
        .unwrap();
        PloadRegistry::new(PloadConfig::default(), &resource).unwrap()
    }

    struct Nop;

    impl Analyzer for Nop {
        fn analyze(
            &self,
            _ctx: &mut crate::payload::AnalysisContext<'_>,
            _data: &[u8],
        ) -> crate::analyzer::AnalysisOutcome {
            crate::analyzer::AnalysisOutcome::Accepted
        }
    }

    #[test]
    fn test_resource_loading() {
        let reg = registry();
        assert!(reg.find_type("gif").is_some());
        assert!(reg.find_type("weird").is_none());
        assert_eq!(reg.type_for_mime("IMAGE/GIF").unwrap().name(), "gif");
        assert!(reg.type_for_mime("x/weird").is_none());
        assert_eq!(reg.types().len(), 1);
    }

    #[test]
    fn test_set_analyzer_once() {
        let reg = registry();
        reg.set_analyzer("gif", Arc::new(Nop)).unwrap();
        assert!(matches!(
            reg.set_analyzer("gif", Arc::new(Nop)),
            Err(PloadError::AnalyzerExists { .. })
        ));
        assert!(matches!(
            reg.set_analyzer("nope", Arc::new(Nop)),
            Err(PloadError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_decoder_lookup() {
        let reg = registry();
        assert!(reg.decoder_for("BASE64").is_some());
        assert!(reg.decoder_for("quoted-printable").is_none());
    }

    #[test]
    fn test_bundled_defaults() {
        let reg = PloadRegistry::with_defaults().unwrap();
        assert_eq!(reg.type_for_mime("image/gif").unwrap().name(), "gif");
        assert!(reg.is_paused());
    }
}
