//! # Sift - payload capture and persistence pipeline
//!
//! Sift hosts the binary objects ("payloads") that protocol analyzers pull
//! out of captured traffic: mail attachments, SIP bodies, HTTP transfers.
//! Bytes are appended as they arrive, decoded, classified by content, and
//! streamed to listeners, optionally through a disk-backed store that other
//! threads can read while it is still being written.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 PloadRegistry                   │
//! │  types │ mime map │ listeners │ decoders │ magic│
//! └─────────────────────────────────────────────────┘
//!           │
//!           ▼
//!   append ──► decode ──► buffer ──► magic ──► analyzer
//!                                                │
//!                                             OPENED
//!                                                │
//!                      ┌─────────────────────────┴──┐
//!                      ▼                            ▼
//!             Store (mmap log)              listener.write()
//!                      │
//!                      ▼
//!             ReadMap readers (blocking)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sift::{Event, PloadFlags, PloadRegistry};
//!
//! let registry = PloadRegistry::with_defaults()?;
//! let event = Arc::new(Event::new("smtp.mail", "smtp"));
//! let pload = registry.alloc(event, PloadFlags::NEED_MAGIC);
//! pload.set_encoding("base64")?;
//! pload.append(b"R0lGODlh")?;
//! pload.end()?;
//! # Ok::<(), sift::PloadError>(())
//! ```

pub mod analyzer;
pub mod config;
pub mod data;
pub mod decoder;
pub mod error;
pub mod event;
pub mod filter;
pub mod magic;
pub mod mime;
pub mod payload;
pub mod registry;
pub mod store;

pub use analyzer::{AnalysisOutcome, Analyzer};
pub use config::{PloadConfig, TypesResource};
pub use data::{DataRecord, DataSchema, Value};
pub use decoder::{Base64Decoder, DecodeProgress, DecodeStatus, Decoder, PloadBuffer};
pub use error::{PloadError, Result};
pub use event::Event;
pub use filter::{FilterProp, PayloadFilter, Predicate};
pub use magic::{MagicSniffer, SignatureSniffer};
pub use mime::MimeType;
pub use payload::{AnalysisContext, AnalyzerState, OpenContext, Payload, PayloadView, PloadFlags};
pub use registry::{
    ListenerState, OpenOutcome, PayloadListener, PloadClass, PloadRegistry, PloadStats,
    PloadStatsSnapshot, PloadType, Registration,
};
pub use store::{ReadMap, Store, StoreWriter};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
