//! Append-only memory-mapped payload store
//!
//! A [`Store`] backs one payload's body with a temporary file. The payload
//! is the single writer and appends through a growable mmap window
//! ([`StoreWriter`]); any number of [`ReadMap`]s follow behind it on other
//! threads, blocking until new bytes are published or the store completes.
//!
//! ```text
//!   append ──► write window ──► publish(file_size) ──► notify_all
//!                                                          │
//!            ReadMap ◄── read window ◄── wait(cond) ◄──────┘
//! ```
//!
//! The backing file stays open while the write window or any read window is
//! live, and is removed when the last `Arc<Store>` is dropped.

mod reader;
mod writer;

pub use reader::ReadMap;
pub use writer::StoreWriter;

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex,
    },
};

use log::{debug, error, warn};

use crate::{
    config::PloadConfig,
    error::{PloadError, Result},
    payload::Payload,
};

use writer::WriteMap;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Size and lifecycle state shared between the writer and readers
#[derive(Debug, Default)]
struct StoreShared {
    file: Option<File>,
    /// A backing file was created at least once
    persisted: bool,
    /// Logical end of the published data
    file_size: u64,
    complete: bool,
    writing: bool,
    read_maps: usize,
}

/// Disk-backed byte log for one payload
pub struct Store {
    id: u64,
    pload: Arc<Payload>,
    path: PathBuf,
    min_block_size: usize,
    page_size: usize,
    writer: Mutex<Option<WriteMap>>,
    shared: Mutex<StoreShared>,
    cond: Condvar,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("pload", &self.pload.id())
            .field("path", &self.path)
            .finish()
    }
}

impl Store {
    /// Create a store bound to its payload. Nothing touches the disk until
    /// [`Store::open`].
    pub(crate) fn new(pload: Arc<Payload>, config: &PloadConfig, page_size: usize) -> Arc<Self> {
        let id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        let path = config
            .store_path
            .join(format!("sift_{}_{:016X}.tmp", std::process::id(), id));

        Arc::new(Self {
            id,
            pload,
            path,
            min_block_size: round_up(config.mmap_min_block_size as u64, page_size as u64) as usize,
            page_size,
            writer: Mutex::new(None),
            shared: Mutex::new(StoreShared::default()),
            cond: Condvar::new(),
        })
    }

    /// Create the write window, creating the backing file if needed
    pub fn open(&self) -> Result<()> {
        let mut writer = self.writer.lock().unwrap();
        if writer.is_some() {
            error!("Write map of store {} already exists", self.path.display());
            return Err(PloadError::io(format!(
                "Write map of store {} already exists",
                self.path.display()
            )));
        }

        let mut shared = self.shared.lock().unwrap();
        if shared.file.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path)
                .map_err(|e| {
                    error!("Error while creating store file \"{}\" : {}", self.path.display(), e);
                    PloadError::from_io(e, &format!("Failed to create {}", self.path.display()))
                })?;
            shared.file = Some(file);
            shared.persisted = true;
        }
        shared.writing = true;
        *writer = Some(WriteMap::default());

        debug!("Opened store {} for payload {}", self.path.display(), self.pload.id());
        Ok(())
    }

    /// Exclusive access to the write window
    pub fn writer(&self) -> StoreWriter<'_> {
        StoreWriter::new(self, self.writer.lock().unwrap())
    }

    /// Finish writing: unmap, mark complete, shrink the file to its logical
    /// size when no reader is mapped, and wake blocked readers.
    pub fn end(&self) {
        // Dropping the window unmaps it
        drop(self.writer.lock().unwrap().take());

        let mut shared = self.shared.lock().unwrap();
        shared.writing = false;
        shared.complete = true;

        if shared.read_maps == 0 {
            if let Some(file) = shared.file.take() {
                if let Err(e) = file.set_len(shared.file_size) {
                    error!("Error while shrinking file \"{}\" : {}", self.path.display(), e);
                }
            }
        }

        self.cond.notify_all();
        debug!(
            "Store {} complete with {} bytes",
            self.path.display(),
            shared.file_size
        );
    }

    /// Start a concurrent reader at offset 0.
    ///
    /// Fails with [`PloadError::StoreEmpty`] if nothing was ever persisted.
    pub fn read_start(self: &Arc<Self>) -> Result<ReadMap> {
        let mut shared = self.shared.lock().unwrap();

        if !shared.persisted {
            error!("Unable to read empty store of payload {}", self.pload.id());
            return Err(PloadError::StoreEmpty);
        }

        if shared.file.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&self.path)
                .map_err(|e| {
                    error!("Error while reopening store file \"{}\" : {}", self.path.display(), e);
                    PloadError::from_io(e, &format!("Failed to reopen {}", self.path.display()))
                })?;
            shared.file = Some(file);
        }
        shared.read_maps += 1;

        Ok(ReadMap::new(Arc::clone(self)))
    }

    /// Update the published size and wake readers. Called by the writer only
    /// after the bytes are in the mapped region.
    fn publish(&self, file_size: u64) {
        let mut shared = self.shared.lock().unwrap();
        shared.file_size = file_size;
        self.cond.notify_all();
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The payload this store belongs to
    pub fn payload(&self) -> &Arc<Payload> {
        &self.pload
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes published so far
    pub fn file_size(&self) -> u64 {
        self.shared.lock().unwrap().file_size
    }

    pub fn is_complete(&self) -> bool {
        self.shared.lock().unwrap().complete
    }

    /// Whether the backing file descriptor is currently open
    pub fn is_file_open(&self) -> bool {
        self.shared.lock().unwrap().file.is_some()
    }

    /// Number of live read windows
    pub fn reader_count(&self) -> usize {
        self.shared.lock().unwrap().read_maps
    }

    pub(crate) fn page_size(&self) -> usize {
        self.page_size
    }

    pub(crate) fn min_block_size(&self) -> usize {
        self.min_block_size
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let shared = match self.shared.get_mut() {
            Ok(shared) => shared,
            Err(poisoned) => poisoned.into_inner(),
        };
        shared.file = None;

        if shared.persisted {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Error while removing temporary file \"{}\" : {}", self.path.display(), e);
            } else {
                debug!("Removed store file {}", self.path.display());
            }
        }
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}
