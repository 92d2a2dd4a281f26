//! Reader side of the store: blocking, read-only mmap windows

use std::sync::Arc;

use log::error;
use memmap2::{Mmap, MmapOptions};

use crate::error::{PloadError, Result};

use super::{round_up, Store};

/// A concurrent reader over a [`Store`].
///
/// Each reader owns its own window and only ever moves it forward. Dropping
/// the reader (or calling [`ReadMap::read_end`]) unmaps the window and
/// closes the backing file if nothing else uses it.
pub struct ReadMap {
    store: Arc<Store>,
    mmap: Option<Mmap>,
    off_start: u64,
    off_cur: usize,
}

impl ReadMap {
    pub(super) fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            mmap: None,
            off_start: 0,
            off_cur: 0,
        }
    }

    /// Read up to `max_len` bytes.
    ///
    /// Blocks while no unread bytes are published and the store is not
    /// complete. There is no timeout: a blocked reader wakes only when the
    /// writer appends or ends the store. Returns an empty slice at end of
    /// stream.
    pub fn read(&mut self, max_len: usize) -> Result<&[u8]> {
        if max_len == 0 {
            return Err(PloadError::invalid_parameter(
                "max_len",
                "Read length must be greater than 0",
            ));
        }

        let store = Arc::clone(&self.store);
        let mut shared = store.shared.lock().unwrap();

        let mut file_remaining = shared.file_size - self.consumed();
        while file_remaining == 0 && !shared.complete {
            shared = store.cond.wait(shared).unwrap();
            file_remaining = shared.file_size - self.consumed();
        }

        if file_remaining == 0 {
            return Ok(&[]);
        }

        let window_len = self.mmap.as_ref().map_or(0, |m| m.len());
        if window_len == self.off_cur {
            let page = store.page_size() as u64;
            let mut block = store.min_block_size() as u64;
            if block > file_remaining {
                block = round_up(file_remaining, page);
            }

            self.mmap = None;
            self.off_start += window_len as u64;
            self.off_cur = 0;

            let file = shared.file.as_ref().ok_or_else(|| {
                PloadError::io(format!("Store {} has no open file", store.path().display()))
            })?;

            // SAFETY: the window only covers bytes the writer has already
            // published, which are never rewritten.
            let mmap = unsafe {
                MmapOptions::new()
                    .offset(self.off_start)
                    .len(block as usize)
                    .map(file)
            }
            .map_err(|e| {
                error!("Error while mapping file \"{}\" : {}", store.path().display(), e);
                PloadError::from_io(e, &format!("Failed to map {}", store.path().display()))
            })?;
            self.mmap = Some(mmap);
        }
        drop(shared);

        let mmap = self
            .mmap
            .as_ref()
            .ok_or_else(|| PloadError::io("Read window is not mapped"))?;
        let available = (mmap.len() - self.off_cur)
            .min(file_remaining.min(usize::MAX as u64) as usize)
            .min(max_len);

        let start = self.off_cur;
        self.off_cur += available;
        Ok(&mmap[start..start + available])
    }

    /// Total bytes returned so far
    pub fn consumed(&self) -> u64 {
        self.off_start + self.off_cur as u64
    }

    /// The store being read
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Stop reading and release the window
    pub fn read_end(self) {}
}

impl Drop for ReadMap {
    fn drop(&mut self) {
        self.mmap = None;

        let mut shared = match self.store.shared.lock() {
            Ok(shared) => shared,
            Err(poisoned) => poisoned.into_inner(),
        };
        shared.read_maps -= 1;
        if shared.read_maps == 0 && !shared.writing {
            shared.file = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{PloadConfig, TypesResource},
        event::Event,
        payload::PloadFlags,
        registry::PloadRegistry,
    };

    #[test]
    fn test_drop_with_poisoned_lock() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = PloadConfig::default().with_store_path(dir.path());
        let reg = PloadRegistry::new(config.clone(), &TypesResource::default()).unwrap();
        let pload = reg.alloc(Arc::new(Event::new("test", "test")), PloadFlags::NONE);

        let store = Store::new(pload, &config, reg.page_size());
        store.open().unwrap();
        store.writer().append(None, b"abc").unwrap();
        let map = store.read_start().unwrap();

        let holder = Arc::clone(&store);
        let res = std::thread::spawn(move || {
            let _guard = holder.shared.lock().unwrap();
            panic!("reader thread died holding the lock");
        })
        .join();
        assert!(res.is_err());
        assert!(store.shared.is_poisoned());

        drop(map);
        let shared = match store.shared.lock() {
            Ok(shared) => shared,
            Err(poisoned) => poisoned.into_inner(),
        };
        assert_eq!(shared.read_maps, 0);
    }
}
