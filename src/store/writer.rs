//! Writer side of the store: a growable read-write mmap window

use std::{ops::Range, sync::MutexGuard};

use log::error;
use memmap2::{MmapMut, MmapOptions};

use crate::{
    decoder::{decode_into, Decoder, OutputWindow},
    error::{PloadError, Result},
};

use super::{round_up, Store};

/// The writer's mapped window over the backing file
#[derive(Debug, Default)]
pub(super) struct WriteMap {
    mmap: Option<MmapMut>,
    /// File offset of the window start, always page aligned
    off_start: u64,
    /// Write position relative to the window start
    off_cur: usize,
}

impl WriteMap {
    fn window_len(&self) -> usize {
        self.mmap.as_ref().map_or(0, |m| m.len())
    }

    fn position(&self) -> u64 {
        self.off_start + self.off_cur as u64
    }
}

/// Exclusive handle on the write window of a [`Store`].
///
/// Every append publishes the new file size to readers once the bytes are
/// in place, and returns the window-relative range it wrote so the caller
/// can relay the same bytes without copying.
pub struct StoreWriter<'a> {
    store: &'a Store,
    map: MutexGuard<'a, Option<WriteMap>>,
    /// File offset that must stay inside the window across remaps
    pin: u64,
}

impl<'a> StoreWriter<'a> {
    pub(super) fn new(store: &'a Store, map: MutexGuard<'a, Option<WriteMap>>) -> Self {
        let pin = map.as_ref().map_or(0, |m| m.position());
        Self { store, map, pin }
    }

    fn map_mut(&mut self) -> Result<&mut WriteMap> {
        let path = self.store.path().display().to_string();
        self.map
            .as_mut()
            .ok_or_else(|| PloadError::io(format!("Store {} is not open for writing", path)))
    }

    /// Append `data`, decoding it first when a decoder is given.
    pub fn append(
        &mut self,
        decoder: Option<&mut dyn Decoder>,
        data: &[u8],
    ) -> Result<Range<usize>> {
        let start = self.map_mut()?.position();
        self.pin = start;

        match decoder {
            Some(decoder) => {
                decode_into(decoder, data, self)?;
            }
            None if !data.is_empty() => {
                let map = self.map_mut()?;
                if map.window_len() - map.off_cur < data.len() {
                    self.make_space(data.len())?;
                }
                let map = self.map_mut()?;
                let off = map.off_cur;
                if let Some(mmap) = map.mmap.as_mut() {
                    mmap[off..off + data.len()].copy_from_slice(data);
                }
                map.off_cur += data.len();
            }
            None => {}
        }

        let map = self.map_mut()?;
        let end = map.position();
        let range = (start - map.off_start) as usize..(end - map.off_start) as usize;
        self.store.publish(end);
        Ok(range)
    }

    /// Bytes of the current window, as returned by [`StoreWriter::append`].
    ///
    /// Panics if the range lies outside the mapped window.
    pub fn written(&self, range: Range<usize>) -> &[u8] {
        let map = self.map.as_ref();
        let mmap = map.and_then(|m| m.mmap.as_ref());
        match mmap {
            Some(mmap) if range.end <= mmap.len() && range.start <= range.end => &mmap[range],
            None if range.is_empty() => &[],
            _ => panic!(
                "write window range {:?} outside mapping of {}",
                range,
                self.store.path().display()
            ),
        }
    }

    /// Current file offset of the writer
    pub fn position(&self) -> u64 {
        self.map.as_ref().map_or(0, |m| m.position())
    }

    /// Ensure at least `min_size` writable bytes in the window.
    ///
    /// Unmaps the window, restarts it at the page containing the pinned
    /// offset, extends the file and maps the new block read-write.
    fn make_space(&mut self, min_size: usize) -> Result<()> {
        let page = self.store.page_size();
        let min_block = self.store.min_block_size();
        let pin = self.pin;
        let store = self.store;

        let map = self
            .map
            .as_mut()
            .ok_or_else(|| PloadError::io("Store is not open for writing"))?;

        if min_size <= map.window_len() - map.off_cur {
            return Ok(());
        }

        let cur = map.position();
        map.mmap = None;

        let new_start = pin - pin % page as u64;
        let off_cur = (cur - new_start) as usize;

        let mut block = round_up(min_block as u64, page as u64) as usize;
        if block < off_cur + min_size {
            block = round_up((off_cur + min_size) as u64, page as u64) as usize;
        }

        let shared = store.shared.lock().unwrap();
        let file = shared.file.as_ref().ok_or_else(|| {
            PloadError::io(format!("Store {} has no open file", store.path().display()))
        })?;

        file.set_len(new_start + block as u64).map_err(|e| {
            error!("Error while expanding file \"{}\" : {}", store.path().display(), e);
            PloadError::from_io(e, &format!("Failed to expand {}", store.path().display()))
        })?;

        // SAFETY: the file is exclusively written through this window and
        // readers never map past the published size.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(new_start)
                .len(block)
                .map_mut(file)
        }
        .map_err(|e| {
            error!("Error while mapping the file \"{}\" : {}", store.path().display(), e);
            PloadError::from_io(e, &format!("Failed to map {}", store.path().display()))
        })?;

        map.mmap = Some(mmap);
        map.off_start = new_start;
        map.off_cur = off_cur;
        Ok(())
    }
}

impl OutputWindow for StoreWriter<'_> {
    fn spare(&mut self) -> &mut [u8] {
        match self.map.as_mut() {
            Some(WriteMap {
                mmap: Some(mmap),
                off_cur,
                ..
            }) => &mut mmap[*off_cur..],
            _ => &mut [],
        }
    }

    fn commit(&mut self, len: usize) {
        if let Some(map) = self.map.as_mut() {
            assert!(
                map.off_cur + len <= map.window_len(),
                "commit past the write window"
            );
            map.off_cur += len;
        }
    }

    fn grow(&mut self, min_size: usize) -> Result<()> {
        self.make_space(min_size)
    }
}
