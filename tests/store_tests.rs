use std::sync::{Arc, Mutex};

use sift::{
    config::page_size, Event, ListenerState, OpenContext, OpenOutcome, PayloadListener,
    PloadConfig, PloadError, PloadFlags, PloadRegistry, Store, TypesResource,
};
use tempfile::TempDir;

const MIB: usize = 1024 * 1024;

/// Requests a store on open and remembers it
#[derive(Default)]
pub struct StoreRequester {
    pub store: Mutex<Option<Arc<Store>>>,
}

impl PayloadListener for StoreRequester {
    fn open(&self, ctx: &mut OpenContext<'_>) -> OpenOutcome {
        *self.store.lock().unwrap() = Some(ctx.store());
        OpenOutcome::Continue(Box::new(()))
    }

    fn write(&self, _state: &mut ListenerState, _data: &[u8]) -> sift::Result<()> {
        Ok(())
    }

    fn close(&self, _state: ListenerState) -> sift::Result<()> {
        Ok(())
    }
}

pub fn store_registry(dir: &TempDir, min_block: usize) -> (Arc<PloadRegistry>, Arc<StoreRequester>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = PloadConfig::default()
        .with_store_path(dir.path())
        .with_mmap_min_block_size(min_block);
    let reg = PloadRegistry::new(config, &TypesResource::bundled().unwrap()).unwrap();

    let requester = Arc::new(StoreRequester::default());
    reg.listen_start("store", None, None, requester.clone()).unwrap();
    reg.resume();
    (reg, requester)
}

fn pattern(len: usize, seed: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + seed) % 253) as u8).collect()
}

fn read_all(store: &Arc<Store>, chunk: usize) -> Vec<u8> {
    let mut reader = store.read_start().unwrap();
    let mut out = Vec::new();
    loop {
        let bytes = reader.read(chunk).unwrap();
        if bytes.is_empty() {
            break;
        }
        out.extend_from_slice(bytes);
    }
    reader.read_end();
    out
}

#[cfg(test)]
mod persistence_tests {
    use super::*;

    #[test]
    fn test_large_payload_growth() {
        let dir = TempDir::new().unwrap();
        let (reg, _requester) = store_registry(&dir, 16 * MIB);
        let page = page_size() as u64;

        let pload = reg.alloc(Arc::new(Event::new("http.body", "http")), PloadFlags::NONE);
        let mut expected = Vec::with_capacity(20 * MIB);
        let mut store = None;

        for i in 0..10 {
            let chunk = pattern(2 * MIB, i);
            pload.append(&chunk).unwrap();
            expected.extend_from_slice(&chunk);

            let s = store.get_or_insert_with(|| pload.store().unwrap());
            let len = std::fs::metadata(s.path()).unwrap().len();
            assert_eq!(len % page, 0);
            assert!(len >= ((i + 1) * 2 * MIB) as u64);
        }

        let store = store.unwrap();
        assert_eq!(store.file_size(), (20 * MIB) as u64);
        let len = std::fs::metadata(store.path()).unwrap().len();
        assert_eq!(len, (32 * MIB) as u64);

        pload.end().unwrap();
        assert!(store.is_complete());
        assert!(!store.is_file_open());
        let len = std::fs::metadata(store.path()).unwrap().len();
        assert_eq!(len, (20 * MIB) as u64);

        assert_eq!(read_all(&store, 100_000), expected);
        assert_eq!(reg.stats().snapshot().stores_opened, 1);
    }

    #[test]
    fn test_store_file_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let (reg, requester) = store_registry(&dir, 64 * 1024);

        let pload = reg.alloc(Arc::new(Event::new("ftp.data", "ftp")), PloadFlags::NONE);
        pload.append(b"hello store").unwrap();
        pload.end().unwrap();
        assert!(pload.store().is_none());

        let store = requester.store.lock().unwrap().take().unwrap();
        let path = store.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(read_all(&store, 4), b"hello store");

        drop(store);
        assert!(!path.exists());
    }

    #[test]
    fn test_failed_open_leaves_store_empty() {
        let dir = TempDir::new().unwrap();
        let config = PloadConfig::default().with_store_path(dir.path().join("missing"));
        let reg = PloadRegistry::new(config, &TypesResource::bundled().unwrap()).unwrap();
        let requester = Arc::new(StoreRequester::default());
        reg.listen_start("store", None, None, requester.clone()).unwrap();
        reg.resume();

        let pload = reg.alloc(Arc::new(Event::new("ftp.data", "ftp")), PloadFlags::NONE);
        assert!(matches!(pload.append(b"data"), Err(PloadError::Io { .. })));
        assert!(pload.is_error());

        let store = requester.store.lock().unwrap().clone().unwrap();
        assert!(matches!(store.read_start(), Err(PloadError::StoreEmpty)));
        pload.end().unwrap();
    }

    #[test]
    fn test_released_store_is_discarded() {
        struct Fickle;

        impl PayloadListener for Fickle {
            fn open(&self, ctx: &mut OpenContext<'_>) -> OpenOutcome {
                drop(ctx.store());
                OpenOutcome::Stop
            }

            fn write(&self, _state: &mut ListenerState, _data: &[u8]) -> sift::Result<()> {
                panic!("not attached");
            }

            fn close(&self, _state: ListenerState) -> sift::Result<()> {
                panic!("not attached");
            }
        }

        let dir = TempDir::new().unwrap();
        let config = PloadConfig::default().with_store_path(dir.path());
        let reg = PloadRegistry::new(config, &TypesResource::bundled().unwrap()).unwrap();
        reg.listen_start("fickle", None, None, Arc::new(Fickle)).unwrap();
        reg.resume();

        let pload = reg.alloc(Arc::new(Event::new("ftp.data", "ftp")), PloadFlags::NONE);
        pload.append(b"first chunk ").unwrap();
        pload.append(b"second chunk").unwrap();

        assert!(pload.is_opened());
        assert_eq!(pload.listener_count(), 0);
        assert!(pload.store().is_none());
        assert_eq!(reg.stats().snapshot().stores_opened, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        pload.end().unwrap();
    }

    #[test]
    fn test_decoded_into_store_chunk_invariant() {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        let data = pattern(200_000, 7);
        let encoded = STANDARD.encode(&data);

        let mut results = Vec::new();
        for chunk_size in [1usize, 3, 57, 4096, encoded.len()] {
            let dir = TempDir::new().unwrap();
            let (reg, requester) = store_registry(&dir, 64 * 1024);

            let pload = reg.alloc(Arc::new(Event::new("smtp.mail", "smtp")), PloadFlags::NEED_MAGIC);
            pload.set_encoding("base64").unwrap();
            for chunk in encoded.as_bytes().chunks(chunk_size) {
                pload.append(chunk).unwrap();
            }
            pload.end().unwrap();

            let store = requester.store.lock().unwrap().take().unwrap();
            assert_eq!(store.file_size(), data.len() as u64);
            results.push(read_all(&store, 8192));
        }

        for result in &results {
            assert_eq!(result, &data);
        }
    }
}

#[cfg(test)]
mod concurrent_tests {
    use super::*;
    use std::{
        sync::{mpsc, Barrier},
        thread,
        time::Duration,
    };

    #[test]
    fn test_concurrent_reader_round_trip() {
        let dir = TempDir::new().unwrap();
        let (reg, requester) = store_registry(&dir, 64 * 1024);

        let pload = reg.alloc(Arc::new(Event::new("http.body", "http")), PloadFlags::NONE);
        let first = pattern(1000, 0);
        pload.append(&first).unwrap();
        let store = requester.store.lock().unwrap().clone().unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let reader = {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut map = store.read_start().unwrap();
                barrier.wait();
                let mut out = Vec::new();
                let mut eofs = 0;
                loop {
                    let bytes = map.read(3000).unwrap();
                    if bytes.is_empty() {
                        eofs += 1;
                        break;
                    }
                    out.extend_from_slice(bytes);
                }
                // Once drained, EOF stays EOF
                assert!(map.read(10).unwrap().is_empty());
                (out, eofs)
            })
        };

        barrier.wait();
        let mut expected = first;
        for i in 1..50 {
            let chunk = pattern(7919, i);
            pload.append(&chunk).unwrap();
            expected.extend_from_slice(&chunk);
            if i % 10 == 0 {
                thread::sleep(Duration::from_millis(5));
            }
        }
        pload.end().unwrap();

        let (out, eofs) = reader.join().unwrap();
        assert_eq!(eofs, 1);
        assert_eq!(out, expected);
        assert_eq!(store.reader_count(), 0);
        assert!(!store.is_file_open());
    }

    #[test]
    fn test_blocked_reader_woken_by_append() {
        let dir = TempDir::new().unwrap();
        let (reg, requester) = store_registry(&dir, 64 * 1024);

        let pload = reg.alloc(Arc::new(Event::new("http.body", "http")), PloadFlags::NONE);
        pload.append(b"head").unwrap();
        let store = requester.store.lock().unwrap().clone().unwrap();

        let mut map = store.read_start().unwrap();
        assert_eq!(map.read(100).unwrap(), b"head");

        let (tx, rx) = mpsc::channel();
        let reader = thread::spawn(move || {
            let got = map.read(100).unwrap().to_vec();
            tx.send(got).unwrap();
            let eof = map.read(100).unwrap().is_empty();
            tx.send(Vec::new()).unwrap();
            eof
        });

        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err(), "reader returned before any append");

        pload.append(b"tail").unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), b"tail");

        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err(), "reader returned before end");
        pload.end().unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().is_empty());
        assert!(reader.join().unwrap());
    }

    #[test]
    fn test_zero_length_read_rejected() {
        let dir = TempDir::new().unwrap();
        let (reg, requester) = store_registry(&dir, 64 * 1024);

        let pload = reg.alloc(Arc::new(Event::new("http.body", "http")), PloadFlags::NONE);
        pload.append(b"x").unwrap();
        let store = requester.store.lock().unwrap().clone().unwrap();

        let mut map = store.read_start().unwrap();
        assert!(matches!(map.read(0), Err(PloadError::InvalidParameter { .. })));
        pload.end().unwrap();
    }
}
