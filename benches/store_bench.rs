use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sift::{
    Event, ListenerState, OpenContext, OpenOutcome, PayloadListener, PloadConfig, PloadFlags,
    PloadRegistry, Store, TypesResource,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct StoreRequester {
    store: Mutex<Option<Arc<Store>>>,
    persist: bool,
}

impl PayloadListener for StoreRequester {
    fn open(&self, ctx: &mut OpenContext<'_>) -> OpenOutcome {
        if self.persist {
            *self.store.lock().unwrap() = Some(ctx.store());
        }
        OpenOutcome::Continue(Box::new(()))
    }

    fn write(&self, _state: &mut ListenerState, data: &[u8]) -> sift::Result<()> {
        black_box(data);
        Ok(())
    }

    fn close(&self, _state: ListenerState) -> sift::Result<()> {
        Ok(())
    }
}

fn setup(dir: &TempDir, persist: bool) -> (Arc<PloadRegistry>, Arc<StoreRequester>) {
    let config = PloadConfig::default().with_store_path(dir.path());
    let reg = PloadRegistry::new(config, &TypesResource::bundled().unwrap()).unwrap();
    let requester = Arc::new(StoreRequester {
        store: Mutex::new(None),
        persist,
    });
    reg.listen_start("bench", None, None, requester.clone()).unwrap();
    reg.resume();
    (reg, requester)
}

fn benchmark_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("Payload_Append");
    let total = 8 * 1024 * 1024;

    for chunk in [4 * 1024, 64 * 1024, 1024 * 1024].iter() {
        let data = vec![0x5au8; *chunk];
        group.throughput(Throughput::Bytes(total as u64));

        for persist in [false, true] {
            let name = if persist { "store" } else { "relay" };
            group.bench_with_input(BenchmarkId::new(name, chunk), chunk, |b, &chunk| {
                let dir = TempDir::new().unwrap();
                let (reg, requester) = setup(&dir, persist);

                b.iter(|| {
                    let pload = reg.alloc(Arc::new(Event::new("bench", "bench")), PloadFlags::NONE);
                    for _ in 0..total / chunk {
                        pload.append(&data).unwrap();
                    }
                    pload.end().unwrap();
                    requester.store.lock().unwrap().take();
                });
            });
        }
    }

    group.finish();
}

fn benchmark_read_back(c: &mut Criterion) {
    let mut group = c.benchmark_group("Store_Read");
    let total = 16 * 1024 * 1024;
    group.throughput(Throughput::Bytes(total as u64));

    let dir = TempDir::new().unwrap();
    let (reg, requester) = setup(&dir, true);
    let pload = reg.alloc(Arc::new(Event::new("bench", "bench")), PloadFlags::NONE);
    let data = vec![0xa5u8; 1024 * 1024];
    for _ in 0..16 {
        pload.append(&data).unwrap();
    }
    pload.end().unwrap();
    let store = requester.store.lock().unwrap().take().unwrap();

    for read_len in [4 * 1024, 256 * 1024].iter() {
        group.bench_with_input(BenchmarkId::new("read", read_len), read_len, |b, &read_len| {
            b.iter(|| {
                let mut reader = store.read_start().unwrap();
                let mut seen = 0;
                loop {
                    let bytes = reader.read(read_len).unwrap();
                    if bytes.is_empty() {
                        break;
                    }
                    seen += bytes.len();
                }
                black_box(seen);
            });
        });
    }

    group.finish();
}

fn benchmark_base64_decode(c: &mut Criterion) {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let mut group = c.benchmark_group("Payload_Base64");
    let raw = vec![0x3cu8; 1024 * 1024];
    let encoded = STANDARD.encode(&raw);
    group.throughput(Throughput::Bytes(raw.len() as u64));

    group.bench_function("decode_relay", |b| {
        let dir = TempDir::new().unwrap();
        let (reg, _requester) = setup(&dir, false);

        b.iter(|| {
            let pload = reg.alloc(Arc::new(Event::new("bench", "bench")), PloadFlags::NONE);
            pload.set_encoding("base64").unwrap();
            for chunk in encoded.as_bytes().chunks(76 * 100) {
                pload.append(chunk).unwrap();
            }
            pload.end().unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_append,
    benchmark_read_back,
    benchmark_base64_decode
);
criterion_main!(benches);
