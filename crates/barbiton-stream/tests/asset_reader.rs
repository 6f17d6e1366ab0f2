#![forbid(unsafe_code)]

//! End-to-end behaviour of `MediaAsset` + `StreamReader` over an in-memory,
//! encrypted chunk source. Readers run on plain threads; the asset run-loop
//! runs on a dedicated tokio runtime.

use std::{
    io::{ErrorKind, Read, Seek, SeekFrom},
    sync::{Arc, mpsc},
    thread,
    time::{Duration, Instant},
};

use barbiton_events::{AssetEvent, Event};
use barbiton_stream::{
    AssetConfig, AssetDescriptor, AssetError, ChunkIdx, ChunkStatus, FetchError, MediaAsset,
};
use barbiton_test_utils::{MemoryChunkSource, Xorshift64, payload, test_key};
use rstest::rstest;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

struct Harness {
    asset: MediaAsset,
    source: Arc<MemoryChunkSource>,
    plain: Vec<u8>,
    rt: Runtime,
}

impl Harness {
    fn new(len: usize, chunk: u64) -> Self {
        Self::build(len, chunk, 0, |c| c, |s| s)
    }

    fn build(
        len: usize,
        chunk: u64,
        header_offset: u64,
        config: impl FnOnce(AssetConfig) -> AssetConfig,
        source: impl FnOnce(MemoryChunkSource) -> MemoryChunkSource,
    ) -> Self {
        let rt = Runtime::new().unwrap();
        let plain = payload(len, 0xb0b);
        let config = config(
            AssetConfig::default()
                .with_chunk_byte_size(chunk)
                .with_runtime(rt.handle().clone()),
        );
        let source = Arc::new(source(MemoryChunkSource::new(
            &plain,
            config.layout,
            &test_key(),
        )));
        let descriptor =
            AssetDescriptor::new("test asset", "audio/ogg").with_header_offset(header_offset);
        let asset = MediaAsset::open(descriptor, test_key(), source.clone(), config).unwrap();
        Self {
            asset,
            source,
            plain,
            rt,
        }
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Run a read on another thread and report its result through a channel.
fn spawn_read(
    mut reader: barbiton_stream::StreamReader,
    len: usize,
) -> mpsc::Receiver<std::io::Result<Vec<u8>>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = vec![0u8; len];
        let result = reader.read(&mut buf).map(|n| {
            buf.truncate(n);
            buf
        });
        let _ = tx.send(result);
    });
    rx
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn small_asset_read_seek_and_eof() {
    let h = Harness::new(450, 100);
    let mut reader = h.asset.new_reader();

    let mut buf = [0u8; 30];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &h.plain[..30]);
    wait_until(|| h.source.request_count(ChunkIdx(1)) == 1);

    assert_eq!(reader.seek(SeekFrom::Start(440)).unwrap(), 440);
    let mut tail = [0u8; 50];
    assert_eq!(reader.read(&mut tail).unwrap(), 10);
    assert_eq!(&tail[..10], &h.plain[440..]);
    assert_eq!(reader.read(&mut tail).unwrap(), 0);

    assert_eq!(h.asset.total_size(), Some(450));
    assert_eq!(h.asset.stats().final_chunk, ChunkIdx(4));
}

#[rstest]
#[case::unaligned(1000, 128, 0xa7)]
#[case::single_chunk(60, 128, 0)]
#[case::exact_multiple(512, 128, 0)]
#[case::default_chunk_size(300_000, 131_072, 0xa7)]
#[timeout(Duration::from_secs(10))]
fn read_to_end_returns_payload(#[case] len: usize, #[case] chunk: u64, #[case] header_offset: u64) {
    let h = Harness::build(len, chunk, header_offset, |c| c, |s| s);
    let mut reader = h.asset.new_reader();

    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();

    let start = usize::try_from(header_offset).unwrap();
    assert_eq!(out, &h.plain[start..]);
    assert_eq!(h.asset.payload_size(), Some((len as u64) - header_offset));
}

#[rstest]
#[timeout(Duration::from_secs(20))]
fn random_seeks_match_plaintext() {
    // Six resident chunks out of twenty: most seeks land on evicted chunks.
    let h = Harness::build(5000, 256, 0, |c| c.with_resident_bytes(0), |s| s);
    let mut reader = h.asset.new_reader();
    let mut rng = Xorshift64::new(0x5eed);

    for _ in 0..200 {
        let pos = rng.range_u64(0, 5000);
        let len = usize::try_from(rng.range_u64(1, 600)).unwrap();
        assert_eq!(reader.seek(SeekFrom::Start(pos)).unwrap(), pos);

        let mut buf = vec![0u8; len];
        let n = reader.read(&mut buf).unwrap();

        let start = usize::try_from(pos).unwrap();
        let end = (start + len).min(h.plain.len());
        assert_eq!(&buf[..n], &h.plain[start..end]);
    }
    assert!(h.asset.stats().resident_chunks <= 6 + 4);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn seek_is_relative_to_payload() {
    let h = Harness::build(400, 64, 10, |c| c, |s| s);
    let mut reader = h.asset.new_reader();

    assert_eq!(reader.seek(SeekFrom::Start(0)).unwrap(), 0);
    let mut buf = [0u8; 5];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &h.plain[10..15]);
    assert_eq!(reader.position(), 5);

    assert_eq!(reader.seek(SeekFrom::Current(-5)).unwrap(), 0);
    assert_eq!(reader.seek(SeekFrom::End(0)).unwrap(), 390);
    assert_eq!(reader.seek(SeekFrom::End(-1)).unwrap(), 389);
    let mut last = [0u8; 4];
    assert_eq!(reader.read(&mut last).unwrap(), 1);
    assert_eq!(last[0], h.plain[399]);

    let err = reader.seek(SeekFrom::Current(-1000)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(reader.position(), 390);

    assert_eq!(reader.seek(SeekFrom::Start(1000)).unwrap(), 1000);
    assert_eq!(reader.read(&mut last).unwrap(), 0);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn seek_from_end_waits_for_size() {
    let h = Harness::new(450, 100);
    h.source.hold();
    let mut reader = h.asset.new_reader();

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(reader.seek(SeekFrom::End(-50)));
    });
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    h.source.release();
    assert_eq!(rx.recv().unwrap().unwrap(), 400);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn start_and_current_seeks_never_fetch() {
    let h = Harness::build(450, 100, 0, |c| c.with_fetch_ahead(0), |s| s);
    wait_until(|| !h.source.requests().is_empty());
    let mut reader = h.asset.new_reader();

    reader.seek(SeekFrom::Start(350)).unwrap();
    reader.seek(SeekFrom::Current(-100)).unwrap();
    thread::sleep(Duration::from_millis(20));

    assert_eq!(h.source.request_count(ChunkIdx(2)), 0);
    assert_eq!(h.source.request_count(ChunkIdx(3)), 0);
}

#[rstest]
#[timeout(Duration::from_secs(20))]
fn read_ahead_and_concurrency_are_bounded() {
    let h = Harness::build(
        40 * 256,
        256,
        0,
        |c| c.with_fetch_ahead(4).with_max_concurrent_fetches(1),
        |s| s.with_delay(Duration::from_millis(2)),
    );
    let mut reader = h.asset.new_reader();

    let mut buf = [0u8; 100];
    let mut out = Vec::new();
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
        let reading = h.asset.layout().chunk_at(reader.position());
        for requested in h.source.requests() {
            assert!(
                requested <= reading.ahead(4),
                "{requested} requested while reading {reading}"
            );
        }
        assert!(h.asset.stats().in_flight <= 2);
    }

    assert_eq!(out, h.plain);
    // One blocked reader plus at most one read-ahead fetch.
    assert!(h.source.max_in_flight() <= 2);
    for idx in 0..40 {
        assert_eq!(h.source.request_count(ChunkIdx(idx)), 1, "chunk {idx}");
    }
    assert!(h.source.requests().iter().all(|idx| idx.0 < 40));
}

#[rstest]
#[timeout(Duration::from_secs(20))]
fn concurrent_readers_share_fetches() {
    let h = Harness::build(
        20 * 128,
        128,
        0,
        |c| c,
        |s| s.with_delay(Duration::from_millis(1)),
    );

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let mut reader = h.asset.new_reader();
            thread::spawn(move || {
                reader.seek(SeekFrom::Start(i * 300)).unwrap();
                let mut out = Vec::new();
                reader.read_to_end(&mut out).unwrap();
                out
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let out = handle.join().unwrap();
        assert_eq!(out, &h.plain[i * 300..]);
    }
    for idx in 0..20 {
        assert_eq!(h.source.request_count(ChunkIdx(idx)), 1, "chunk {idx}");
    }
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn blocked_read_resumes_when_chunk_arrives() {
    let h = Harness::new(450, 100);
    h.source.hold();

    let rx = spawn_read(h.asset.new_reader(), 10);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(h.asset.chunk_status(ChunkIdx(0)), Some(ChunkStatus::InProgress));

    h.source.release();
    let data = rx.recv().unwrap().unwrap();
    assert_eq!(data, &h.plain[..10]);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn close_wakes_blocked_readers() {
    let h = Harness::new(450, 100);
    h.source.hold();

    let first = spawn_read(h.asset.new_reader(), 10);
    let second = spawn_read(h.asset.new_reader(), 10);
    assert!(first.recv_timeout(Duration::from_millis(30)).is_err());

    h.asset.close();
    h.asset.close();

    for rx in [first, second] {
        let err = rx.recv().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    }
    assert_eq!(h.asset.error(), Some(AssetError::Closed));
    assert!(h.asset.is_closed());

    let mut late = h.asset.new_reader();
    let err = late.read(&mut [0u8; 4]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    assert_eq!(
        late.seek(SeekFrom::Start(0)).unwrap_err().kind(),
        ErrorKind::BrokenPipe
    );
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn closed_asset_fails_readers_with_data_in_hand() {
    let h = Harness::new(450, 100);
    let mut reader = h.asset.new_reader();
    let mut buf = [0u8; 10];
    reader.read_exact(&mut buf).unwrap();

    h.asset.close();

    assert_eq!(reader.read(&mut buf).unwrap_err().kind(), ErrorKind::BrokenPipe);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn reader_closer_unblocks_only_that_reader() {
    let h = Harness::new(450, 100);
    h.source.hold();

    let reader = h.asset.new_reader();
    let closer = reader.closer();
    let rx = spawn_read(reader, 10);
    assert!(rx.recv_timeout(Duration::from_millis(30)).is_err());

    closer.close();
    closer.close();
    assert!(closer.is_closed());
    assert_eq!(rx.recv().unwrap().unwrap_err().kind(), ErrorKind::BrokenPipe);

    assert!(!h.asset.is_closed());
    h.source.release();
    let mut other = h.asset.new_reader();
    let mut buf = [0u8; 10];
    other.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &h.plain[..10]);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn closed_reader_rejects_io() {
    let h = Harness::new(450, 100);
    let mut reader = h.asset.new_reader();
    reader.close();
    reader.close();

    assert!(reader.is_closed());
    assert_eq!(reader.read(&mut [0u8; 1]).unwrap_err().kind(), ErrorKind::BrokenPipe);
    assert_eq!(
        reader.seek(SeekFrom::Start(0)).unwrap_err().kind(),
        ErrorKind::BrokenPipe
    );
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn fetch_error_fails_the_asset() {
    let h = Harness::build(450, 100, 0, |c| c, |s| s);
    h.source
        .fail_chunk(ChunkIdx(2), FetchError::Transport("boom".into()));
    let mut reader = h.asset.new_reader();

    let mut out = Vec::new();
    let err = reader.read_to_end(&mut out).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Other);
    assert!(err.to_string().contains("boom"));
    assert_eq!(out, &h.plain[..out.len()]);

    assert_eq!(
        h.asset.error(),
        Some(AssetError::Fetch(FetchError::Transport("boom".into())))
    );
    assert_eq!(h.asset.chunk_status(ChunkIdx(0)), Some(ChunkStatus::Halted));

    // First error wins.
    h.asset.close();
    assert!(matches!(h.asset.error(), Some(AssetError::Fetch(_))));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn missing_size_is_fatal() {
    let h = Harness::build(450, 100, 0, |c| c, MemoryChunkSource::without_size);
    let mut reader = h.asset.new_reader();

    let err = reader.read(&mut [0u8; 8]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Other);
    assert!(matches!(
        h.asset.error(),
        Some(AssetError::Fetch(FetchError::Malformed(_)))
    ));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn parent_cancellation_closes_asset() {
    let parent = CancellationToken::new();
    let h = Harness::build(450, 100, 0, |c| c.with_cancel(parent.clone()), |s| s);
    h.source.hold();
    let rx = spawn_read(h.asset.new_reader(), 10);

    parent.cancel();

    assert_eq!(rx.recv().unwrap().unwrap_err().kind(), ErrorKind::BrokenPipe);
    assert_eq!(h.asset.error(), Some(AssetError::Closed));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn closing_asset_leaves_parent_token_alone() {
    let parent = CancellationToken::new();
    let h = Harness::build(450, 100, 0, |c| c.with_cancel(parent.clone()), |s| s);

    h.asset.close();

    assert!(h.asset.cancel_token().is_cancelled());
    assert!(!parent.is_cancelled());
}

#[rstest]
#[timeout(Duration::from_secs(20))]
fn eviction_keeps_header_and_refetches_on_demand() {
    let h = Harness::build(30 * 100, 100, 0, |c| c.with_resident_bytes(0), |s| s);
    let mut reader = h.asset.new_reader();

    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, h.plain);

    let stats = h.asset.stats();
    assert_eq!(stats.resident_limit, 6);
    assert!(stats.resident_chunks <= stats.resident_limit + 5);
    assert_eq!(h.asset.chunk_status(ChunkIdx(0)), Some(ChunkStatus::Ready));
    assert_eq!(h.asset.chunk_status(ChunkIdx(5)), None);

    reader.seek(SeekFrom::Start(550)).unwrap();
    let mut buf = [0u8; 20];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &h.plain[550..570]);
    assert_eq!(h.source.request_count(ChunkIdx(5)), 2);
}

#[rstest]
#[timeout(Duration::from_secs(20))]
fn chunk_with_blocked_reader_survives_eviction() {
    let h = Harness::build(
        30 * 100,
        100,
        0,
        |c| c.with_resident_bytes(0).with_max_concurrent_fetches(4),
        |s| s,
    );
    let mut a = h.asset.new_reader();
    let mut b = h.asset.new_reader();
    let mut warm = vec![0u8; 2000];
    a.read_exact(&mut warm).unwrap();
    assert_eq!(h.asset.chunk_status(ChunkIdx(2)), None);
    assert_eq!(h.asset.chunk_status(ChunkIdx(5)), None);

    h.source.hold();
    b.seek(SeekFrom::Start(250)).unwrap();
    let rx_b = spawn_read(b, 20);
    wait_until(|| h.source.request_count(ChunkIdx(2)) == 2);

    // Moves the read-ahead window away from chunk 2.
    a.seek(SeekFrom::Start(500)).unwrap();
    let rx_a = spawn_read(a, 20);
    wait_until(|| h.source.request_count(ChunkIdx(5)) == 2);
    h.source.release();

    assert_eq!(rx_b.recv().unwrap().unwrap(), &h.plain[250..270]);
    assert_eq!(rx_a.recv().unwrap().unwrap(), &h.plain[500..520]);
    assert_eq!(h.source.request_count(ChunkIdx(2)), 2);
    assert_eq!(h.source.request_count(ChunkIdx(5)), 2);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn seek_end_of_asset_shorter_than_header() {
    let h = Harness::build(50, 100, 0xa7, |c| c, |s| s);
    let mut reader = h.asset.new_reader();

    assert_eq!(reader.seek(SeekFrom::End(0)).unwrap(), 0);
    assert_eq!(reader.read(&mut [0u8; 8]).unwrap(), 0);
    assert_eq!(h.asset.payload_size(), Some(0));
    assert_eq!(
        reader.seek(SeekFrom::End(-1)).unwrap_err().kind(),
        ErrorKind::InvalidInput
    );
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn lifecycle_events_are_published() {
    let h = Harness::build(450, 100, 0, |c| c, |s| {
        s.hold();
        s
    });
    let mut events = h.asset.events();
    h.source.release();
    let mut reader = h.asset.new_reader();
    reader.read_to_end(&mut Vec::new()).unwrap();
    h.asset.close();

    let mut seen = Vec::new();
    h.rt.block_on(async {
        while let Ok(Event::Asset(event)) = events.recv().await {
            let done = event == AssetEvent::Closed;
            seen.push(event);
            if done {
                break;
            }
        }
    });

    assert!(seen.contains(&AssetEvent::SizeKnown {
        total_bytes: 450,
        final_chunk: 4
    }));
    assert!(seen.contains(&AssetEvent::ChunkReady { idx: 4, len: 50 }));
    assert!(seen.iter().any(|e| matches!(
        e,
        AssetEvent::ChunkRequested { idx: 1, .. }
    )));
    assert_eq!(seen.last(), Some(&AssetEvent::Closed));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn empty_asset_reads_nothing() {
    let h = Harness::new(0, 100);
    let mut reader = h.asset.new_reader();
    assert_eq!(reader.read(&mut [0u8; 16]).unwrap(), 0);
    assert_eq!(h.asset.total_size(), Some(0));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn zero_length_read_is_noop() {
    let h = Harness::new(450, 100);
    let mut reader = h.asset.new_reader();
    assert_eq!(reader.read(&mut []).unwrap(), 0);
    assert_eq!(reader.position(), 0);
}

#[test]
fn open_without_runtime_fails() {
    let plain = payload(10, 1);
    let config = AssetConfig::default();
    let source = Arc::new(MemoryChunkSource::new(&plain, config.layout, &test_key()));
    let result = MediaAsset::open(AssetDescriptor::default(), test_key(), source, config);
    assert_eq!(result.unwrap_err(), AssetError::NoRuntime);
}
