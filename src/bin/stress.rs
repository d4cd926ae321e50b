//! vstore Stress Binary
//!
//! Runs one writer against a set of reader threads and checks that every
//! snapshot stays internally consistent while history is reclaimed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use vstore::{BytesBehavior, Config, Snapshot, Storage, WriteBatch};

/// vstore Stress Test
#[derive(Parser, Debug)]
#[command(name = "vstore-stress")]
#[command(about = "Concurrent snapshot consistency stress test for vstore")]
#[command(version)]
struct Args {
    /// Reader threads
    #[arg(short, long, default_value = "4")]
    readers: usize,

    /// Write operations issued by the writer
    #[arg(short, long, default_value = "100000")]
    operations: u64,

    /// Distinct keys
    #[arg(short, long, default_value = "256")]
    keys: u64,

    /// Distinct subkeys per key
    #[arg(short, long, default_value = "16")]
    subkeys: u64,

    /// Snapshots each reader keeps alive and re-verifies before releasing
    #[arg(long, default_value = "8")]
    holds: usize,

    /// Initial key slots (small values force frequent rotation)
    #[arg(long, default_value = "64")]
    key_capacity: usize,
}

fn main() {
    // Initialize tracing/logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("vstore stress v{}", vstore::VERSION);
    tracing::info!(
        readers = args.readers,
        operations = args.operations,
        keys = args.keys,
        subkeys = args.subkeys,
        "starting"
    );

    let config = Config::builder()
        .initial_key_capacity(args.key_capacity)
        .build();

    let storage = match Storage::with_config(BytesBehavior::new(), config) {
        Ok(storage) => storage,
        Err(e) => {
            tracing::error!("Failed to create storage: {}", e);
            std::process::exit(1);
        }
    };

    let done = AtomicBool::new(false);
    let checked = AtomicU64::new(0);
    let started = Instant::now();

    let result = crossbeam::scope(|scope| {
        let mut readers = Vec::with_capacity(args.readers);
        for _ in 0..args.readers {
            readers.push(scope.spawn(|_| read_loop(&storage, &done, &checked, args.holds)));
        }

        let written = write_loop(&storage, &args);
        done.store(true, Ordering::Release);

        let mut failures = 0usize;
        for reader in readers {
            match reader.join() {
                Ok(Ok(())) => {}
                Ok(Err(message)) => {
                    tracing::error!("{}", message);
                    failures += 1;
                }
                Err(_) => failures += 1,
            }
        }
        (written, failures)
    });

    let (written, failures) = match result {
        Ok((Ok(written), failures)) => (written, failures),
        Ok((Err(e), _)) => {
            tracing::error!("Writer failed: {}", e);
            std::process::exit(1);
        }
        Err(_) => {
            tracing::error!("Reader thread panicked");
            std::process::exit(1);
        }
    };

    let stats = storage.stats();
    tracing::info!(
        version = written,
        snapshots_checked = checked.load(Ordering::Relaxed),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "finished"
    );
    tracing::info!("{:?}", stats);

    if failures > 0 {
        tracing::error!("{} reader(s) observed an inconsistent snapshot", failures);
        std::process::exit(1);
    }
}

/// Payloads record where and when they were written, so a reader can check
/// the handle version against the payload itself.
fn payload(key: u64, subkey: u64, version: u64) -> Bytes {
    Bytes::from(format!("{key}:{subkey}:{version}"))
}

fn key_bytes(key: u64) -> Bytes {
    Bytes::from(format!("key-{key}"))
}

fn write_loop(storage: &Storage<BytesBehavior>, args: &Args) -> vstore::Result<u64> {
    let mut version = storage.version();
    for op in 0..args.operations {
        let key = op.wrapping_mul(2_654_435_761) % args.keys;
        let subkey = op % args.subkeys;
        let next = version + 1;

        version = match op % 97 {
            0 => storage.delete_key(key_bytes(key))?,
            n if n % 7 == 0 => storage.delete(key_bytes(key), subkey)?,
            n if n % 11 == 0 => {
                let mut batch = WriteBatch::new();
                for offset in 0..4 {
                    let subkey = (subkey + offset) % args.subkeys;
                    batch.put(key_bytes(key), subkey, payload(key, subkey, next));
                }
                storage
                    .apply(batch)?
                    .version()
                    .unwrap_or(version)
            }
            _ => storage.put(key_bytes(key), subkey, payload(key, subkey, next))?,
        };

        if op % 10_000 == 0 {
            storage.compact()?;
        }
    }
    Ok(version)
}

fn read_loop(
    storage: &Storage<BytesBehavior>,
    done: &AtomicBool,
    checked: &AtomicU64,
    holds: usize,
) -> Result<(), String> {
    let mut held: Vec<(Snapshot<BytesBehavior>, usize)> = Vec::with_capacity(holds);
    while !done.load(Ordering::Acquire) {
        let snapshot = storage.snapshot();
        let digest = verify(&snapshot)?;
        checked.fetch_add(1, Ordering::Relaxed);

        if held.len() == holds {
            // Oldest first, so releases move the oldest pin forward.
            let (old, expected) = held.remove(0);
            if verify(&old)? != expected {
                return Err(format!("snapshot at v{} changed while held", old.version()));
            }
        }
        if holds > 0 {
            held.push((snapshot, digest));
        }
    }
    Ok(())
}

/// Walk the whole snapshot and return the number of payload bytes seen.
fn verify(snapshot: &Snapshot<BytesBehavior>) -> Result<usize, String> {
    let version = snapshot.version();
    let mut keys = 0;
    let mut subkeys = 0;
    let mut bytes = 0;

    for view in snapshot {
        keys += 1;
        let mut seen = 0;
        for entry in snapshot.subkeys(&view) {
            seen += 1;
            let handle = entry.payload;
            let payload = handle.payload().ok_or("iterator yielded an empty handle")?;
            let text = std::str::from_utf8(payload).map_err(|e| e.to_string())?;
            let written: u64 = text
                .rsplit(':')
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| format!("malformed payload {text:?}"))?;

            if handle.version() > version || written != handle.version() {
                return Err(format!(
                    "v{version}: payload {text:?} carries handle version {}",
                    handle.version()
                ));
            }
            if snapshot.get(view.key(), entry.subkey) != handle {
                return Err(format!("v{version}: point lookup disagrees with iteration"));
            }
            bytes += payload.len();
        }
        if seen != view.subkeys_count() {
            return Err(format!(
                "v{version}: key count says {} subkeys, iteration saw {seen}",
                view.subkeys_count()
            ));
        }
        subkeys += seen;
    }

    if keys != snapshot.keys_count() || subkeys != snapshot.subkeys_count() {
        return Err(format!(
            "v{version}: counts ({}, {}) but walked ({keys}, {subkeys})",
            snapshot.keys_count(),
            snapshot.subkeys_count()
        ));
    }
    Ok(bytes)
}
