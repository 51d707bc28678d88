// Measures the cost of the buffer handoff and how much source latency the
// double buffering hides. Run with: cargo run --release --bin handoff_diagnostics

use crossbeam_channel::bounded;
use double_buffered_reader::DoubleBufferedReader;
use std::io::{self, Read};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const ROUND_TRIPS: u32 = 10_000;

/// Source that sleeps before every read, like a slow disk or network
struct SlowSource {
    remaining: usize,
    delay: Duration,
}

impl Read for SlowSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        thread::sleep(self.delay);
        let n = buf.len().min(self.remaining);
        buf[..n].fill(0x5A);
        self.remaining -= n;
        Ok(n)
    }
}

fn main() {
    println!("=== Double-Buffer Handoff Diagnostic ===\n");

    test_rendezvous_latency();
    test_tokio_handoff_latency();
    test_overlap();
}

/// Round trip over a pair of zero-capacity channels, as used by the blocking reader
fn test_rendezvous_latency() {
    println!("Crossbeam bounded(0) round trip:");

    let (swap_tx, swap_rx) = bounded::<Box<[u8]>>(0);
    let (fill_tx, fill_rx) = bounded::<Box<[u8]>>(0);

    let filler = thread::spawn(move || {
        for buffer in swap_rx.iter() {
            if fill_tx.send(buffer).is_err() {
                break;
            }
        }
    });

    let mut buffer: Box<[u8]> = vec![0u8; 64].into_boxed_slice();
    let start = Instant::now();
    for _ in 0..ROUND_TRIPS {
        if swap_tx.send(buffer).is_err() {
            println!("  filler exited early");
            return;
        }
        buffer = match fill_rx.recv() {
            Ok(buffer) => buffer,
            Err(_) => {
                println!("  filler exited early");
                return;
            }
        };
    }
    let elapsed = start.elapsed();

    drop(swap_tx);
    let _ = filler.join();

    println!("  Mean round trip: {:?}", elapsed / ROUND_TRIPS);
}

/// Round trip over single-slot tokio channels, as used by the async reader
fn test_tokio_handoff_latency() {
    println!("\nTokio mpsc(1) round trip:");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            println!("  could not start runtime: {}", e);
            return;
        }
    };

    let elapsed = runtime.block_on(async {
        let (swap_tx, mut swap_rx) = mpsc::channel::<Box<[u8]>>(1);
        let (fill_tx, mut fill_rx) = mpsc::channel::<Box<[u8]>>(1);

        tokio::spawn(async move {
            while let Some(buffer) = swap_rx.recv().await {
                if fill_tx.send(buffer).await.is_err() {
                    break;
                }
            }
        });

        let mut buffer: Box<[u8]> = vec![0u8; 64].into_boxed_slice();
        let start = Instant::now();
        for _ in 0..ROUND_TRIPS {
            if swap_tx.send(buffer).await.is_err() {
                return None;
            }
            buffer = fill_rx.recv().await?;
        }
        Some(start.elapsed())
    });

    match elapsed {
        Some(elapsed) => println!("  Mean round trip: {:?}", elapsed / ROUND_TRIPS),
        None => println!("  filler task exited early"),
    }
}

/// A slow source and a slow consumer: with double buffering the total time
/// approaches the larger of the two instead of their sum.
fn test_overlap() {
    println!("\nOverlap of source and consumer latency:");

    let chunk = 64 * 1024;
    let chunks = 20;
    let delay = Duration::from_millis(5);

    let source = SlowSource {
        remaining: chunk * chunks,
        delay,
    };
    let mut reader = match DoubleBufferedReader::new(source, chunk) {
        Ok(reader) => reader,
        Err(e) => {
            println!("  could not create reader: {}", e);
            return;
        }
    };

    let mut buf = vec![0u8; chunk];
    let start = Instant::now();
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => thread::sleep(delay),
            Err(e) => {
                println!("  read failed: {}", e);
                return;
            }
        }
    }
    let elapsed = start.elapsed();

    let serial = delay * (2 * chunks as u32);
    println!("  Serial estimate:  {:?}", serial);
    println!("  Double-buffered:  {:?}", elapsed);

    match reader.close() {
        Ok(stats) => println!(
            "  {} swaps, consumer stalled {:?} in total",
            stats.swaps, stats.stalled
        ),
        Err(e) => println!("  close failed: {}", e),
    }

    if elapsed < serial {
        println!("  ✓ Source latency is hidden behind consumer work");
    } else {
        println!("  ⚠️  No overlap observed");
    }
}
