// Reads a file directly and through the double-buffered reader, then compares
// byte counts and CRC32 checksums.
//
// Usage: dbuf_checksum [--async] <file> [buffer_size]
// Example: dbuf_checksum --async /tmp/random.bin 13M

use crc32fast::Hasher;
use double_buffered_reader::{
    parse_buffer_size, AsyncDoubleBufferedReader, DoubleBufferedReader, ReaderConfig,
    ReaderError, ReaderStats, DEFAULT_BUFFER_SIZE,
};
use log::{debug, info};
use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Outcome of one pass over the file
struct Pass {
    bytes: u64,
    crc: u32,
    elapsed: Duration,
    stats: Option<ReaderStats>,
}

/// Sink that only feeds a CRC32 hasher
struct ChecksumWriter {
    hasher: Hasher,
}

impl Write for ChecksumWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn direct_pass(path: &str) -> Result<Pass, ReaderError> {
    let start = Instant::now();
    let mut file = File::open(path)?;
    let mut sink = ChecksumWriter {
        hasher: Hasher::new(),
    };
    let bytes = io::copy(&mut file, &mut sink)?;
    Ok(Pass {
        bytes,
        crc: sink.hasher.finalize(),
        elapsed: start.elapsed(),
        stats: None,
    })
}

fn buffered_pass(path: &str, config: ReaderConfig) -> Result<Pass, ReaderError> {
    let start = Instant::now();
    let file = File::open(path)?;
    let mut reader = DoubleBufferedReader::with_config(file, config)?;
    let mut sink = ChecksumWriter {
        hasher: Hasher::new(),
    };
    let bytes = io::copy(&mut reader, &mut sink)?;
    let stats = reader.close()?;
    Ok(Pass {
        bytes,
        crc: sink.hasher.finalize(),
        elapsed: start.elapsed(),
        stats: Some(stats),
    })
}

fn async_pass(path: &str, config: ReaderConfig) -> Result<Pass, ReaderError> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let start = Instant::now();
        let file = tokio::fs::File::open(path).await?;
        let mut reader = AsyncDoubleBufferedReader::with_config(file, config).await?;
        let mut hasher = Hasher::new();
        let mut chunk = vec![0u8; 64 * 1024];
        let mut bytes = 0u64;

        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            hasher.update(&chunk[..n]);
            bytes += n as u64;
        }

        let stats = reader.close().await?;
        Ok::<Pass, ReaderError>(Pass {
            bytes,
            crc: hasher.finalize(),
            elapsed: start.elapsed(),
            stats: Some(stats),
        })
    })
}

fn print_pass(label: &str, pass: &Pass) {
    println!(
        "{:<9} {:>12} bytes  crc32 {:08X}  {:?}",
        label, pass.bytes, pass.crc, pass.elapsed
    );
    if let Some(stats) = &pass.stats {
        println!(
            "          {} swaps, stalled {:?} waiting for fills",
            stats.swaps, stats.stalled
        );
    }
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} [--async] <file> [buffer_size]", program);
    eprintln!("Example: {} --async /tmp/random.bin 13M", program);
    std::process::exit(2);
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            writeln!(buf, "[{} {}] {}", ts, record.level(), record.args())
        })
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args
        .first()
        .cloned()
        .unwrap_or_else(|| "dbuf_checksum".to_string());

    let use_async = args.iter().skip(1).any(|a| a == "--async");
    let positional: Vec<&String> = args.iter().skip(1).filter(|a| *a != "--async").collect();

    let path = match positional.first() {
        Some(path) => path.as_str(),
        None => usage(&program),
    };

    let buffer_size = match positional.get(1) {
        Some(raw) => match parse_buffer_size(raw) {
            Ok(size) => size,
            Err(e) => {
                eprintln!("Error: invalid buffer size '{}': {}", raw, e);
                std::process::exit(2);
            }
        },
        None => DEFAULT_BUFFER_SIZE,
    };

    let config = ReaderConfig::new(buffer_size);
    info!(
        "Checking {} with {} byte buffers ({} bytes resident), {} reader",
        path,
        buffer_size,
        config.footprint(),
        if use_async { "async" } else { "blocking" }
    );

    let direct = match direct_pass(path) {
        Ok(pass) => pass,
        Err(e) => {
            eprintln!("Error: direct read of {} failed: {}", path, e);
            std::process::exit(1);
        }
    };
    debug!("Direct pass finished in {:?}", direct.elapsed);

    let buffered = if use_async {
        async_pass(path, config)
    } else {
        buffered_pass(path, config)
    };
    let buffered = match buffered {
        Ok(pass) => pass,
        Err(e) => {
            eprintln!("Error: double-buffered read of {} failed: {}", path, e);
            std::process::exit(1);
        }
    };

    print_pass("direct", &direct);
    print_pass("buffered", &buffered);

    if direct.bytes != buffered.bytes || direct.crc != buffered.crc {
        eprintln!("✗ Mismatch between direct and double-buffered reads");
        std::process::exit(1);
    }
    println!("✓ Checksums match");
}
