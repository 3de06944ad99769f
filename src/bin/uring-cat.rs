//! Drain files through the kernel-polled reader and report timing and
//! transport counters.

use std::io::{self, Write};
use std::process;
use std::time::Instant;

use tracing_subscriber::EnvFilter;

use uring_fread::ChunkedReader;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: uring-cat [--print] <file>...");
        process::exit(1);
    }

    let print = paths.iter().any(|a| a == "--print");
    let mut failed = false;

    for path in paths.iter().filter(|a| *a != "--print") {
        if let Err(e) = cat(path, print) {
            eprintln!("uring-cat: {}", e);
            failed = true;
        }
    }

    if failed {
        process::exit(1);
    }
}

fn cat(path: &str, print: bool) -> uring_fread::Result<()> {
    let mut reader = ChunkedReader::open(path)?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;

    let start = Instant::now();
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if print {
            let stdout = io::stdout();
            let _ = stdout.lock().write_all(&buf[..n]);
        }
    }
    let elapsed = start.elapsed();

    let metrics = reader.metrics();
    eprintln!(
        "{}: {} bytes in {:?} ({} submission(s), {} wakeup(s), {} ack(s))",
        path, total, elapsed, metrics.submissions, metrics.wakeups, metrics.acknowledgements
    );

    reader.close();
    Ok(())
}
