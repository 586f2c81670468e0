//! netloom relay - stdin through a chain of transform filters to stdout.
//!
//! Usage: `netloom [config.toml]`
//!
//! Input is read in `relay.chunk_size` pieces and written into a pipe that
//! carries the configured `relay.filters`. The pipe is linked to a channel
//! sink, and a writer thread drains the channel to stdout.

use anyhow::Context;
use crossbeam_channel::bounded;
use netloom::{
    adapters::{ChannelSink, Transform},
    config::NetloomConfig,
    logging,
    stream::{Engine, FilterOptions, Retry},
};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = NetloomConfig::discover(path.as_deref()).context("Loading configuration")?;
    let _log_guard = logging::init(&config.log).context("Initializing logging")?;

    tracing::info!("Starting netloom relay ({:?})", config.relay.filters);

    let (tx, rx) = bounded::<Vec<u8>>(config.relay.channel_capacity);
    let writer = std::thread::spawn(move || -> std::io::Result<u64> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let mut total = 0u64;
        for chunk in rx {
            out.write_all(&chunk)?;
            total += chunk.len() as u64;
        }
        out.flush()?;
        Ok(total)
    });

    let engine = Engine::with_config(config.engine.clone());
    let relay = engine.pipe();
    let sink = engine.stream(ChannelSink::new(tx));

    // The most recently added upstream filter runs first.
    let mut filters = Vec::new();
    for name in config.relay.filters.iter().rev() {
        let filter = engine.stream(Transform::preset(name)?);
        let options = FilterOptions {
            delete_with_stream: false,
            close_together: true,
        };
        if !relay.add_filter_upstream(&filter, options) {
            anyhow::bail!("Could not attach filter {}", name);
        }
        filters.push(filter);
    }
    sink.write_from(&relay, None, false);

    if let Some(snapshot) = relay.snapshot() {
        tracing::debug!("relay graph: {}", snapshot.to_json()?);
    }

    let mut input = std::io::stdin().lock();
    let mut buf = vec![0u8; config.relay.chunk_size];
    loop {
        let n = input.read(&mut buf).context("Reading stdin")?;
        if n == 0 {
            break;
        }
        relay.write(&buf[..n]);
        drain(&sink);
    }
    drain(&sink);

    tracing::info!("Input exhausted, shutting down");
    drop(filters);
    drop(relay);
    drop(sink);
    drop(engine);

    let total = writer
        .join()
        .map_err(|_| anyhow::anyhow!("writer thread panicked"))?
        .context("Writing stdout")?;
    tracing::info!("Relayed {} bytes", total);
    Ok(())
}

/// Wait for the writer thread to make room until nothing is queued.
fn drain(sink: &netloom::Stream) {
    while sink.is_alive() && sink.queued_bytes().is_some_and(|n| n > 0) {
        std::thread::sleep(Duration::from_millis(1));
        sink.retry(Retry::Now);
    }
}
