//! Tracing setup for embedders of this crate. There is no bundled binary
//! to call this automatically (ingestion/query CLIs are out of scope), so
//! it is a convenience a host application can opt into, grounded on the
//! `tracing_subscriber::fmt()` + `EnvFilter` setup this corpus's
//! `retrieval-cli` wires up for its own `main`.

use tracing_appender::non_blocking::WorkerGuard;

/// Installs a stderr-writing `tracing_subscriber` with `EnvFilter` set to
/// `retrieval_engine=info` unless `RUST_LOG` overrides it. Returns the
/// `WorkerGuard` the caller must keep alive for the process lifetime (the
/// writer flushes on drop).
pub fn init_tracing() -> Result<WorkerGuard, tracing_subscriber::filter::ParseError> {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("retrieval_engine=info".parse()?),
        )
        .with_writer(non_blocking)
        .init();
    Ok(guard)
}
