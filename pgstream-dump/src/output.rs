//! Output sinks for dump streams.
//!
//! Writes a [`DumpStream`] to a file or stdout, optionally through a
//! Zstandard encoder. Output is copied in chunks and never held in memory.

use std::path::Path;

use pgstream_core::{DumpError, DumpStream, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

type Sink = Box<dyn AsyncWrite + Unpin + Send>;

#[cfg(feature = "compression")]
const COMPRESSION_LEVEL: i32 = 3;

#[cfg(feature = "compression")]
const CHUNK_SIZE: usize = 64 * 1024;

/// Fails early when `--compress` was given to a build without zstd.
///
/// # Errors
/// Returns a configuration error naming the missing feature.
pub fn check_compression(compress: bool) -> Result<()> {
    if compress && !cfg!(feature = "compression") {
        return Err(DumpError::configuration(
            "Compression not available. Compile with --features compression",
        ));
    }
    Ok(())
}

/// Copies `stream` to `output` (stdout when `None`) and closes it.
///
/// Returns the number of dump bytes read from the tool, before any
/// compression. The stream is closed on every path, so the tool's exit
/// status is always observed. When the dump fails, a partially written
/// output file is removed so it cannot be mistaken for a complete dump.
///
/// # Errors
/// Returns an I/O error for the sink, a configuration error when
/// compression is unavailable, or the stream's close error.
pub async fn write_dump(
    stream: &mut DumpStream,
    output: Option<&Path>,
    compress: bool,
) -> Result<u64> {
    let mut sink = match open_sink(output, compress).await {
        Ok(sink) => sink,
        Err(e) => {
            if let Err(close_err) = stream.close().await {
                warn!("{} also failed to close: {}", stream.tool(), close_err);
            }
            return Err(e);
        }
    };

    let written = copy_to_sink(stream, &mut sink, compress).await;
    drop(sink);

    if let (Err(_), Some(path)) = (&written, output) {
        discard_partial(path).await;
    }
    written
}

async fn copy_to_sink(stream: &mut DumpStream, sink: &mut Sink, compress: bool) -> Result<u64> {
    #[cfg(feature = "compression")]
    let bytes = if compress {
        copy_compressed(stream, sink).await?
    } else {
        stream.drain_to(sink).await?
    };
    #[cfg(not(feature = "compression"))]
    let bytes = {
        debug_assert!(!compress);
        stream.drain_to(sink).await?
    };

    sink.flush()
        .await
        .map_err(|e| DumpError::io("Failed to flush output", e))?;
    sink.shutdown()
        .await
        .map_err(|e| DumpError::io("Failed to finish output", e))?;

    Ok(bytes)
}

async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => warn!("Removed incomplete dump {}", path.display()),
        Err(e) => warn!(
            "Failed to remove incomplete dump {}: {}",
            path.display(),
            e
        ),
    }
}

async fn open_sink(output: Option<&Path>, compress: bool) -> Result<Sink> {
    check_compression(compress)?;

    match output {
        Some(path) => {
            let file = tokio::fs::File::create(path).await.map_err(|e| {
                DumpError::io(format!("Failed to create {}", path.display()), e)
            })?;
            debug!("Writing dump to {}", path.display());
            Ok(Box::new(file))
        }
        None => {
            debug!("Writing dump to stdout");
            Ok(Box::new(tokio::io::stdout()))
        }
    }
}

#[cfg(feature = "compression")]
async fn copy_compressed(stream: &mut DumpStream, sink: &mut Sink) -> Result<u64> {
    let copied = compress_into(stream, sink).await;
    let closed = stream.close().await;

    match (copied, closed) {
        (Ok(bytes), Ok(())) => Ok(bytes),
        (Ok(_), Err(err)) => Err(err),
        (Err(_), Err(DumpError::Cancelled)) => Err(DumpError::Cancelled),
        (Err(source), closed) => {
            if let Err(close_err) = closed {
                warn!("{} also failed to close: {}", stream.tool(), close_err);
            }
            Err(DumpError::io(
                format!("Failed to compress {} output", stream.tool()),
                source,
            ))
        }
    }
}

#[cfg(feature = "compression")]
async fn compress_into(stream: &mut DumpStream, sink: &mut Sink) -> std::io::Result<u64> {
    use std::io::Write;
    use tokio::io::AsyncReadExt;

    let mut encoder = zstd::stream::write::Encoder::new(Vec::new(), COMPRESSION_LEVEL)?;
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        total = total.saturating_add(n as u64);
        encoder.write_all(&chunk[..n])?;

        let pending = encoder.get_mut();
        if !pending.is_empty() {
            sink.write_all(pending.as_slice()).await?;
            pending.clear();
        }
    }

    let tail = encoder.finish()?;
    sink.write_all(&tail).await?;
    Ok(total)
}
