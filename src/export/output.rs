//! Output destinations
//!
//! A dump goes to a file or to stdout, optionally through a gzip or zstd
//! encoder. Encoders write their trailer only on shutdown, so the output
//! must be passed to [`finish_output`] once the dump is done.

use std::path::Path;
use std::str::FromStr;

use async_compression::tokio::write::{GzipEncoder, ZstdEncoder};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{ConfigError, Result, SinkError};

/// Boxed output writer
pub type Output = Box<dyn AsyncWrite + Unpin + Send>;

/// Output compression
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl FromStr for Compression {
    type Err = ConfigError;

    /// Accepts `gz`/`gzip`, `zst`/`zstd`/`zstandard`, and `none` or empty
    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Compression::None),
            "gz" | "gzip" => Ok(Compression::Gzip),
            "zst" | "zstd" | "zstandard" => Ok(Compression::Zstd),
            _ => Err(ConfigError::InvalidValue {
                field: "output.compress".to_string(),
                value: name.to_string(),
            }),
        }
    }
}

impl Compression {
    /// Put the matching encoder in front of `writer`
    pub fn wrap<W>(self, writer: W) -> Output
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        match self {
            Compression::None => Box::new(writer),
            Compression::Gzip => Box::new(GzipEncoder::new(writer)),
            Compression::Zstd => Box::new(ZstdEncoder::new(writer)),
        }
    }
}

/// Open the output file (creating its directory), or stdout when `path` is `None`
///
/// # Arguments
/// * `path` - Destination file
/// * `compression` - Encoder placed in front of the destination
///
/// # Returns
/// * `Result<Output>` - Writer ready for a sink or document
pub async fn open_output(path: Option<&Path>, compression: Compression) -> Result<Output> {
    let Some(path) = path else {
        return Ok(compression.wrap(tokio::io::stdout()));
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    debug!("Writing to {} ({:?})", path.display(), compression);
    Ok(compression.wrap(tokio::fs::File::create(path).await?))
}

/// Flush the output and finish any compressed stream
pub async fn finish_output(output: &mut Output) -> Result<()> {
    output.shutdown().await.map_err(SinkError::Write)?;
    Ok(())
}
