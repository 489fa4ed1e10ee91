//! CSV sink
//!
//! Writes one line per row, fields joined by the configured separator. The
//! header line holds the column names, quoted the same way as string values.
//! In raw mode fields are concatenated without separator or quoting and no
//! header is written. Lines are transcoded to the configured character
//! encoding; characters it cannot represent become `?`.

use async_trait::async_trait;
use encoding_rs::{EncoderResult, Encoding, UTF_8};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::error::{Result, SinkError};
use crate::export::converter::{Converter, quote_field};
use crate::source::ColumnDescriptor;

use super::{OUTPUT_BUFFER_SIZE, RowSink};

/// Line format settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    /// Field separator, may be multi-character or empty
    pub separator: String,
    /// Emit a header line with the column names
    pub header: bool,
    /// Concatenate raw values: no separator, no quoting, no header
    pub raw: bool,
    /// Character encoding of the output
    pub encoding: &'static Encoding,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            separator: ";".to_string(),
            header: true,
            raw: false,
            encoding: UTF_8,
        }
    }
}

/// Transcode `text` into `out`, replacing unmappable characters with `?`
pub fn encode_into(encoding: &'static Encoding, text: &str, out: &mut Vec<u8>) {
    let mut encoder = encoding.new_encoder();
    let mut rest = text;
    out.clear();
    out.reserve(text.len());
    loop {
        let (result, read) = encoder.encode_from_utf8_to_vec_without_replacement(rest, out, true);
        rest = &rest[read..];
        match result {
            EncoderResult::InputEmpty => return,
            EncoderResult::OutputFull => out.reserve(rest.len() + 8),
            EncoderResult::Unmappable(_) => out.push(b'?'),
        }
    }
}

/// Writer for delimited text
pub struct CsvSink<W: AsyncWrite + Unpin + Send> {
    writer: BufWriter<W>,
    options: CsvOptions,
    /// Reused line buffer
    line: String,
    /// Reused transcoding buffer
    encoded: Vec<u8>,
}

impl<W: AsyncWrite + Unpin + Send> CsvSink<W> {
    /// Create a new CSV sink over `output`
    pub fn new(output: W, options: CsvOptions) -> Self {
        Self {
            writer: BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, output),
            options,
            line: String::new(),
            encoded: Vec::new(),
        }
    }

    /// Recover the underlying writer. Unflushed data is lost.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    async fn write_line(&mut self) -> Result<()> {
        self.line.push('\n');
        let bytes = if self.options.encoding == UTF_8 {
            self.line.as_bytes()
        } else {
            encode_into(self.options.encoding, &self.line, &mut self.encoded);
            &self.encoded
        };
        self.writer.write_all(bytes).await.map_err(SinkError::Write)?;
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> RowSink for CsvSink<W> {
    async fn begin(&mut self, columns: &[ColumnDescriptor]) -> Result<()> {
        if !self.options.header || self.options.raw {
            return Ok(());
        }

        self.line.clear();
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                self.line.push_str(&self.options.separator);
            }
            self.line.push_str(&quote_field(&self.options.separator, &column.name));
        }
        self.write_line().await?;

        debug!("Wrote CSV header: {} columns", columns.len());
        Ok(())
    }

    async fn write_row(&mut self, row: &[Converter]) -> Result<()> {
        self.line.clear();
        if self.options.raw {
            for converter in row {
                self.line.push_str(&converter.render_raw());
            }
        } else {
            for (i, converter) in row.iter().enumerate() {
                if i > 0 {
                    self.line.push_str(&self.options.separator);
                }
                self.line.push_str(&converter.render());
            }
        }
        self.write_line().await
    }

    async fn finish(&mut self) -> Result<()> {
        self.writer.flush().await.map_err(SinkError::Write)?;
        Ok(())
    }
}
