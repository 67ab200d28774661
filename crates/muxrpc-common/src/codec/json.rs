//! JSON codec: newline-delimited JSON values over a TCP stream.
//!
//! Each frame is one JSON value followed by a newline, so values are
//! self-delimiting and a reader never has to look inside the next frame to
//! find the end of the current one.

use serde_json::Value;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::Result;
use crate::protocol::Header;

#[derive(Debug)]
pub struct JsonCodecReader {
    reader: BufReader<OwnedReadHalf>,
    line: String,
}

impl JsonCodecReader {
    pub(crate) fn new(reader: BufReader<OwnedReadHalf>) -> Self {
        JsonCodecReader {
            reader,
            line: String::new(),
        }
    }

    pub async fn read_header(&mut self) -> Result<Header> {
        self.next_line().await?;
        Ok(serde_json::from_str(self.line.trim_end())?)
    }

    pub async fn read_body(&mut self) -> Result<Value> {
        self.next_line().await?;
        Ok(serde_json::from_str(self.line.trim_end())?)
    }

    async fn next_line(&mut self) -> Result<()> {
        self.line.clear();
        let n = self.reader.read_line(&mut self.line).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )
            .into());
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct JsonCodecWriter {
    writer: BufWriter<OwnedWriteHalf>,
}

impl JsonCodecWriter {
    pub(crate) fn new(writer: OwnedWriteHalf) -> Self {
        JsonCodecWriter {
            writer: BufWriter::new(writer),
        }
    }

    /// Encodes header then body into the buffer and flushes both together.
    /// A failed write closes the connection so the peer sees end-of-stream
    /// instead of a torn frame.
    pub async fn write(&mut self, header: &Header, body: &Value) -> Result<()> {
        match self.encode(header, body).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("json codec: write failed: {}", e);
                self.close().await;
                Err(e)
            }
        }
    }

    async fn encode(&mut self, header: &Header, body: &Value) -> Result<()> {
        let mut frame = serde_json::to_vec(header)?;
        frame.push(b'\n');
        let mut encoded_body = serde_json::to_vec(body)?;
        encoded_body.push(b'\n');
        frame.extend_from_slice(&encoded_body);

        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn close(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}
