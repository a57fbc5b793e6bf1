//! Length-prefixed pipe transport for process messages.
//!
//! Frames are a 4-byte little-endian length followed by that many bytes of
//! JSON-encoded [`ProcessMessage`]. Works over any `AsyncRead`/`AsyncWrite`
//! pair: a named pipe, a child's stdio, or `tokio::io::duplex` in tests.

use cefbridge_protocol::ProcessMessage;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Frames larger than this are rejected before allocation.
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// Writing half of a [`PipeTransport`].
pub struct PipeSender<W> {
	writer: W,
}

impl<W: AsyncWrite + Unpin + Send> PipeSender<W> {
	pub fn new(writer: W) -> Self {
		Self { writer }
	}

	pub async fn send(&mut self, message: &ProcessMessage) -> Result<()> {
		let bytes = serde_json::to_vec(message)?;
		let length = u32::try_from(bytes.len())
			.ok()
			.filter(|len| (*len as usize) <= MAX_FRAME_SIZE)
			.ok_or_else(|| Error::Transport(format!("frame of {} bytes exceeds limit", bytes.len())))?;

		self.writer
			.write_all(&length.to_le_bytes())
			.await
			.map_err(|e| Error::Transport(format!("Failed to write length prefix: {e}")))?;
		self.writer
			.write_all(&bytes)
			.await
			.map_err(|e| Error::Transport(format!("Failed to write message: {e}")))?;
		self.writer.flush().await?;

		tracing::debug!(name = %message.name, length, "wrote frame");
		Ok(())
	}
}

/// Reading half of a [`PipeTransport`].
pub struct PipeReceiver<R> {
	reader: R,
	tx: mpsc::UnboundedSender<ProcessMessage>,
}

impl<R: AsyncRead + Unpin + Send> PipeReceiver<R> {
	/// Creates a standalone reader and the queue it feeds.
	pub fn new(reader: R) -> (Self, mpsc::UnboundedReceiver<ProcessMessage>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { reader, tx }, rx)
	}

	/// Reads exactly one frame.
	pub async fn read_message(&mut self) -> Result<ProcessMessage> {
		let mut len_buf = [0u8; 4];
		self.reader
			.read_exact(&mut len_buf)
			.await
			.map_err(|e| Error::Transport(format!("Failed to read length prefix: {e}")))?;

		let length = u32::from_le_bytes(len_buf) as usize;
		if length > MAX_FRAME_SIZE {
			return Err(Error::Transport(format!(
				"frame of {length} bytes exceeds limit of {MAX_FRAME_SIZE}"
			)));
		}

		let mut body = vec![0u8; length];
		self.reader
			.read_exact(&mut body)
			.await
			.map_err(|e| Error::Transport(format!("Failed to read message body: {e}")))?;

		Ok(serde_json::from_slice(&body)?)
	}

	/// Reads frames until the pipe fails or the consumer is dropped.
	pub async fn run(&mut self) -> Result<()> {
		loop {
			let message = self.read_message().await?;
			tracing::debug!(name = %message.name, "read frame");
			if self.tx.send(message).is_err() {
				tracing::debug!("message consumer dropped; stopping transport");
				return Ok(());
			}
		}
	}
}

/// Bidirectional pipe transport.
pub struct PipeTransport<W, R> {
	sender: PipeSender<W>,
	receiver: PipeReceiver<R>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send,
	R: AsyncRead + Unpin + Send,
{
	/// Creates a transport and the queue its reader feeds.
	pub fn new(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<ProcessMessage>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let transport = Self {
			sender: PipeSender { writer },
			receiver: PipeReceiver { reader, tx },
		};
		(transport, rx)
	}

	pub fn into_parts(self) -> (PipeSender<W>, PipeReceiver<R>) {
		(self.sender, self.receiver)
	}

	pub async fn send(&mut self, message: &ProcessMessage) -> Result<()> {
		self.sender.send(message).await
	}

	pub async fn run(&mut self) -> Result<()> {
		self.receiver.run().await
	}
}
