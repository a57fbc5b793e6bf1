//! Frames and the send primitive they wrap.
//!
//! The browser engine owns the real channel. Endpoints only see a
//! [`ProcessMessageSink`] bound to a [`Frame`].

use std::fmt;
use std::sync::Arc;

use cefbridge_protocol::{Envelope, FrameId, ProcessId, ProcessMessage};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Per-frame send primitive supplied by the engine integration.
pub trait ProcessMessageSink: Send + Sync {
	/// Hands `message` to the `target` process. Fails with
	/// [`Error::PeerUnreachable`] if the peer is gone.
	fn send_process_message(&self, target: ProcessId, message: ProcessMessage) -> Result<()>;
}

/// A frame that messages arrive on and replies are sent through.
#[derive(Clone)]
pub struct Frame {
	id: FrameId,
	is_main: bool,
	sink: Arc<dyn ProcessMessageSink>,
}

impl Frame {
	pub fn new(id: impl Into<FrameId>, is_main: bool, sink: Arc<dyn ProcessMessageSink>) -> Self {
		Self {
			id: id.into(),
			is_main,
			sink,
		}
	}

	pub fn id(&self) -> &FrameId {
		&self.id
	}

	pub fn is_main(&self) -> bool {
		self.is_main
	}

	pub fn send(&self, target: ProcessId, message: ProcessMessage) -> Result<()> {
		tracing::debug!(frame = %self.id, %target, name = %message.name, "sending process message");
		self.sink.send_process_message(target, message)
	}

	pub fn send_envelope<E: Envelope>(&self, target: ProcessId, envelope: &E) -> Result<()> {
		self.send(target, envelope.to_process_message())
	}
}

impl fmt::Debug for Frame {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Frame")
			.field("id", &self.id)
			.field("is_main", &self.is_main)
			.finish_non_exhaustive()
	}
}

/// A message queued by a [`QueueChannel`] frame.
#[derive(Debug, Clone)]
pub struct Delivery {
	pub target: ProcessId,
	pub frame_id: FrameId,
	pub is_main: bool,
	pub message: ProcessMessage,
}

/// In-process channel: every send becomes a [`Delivery`] on one queue.
///
/// Used to pump messages between endpoints living in the same process.
#[derive(Clone)]
pub struct QueueChannel {
	tx: mpsc::UnboundedSender<Delivery>,
}

impl QueueChannel {
	pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}

	/// Creates a frame whose sends are queued on this channel.
	pub fn frame(&self, id: impl Into<FrameId>, is_main: bool) -> Frame {
		let id = id.into();
		let sink = QueueSink {
			frame_id: id.clone(),
			is_main,
			tx: self.tx.clone(),
		};
		Frame::new(id, is_main, Arc::new(sink))
	}
}

struct QueueSink {
	frame_id: FrameId,
	is_main: bool,
	tx: mpsc::UnboundedSender<Delivery>,
}

impl ProcessMessageSink for QueueSink {
	fn send_process_message(&self, target: ProcessId, message: ProcessMessage) -> Result<()> {
		let delivery = Delivery {
			target,
			frame_id: self.frame_id.clone(),
			is_main: self.is_main,
			message,
		};
		self.tx
			.send(delivery)
			.map_err(|_| Error::PeerUnreachable(format!("{target} channel closed")))
	}
}
