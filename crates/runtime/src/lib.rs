//! Runtime plumbing for the browser/renderer bridge.
//!
//! Provides the pieces both endpoints share: frames and their send primitive,
//! the name-keyed [`MessageDispatcher`], the [`PendingCalls`] correlation
//! registry, a length-prefixed [`PipeTransport`], crash-report side channels
//! and [`BridgeConfig`].

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod pending;
pub mod side_channel;
pub mod transport;

pub use cefbridge_protocol as protocol;
pub use channel::{Delivery, Frame, ProcessMessageSink, QueueChannel};
pub use config::BridgeConfig;
pub use dispatcher::{
	DispatchReport, FailureCause, HandlerFailure, MessageDispatcher, MessageHandler, MessageReceived,
};
pub use error::{CancelReason, Error, Result};
pub use pending::{PendingCall, PendingCalls};
pub use side_channel::{FallbackChain, LogFileSideChannel, NullSideChannel, PipeSideChannel, SideChannel};
pub use transport::{PipeReceiver, PipeSender, PipeTransport};
