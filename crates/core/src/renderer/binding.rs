//! Renderer-side proxies for host objects.
//!
//! The host announces each object with `ObjectRegistrationRequest`. A
//! [`NativeObjectProxy`] is installed in the main frame's context for it.
//! Calls through the proxy become `ObjectCallRequest`s and resolve when the
//! matching `ObjectCallResult` arrives.

use std::sync::{Arc, Weak};

use cefbridge_protocol::{
	CallOutcome, EncodeOptions, FrameId, MethodInfo, ObjectCallRequest, ObjectCallResult,
	ObjectRegistrationRequest, ObjectUnregistrationRequest, ProcessId, StructuredValue, decode,
	encode,
};
use cefbridge_runtime::{
	CancelReason, Error, Frame, MessageDispatcher, PendingCall, PendingCalls, Result,
};
use dashmap::DashMap;

use super::contexts::ContextRegistry;
use super::script::ContextGuard;

/// Script-facing stand-in for a host object.
#[derive(Clone)]
pub struct NativeObjectProxy {
	object_name: String,
	methods: Vec<MethodInfo>,
	frame: Frame,
	pending: Arc<PendingCalls<StructuredValue>>,
}

impl NativeObjectProxy {
	pub fn object_name(&self) -> &str {
		&self.object_name
	}

	pub fn methods(&self) -> &[MethodInfo] {
		&self.methods
	}

	pub fn has_method(&self, name: &str) -> bool {
		self.methods.iter().any(|m| m.name == name)
	}

	/// Frame the proxy's calls are scoped to.
	pub fn frame(&self) -> &Frame {
		&self.frame
	}

	/// Sends a call to the host. `args` is the argument list.
	///
	/// The returned call resolves with the member's result, fails with
	/// [`Error::RemoteException`] if it threw, and is canceled when the
	/// proxy's frame releases its context.
	pub fn invoke(&self, member: &str, args: &StructuredValue) -> Result<PendingCall<StructuredValue>> {
		let arguments = encode(args, EncodeOptions::bare_root_array())?;
		self.pending
			.issue_with(Some(self.frame.id().clone()), |call_id| {
				self.frame.send_envelope(
					ProcessId::Browser,
					&ObjectCallRequest {
						call_id,
						object_name: self.object_name.clone(),
						member_name: member.to_string(),
						arguments,
					},
				)
			})
	}
}

impl std::fmt::Debug for NativeObjectProxy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NativeObjectProxy")
			.field("object_name", &self.object_name)
			.field("methods", &self.methods)
			.field("frame", &self.frame.id())
			.finish()
	}
}

/// Tracks installed proxies and their outstanding calls.
pub struct JavascriptToNativeDispatcherRenderSide {
	contexts: Arc<ContextRegistry>,
	pending: Arc<PendingCalls<StructuredValue>>,
	proxies: DashMap<String, NativeObjectProxy>,
}

impl JavascriptToNativeDispatcherRenderSide {
	pub fn new(contexts: Arc<ContextRegistry>) -> Self {
		Self {
			contexts,
			pending: Arc::new(PendingCalls::new()),
			proxies: DashMap::new(),
		}
	}

	pub fn attach(self: &Arc<Self>, dispatcher: &MessageDispatcher) {
		let weak: Weak<Self> = Arc::downgrade(self);
		dispatcher.register_envelope(move |_, request: ObjectRegistrationRequest| {
			match weak.upgrade() {
				Some(this) => this.install(request),
				None => Ok(()),
			}
		});

		let weak: Weak<Self> = Arc::downgrade(self);
		dispatcher.register_envelope(move |_, request: ObjectUnregistrationRequest| {
			match weak.upgrade() {
				Some(this) => this.uninstall(&request.object_name),
				None => Ok(()),
			}
		});

		let weak: Weak<Self> = Arc::downgrade(self);
		dispatcher.register_envelope(move |_, result: ObjectCallResult| {
			if let Some(this) = weak.upgrade() {
				this.complete(result);
			}
			Ok(())
		});
	}

	/// Installs a proxy for `request` in the main frame's context.
	fn install(&self, request: ObjectRegistrationRequest) -> Result<()> {
		let Some((frame, context)) = self.contexts.main() else {
			return Err(Error::ContextUnavailable {
				frame_id: FrameId::new("main"),
			});
		};
		let Some(_entered) = ContextGuard::enter(context.as_ref()) else {
			return Err(Error::ContextUnavailable {
				frame_id: frame.id().clone(),
			});
		};

		let proxy = NativeObjectProxy {
			object_name: request.object_name,
			methods: request.methods,
			frame,
			pending: Arc::clone(&self.pending),
		};
		tracing::debug!(object = %proxy.object_name, methods = proxy.methods.len(), "installing native object");
		context.install_object(&proxy.object_name, proxy.clone())?;
		self.proxies.insert(proxy.object_name.clone(), proxy);
		Ok(())
	}

	fn uninstall(&self, name: &str) -> Result<()> {
		if self.proxies.remove(name).is_none() {
			tracing::debug!(object = name, "unregistration for unknown object ignored");
			return Ok(());
		}
		let Some((_, context)) = self.contexts.main() else {
			return Ok(());
		};
		let Some(_entered) = ContextGuard::enter(context.as_ref()) else {
			return Ok(());
		};
		context.remove_object(name)
	}

	fn complete(&self, result: ObjectCallResult) {
		let outcome = match result.outcome {
			CallOutcome::Success(bytes) => decode(&bytes).map_err(Error::from),
			CallOutcome::Failure(text) => Err(Error::RemoteException(text)),
		};
		self.pending.complete(result.call_id, outcome);
	}

	pub fn proxy(&self, name: &str) -> Option<NativeObjectProxy> {
		self.proxies.get(name).map(|entry| entry.value().clone())
	}

	/// Calls still waiting for the host.
	pub fn pending_count(&self) -> usize {
		self.pending.len()
	}

	/// Cancels the calls scoped to `frame_id`. Proxies go with the main frame.
	pub fn handle_context_released(&self, frame_id: &FrameId, is_main: bool) -> usize {
		if is_main {
			self.proxies.clear();
		}
		self.pending.cancel_scope(frame_id, CancelReason::ContextReleased)
	}

	pub fn dispose(&self) -> usize {
		self.proxies.clear();
		self.pending.close()
	}
}
