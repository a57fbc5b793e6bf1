//! Host-side registry of native objects exposed to script.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use cefbridge_protocol::{
	CallOutcome, EncodeOptions, ObjectCallRequest, ObjectCallResult, ObjectRegistrationRequest,
	ObjectUnregistrationRequest, ProcessId, decode, encode,
};
use cefbridge_runtime::dispatcher::panic_message;
use cefbridge_runtime::{Error, Frame, MessageDispatcher, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use tokio::runtime::Handle;

use crate::binding::{BoundObject, CallArguments, InvokeError, InvokeResult, MethodInterceptor};

struct Registration {
	object: Arc<dyn BoundObject>,
	interceptor: Option<MethodInterceptor>,
}

/// Objects registered by the host application.
///
/// Registrations are announced to the renderer through the main frame. Objects
/// registered before the main frame has a script context are announced once
/// it does, and again after every main-frame reload.
pub struct NativeObjectRegistry {
	objects: DashMap<String, Registration>,
	main_frame: RwLock<Option<Frame>>,
	handle: Handle,
}

impl NativeObjectRegistry {
	/// `handle` runs member invocations.
	pub fn new(handle: Handle) -> Self {
		Self {
			objects: DashMap::new(),
			main_frame: RwLock::new(None),
			handle,
		}
	}

	/// Registers `object` under `name`. Returns `false` if the name is taken.
	///
	/// If the announcement to the renderer fails the registration is undone.
	pub fn register(&self, name: &str, object: Arc<dyn BoundObject>) -> Result<bool> {
		self.register_with(name, object, None)
	}

	/// Like [`register`](Self::register), with every member call routed
	/// through `interceptor`.
	pub fn register_with(
		&self,
		name: &str,
		object: Arc<dyn BoundObject>,
		interceptor: Option<MethodInterceptor>,
	) -> Result<bool> {
		let methods = object.methods();
		match self.objects.entry(name.to_string()) {
			Entry::Occupied(_) => {
				tracing::warn!(object = name, "object name already registered");
				return Ok(false);
			}
			Entry::Vacant(slot) => {
				slot.insert(Registration { object, interceptor });
			}
		}

		let Some(frame) = self.main_frame.read().clone() else {
			tracing::debug!(object = name, "main frame not ready; registration deferred");
			return Ok(true);
		};

		let request = ObjectRegistrationRequest {
			object_name: name.to_string(),
			methods,
		};
		if let Err(err) = frame.send_envelope(ProcessId::Renderer, &request) {
			self.objects.remove(name);
			return Err(err);
		}
		Ok(true)
	}

	/// Removes `name`. Returns `false` if nothing was registered under it.
	pub fn unregister(&self, name: &str) -> Result<bool> {
		if self.objects.remove(name).is_none() {
			return Ok(false);
		}
		if let Some(frame) = self.main_frame.read().clone() {
			frame.send_envelope(
				ProcessId::Renderer,
				&ObjectUnregistrationRequest {
					object_name: name.to_string(),
				},
			)?;
		}
		Ok(true)
	}

	pub fn get(&self, name: &str) -> Option<Arc<dyn BoundObject>> {
		self.objects.get(name).map(|entry| Arc::clone(&entry.object))
	}

	pub fn names(&self) -> Vec<String> {
		self.objects.iter().map(|entry| entry.key().clone()).collect()
	}

	pub fn len(&self) -> usize {
		self.objects.len()
	}

	pub fn is_empty(&self) -> bool {
		self.objects.is_empty()
	}

	/// Makes `frame` the announcement target and announces every object.
	///
	/// Every object is attempted; the first send error is returned.
	pub fn attach_main_frame(&self, frame: &Frame) -> Result<()> {
		*self.main_frame.write() = Some(frame.clone());

		let pending: Vec<(String, Arc<dyn BoundObject>)> = self
			.objects
			.iter()
			.map(|entry| (entry.key().clone(), Arc::clone(&entry.object)))
			.collect();

		let mut first_error = None;
		for (name, object) in pending {
			let request = ObjectRegistrationRequest {
				object_name: name,
				methods: object.methods(),
			};
			if let Err(err) = frame.send_envelope(ProcessId::Renderer, &request) {
				tracing::warn!(object = %request.object_name, error = %err, "failed to announce object");
				first_error.get_or_insert(err);
			}
		}
		first_error.map_or(Ok(()), Err)
	}

	pub fn detach_main_frame(&self) {
		self.main_frame.write().take();
	}

	/// Registers the `ObjectCallRequest` handler.
	pub fn attach(self: &Arc<Self>, dispatcher: &MessageDispatcher) {
		let weak: Weak<Self> = Arc::downgrade(self);
		dispatcher.register_envelope(move |received, request: ObjectCallRequest| {
			if let Some(registry) = weak.upgrade() {
				registry.spawn_call(received.frame.clone(), request);
			}
			Ok(())
		});
	}

	/// Runs the call on the runtime and replies through `frame` when done.
	fn spawn_call(self: &Arc<Self>, frame: Frame, request: ObjectCallRequest) {
		let registry = Arc::clone(self);
		self.handle.spawn(async move {
			let outcome = registry.execute(&request).await;
			let reply = ObjectCallResult {
				call_id: request.call_id,
				outcome,
			};
			if let Err(err) = frame.send_envelope(ProcessId::Renderer, &reply) {
				tracing::warn!(call_id = %request.call_id, error = %err, "failed to send object call result");
			}
		});
	}

	/// Invokes the requested member and packages the outcome.
	pub async fn execute(&self, request: &ObjectCallRequest) -> CallOutcome {
		let object_name = request.object_name.as_str();
		let member_name = request.member_name.as_str();

		let registered = self
			.objects
			.get(object_name)
			.map(|entry| (Arc::clone(&entry.object), entry.interceptor.clone()));
		let Some((object, interceptor)) = registered else {
			return CallOutcome::Failure(Error::ObjectNotFound(object_name.to_string()).to_string());
		};

		let args = match decode(&request.arguments) {
			Ok(list) => CallArguments::new(list),
			Err(err) => return CallOutcome::Failure(err.to_string()),
		};

		tracing::debug!(object = object_name, member = member_name, "invoking native member");
		let member = member_name.to_string();
		let call = async move {
			let run: BoxFuture<'static, InvokeResult> = {
				let member = member.clone();
				async move { object.invoke(&member, args).await }.boxed()
			};
			match interceptor {
				Some(wrap) => wrap(&member, run).await,
				None => run.await,
			}
		};
		let invocation = AssertUnwindSafe(call).catch_unwind().await;

		match invocation {
			Ok(Ok(value)) => match encode(&value, EncodeOptions::default()) {
				Ok(bytes) => CallOutcome::Success(bytes),
				Err(err) => CallOutcome::Failure(err.to_string()),
			},
			Ok(Err(InvokeError::UnknownMember(member))) => CallOutcome::Failure(
				Error::MemberNotFound {
					object: object_name.to_string(),
					member,
				}
				.to_string(),
			),
			Ok(Err(InvokeError::Exception(text))) => CallOutcome::Failure(text),
			Err(payload) => {
				let text = panic_message(payload.as_ref());
				tracing::error!(object = object_name, member = member_name, panic = %text, "native member panicked");
				CallOutcome::Failure(format!("{object_name}.{member_name} panicked: {text}"))
			}
		}
	}
}
