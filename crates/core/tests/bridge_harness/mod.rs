// In-process wiring of a host bridge to a renderer handler.
//
// Each side sends through its own QueueChannel. A pump task per direction
// turns every queued delivery into a call on the opposite endpoint, with a
// frame bound to the reverse channel so replies flow back.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use cefbridge::host::ContextState;
use cefbridge::protocol::Value;
use cefbridge::renderer::{NativeObjectProxy, RenderProcessHandler, ScriptContext, ScriptException};
use cefbridge::runtime::NullSideChannel;
use cefbridge::{BridgeConfig, BrowserBridge, Frame, FrameId, ProcessId, QueueChannel, StructuredValue};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Script context with a tiny evaluator.
///
/// - `a+b` with integer operands evaluates to the sum
/// - `throw <expr>` throws `Uncaught <expr>`
/// - any JSON document evaluates to itself
pub struct FakeContext {
	depth: AtomicI32,
	enterable: AtomicBool,
	objects: Mutex<HashMap<String, NativeObjectProxy>>,
}

impl FakeContext {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			depth: AtomicI32::new(0),
			enterable: AtomicBool::new(true),
			objects: Mutex::new(HashMap::new()),
		})
	}

	pub fn object(&self, name: &str) -> Option<NativeObjectProxy> {
		self.objects.lock().get(name).cloned()
	}

	pub fn depth(&self) -> i32 {
		self.depth.load(Ordering::SeqCst)
	}

	pub fn set_enterable(&self, enterable: bool) {
		self.enterable.store(enterable, Ordering::SeqCst);
	}
}

impl ScriptContext for FakeContext {
	fn enter(&self) -> bool {
		if !self.enterable.load(Ordering::SeqCst) {
			return false;
		}
		self.depth.fetch_add(1, Ordering::SeqCst);
		true
	}

	fn exit(&self) {
		self.depth.fetch_sub(1, Ordering::SeqCst);
	}

	fn eval(&self, script: &str, url: &str, line: i32) -> Result<StructuredValue, ScriptException> {
		let thrown = |message: String| ScriptException {
			message,
			resource_name: url.to_string(),
			line,
			start_column: 0,
		};

		if let Some(expr) = script.strip_prefix("throw ") {
			return Err(thrown(format!("Uncaught {expr}")));
		}
		if let Some((a, b)) = script.split_once('+') {
			if let (Ok(a), Ok(b)) = (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
				return Ok(StructuredValue::from(Value::Int(a + b)));
			}
		}
		serde_json::from_str::<serde_json::Value>(script)
			.map(|json| StructuredValue::from_json(&json))
			.map_err(|e| thrown(format!("SyntaxError: {e}")))
	}

	fn install_object(&self, name: &str, proxy: NativeObjectProxy) -> cefbridge::Result<()> {
		self.objects.lock().insert(name.to_string(), proxy);
		Ok(())
	}

	fn remove_object(&self, name: &str) -> cefbridge::Result<()> {
		self.objects.lock().remove(name);
		Ok(())
	}
}

pub struct Harness {
	pub host: Arc<BrowserBridge>,
	pub renderer: Arc<RenderProcessHandler>,
	host_channel: QueueChannel,
	renderer_channel: QueueChannel,
	pumps: Vec<JoinHandle<()>>,
}

impl Harness {
	pub fn start() -> Self {
		Self::with(
			BridgeConfig::default(),
			RenderProcessHandler::with_side_channel(Arc::new(NullSideChannel)),
		)
	}

	pub fn with(config: BridgeConfig, renderer: RenderProcessHandler) -> Self {
		let host = BrowserBridge::new(config).expect("tokio runtime");
		let renderer = Arc::new(renderer);
		let (host_channel, mut to_renderer) = QueueChannel::new();
		let (renderer_channel, mut to_host) = QueueChannel::new();

		let pump_to_renderer = {
			let renderer = Arc::clone(&renderer);
			let reply = renderer_channel.clone();
			tokio::spawn(async move {
				while let Some(delivery) = to_renderer.recv().await {
					let frame = reply.frame(delivery.frame_id, delivery.is_main);
					renderer.on_process_message_received(ProcessId::Browser, &frame, &delivery.message);
				}
			})
		};

		let pump_to_host = {
			let host = Arc::clone(&host);
			let reply = host_channel.clone();
			tokio::spawn(async move {
				while let Some(delivery) = to_host.recv().await {
					let frame = reply.frame(delivery.frame_id, delivery.is_main);
					host.on_process_message_received(ProcessId::Renderer, &frame, &delivery.message);
				}
			})
		};

		Self {
			host,
			renderer,
			host_channel,
			renderer_channel,
			pumps: vec![pump_to_renderer, pump_to_host],
		}
	}

	/// Frame as the host sees it; sends go to the renderer.
	pub fn host_frame(&self, id: &str, is_main: bool) -> Frame {
		self.host_channel.frame(id, is_main)
	}

	/// Frame as the renderer sees it; sends go to the host.
	pub fn renderer_frame(&self, id: &str, is_main: bool) -> Frame {
		self.renderer_channel.frame(id, is_main)
	}

	/// Creates a context in the renderer and waits until the host has seen it.
	pub async fn create_context(&self, id: &str, is_main: bool) -> Arc<FakeContext> {
		let context = FakeContext::new();
		self.renderer
			.on_context_created(&self.renderer_frame(id, is_main), context.clone());
		let frame_id = FrameId::new(id);
		wait_until(|| self.host.javascript().context_state(&frame_id) == Some(ContextState::Created)).await;
		context
	}

	/// Releases a context in the renderer and waits until the host has seen it.
	pub async fn release_context(&self, id: &str, is_main: bool) {
		self.renderer.on_context_released(&self.renderer_frame(id, is_main));
		let frame_id = FrameId::new(id);
		wait_until(|| self.host.javascript().context_state(&frame_id) == Some(ContextState::Released)).await;
	}
}

impl Drop for Harness {
	fn drop(&mut self) {
		for pump in &self.pumps {
			pump.abort();
		}
	}
}

/// Polls `condition` until it holds. Panics after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
	tokio::time::timeout(Duration::from_secs(2), async {
		while !condition() {
			tokio::time::sleep(Duration::from_millis(2)).await;
		}
	})
	.await
	.expect("condition not reached in time");
}
