use std::sync::Arc;

use cefbridge_protocol::FrameId;
use cefbridge_runtime::Frame;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::script::ScriptContext;

#[derive(Clone)]
struct Entry {
	frame: Frame,
	context: Arc<dyn ScriptContext>,
}

/// Live script contexts of this renderer, keyed by frame.
#[derive(Default)]
pub struct ContextRegistry {
	contexts: DashMap<FrameId, Entry>,
	main: RwLock<Option<FrameId>>,
}

impl ContextRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records the context of `frame`, replacing any previous one.
	pub fn insert(&self, frame: &Frame, context: Arc<dyn ScriptContext>) {
		if frame.is_main() {
			*self.main.write() = Some(frame.id().clone());
		}
		self.contexts.insert(
			frame.id().clone(),
			Entry {
				frame: frame.clone(),
				context,
			},
		);
	}

	pub fn remove(&self, frame_id: &FrameId) -> Option<Arc<dyn ScriptContext>> {
		let mut main = self.main.write();
		if main.as_ref() == Some(frame_id) {
			*main = None;
		}
		self.contexts.remove(frame_id).map(|(_, entry)| entry.context)
	}

	pub fn get(&self, frame_id: &FrameId) -> Option<Arc<dyn ScriptContext>> {
		self.contexts
			.get(frame_id)
			.map(|entry| Arc::clone(&entry.context))
	}

	/// The main frame and its context, if the main frame has one.
	pub fn main(&self) -> Option<(Frame, Arc<dyn ScriptContext>)> {
		let main = self.main.read().clone()?;
		self.contexts
			.get(&main)
			.map(|entry| (entry.frame.clone(), Arc::clone(&entry.context)))
	}

	pub fn main_frame(&self) -> Option<Frame> {
		self.main().map(|(frame, _)| frame)
	}

	pub fn len(&self) -> usize {
		self.contexts.len()
	}

	pub fn is_empty(&self) -> bool {
		self.contexts.is_empty()
	}
}
