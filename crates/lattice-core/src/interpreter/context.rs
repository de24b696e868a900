//! Per-paragraph execution context handed to interpreters.

use std::io;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::angular::AngularObjectRegistry;
use crate::resource::pool::ResourcePool;

/// Form parameters and form definitions of a paragraph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gui {
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub forms: Map<String, Value>,
}

impl Gui {
    /// Parse GUI state; an empty string is an empty GUI.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json)
    }
}

/// Callback that asks the front-end to run a paragraph.
pub trait ContextRunner: Send + Sync {
    fn note_id(&self) -> &str;

    fn paragraph_id(&self) -> &str;

    fn run(&self);
}

/// Output buffer an interpreter writes to while interpreting.
///
/// Whatever is buffered is prepended to the interpreter's returned message
/// when the job completes.
#[derive(Debug, Default)]
pub struct InterpreterOutput {
    buffer: Mutex<Vec<u8>>,
}

impl InterpreterOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_str(&self, text: &str) {
        self.buffer.lock().extend_from_slice(text.as_bytes());
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Take the buffered bytes, leaving the buffer empty.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buffer.lock())
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl io::Write for &InterpreterOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Everything an interpreter may read or touch while running one paragraph.
pub struct InterpreterContext {
    note_id: String,
    paragraph_id: String,
    paragraph_title: String,
    paragraph_text: String,
    config: Mutex<Map<String, Value>>,
    gui: Mutex<Gui>,
    /// Variable registry of the interpreter group.
    angular_registry: Option<Arc<AngularObjectRegistry>>,
    /// Paragraphs this one may trigger.
    runners: Vec<Arc<dyn ContextRunner>>,
    out: InterpreterOutput,
    resource_pool: Option<Arc<ResourcePool>>,
}

impl InterpreterContext {
    pub fn new(note_id: impl Into<String>, paragraph_id: impl Into<String>) -> Self {
        Self {
            note_id: note_id.into(),
            paragraph_id: paragraph_id.into(),
            paragraph_title: String::new(),
            paragraph_text: String::new(),
            config: Mutex::new(Map::new()),
            gui: Mutex::new(Gui::default()),
            angular_registry: None,
            runners: Vec::new(),
            out: InterpreterOutput::new(),
            resource_pool: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.paragraph_title = title.into();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.paragraph_text = text.into();
        self
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = Mutex::new(config);
        self
    }

    pub fn with_gui(mut self, gui: Gui) -> Self {
        self.gui = Mutex::new(gui);
        self
    }

    pub fn with_angular_registry(mut self, registry: Arc<AngularObjectRegistry>) -> Self {
        self.angular_registry = Some(registry);
        self
    }

    pub fn with_runners(mut self, runners: Vec<Arc<dyn ContextRunner>>) -> Self {
        self.runners = runners;
        self
    }

    pub fn with_resource_pool(mut self, pool: Arc<ResourcePool>) -> Self {
        self.resource_pool = Some(pool);
        self
    }

    pub fn note_id(&self) -> &str {
        &self.note_id
    }

    pub fn paragraph_id(&self) -> &str {
        &self.paragraph_id
    }

    pub fn paragraph_title(&self) -> &str {
        &self.paragraph_title
    }

    pub fn paragraph_text(&self) -> &str {
        &self.paragraph_text
    }

    /// Lock the mutable config map.
    pub fn config(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.config.lock()
    }

    /// Lock the mutable GUI state.
    pub fn gui(&self) -> MutexGuard<'_, Gui> {
        self.gui.lock()
    }

    pub fn angular_registry(&self) -> Option<&Arc<AngularObjectRegistry>> {
        self.angular_registry.as_ref()
    }

    pub fn runners(&self) -> &[Arc<dyn ContextRunner>] {
        &self.runners
    }

    /// Runner for a paragraph of this context's note.
    pub fn runner(&self, paragraph_id: &str) -> Option<&Arc<dyn ContextRunner>> {
        self.runners
            .iter()
            .find(|runner| runner.paragraph_id() == paragraph_id)
    }

    pub fn out(&self) -> &InterpreterOutput {
        &self.out
    }

    pub fn resource_pool(&self) -> Option<&Arc<ResourcePool>> {
        self.resource_pool.as_ref()
    }
}
