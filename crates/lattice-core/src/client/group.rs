//! Interpreters that share one interpreter process.

use parking_lot::Mutex;

use crate::interpreter::Properties;

/// Class name and properties of one group member.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterDefinition {
    pub class_name: String,
    pub properties: Properties,
}

/// The interpreters created together whenever the group's process starts.
#[derive(Debug)]
pub struct InterpreterGroup {
    id: String,
    members: Mutex<Vec<InterpreterDefinition>>,
}

impl InterpreterGroup {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a member; a class already in the group keeps its first properties.
    pub fn add(&self, class_name: impl Into<String>, properties: Properties) {
        let class_name = class_name.into();
        let mut members = self.members.lock();
        if !members.iter().any(|m| m.class_name == class_name) {
            members.push(InterpreterDefinition {
                class_name,
                properties,
            });
        }
    }

    pub fn members(&self) -> Vec<InterpreterDefinition> {
        self.members.lock().clone()
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.members.lock().iter().any(|m| m.class_name == class_name)
    }
}
