//! Shared variables ("angular objects") bound to notes and paragraphs.
//!
//! The same registry type lives on both sides of a connection. In the
//! interpreter process its listener is the event outbox, so changes made by
//! interpreters travel to the front-end. In the front-end its listener is the
//! UI. Updates that arrive from the other side are applied with `emit = false`
//! (process side) or forwarded only to the UI (front-end side), so a value
//! never bounces back to where it came from.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named value scoped globally, to a note, or to a paragraph of a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngularObject {
    pub name: String,
    pub note_id: Option<String>,
    pub paragraph_id: Option<String>,
    pub value: Value,
}

/// Observer of registry changes made with `emit = true`.
pub trait AngularObjectListener: Send + Sync {
    fn on_add(&self, group_id: &str, object: &AngularObject);

    fn on_update(&self, group_id: &str, object: &AngularObject);

    fn on_remove(
        &self,
        group_id: &str,
        name: &str,
        note_id: Option<&str>,
        paragraph_id: Option<&str>,
    );
}

type Scope = (Option<String>, Option<String>);

/// Angular objects of one interpreter group.
pub struct AngularObjectRegistry {
    group_id: String,
    listener: Option<Arc<dyn AngularObjectListener>>,
    objects: Mutex<HashMap<Scope, HashMap<String, AngularObject>>>,
}

impl AngularObjectRegistry {
    pub fn new(
        group_id: impl Into<String>,
        listener: Option<Arc<dyn AngularObjectListener>>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            listener,
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Add (or replace) an object.
    pub fn add(
        &self,
        name: &str,
        value: Value,
        note_id: Option<&str>,
        paragraph_id: Option<&str>,
        emit: bool,
    ) -> AngularObject {
        let object = AngularObject {
            name: name.to_string(),
            note_id: note_id.map(str::to_string),
            paragraph_id: paragraph_id.map(str::to_string),
            value,
        };
        self.objects
            .lock()
            .entry(scope(note_id, paragraph_id))
            .or_default()
            .insert(name.to_string(), object.clone());

        if emit && let Some(listener) = &self.listener {
            listener.on_add(&self.group_id, &object);
        }
        object
    }

    /// Replace the value of an existing object. Returns `None` when absent.
    pub fn update(
        &self,
        name: &str,
        note_id: Option<&str>,
        paragraph_id: Option<&str>,
        value: Value,
        emit: bool,
    ) -> Option<AngularObject> {
        let updated = {
            let mut objects = self.objects.lock();
            let object = objects
                .get_mut(&scope(note_id, paragraph_id))?
                .get_mut(name)?;
            object.value = value;
            object.clone()
        };

        if emit && let Some(listener) = &self.listener {
            listener.on_update(&self.group_id, &updated);
        }
        Some(updated)
    }

    pub fn remove(
        &self,
        name: &str,
        note_id: Option<&str>,
        paragraph_id: Option<&str>,
        emit: bool,
    ) -> Option<AngularObject> {
        let removed = {
            let mut objects = self.objects.lock();
            let key = scope(note_id, paragraph_id);
            let bucket = objects.get_mut(&key)?;
            let removed = bucket.remove(name);
            if bucket.is_empty() {
                objects.remove(&key);
            }
            removed?
        };

        if emit && let Some(listener) = &self.listener {
            listener.on_remove(&self.group_id, name, note_id, paragraph_id);
        }
        Some(removed)
    }

    pub fn get(
        &self,
        name: &str,
        note_id: Option<&str>,
        paragraph_id: Option<&str>,
    ) -> Option<AngularObject> {
        self.objects
            .lock()
            .get(&scope(note_id, paragraph_id))?
            .get(name)
            .cloned()
    }

    /// Objects of exactly one scope.
    pub fn get_all(&self, note_id: Option<&str>, paragraph_id: Option<&str>) -> Vec<AngularObject> {
        self.objects
            .lock()
            .get(&scope(note_id, paragraph_id))
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every object, across scopes.
    pub fn all(&self) -> Vec<AngularObject> {
        self.objects
            .lock()
            .values()
            .flat_map(|bucket| bucket.values().cloned())
            .collect()
    }
}

fn scope(note_id: Option<&str>, paragraph_id: Option<&str>) -> Scope {
    (note_id.map(str::to_string), paragraph_id.map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl AngularObjectListener for Recorder {
        fn on_add(&self, _group_id: &str, object: &AngularObject) {
            self.events.lock().push(format!("add:{}", object.name));
        }

        fn on_update(&self, _group_id: &str, object: &AngularObject) {
            self.events.lock().push(format!("update:{}", object.name));
        }

        fn on_remove(&self, _group_id: &str, name: &str, _: Option<&str>, _: Option<&str>) {
            self.events.lock().push(format!("remove:{}", name));
        }
    }

    #[test]
    fn test_scopes_are_independent() {
        let registry = AngularObjectRegistry::new("g1", None);
        registry.add("x", json!(1), None, None, false);
        registry.add("x", json!(2), Some("note1"), None, false);
        registry.add("x", json!(3), Some("note1"), Some("p1"), false);

        assert_eq!(registry.get("x", None, None).unwrap().value, json!(1));
        assert_eq!(registry.get("x", Some("note1"), None).unwrap().value, json!(2));
        assert_eq!(
            registry.get("x", Some("note1"), Some("p1")).unwrap().value,
            json!(3)
        );
        assert_eq!(registry.all().len(), 3);
    }

    #[test]
    fn test_emit_flag_controls_listener() {
        let recorder = Arc::new(Recorder::default());
        let registry = AngularObjectRegistry::new("g1", Some(recorder.clone()));

        registry.add("a", json!("v"), Some("n"), None, true);
        registry.update("a", Some("n"), None, json!("w"), false);
        registry.update("a", Some("n"), None, json!("z"), true);
        registry.remove("a", Some("n"), None, true);

        assert_eq!(
            *recorder.events.lock(),
            vec!["add:a".to_string(), "update:a".to_string(), "remove:a".to_string()]
        );
    }

    #[test]
    fn test_update_of_missing_object() {
        let registry = AngularObjectRegistry::new("g1", None);
        assert!(registry.update("missing", None, None, json!(1), true).is_none());
        assert!(registry.remove("missing", None, None, true).is_none());
    }
}
