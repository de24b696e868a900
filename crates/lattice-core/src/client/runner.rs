//! Front-end runners a process may trigger by event.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::interpreter::ContextRunner;

/// Runners of the last interpret call of each note.
#[derive(Default)]
pub struct ContextRunnerPool {
    runners: Mutex<HashMap<String, Vec<Arc<dyn ContextRunner>>>>,
}

impl ContextRunnerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the runners registered for `note_id`.
    pub fn replace(&self, note_id: &str, runners: &[Arc<dyn ContextRunner>]) {
        self.runners
            .lock()
            .insert(note_id.to_string(), runners.to_vec());
    }

    pub fn clear(&self, note_id: &str) {
        self.runners.lock().remove(note_id);
    }

    /// Run the runner registered for a paragraph. Returns false if none is.
    pub fn run(&self, note_id: &str, paragraph_id: &str) -> bool {
        let runner = self.runners.lock().get(note_id).and_then(|runners| {
            runners
                .iter()
                .find(|runner| runner.paragraph_id() == paragraph_id)
                .cloned()
        });
        match runner {
            Some(runner) => {
                runner.run();
                true
            }
            None => {
                warn!(note_id, paragraph_id, "no runner registered for paragraph");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        note_id: String,
        paragraph_id: String,
        runs: AtomicUsize,
    }

    impl ContextRunner for CountingRunner {
        fn note_id(&self) -> &str {
            &self.note_id
        }

        fn paragraph_id(&self) -> &str {
            &self.paragraph_id
        }

        fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn runner(paragraph_id: &str) -> Arc<CountingRunner> {
        Arc::new(CountingRunner {
            note_id: "note".to_string(),
            paragraph_id: paragraph_id.to_string(),
            runs: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_runs_matching_runner() {
        let pool = ContextRunnerPool::new();
        let p1 = runner("p1");
        let p2 = runner("p2");
        pool.replace("note", &[p1.clone() as Arc<dyn ContextRunner>, p2.clone()]);

        assert!(pool.run("note", "p2"));
        assert_eq!(p1.runs.load(Ordering::SeqCst), 0);
        assert_eq!(p2.runs.load(Ordering::SeqCst), 1);
        assert!(!pool.run("note", "p3"));
        assert!(!pool.run("other", "p1"));
    }

    #[test]
    fn test_replace_drops_previous_runners() {
        let pool = ContextRunnerPool::new();
        pool.replace("note", &[runner("p1") as Arc<dyn ContextRunner>]);
        pool.replace("note", &[runner("p2") as Arc<dyn ContextRunner>]);

        assert!(!pool.run("note", "p1"));
        assert!(pool.run("note", "p2"));

        pool.clear("note");
        assert!(!pool.run("note", "p2"));
    }
}
