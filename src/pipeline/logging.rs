//! Per-pipeline log accumulation.
//!
//! An explicit registry object, created by the embedding caller and handed
//! to each pipeline instance — there is no process-global store. Every
//! pipeline run opens a log channel identified by an opaque id; step and
//! lifecycle messages append to that channel's buffer. The sub-pipeline
//! executor reads a nested run's text into its metrics row and then removes
//! the channel, so memory stays bounded across many groups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Opaque log channel identifier.
pub type LogChannelId = String;

/// Concurrent log text store keyed by channel id.
#[derive(Debug, Default)]
pub struct LogRegistry {
    buffers: Mutex<HashMap<LogChannelId, String>>,
    seq: AtomicU64,
}

impl LogRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a fresh channel for one pipeline run. Ids are unique per
    /// registry.
    pub fn open_channel(&self, pipeline_name: &str) -> LogChannelId {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{pipeline_name}#{n}");
        self.buffers
            .lock()
            .expect("log registry lock poisoned")
            .insert(id.clone(), String::new());
        id
    }

    /// Append one line to a channel. Appends to unknown (already removed)
    /// channels are dropped.
    pub fn append(&self, id: &str, line: &str) {
        let mut buffers = self.buffers.lock().expect("log registry lock poisoned");
        if let Some(buf) = buffers.get_mut(id) {
            buf.push_str(line);
            buf.push('\n');
        }
    }

    /// Current text of a channel.
    pub fn text(&self, id: &str) -> Option<String> {
        self.buffers
            .lock()
            .expect("log registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Remove a channel and return its final text.
    pub fn remove(&self, id: &str) -> Option<String> {
        self.buffers
            .lock()
            .expect("log registry lock poisoned")
            .remove(id)
    }

    pub fn channel_count(&self) -> usize {
        self.buffers
            .lock()
            .expect("log registry lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_open_append_text() {
        let reg = LogRegistry::new();
        let id = reg.open_channel("demo");
        reg.append(&id, "step A started");
        reg.append(&id, "step A finished");
        let text = reg.text(&id).unwrap();
        assert!(text.contains("step A started\n"));
        assert!(text.contains("step A finished\n"));
    }

    #[test]
    fn test_ids_unique() {
        let reg = LogRegistry::new();
        let a = reg.open_channel("p");
        let b = reg.open_channel("p");
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove_bounds_memory() {
        let reg = LogRegistry::new();
        let id = reg.open_channel("nested");
        reg.append(&id, "line");
        let text = reg.remove(&id).unwrap();
        assert!(text.contains("line"));
        assert_eq!(reg.channel_count(), 0);
        // Appends after removal are dropped, not resurrected.
        reg.append(&id, "late");
        assert!(reg.text(&id).is_none());
    }

    #[test]
    fn test_concurrent_append() {
        let reg = LogRegistry::new();
        let id = reg.open_channel("par");
        let mut handles = Vec::new();
        for t in 0..4 {
            let reg = Arc::clone(&reg);
            let id = id.clone();
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    reg.append(&id, &format!("t{t}-{i}"));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let text = reg.text(&id).unwrap();
        assert_eq!(text.lines().count(), 200);
    }
}
