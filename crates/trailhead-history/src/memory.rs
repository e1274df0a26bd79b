//! In-memory history backend

use crate::location::{parse_href, HistoryAction, HistoryEvent, HistoryLocation, HistoryState, INDEX_STATE_KEY};
use crate::History;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// In-memory history backend
///
/// Keeps the entry stack in a `Vec` behind an async lock.
/// Nothing is persisted; cloning shares the same stack.
#[derive(Clone)]
pub struct MemoryHistory {
    stack: Arc<RwLock<Stack>>,
    events: broadcast::Sender<HistoryEvent>,
}

struct Stack {
    entries: Vec<HistoryLocation>,
    index: usize,
}

impl MemoryHistory {
    /// Create a history whose current entry is the last of `entries`
    pub fn new(entries: Vec<String>) -> Self {
        let index = entries.len().saturating_sub(1);
        Self::with_index(entries, index)
    }

    /// Create a history positioned at `index` (clamped into range)
    pub fn with_index(entries: Vec<String>, index: usize) -> Self {
        let mut entries: Vec<HistoryLocation> = entries
            .iter()
            .map(|href| parse_href(href, HistoryState::new()))
            .collect();
        if entries.is_empty() {
            entries.push(HistoryLocation::default());
        }
        for (position, entry) in entries.iter_mut().enumerate() {
            entry.state.insert(INDEX_STATE_KEY.to_string(), position.into());
        }
        let index = index.min(entries.len() - 1);
        let (events, _) = broadcast::channel(64);

        Self {
            stack: Arc::new(RwLock::new(Stack { entries, index })),
            events,
        }
    }

    /// Snapshot of every entry in the stack
    pub async fn entries(&self) -> Vec<HistoryLocation> {
        self.stack.read().await.entries.clone()
    }

    /// Position of the current entry
    pub async fn index(&self) -> usize {
        self.stack.read().await.index
    }

    fn notify(&self, action: HistoryAction, location: HistoryLocation) {
        tracing::debug!("memory history {}: {}", action, location.href());
        // No subscribers is not an error.
        let _ = self.events.send(HistoryEvent { action, location });
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new(vec!["/".to_string()])
    }
}

#[async_trait]
impl History for MemoryHistory {
    async fn location(&self) -> HistoryLocation {
        let stack = self.stack.read().await;
        stack.entries[stack.index].clone()
    }

    async fn push(&self, href: &str, mut state: HistoryState) -> Result<()> {
        let location = {
            let mut stack = self.stack.write().await;
            let next = stack.index + 1;
            stack.entries.truncate(next);
            state.insert(INDEX_STATE_KEY.to_string(), next.into());
            let location = parse_href(href, state);
            stack.entries.push(location.clone());
            stack.index = next;
            location
        };
        self.notify(HistoryAction::Push, location);
        Ok(())
    }

    async fn replace(&self, href: &str, mut state: HistoryState) -> Result<()> {
        let location = {
            let mut stack = self.stack.write().await;
            let index = stack.index;
            state.insert(INDEX_STATE_KEY.to_string(), index.into());
            let location = parse_href(href, state);
            stack.entries[index] = location.clone();
            location
        };
        self.notify(HistoryAction::Replace, location);
        Ok(())
    }

    async fn go(&self, delta: isize) -> Result<()> {
        let location = {
            let mut stack = self.stack.write().await;
            let last = stack.entries.len() as isize - 1;
            let target = (stack.index as isize + delta).clamp(0, last);
            stack.index = target as usize;
            stack.entries[stack.index].clone()
        };
        self.notify(HistoryAction::Pop, location);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_memory_history_initial_entry() {
        let history = MemoryHistory::new(vec!["/a".to_string(), "/b?x=1".to_string()]);
        let location = history.location().await;
        assert_eq!(location.pathname, "/b");
        assert_eq!(location.search, "?x=1");
        assert_eq!(history.index().await, 1);
    }

    #[tokio::test]
    async fn test_memory_history_push_truncates_forward_entries() {
        let history = MemoryHistory::with_index(
            vec!["/a".to_string(), "/b".to_string(), "/c".to_string()],
            0,
        );

        history.push("/d", HistoryState::new()).await.unwrap();

        let hrefs: Vec<String> = history.entries().await.iter().map(|e| e.href()).collect();
        assert_eq!(hrefs, vec!["/a", "/d"]);
        assert_eq!(history.index().await, 1);
    }

    #[tokio::test]
    async fn test_memory_history_replace_keeps_index() {
        let history = MemoryHistory::default();
        history.replace("/x#h", HistoryState::new()).await.unwrap();

        assert_eq!(history.entries().await.len(), 1);
        assert_eq!(history.location().await.hash, "#h");
    }

    #[tokio::test]
    async fn test_memory_history_go_is_clamped() {
        let history = MemoryHistory::new(vec!["/a".to_string(), "/b".to_string()]);
        history.go(-5).await.unwrap();
        assert_eq!(history.location().await.pathname, "/a");
        history.forward().await.unwrap();
        assert_eq!(history.location().await.pathname, "/b");
        history.go(3).await.unwrap();
        assert_eq!(history.location().await.pathname, "/b");
    }

    #[tokio::test]
    async fn test_memory_history_notifies_subscribers() {
        let history = MemoryHistory::default();
        let mut rx = history.subscribe();

        history.push("/next", HistoryState::new()).await.unwrap();
        history.back().await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.action, HistoryAction::Push);
        assert_eq!(first.location.pathname, "/next");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.action, HistoryAction::Pop);
        assert_eq!(second.location.pathname, "/");
    }

    #[tokio::test]
    async fn test_memory_history_records_index_in_state() {
        let history = MemoryHistory::default();
        history.push("/one", HistoryState::new()).await.unwrap();
        let state = history.location().await.state;
        assert_eq!(state.get(INDEX_STATE_KEY), Some(&serde_json::json!(1)));
    }
}
