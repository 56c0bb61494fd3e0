//! Quest timer manager (§4.6, §5, §9).
//!
//! Timers are keyed by `(quest_name, timer_name, player_object_id)`. Starting a timer with an
//! existing key cancels the old one first and *waits for it to actually stop* before scheduling
//! the new one, so a callback can never fire after the slot has been reused or after
//! `shutdown()` has returned.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Duration;

pub type TimerCallback = Arc<dyn Fn(String, i64, i64) + Send + Sync + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub quest_name: String,
    pub timer_name: String,
    pub player_object_id: i64,
}

struct TimerEntry {
    cancel_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

#[derive(Default)]
pub struct TimerManager {
    timers: DashMap<TimerKey, TimerEntry>,
}

impl TimerManager {
    pub fn new() -> Self {
        TimerManager { timers: DashMap::new() }
    }

    /// Schedules `callback(timer_name, player_object_id, npc_object_id)` to fire after `delay`.
    /// Cancels and awaits completion of any existing timer under the same key first.
    pub async fn start_timer(
        &self,
        quest_name: impl Into<String>,
        timer_name: impl Into<String>,
        player_object_id: i64,
        npc_object_id: i64,
        delay: Duration,
        callback: TimerCallback,
    ) {
        let key = TimerKey {
            quest_name: quest_name.into(),
            timer_name: timer_name.into(),
            player_object_id,
        };
        self.cancel_key(&key).await;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let fire_timer_name = key.timer_name.clone();
        let join = tokio::spawn(async move {
            tokio::select! {
                _ = cancel_rx => {}
                _ = tokio::time::sleep(delay) => {
                    callback(fire_timer_name, player_object_id, npc_object_id);
                }
            }
        });
        self.timers.insert(key, TimerEntry { cancel_tx, join });
    }

    async fn cancel_key(&self, key: &TimerKey) {
        if let Some((_, entry)) = self.timers.remove(key) {
            let _ = entry.cancel_tx.send(());
            let _ = entry.join.await;
        }
    }

    pub async fn cancel(&self, quest_name: &str, timer_name: &str, player_object_id: i64) {
        let key = TimerKey {
            quest_name: quest_name.to_string(),
            timer_name: timer_name.to_string(),
            player_object_id,
        };
        self.cancel_key(&key).await;
    }

    pub async fn cancel_for_player(&self, player_object_id: i64) {
        let keys: Vec<TimerKey> = self
            .timers
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.player_object_id == player_object_id)
            .collect();
        for key in keys {
            self.cancel_key(&key).await;
        }
    }

    pub async fn cancel_for_quest(&self, quest_name: &str) {
        let keys: Vec<TimerKey> = self
            .timers
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.quest_name == quest_name)
            .collect();
        for key in keys {
            self.cancel_key(&key).await;
        }
    }

    /// Cancels every outstanding timer and waits for each to stop.
    pub async fn shutdown(&self) {
        let keys: Vec<TimerKey> = self.timers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.cancel_key(&key).await;
        }
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_delay() {
        let mgr = Arc::new(TimerManager::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        mgr.start_timer("Q1", "t1", 100, 0, Duration::from_secs(5), Arc::new(move |_, _, _| {
            fired2.fetch_add(1, Ordering::SeqCst);
        }))
        .await;

        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_cancels_previous() {
        let mgr = Arc::new(TimerManager::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        mgr.start_timer("Q1", "t1", 100, 0, Duration::from_secs(5), Arc::new(move |_, _, _| {
            fired2.fetch_add(1, Ordering::SeqCst);
        }))
        .await;
        let fired3 = fired.clone();
        mgr.start_timer("Q1", "t1", 100, 0, Duration::from_secs(5), Arc::new(move |_, _, _| {
            fired3.fetch_add(10, Ordering::SeqCst);
        }))
        .await;

        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 10, "only the second timer should fire");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let mgr = Arc::new(TimerManager::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        mgr.start_timer("Q1", "t1", 100, 0, Duration::from_secs(5), Arc::new(move |_, _, _| {
            fired2.fetch_add(1, Ordering::SeqCst);
        }))
        .await;
        mgr.cancel("Q1", "t1", 100).await;

        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(mgr.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_everything() {
        let mgr = Arc::new(TimerManager::new());
        for i in 0..5 {
            mgr.start_timer("Q1", format!("t{i}"), i, 0, Duration::from_secs(5), Arc::new(|_, _, _| {})).await;
        }
        assert_eq!(mgr.active_count(), 5);
        mgr.shutdown().await;
        assert_eq!(mgr.active_count(), 0);
    }
}
