//! Shared application state and async orchestration.
//!
//! [`AppState`] owns the [`Coordinator`] behind a single mutex and layers the
//! scheduled work on top: contest auto-end timers, the disconnect debounce,
//! and event dispatch from the WebSocket handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::common::time::Clock;

use super::config::CoordinatorConfig;
use super::coordinator::Coordinator;
use super::events::{ClientEvent, ContestEndReason};

/// Shared application state
pub struct AppState {
    /// Policy constants, also held by the coordinator.
    pub config: CoordinatorConfig,
    /// All shared room/session state, serialized behind one mutex.
    pub coordinator: Mutex<Coordinator>,
}

impl AppState {
    pub fn new(config: CoordinatorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: config.clone(),
            coordinator: Mutex::new(Coordinator::new(config, clock)),
        }
    }

    /// Register a fresh connection with its outbound channel.
    pub async fn on_connect(&self, id: Uuid, sender: mpsc::UnboundedSender<String>) {
        self.coordinator.lock().await.connect(id, sender);
    }

    /// Tear down a connection. Membership updates for the departed room are
    /// debounced so rapid reconnect churn coalesces into one roster push.
    pub async fn on_disconnect(self: &Arc<Self>, id: Uuid) {
        let last_room = self.coordinator.lock().await.disconnect(id);
        let Some(room) = last_room else {
            return;
        };
        let state = Arc::clone(self);
        let debounce = self.config.disconnect_debounce_ms;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(debounce)).await;
            state.coordinator.lock().await.finish_disconnect(&room);
        });
    }

    /// Dispatch one inbound client event.
    pub async fn on_event(self: &Arc<Self>, id: Uuid, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom { room } => {
                self.coordinator
                    .lock()
                    .await
                    .join_room(id, room.as_deref().unwrap_or(""));
            }
            ClientEvent::SetName { name } => {
                self.coordinator
                    .lock()
                    .await
                    .set_name(id, name.as_deref().unwrap_or(""));
            }
            ClientEvent::TriggerBeat { payload } => {
                self.coordinator.lock().await.beat(id, payload);
            }
            ClientEvent::ChatMessage { text } => {
                self.coordinator.lock().await.chat(id, &text);
            }
            ClientEvent::StartContest { duration } => {
                self.start_contest(id, duration).await;
            }
            ClientEvent::GetContest => {
                self.coordinator.lock().await.contest_reply(id);
            }
            ClientEvent::GetUserCount => {
                self.coordinator.lock().await.user_count_reply(id);
            }
        }
    }

    /// Start (or supersede) a contest in the sender's room and schedule its
    /// auto-end timer. The timer carries the contest id, so it can only end
    /// the contest it was scheduled for.
    pub async fn start_contest(self: &Arc<Self>, id: Uuid, requested_secs: Option<u64>) {
        let duration = requested_secs
            .unwrap_or(0)
            .clamp(self.config.contest_min_secs, self.config.contest_max_secs);
        let contest_id = Uuid::new_v4();

        let room = self
            .coordinator
            .lock()
            .await
            .start_contest(id, contest_id, duration);
        let Some(room) = room else {
            return;
        };

        let state = Arc::clone(self);
        let timer_room = room.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(duration)).await;
            state
                .coordinator
                .lock()
                .await
                .end_contest_if(&timer_room, contest_id, ContestEndReason::Timer);
        });
        self.coordinator
            .lock()
            .await
            .attach_timer(&room, contest_id, timer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::SystemClock;
    use serde_json::Value;

    fn test_state(config: CoordinatorConfig) -> Arc<AppState> {
        Arc::new(AppState::new(config, Arc::new(SystemClock)))
    }

    async fn connect(state: &Arc<AppState>) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        state.on_connect(id, tx).await;
        (id, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut events = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            events.push(serde_json::from_str(&raw).unwrap());
        }
        events
    }

    async fn next_of_type(rx: &mut mpsc::UnboundedReceiver<String>, event_type: &str) -> Value {
        loop {
            let raw = rx.recv().await.expect("channel closed while waiting");
            let value: Value = serde_json::from_str(&raw).unwrap();
            if value["type"] == event_type {
                return value;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_contest_times_out_and_broadcasts_end() {
        // given:
        let state = test_state(CoordinatorConfig::default());
        let (alice, mut rx) = connect(&state).await;

        // when: a 2 s request is floor-clamped and scheduled
        state.start_contest(alice, Some(2)).await;

        // then:
        let start = next_of_type(&mut rx, "contest-start").await;
        assert_eq!(start["duration"], 5);
        let end = next_of_type(&mut rx, "contest-end").await;
        assert_eq!(end["endedReason"], "timer");
        assert!(!state.coordinator.lock().await.has_contest("lobby"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_duration_is_ceiling_clamped() {
        // given:
        let state = test_state(CoordinatorConfig::default());
        let (alice, mut rx) = connect(&state).await;

        // when:
        state.start_contest(alice, Some(u64::MAX)).await;

        // then: the request is capped, not scheduled verbatim
        let start = next_of_type(&mut rx, "contest-start").await;
        assert_eq!(start["duration"], 3_600);
        assert!(start["endTime"].as_i64().unwrap() > 0);
        assert!(state.coordinator.lock().await.has_contest("lobby"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseding_cancels_the_old_timer() {
        // given:
        let state = test_state(CoordinatorConfig::default());
        let (alice, mut rx) = connect(&state).await;
        state.start_contest(alice, Some(5)).await;

        // when: a much longer contest replaces it before the first fires
        state.start_contest(alice, Some(600)).await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        // then: the first timer was aborted, the second contest is untouched
        let events = drain(&mut rx);
        assert!(events.iter().all(|e| e["type"] != "contest-end"));
        assert!(state.coordinator.lock().await.has_contest("lobby"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_updates_are_debounced() {
        // given:
        let state = test_state(CoordinatorConfig::default());
        let (alice, _alice_rx) = connect(&state).await;
        let (_bob, mut bob_rx) = connect(&state).await;
        drain(&mut bob_rx);

        // when:
        state.on_disconnect(alice).await;

        // then: nothing yet, the debounce is pending
        assert!(drain(&mut bob_rx).is_empty());
        let count = next_of_type(&mut bob_rx, "user-count").await;
        assert_eq!(count["count"], 1);
        let roster = next_of_type(&mut bob_rx, "room-users").await;
        assert_eq!(roster["users"].as_array().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnecting_last_member_ends_contest_after_debounce() {
        // given:
        let state = test_state(CoordinatorConfig::default());
        let (alice, _rx) = connect(&state).await;
        state
            .on_event(alice, ClientEvent::JoinRoom {
                room: Some("solo".to_string()),
            })
            .await;
        state.start_contest(alice, Some(600)).await;
        assert!(state.coordinator.lock().await.has_contest("solo"));

        // when:
        state.on_disconnect(alice).await;
        tokio::time::sleep(Duration::from_millis(
            state.config.disconnect_debounce_ms + 50,
        ))
        .await;

        // then:
        assert!(!state.coordinator.lock().await.has_contest("solo"));
    }
}
