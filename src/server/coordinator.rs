//! The coordinator: owner of all shared multi-client state.
//!
//! Every map (connection registry, profile store, contest table, liveness
//! table) is private to this struct, and the struct itself lives behind a
//! single `tokio::sync::Mutex` in [`super::AppState`]. Each handler locks,
//! mutates, and fans out before releasing, so all operations here can be
//! reasoned about as atomic with respect to one another.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::common::time::Clock;

use super::config::CoordinatorConfig;
use super::contest::Contest;
use super::events::{BeatPayload, ContestEndReason, RosterEntry, ServerEvent};

/// Error raised when a unicast push cannot be delivered.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("connection '{0}' is not registered")]
    ConnectionNotFound(Uuid),
    #[error("failed to encode event: {0}")]
    Encode(String),
    #[error("failed to push event to connection '{0}': {1}")]
    PushFailed(Uuid, String),
}

/// Per-connection mutable record. Created on connect, deleted on disconnect.
#[derive(Debug)]
pub struct UserProfile {
    pub display_name: String,
    /// Incremented exactly once per accepted beat; never decremented.
    pub beat_count: u64,
    pub last_action_at: i64,
    /// Beat timestamps pruned to a trailing window on every insert; used only
    /// to compute instantaneous beats-per-second.
    recent_beats: VecDeque<i64>,
    /// Timestamp gate for chat rate limiting. Only accepted messages move it.
    last_message_at: Option<i64>,
}

impl UserProfile {
    fn new(display_name: String, now: i64) -> Self {
        Self {
            display_name,
            beat_count: 0,
            last_action_at: now,
            recent_beats: VecDeque::new(),
            last_message_at: None,
        }
    }
}

/// Default anonymous tag derived from the connection id.
fn anon_tag(id: Uuid) -> String {
    format!("Anon-{}", &id.simple().to_string()[..4])
}

/// Shared room/session state and the operations that mutate it.
pub struct Coordinator {
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    /// Outbound channel per live connection.
    senders: HashMap<Uuid, mpsc::UnboundedSender<String>>,
    /// Connection -> room. A connection is in exactly one room at a time;
    /// room membership is derived from this map, never stored per room.
    rooms: HashMap<Uuid, String>,
    profiles: HashMap<Uuid, UserProfile>,
    /// At most one contest per room.
    contests: HashMap<String, Contest>,
    /// Room -> last-activity timestamp, for the idle reaper.
    liveness: HashMap<String, i64>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            senders: HashMap::new(),
            rooms: HashMap::new(),
            profiles: HashMap::new(),
            contests: HashMap::new(),
            liveness: HashMap::new(),
        }
    }

    // ---- connection registry & profile store ----

    /// Register a fresh connection and auto-join the default room.
    pub fn connect(&mut self, id: Uuid, sender: mpsc::UnboundedSender<String>) {
        let now = self.clock.now_millis();
        self.senders.insert(id, sender);
        self.profiles.insert(id, UserProfile::new(anon_tag(id), now));
        tracing::info!("Connection '{}' registered", id);
        self.join_room(id, "");
    }

    /// Drop the connection's bookkeeping. Returns the room it was last in;
    /// the caller broadcasts the departure after a debounce via
    /// [`Self::finish_disconnect`].
    pub fn disconnect(&mut self, id: Uuid) -> Option<String> {
        self.senders.remove(&id);
        self.profiles.remove(&id);
        let room = self.rooms.remove(&id);
        tracing::info!("Connection '{}' removed from registry", id);
        room
    }

    /// Post-debounce half of a disconnect: membership updates for the last
    /// room, ending its contest if nobody is left.
    pub fn finish_disconnect(&mut self, room: &str) {
        self.broadcast_user_count(room);
        self.broadcast_roster(room);
        if self.member_count(room) == 0 {
            self.end_contest(room, ContestEndReason::RoomEmpty);
        }
    }

    /// Join `requested` (blank resolves to the default room), atomically
    /// leaving any previous room first. Acks the caller with the resolved
    /// room name.
    pub fn join_room(&mut self, id: Uuid, requested: &str) {
        if !self.profiles.contains_key(&id) {
            return;
        }
        let target = {
            let trimmed = requested.trim();
            if trimmed.is_empty() {
                self.config.default_room.clone()
            } else {
                trimmed.to_string()
            }
        };

        let previous = self.rooms.get(&id).cloned();
        if let Some(previous) = previous.filter(|p| *p != target) {
            self.rooms.remove(&id);
            self.broadcast_user_count(&previous);
            self.broadcast_roster(&previous);
            if self.member_count(&previous) == 0 {
                self.end_contest(&previous, ContestEndReason::RoomEmpty);
            }
        }

        self.rooms.insert(id, target.clone());
        let now = self.clock.now_millis();
        self.touch(&target, now);

        if let Err(e) = self.send_to(id, &ServerEvent::RoomJoined {
            room: target.clone(),
        }) {
            tracing::warn!("Failed to ack room join for '{}': {}", id, e);
        }
        self.broadcast_user_count(&target);
        self.broadcast_roster(&target);
        tracing::info!("Connection '{}' joined room '{}'", id, target);
    }

    /// Sanitize and store a display name: trimmed, capped, anon tag when
    /// empty. Malformed names are corrected, never rejected.
    pub fn set_name(&mut self, id: Uuid, raw: &str) {
        let Some(profile) = self.profiles.get_mut(&id) else {
            return;
        };
        let trimmed = raw.trim();
        profile.display_name = if trimmed.is_empty() {
            anon_tag(id)
        } else {
            trimmed.chars().take(self.config.name_max_chars).collect()
        };
        if let Some(room) = self.rooms.get(&id).cloned() {
            self.broadcast_roster(&room);
        }
    }

    // ---- beat relay ----

    /// Accept one beat: update the sender's profile, enrich the payload with
    /// the server-resolved display name, fan out to the whole room (sender
    /// included), and feed the contest scheduler if a contest is active.
    pub fn beat(&mut self, id: Uuid, mut payload: BeatPayload) {
        let Some(room) = self.rooms.get(&id).cloned() else {
            return;
        };
        let now = self.clock.now_millis();
        let (name, cps) = {
            let Some(profile) = self.profiles.get_mut(&id) else {
                return;
            };
            profile.beat_count += 1;
            profile.last_action_at = now;
            profile.recent_beats.push_back(now);
            let window_start = now - self.config.beat_window_ms;
            while profile
                .recent_beats
                .front()
                .is_some_and(|t| *t < window_start)
            {
                profile.recent_beats.pop_front();
            }
            let cps_start = now - self.config.cps_window_ms;
            let cps = profile
                .recent_beats
                .iter()
                .filter(|t| **t > cps_start)
                .count() as u64;
            (profile.display_name.clone(), cps)
        };

        // The tag of the inbound frame and any client-claimed identity are
        // dropped; userName always comes from the registered profile.
        payload.remove("type");
        payload.insert("userName".to_string(), Value::String(name.clone()));
        self.broadcast_room(&room, &ServerEvent::ReceiveBeat { payload });
        self.touch(&room, now);
        self.broadcast_roster(&room);
        self.record_score(&room, id, name, cps, now);
    }

    // ---- contest scheduler ----

    /// Install a new contest for the sender's room, silently superseding any
    /// active one (its timer is aborted, no end event is emitted). Returns
    /// the room so the caller can schedule the auto-end timer.
    pub fn start_contest(&mut self, id: Uuid, contest_id: Uuid, duration_secs: u64) -> Option<String> {
        let room = self.rooms.get(&id).cloned()?;
        let now = self.clock.now_millis();
        // Durations arrive clamped from AppState, but the arithmetic must not
        // trust that: an out-of-range value saturates instead of wrapping.
        let end_at = now.saturating_add(
            i64::try_from(duration_secs)
                .unwrap_or(i64::MAX)
                .saturating_mul(1_000),
        );

        if let Some(mut previous) = self.contests.remove(&room) {
            previous.cancel_timer();
            tracing::debug!("Contest in room '{}' superseded by a new start", room);
        }
        self.contests
            .insert(room.clone(), Contest::new(contest_id, end_at, duration_secs));
        self.touch(&room, now);
        self.broadcast_room(&room, &ServerEvent::ContestStart {
            room: room.clone(),
            duration: duration_secs,
            end_time: end_at,
        });
        tracing::info!(
            "Contest started in room '{}' ({} s, ends at {})",
            room,
            duration_secs,
            end_at
        );
        Some(room)
    }

    /// Hand the scheduled auto-end task to the contest it was created for.
    /// If that contest was already superseded, the timer is aborted instead.
    pub fn attach_timer(&mut self, room: &str, contest_id: Uuid, handle: JoinHandle<()>) {
        match self.contests.get_mut(room) {
            Some(contest) if contest.id() == contest_id => contest.attach_timer(handle),
            _ => handle.abort(),
        }
    }

    /// End the room's contest and broadcast the results. Idempotent: a
    /// second trigger on an already-ended contest is a no-op.
    pub fn end_contest(&mut self, room: &str, reason: ContestEndReason) {
        let Some(mut contest) = self.contests.remove(room) else {
            return;
        };
        contest.cancel_timer();
        let leaderboard = contest.leaderboard();
        // No winner is declared for a contest that ends because everyone left.
        let winner = if reason == ContestEndReason::RoomEmpty {
            None
        } else {
            leaderboard.first().cloned()
        };
        let peak_champion = contest.peak_champion();
        tracing::info!("Contest in room '{}' ended ({})", room, reason);
        self.broadcast_room(room, &ServerEvent::ContestEnd {
            room: room.to_string(),
            winner,
            leaderboard,
            ended_reason: reason,
            peak_champion,
        });
    }

    /// End the contest only if it is still the one the trigger was scheduled
    /// for. Guards the auto-end timer against superseded contests.
    pub fn end_contest_if(&mut self, room: &str, contest_id: Uuid, reason: ContestEndReason) {
        if self
            .contests
            .get(room)
            .is_some_and(|c| c.id() == contest_id)
        {
            self.end_contest(room, reason);
        }
    }

    fn record_score(&mut self, room: &str, id: Uuid, name: String, cps: u64, now: i64) {
        let update = match self.contests.get_mut(room) {
            Some(contest) => {
                contest.record(id, name, cps);
                Some(ServerEvent::ContestUpdate {
                    room: room.to_string(),
                    remaining: contest.remaining_secs(now),
                    leaderboard: contest.leaderboard(),
                    peak_champion: contest.peak_champion(),
                })
            }
            None => None,
        };
        if let Some(event) = update {
            self.broadcast_room(room, &event);
        }
    }

    /// Unicast reply to `get-contest`.
    pub fn contest_reply(&self, id: Uuid) {
        let Some(room) = self.rooms.get(&id).cloned() else {
            return;
        };
        let now = self.clock.now_millis();
        let event = match self.contests.get(&room) {
            Some(contest) => ServerEvent::ContestUpdate {
                room: room.clone(),
                remaining: contest.remaining_secs(now),
                leaderboard: contest.leaderboard(),
                peak_champion: contest.peak_champion(),
            },
            None => ServerEvent::ContestNone { room: room.clone() },
        };
        if let Err(e) = self.send_to(id, &event) {
            tracing::warn!("Failed to send contest state to '{}': {}", id, e);
        }
    }

    // ---- chat relay ----

    /// Rate-limited, length-bounded chat broadcast. Excess and empty messages
    /// are dropped silently; dropped messages do not move the rate gate.
    pub fn chat(&mut self, id: Uuid, raw: &str) {
        let Some(room) = self.rooms.get(&id).cloned() else {
            return;
        };
        let now = self.clock.now_millis();
        let (from, text) = {
            let Some(profile) = self.profiles.get_mut(&id) else {
                return;
            };
            if profile
                .last_message_at
                .is_some_and(|last| now - last < self.config.chat_interval_ms)
            {
                tracing::debug!("Rate-limited chat message from '{}'", id);
                return;
            }
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return;
            }
            profile.last_message_at = Some(now);
            let text: String = trimmed.chars().take(self.config.chat_max_chars).collect();
            (profile.display_name.clone(), text)
        };
        self.touch(&room, now);
        self.broadcast_room(&room, &ServerEvent::ChatMessage {
            id: Uuid::new_v4(),
            room: room.clone(),
            from,
            text,
            ts: now,
        });
    }

    // ---- idle room reaper ----

    /// One reaper pass: purge every room that has no members and no activity
    /// for longer than the grace period, force-ending orphaned contests.
    /// This is the only place room-level bookkeeping is deleted.
    pub fn sweep(&mut self) {
        let now = self.clock.now_millis();
        let idle: Vec<(String, i64)> = self
            .liveness
            .iter()
            .filter(|(room, last)| {
                self.member_count(room) == 0 && now - **last > self.config.idle_grace_ms
            })
            .map(|(room, last)| (room.clone(), now - *last))
            .collect();
        for (room, idle_ms) in idle {
            self.end_contest(&room, ContestEndReason::Cleanup);
            self.liveness.remove(&room);
            tracing::info!("Reaped idle room '{}' after {} ms", room, idle_ms);
            // No member remains to scope this to, so it goes process-wide.
            self.broadcast_all(&ServerEvent::RoomCleanup { room, idle_ms });
        }
    }

    // ---- derived views & fan-out ----

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.values().filter(|r| r.as_str() == room).count()
    }

    /// Unicast reply to `get-user-count`.
    pub fn user_count_reply(&self, id: Uuid) {
        let Some(room) = self.rooms.get(&id) else {
            return;
        };
        let event = ServerEvent::UserCount {
            count: self.member_count(room),
        };
        if let Err(e) = self.send_to(id, &event) {
            tracing::warn!("Failed to send user count to '{}': {}", id, e);
        }
    }

    pub fn has_contest(&self, room: &str) -> bool {
        self.contests.contains_key(room)
    }

    pub fn profile(&self, id: Uuid) -> Option<&UserProfile> {
        self.profiles.get(&id)
    }

    pub fn room_of(&self, id: Uuid) -> Option<&str> {
        self.rooms.get(&id).map(String::as_str)
    }

    pub fn is_tracked(&self, room: &str) -> bool {
        self.liveness.contains_key(room)
    }

    fn members(&self, room: &str) -> Vec<Uuid> {
        self.rooms
            .iter()
            .filter(|(_, r)| r.as_str() == room)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Derived membership list; holds no state of its own.
    fn roster(&self, room: &str) -> Vec<RosterEntry> {
        self.members(room)
            .into_iter()
            .map(|id| match self.profiles.get(&id) {
                Some(p) => RosterEntry {
                    id,
                    name: p.display_name.clone(),
                    beats: p.beat_count,
                    last_action: p.last_action_at,
                },
                None => RosterEntry {
                    id,
                    name: anon_tag(id),
                    beats: 0,
                    last_action: 0,
                },
            })
            .collect()
    }

    fn broadcast_roster(&self, room: &str) {
        let users = self.roster(room);
        self.broadcast_room(room, &ServerEvent::RoomUsers {
            room: room.to_string(),
            users,
        });
    }

    fn broadcast_user_count(&self, room: &str) {
        self.broadcast_room(room, &ServerEvent::UserCount {
            count: self.member_count(room),
        });
    }

    /// Fan out to every member of `room`. Individual delivery failures are
    /// logged and skipped; they never block delivery to other members.
    fn broadcast_room(&self, room: &str, event: &ServerEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to encode event for room '{}': {}", room, e);
                return;
            }
        };
        for id in self.members(room) {
            if let Some(sender) = self.senders.get(&id)
                && sender.send(json.clone()).is_err()
            {
                tracing::warn!("Failed to push event to connection '{}'", id);
            }
        }
    }

    fn broadcast_all(&self, event: &ServerEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to encode process-wide event: {}", e);
                return;
            }
        };
        for (id, sender) in &self.senders {
            if sender.send(json.clone()).is_err() {
                tracing::warn!("Failed to push event to connection '{}'", id);
            }
        }
    }

    fn send_to(&self, id: Uuid, event: &ServerEvent) -> Result<(), PushError> {
        let sender = self
            .senders
            .get(&id)
            .ok_or(PushError::ConnectionNotFound(id))?;
        let json = serde_json::to_string(event).map_err(|e| PushError::Encode(e.to_string()))?;
        sender
            .send(json)
            .map_err(|e| PushError::PushFailed(id, e.to_string()))
    }

    fn touch(&mut self, room: &str, now: i64) {
        self.liveness.insert(room.to_string(), now);
    }
}
