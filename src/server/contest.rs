//! Per-room contest state: scores, leaderboard, and the owned auto-end timer.

use tokio::task::JoinHandle;
use uuid::Uuid;

use super::events::ScoreEntry;

/// A running contest. At most one exists per room; ending it drops the value.
#[derive(Debug)]
pub struct Contest {
    id: Uuid,
    end_at: i64,
    duration_secs: u64,
    /// Score slots in first-scoring-event order, so that leaderboard ties
    /// beyond the sort keys stay stable. Slots are never removed mid-contest,
    /// even when the participant disconnects.
    slots: Vec<ScoreSlot>,
    /// Auto-end timer. Must be aborted whenever the contest is superseded or
    /// ended early; a stale timer must never fire against a later contest.
    timer: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct ScoreSlot {
    connection_id: Uuid,
    name: String,
    beats: u64,
    peak_cps: u64,
}

impl Contest {
    pub fn new(id: Uuid, end_at: i64, duration_secs: u64) -> Self {
        Self {
            id,
            end_at,
            duration_secs,
            slots: Vec::new(),
            timer: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn end_at(&self) -> i64 {
        self.end_at
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    /// Whole seconds until the auto-end, rounded up, never negative.
    pub fn remaining_secs(&self, now: i64) -> u64 {
        ((self.end_at - now).max(0) as u64).div_ceil(1_000)
    }

    pub fn attach_timer(&mut self, handle: JoinHandle<()>) {
        self.cancel_timer();
        self.timer = Some(handle);
    }

    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Record one scoring beat. `cps` is the sender's instantaneous rate at
    /// this moment; the slot's peak is a running maximum and never decreases.
    pub fn record(&mut self, connection_id: Uuid, name: String, cps: u64) {
        let index = match self
            .slots
            .iter()
            .position(|s| s.connection_id == connection_id)
        {
            Some(index) => index,
            None => {
                self.slots.push(ScoreSlot {
                    connection_id,
                    name: String::new(),
                    beats: 0,
                    peak_cps: 0,
                });
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.name = name;
        slot.beats += 1;
        slot.peak_cps = slot.peak_cps.max(cps);
    }

    /// Full standings sorted by beats desc, then peak CPS desc. The sort is
    /// stable, so full ties keep slot insertion order.
    pub fn leaderboard(&self) -> Vec<ScoreEntry> {
        let mut entries: Vec<ScoreEntry> = self.slots.iter().map(ScoreSlot::to_entry).collect();
        entries.sort_by(|a, b| b.beats.cmp(&a.beats).then(b.peak_cps.cmp(&a.peak_cps)));
        entries
    }

    /// The participant with the highest recorded peak CPS, ties broken by
    /// higher beats. Can differ from the leaderboard head.
    pub fn peak_champion(&self) -> Option<ScoreEntry> {
        let mut best: Option<&ScoreSlot> = None;
        for slot in &self.slots {
            let better = match best {
                None => true,
                Some(current) => {
                    slot.peak_cps > current.peak_cps
                        || (slot.peak_cps == current.peak_cps && slot.beats > current.beats)
                }
            };
            if better {
                best = Some(slot);
            }
        }
        best.map(ScoreSlot::to_entry)
    }
}

impl Drop for Contest {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

impl ScoreSlot {
    fn to_entry(&self) -> ScoreEntry {
        ScoreEntry {
            id: self.connection_id,
            name: self.name.clone(),
            beats: self.beats,
            peak_cps: self.peak_cps,
        }
    }
}
