//! Eviction Policy Module
//!
//! Pure victim selection over a snapshot of live entries. Stores call into this
//! module and apply the resulting plan; nothing here touches storage.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::entry::is_past;

// == Eviction Policy ==
/// Ordering used to pick victims when capacity must be reclaimed.
///
/// Expired entries are always removed first regardless of the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently accessed first
    #[default]
    Lru,
    /// Least frequently accessed first, ties by insertion order
    Lfu,
    /// Oldest inserted first
    Fifo,
    /// Soonest to expire first, entries without expiry last
    Ttl,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
            EvictionPolicy::Ttl => "ttl",
        };
        f.write_str(name)
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            "ttl" => Ok(EvictionPolicy::Ttl),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}

// == Entry Snapshot ==
/// The metadata the policy needs about one live entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub key: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub expires_at: Option<DateTime<Utc>>,
    /// Insertion order; stores without a counter pass 0 and ties fall back to the key
    pub sequence: u64,
}

// == Eviction Plan ==
/// Keys to remove, in removal order, and how many bytes that frees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Entries past their expiry, removed unconditionally
    pub expired: Vec<String>,
    /// Live entries chosen by the policy
    pub victims: Vec<String>,
    /// Bytes freed by removing both lists
    pub reclaimed: u64,
}

impl EvictionPlan {
    /// Whether applying the plan frees at least `required_bytes`.
    pub fn satisfies(&self, required_bytes: u64) -> bool {
        self.reclaimed >= required_bytes
    }

    /// Total number of keys the plan removes.
    pub fn len(&self) -> usize {
        self.expired.len() + self.victims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.victims.is_empty()
    }
}

impl EvictionPolicy {
    // == Order ==
    /// Sorts `entries` into eviction order (first element goes first).
    pub fn order(&self, entries: &mut [EntrySnapshot]) {
        entries.sort_by(|a, b| self.compare(a, b));
    }

    fn compare(&self, a: &EntrySnapshot, b: &EntrySnapshot) -> Ordering {
        let primary = match self {
            EvictionPolicy::Lru => a.last_accessed_at.cmp(&b.last_accessed_at),
            EvictionPolicy::Lfu => a.access_count.cmp(&b.access_count),
            EvictionPolicy::Fifo => a.created_at.cmp(&b.created_at),
            EvictionPolicy::Ttl => match (a.expires_at, b.expires_at) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };

        primary
            .then_with(|| a.sequence.cmp(&b.sequence))
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.key.cmp(&b.key))
    }

    // == Select Victims ==
    /// Picks live entries in policy order until `required_bytes` are covered.
    ///
    /// Stops at the entry that crosses the threshold. If every entry is taken
    /// and the target is still not met, the returned plan does not satisfy it.
    pub fn select_victims(
        &self,
        mut entries: Vec<EntrySnapshot>,
        required_bytes: u64,
    ) -> EvictionPlan {
        let mut plan = EvictionPlan::default();
        if required_bytes == 0 {
            return plan;
        }

        self.order(&mut entries);
        for entry in entries {
            if plan.reclaimed >= required_bytes {
                break;
            }
            plan.reclaimed += entry.size;
            plan.victims.push(entry.key);
        }
        plan
    }

    // == Plan Reclaim ==
    /// Full reclamation decision: every expired entry, then policy-ordered
    /// victims from the rest if the expired ones do not free enough.
    pub fn plan_reclaim(
        &self,
        entries: Vec<EntrySnapshot>,
        required_bytes: u64,
        now: DateTime<Utc>,
    ) -> EvictionPlan {
        let (expired, live): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|entry| is_past(entry.expires_at, now));

        let expired_bytes: u64 = expired.iter().map(|entry| entry.size).sum();
        let remaining = required_bytes.saturating_sub(expired_bytes);

        let mut plan = self.select_victims(live, remaining);
        plan.expired = expired.into_iter().map(|entry| entry.key).collect();
        plan.reclaimed += expired_bytes;
        plan
    }
}

/// Keys of all entries strictly past their expiry at `now`.
pub fn expired_keys<'a, I>(entries: I, now: DateTime<Utc>) -> Vec<String>
where
    I: IntoIterator<Item = &'a EntrySnapshot>,
{
    entries
        .into_iter()
        .filter(|entry| is_past(entry.expires_at, now))
        .map(|entry| entry.key.clone())
        .collect()
}
