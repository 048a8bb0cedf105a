use crate::client::WorkerStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MemberRole {
    Master,
    Worker,
}

/// What the coordinator knows about one cluster member.
#[derive(Debug, Clone, Serialize)]
pub struct MemberRecord {
    pub address: String,
    pub role: MemberRole,
    pub last_seen: Option<DateTime<Utc>>,
    /// Consecutive polls without an answer.
    pub missed: u32,
    pub last_status: Option<WorkerStatus>,
}

impl MemberRecord {
    pub fn new(address: impl Into<String>, role: MemberRole) -> Self {
        Self {
            address: address.into(),
            role,
            last_seen: None,
            missed: 0,
            last_status: None,
        }
    }

    pub fn is_stale(&self, max_missed: u32) -> bool {
        self.missed >= max_missed
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemberRegistry {
    members: BTreeMap<String, MemberRecord>,
}

impl MemberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, address: impl Into<String>, role: MemberRole) {
        let address = address.into();
        self.members
            .entry(address.clone())
            .or_insert_with(|| MemberRecord::new(address, role));
    }

    pub fn get(&self, address: &str) -> Option<&MemberRecord> {
        self.members.get(address)
    }

    /// A successful contact resets the miss counter.
    pub fn seen(&mut self, address: &str, status: Option<WorkerStatus>) {
        if let Some(member) = self.members.get_mut(address) {
            member.last_seen = Some(Utc::now());
            member.missed = 0;
            if status.is_some() {
                member.last_status = status;
            }
        }
    }

    /// Returns the updated number of consecutive misses.
    pub fn missed(&mut self, address: &str) -> u32 {
        match self.members.get_mut(address) {
            Some(member) => {
                member.missed += 1;
                member.missed
            }
            None => 0,
        }
    }

    pub fn workers(&self) -> impl Iterator<Item = &MemberRecord> {
        self.members
            .values()
            .filter(|m| m.role == MemberRole::Worker)
    }

    pub fn stale(&self, max_missed: u32) -> Vec<&str> {
        self.workers()
            .filter(|m| m.is_stale(max_missed))
            .map(|m| m.address.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_misses_until_stale() {
        let mut registry = MemberRegistry::new();
        registry.register("master", MemberRole::Master);
        registry.register("w1", MemberRole::Worker);
        registry.register("w2", MemberRole::Worker);

        assert_eq!(registry.missed("w1"), 1);
        assert_eq!(registry.missed("w1"), 2);
        assert_eq!(registry.stale(2), vec!["w1"]);

        registry.seen("w1", Some(WorkerStatus::default()));
        assert!(registry.stale(2).is_empty());
        assert!(registry.get("w1").unwrap().last_seen.is_some());
        assert_eq!(registry.workers().count(), 2);
        assert_eq!(registry.missed("unknown"), 0);
    }
}
