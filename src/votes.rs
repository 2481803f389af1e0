use std::collections::HashSet;

use crate::models::UserId;

/// Skip ballots for the current track.
#[derive(Debug, Default)]
pub struct VoteSkipTracker {
    voters: HashSet<UserId>,
}

/// Tally after a vote was cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTally {
    pub votes: usize,
    pub required: usize,
}

impl VoteTally {
    pub fn passed(&self) -> bool {
        self.votes >= self.required
    }
}

/// Majority of the non-bot listeners, never less than one.
pub fn required_votes(occupancy: usize) -> usize {
    occupancy / 2 + 1
}

impl VoteSkipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `voter`. A repeat vote leaves the tally unchanged.
    pub fn vote(&mut self, voter: UserId, occupancy: usize) -> VoteTally {
        self.voters.insert(voter);

        VoteTally {
            votes: self.voters.len(),
            required: required_votes(occupancy),
        }
    }

    pub fn count(&self) -> usize {
        self.voters.len()
    }

    pub fn clear(&mut self) {
        self.voters.clear();
    }
}
