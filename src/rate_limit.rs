//! Per-user admission control, one sliding window per command class.

use std::collections::VecDeque;
use std::time::Instant;

use dashmap::DashMap;
use tracing::debug;

use crate::config::{RateLimitPolicy, RateQuota};
use crate::error::{PlayerError, Result};
use crate::models::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    Regular,
    Privileged,
}

pub struct RateLimiter {
    policy: RateLimitPolicy,
    windows: DashMap<(UserId, CommandClass), VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        RateLimiter {
            policy,
            windows: DashMap::new(),
        }
    }

    fn quota(&self, class: CommandClass) -> RateQuota {
        match class {
            CommandClass::Regular => self.policy.regular,
            CommandClass::Privileged => self.policy.privileged,
        }
    }

    /// Admits and records one call, or reports how long until the oldest
    /// call in the window expires.
    ///
    /// The map entry stays locked for the whole check, so concurrent calls
    /// from the same subject are counted one after another.
    pub fn check(&self, subject: UserId, class: CommandClass, now: Instant) -> Result<()> {
        let quota = self.quota(class);
        let mut window = self.windows.entry((subject, class)).or_default();

        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= quota.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < quota.max_calls as usize {
            window.push_back(now);
            return Ok(());
        }

        let retry_after = window
            .front()
            .map(|oldest| (*oldest + quota.window).saturating_duration_since(now))
            .unwrap_or(quota.window);

        debug!("User {subject} rate limited on {class:?} for {retry_after:?}");

        Err(PlayerError::RateLimited { retry_after })
    }

    /// Forgets windows whose every entry has expired.
    pub fn purge(&self, now: Instant) {
        let policy = self.policy;
        self.windows.retain(|(_, class), window| {
            let span = match class {
                CommandClass::Regular => policy.regular.window,
                CommandClass::Privileged => policy.privileged.window,
            };
            window
                .back()
                .map_or(false, |newest| now.saturating_duration_since(*newest) < span)
        });
    }

    pub fn tracked_subjects(&self) -> usize {
        self.windows.len()
    }
}
