//! Background sweep that hangs up on guilds nobody is using.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn};
use tracing_futures::Instrument;

use crate::config::IdlePolicy;
use crate::models::GuildId;
use crate::registry::SessionRegistry;
use crate::transport::OccupancyProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    /// No listeners in the voice channel for the alone timeout.
    Alone,
    /// No commands for the inactivity timeout.
    Inactive,
}

impl fmt::Display for IdleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdleReason::Alone => f.write_str("alone in the voice channel"),
            IdleReason::Inactive => f.write_str("inactive"),
        }
    }
}

/// One guild torn down by a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleDisconnect {
    pub guild: GuildId,
    pub reason: IdleReason,
    pub allowed_channel_name: String,
}

pub struct IdleSupervisor {
    registry: Arc<SessionRegistry>,
    probe: Arc<dyn OccupancyProbe>,
    policy: IdlePolicy,
}

impl IdleSupervisor {
    pub fn new(registry: Arc<SessionRegistry>, probe: Arc<dyn OccupancyProbe>, policy: IdlePolicy) -> Self {
        IdleSupervisor {
            registry,
            probe,
            policy,
        }
    }

    /// Evaluates every session once against `now`.
    ///
    /// Each guild is locked on its own and released before the next one is
    /// looked at. Sessions already evicted by someone else are skipped, and a
    /// failed hang-up is logged without stopping the sweep. Stale sessions
    /// that never joined voice are dropped without a notice.
    pub fn sweep(&self, now: Instant) -> Vec<IdleDisconnect> {
        let mut disconnected = Vec::new();

        for (guild, handle) in self.registry.entries() {
            let occupancy = self.probe.occupancy(guild);

            let outcome = {
                let mut session = handle.lock();

                if session.is_retired() {
                    debug!("Guild {guild} already evicted, skipping");
                    continue;
                }

                if let Some(occupancy) = occupancy {
                    session.observe_occupancy(occupancy, now);
                }

                match session.idle_reason(now, &self.policy) {
                    Some(reason) if !session.is_voice_connected() => {
                        debug!("Guild {guild} never in voice and {reason}, dropping session");
                        session.retire();
                        Some(None)
                    }
                    Some(reason) => {
                        info!("Guild {guild} is {reason}, disconnecting");

                        if let Err(why) = session.disconnect() {
                            warn!("Guild {guild} idle disconnect failed: {why}");
                        }
                        session.retire();

                        Some(Some(IdleDisconnect {
                            guild,
                            reason,
                            allowed_channel_name: session.allowed_channel_name().to_string(),
                        }))
                    }
                    None => None,
                }
            };

            // Sessions outside voice are dropped quietly, there is nothing to announce.
            if let Some(notice) = outcome {
                self.registry.forget(guild, &handle);
                disconnected.extend(notice);
            }
        }

        disconnected
    }

    /// Runs [`sweep`](Self::sweep) every `sweep_interval`, forwarding each
    /// teardown to `notify`. The task ends when `notify` is closed.
    pub fn spawn(self, notify: UnboundedSender<IdleDisconnect>) -> JoinHandle<()> {
        let span = info_span!("idle_supervisor");

        tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(self.policy.sweep_interval);
                // the first tick completes immediately
                interval.tick().await;

                loop {
                    interval.tick().await;

                    if notify.is_closed() {
                        return;
                    }

                    for disconnect in self.sweep(Instant::now()) {
                        if notify.send(disconnect).is_err() {
                            info!("Idle notifications closed, stopping sweep");
                            return;
                        }
                    }
                }
            }
            .instrument(span),
        )
    }
}
