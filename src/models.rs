use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub type GuildId = u64;
pub type UserId = u64;
pub type ChannelId = u64;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an enqueued track. Survives queue reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(u64);

impl TrackId {
    fn next() -> Self {
        TrackId(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the resolver knows about a playable item before anyone requested it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: String,
    pub url: String,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub url: String,
    pub requester: UserId,
    pub duration: Option<Duration>,
    pub enqueued_at: Instant,
}

impl Track {
    pub fn new(info: TrackInfo, requester: UserId) -> Self {
        Track {
            id: TrackId::next(),
            title: info.title,
            url: info.url,
            requester,
            duration: info.duration,
            enqueued_at: Instant::now(),
        }
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Track {}
