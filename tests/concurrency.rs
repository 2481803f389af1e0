mod common;

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use disco_bot::models::{Track, TrackId};
use disco_bot::{CommandRequest, MusicService, PlaybackStatus, SessionRegistry};

use common::{generous_limits, info, FakeResolver, RecordingTransport};

const WORKERS: usize = 8;
const TRACKS_PER_WORKER: usize = 25;

fn registry() -> Arc<SessionRegistry> {
    Arc::new(SessionRegistry::new(Arc::new(RecordingTransport::default()), "music"))
}

fn enqueued_everywhere(registry: &SessionRegistry, guild: u64) -> Vec<TrackId> {
    registry.with_session(guild, |session| {
        session
            .current()
            .into_iter()
            .chain(session.queue().iter())
            .map(|track| track.id)
            .collect()
    })
}

#[test]
fn concurrent_enqueues_keep_every_track_once() {
    let registry = registry();
    registry.with_session(1, |s| s.connect(10)).unwrap();
    let barrier = Arc::new(Barrier::new(WORKERS));

    let submitted: Vec<TrackId> = (0..WORKERS)
        .map(|worker| {
            let registry = registry.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                (0..TRACKS_PER_WORKER)
                    .map(|n| {
                        let track = Track::new(info(&format!("w{worker}-t{n}")), worker as u64);
                        let id = track.id;
                        registry.with_session(1, |s| s.enqueue(track)).unwrap();
                        id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flat_map(|worker| worker.join().unwrap())
        .collect();

    let present = enqueued_everywhere(&registry, 1);
    let unique: HashSet<TrackId> = present.iter().copied().collect();

    assert_eq!(present.len(), WORKERS * TRACKS_PER_WORKER);
    assert_eq!(unique.len(), present.len());
    assert_eq!(unique, submitted.into_iter().collect::<HashSet<_>>());

    let status = registry.with_session(1, |s| s.status());
    assert_eq!(status, PlaybackStatus::Playing);
}

#[test]
fn per_worker_order_survives_interleaving() {
    let registry = registry();
    registry.with_session(2, |s| s.connect(20)).unwrap();

    let workers: Vec<_> = (0..4u64)
        .map(|worker| {
            let registry = registry.clone();
            thread::spawn(move || {
                (0..10)
                    .map(|n| {
                        let track = Track::new(info(&format!("{n}")), worker);
                        let id = track.id;
                        registry.with_session(2, |s| s.enqueue(track)).unwrap();
                        id
                    })
                    .collect::<Vec<TrackId>>()
            })
        })
        .collect();

    let expected: Vec<Vec<TrackId>> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    let present = enqueued_everywhere(&registry, 2);

    for ids in expected {
        let positions: Vec<usize> = ids
            .iter()
            .map(|id| present.iter().position(|p| p == id).expect("track present"))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

#[test]
fn guilds_progress_independently() {
    let registry = registry();

    let workers: Vec<_> = (1..=6u64)
        .map(|guild| {
            let registry = registry.clone();
            thread::spawn(move || {
                registry.with_session(guild, |s| s.connect(guild)).unwrap();
                for n in 0..20 {
                    let track = Track::new(info(&format!("g{guild}-{n}")), guild);
                    registry.with_session(guild, |s| s.enqueue(track)).unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(registry.len(), 6);
    for guild in 1..=6 {
        assert_eq!(enqueued_everywhere(&registry, guild).len(), 20);
    }
}

#[test]
fn racing_leave_and_commands_never_resurrect_an_evicted_session() {
    let transport = Arc::new(RecordingTransport::default());
    let registry = Arc::new(SessionRegistry::new(transport, "music"));
    let service = Arc::new(MusicService::new(registry.clone(), Arc::new(FakeResolver), generous_limits()));
    let guild = 3;

    for round in 0..50u64 {
        service.join(&CommandRequest::regular(guild, 1), 30).unwrap();

        let leaver = {
            let service = service.clone();
            thread::spawn(move || service.leave(&CommandRequest::regular(guild, 1)))
        };
        let clearer = {
            let service = service.clone();
            thread::spawn(move || service.clear(&CommandRequest::regular(guild, 2 + round)))
        };

        leaver.join().unwrap().unwrap();
        clearer.join().unwrap().unwrap();

        // whatever survives in the map is a live session
        if let Some(handle) = registry.get(guild) {
            assert!(!handle.lock().is_retired());
        }
        registry.evict(guild);
    }
}
