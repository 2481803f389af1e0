mod common;

use std::sync::Arc;

use disco_bot::config::RateLimitPolicy;
use disco_bot::session::{EnqueueOutcome, SkipOutcome};
use disco_bot::transport::PlaybackEvent;
use disco_bot::{CommandRequest, MusicService, PlaybackStatus, PlayerError, SessionRegistry};

use common::{generous_limits, Call, FakeResolver, RecordingTransport};

const GUILD: u64 = 100;
const VOICE: u64 = 7;

fn service_with(limits: RateLimitPolicy) -> (MusicService, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let registry = Arc::new(SessionRegistry::new(transport.clone(), "music"));

    (MusicService::new(registry, Arc::new(FakeResolver), limits), transport)
}

fn service() -> (MusicService, Arc<RecordingTransport>) {
    service_with(generous_limits())
}

fn user(id: u64) -> CommandRequest {
    CommandRequest::regular(GUILD, id).in_channel("🎵-music")
}

#[tokio::test]
async fn play_joins_and_starts_first_track() {
    let (service, transport) = service();

    let report = service.play(&user(1), VOICE, "intro").await.unwrap();

    assert_eq!(report.first_title, "intro");
    assert!(matches!(report.outcomes.as_slice(), [EnqueueOutcome::Started(track)] if track.title == "intro"));
    assert_eq!(
        transport.calls(),
        vec![Call::Connect(GUILD, VOICE), Call::Play(GUILD, "intro".to_string())]
    );

    let snapshot = service.queue(&user(1)).unwrap();
    assert_eq!(snapshot.status, PlaybackStatus::Playing);
    assert_eq!(snapshot.voice_channel, Some(VOICE));
}

#[tokio::test]
async fn playlist_tracks_are_queued_in_order() {
    let (service, _) = service();

    let report = service.play(&user(1), VOICE, "list:a,b,c").await.unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert!(matches!(report.outcomes[1], EnqueueOutcome::Queued { position: 1 }));
    assert!(matches!(report.outcomes[2], EnqueueOutcome::Queued { position: 2 }));

    let snapshot = service.queue(&user(1)).unwrap();
    assert_eq!(snapshot.current.map(|t| t.title), Some("a".to_string()));
    let titles: Vec<String> = snapshot.queue.into_iter().map(|(_, t)| t.title).collect();
    assert_eq!(titles, vec!["b", "c"]);
}

#[tokio::test]
async fn play_from_another_voice_channel_is_rejected() {
    let (service, _) = service();
    service.play(&user(1), VOICE, "intro").await.unwrap();

    let result = service.play(&user(2), VOICE + 1, "other").await;

    assert_eq!(result.unwrap_err(), PlayerError::AlreadyConnected { channel: VOICE });
    assert_eq!(service.queue(&user(1)).unwrap().queue.len(), 0);
}

#[tokio::test]
async fn resolver_failures_reach_the_caller() {
    let (service, transport) = service();

    assert_eq!(
        service.play(&user(1), VOICE, "nothing").await.unwrap_err(),
        PlayerError::NotFound("nothing".to_string())
    );
    assert!(matches!(
        service.play(&user(1), VOICE, "broken").await,
        Err(PlayerError::Extraction(_))
    ));
    assert!(transport.calls().is_empty());
}

#[test]
fn regular_commands_outside_music_channel_are_refused() {
    let (service, _) = service();
    let request = CommandRequest::regular(GUILD, 1).in_channel("general");

    assert_eq!(
        service.join(&request, VOICE).unwrap_err(),
        PlayerError::WrongChannel {
            allowed: "music".to_string()
        }
    );
}

#[test]
fn set_channel_is_admin_only_and_moves_the_restriction() {
    let (service, _) = service();

    let outsider = CommandRequest::privileged(GUILD, 1, false).in_channel("general");
    assert_eq!(
        service.set_channel(&outsider, "party").unwrap_err(),
        PlayerError::PermissionDenied("change the music channel")
    );

    let admin = CommandRequest::privileged(GUILD, 2, true).in_channel("general");
    assert_eq!(service.set_channel(&admin, "  Party ").unwrap(), "party");

    assert!(service.join(&user(3), VOICE).is_err());
    let request = CommandRequest::regular(GUILD, 3).in_channel("party-room");
    assert!(service.join(&request, VOICE).is_ok());
}

#[test]
fn third_regular_command_in_window_is_rate_limited() {
    let (service, _) = service_with(RateLimitPolicy::default());

    service.join(&user(1), VOICE).unwrap();
    service.queue(&user(1)).unwrap();

    match service.queue(&user(1)) {
        Err(PlayerError::RateLimited { retry_after }) => assert!(!retry_after.is_zero()),
        other => panic!("expected rate limit, got {other:?}"),
    }

    // other members keep their own budget
    assert!(service.queue(&user(2)).is_ok());
}

#[test]
fn privileged_budget_is_separate_from_regular() {
    let (service, _) = service_with(RateLimitPolicy::default());

    service.join(&user(1), VOICE).unwrap();
    service.queue(&user(1)).unwrap();

    let admin = CommandRequest::privileged(GUILD, 1, true);
    assert!(service.set_channel(&admin, "music").is_ok());
    assert!(matches!(
        service.set_channel(&admin, "music"),
        Err(PlayerError::RateLimited { .. })
    ));
}

#[test]
fn leave_evicts_the_session() {
    let (service, transport) = service();
    service.join(&user(1), VOICE).unwrap();

    service.leave(&user(1)).unwrap();

    assert!(service.registry().is_empty());
    assert!(transport.calls().contains(&Call::Disconnect(GUILD)));

    assert_eq!(service.leave(&user(1)).unwrap_err(), PlayerError::NotConnected);
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn finished_events_advance_only_for_current_track() {
    let (service, transport) = service();
    let report = service.play(&user(1), VOICE, "list:a,b").await.unwrap();
    let first = match &report.outcomes[0] {
        EnqueueOutcome::Started(track) => track.clone(),
        other => panic!("expected a started track, got {other:?}"),
    };

    service.on_playback_event(PlaybackEvent::Finished {
        guild: GUILD,
        track: first.id,
    });
    assert_eq!(
        service.queue(&user(1)).unwrap().current.map(|t| t.title),
        Some("b".to_string())
    );

    // a late duplicate for the same track must not skip "b"
    service.on_playback_event(PlaybackEvent::Finished {
        guild: GUILD,
        track: first.id,
    });
    assert_eq!(
        service.queue(&user(1)).unwrap().current.map(|t| t.title),
        Some("b".to_string())
    );

    let plays = transport
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::Play(..)))
        .count();
    assert_eq!(plays, 2);
}

#[tokio::test]
async fn vote_skip_counts_distinct_listeners() {
    let (service, _) = service();
    service.play(&user(1), VOICE, "list:a,b").await.unwrap();

    let voter = |id| user(id).with_occupancy(4);

    assert!(matches!(service.skip(&voter(1)), Ok(SkipOutcome::Voted(tally)) if tally.votes == 1 && tally.required == 3));
    assert!(matches!(service.skip(&voter(1)), Ok(SkipOutcome::Voted(tally)) if tally.votes == 1));
    assert!(matches!(service.skip(&voter(2)), Ok(SkipOutcome::Voted(tally)) if tally.votes == 2));
    assert!(matches!(service.skip(&voter(3)), Ok(SkipOutcome::Skipped { next: Some(track) }) if track.title == "b"));
}

#[test]
fn volume_reports_and_validates() {
    let (service, transport) = service();
    service.join(&user(1), VOICE).unwrap();

    assert_eq!(service.volume(&user(1), None).unwrap(), 50);
    assert_eq!(service.volume(&user(1), Some(80)).unwrap(), 80);
    assert_eq!(service.volume(&user(1), Some(101)).unwrap_err(), PlayerError::InvalidVolume(101));
    assert_eq!(service.volume(&user(1), None).unwrap(), 80);
    assert!(transport.calls().contains(&Call::Volume(GUILD, 80)));
}

#[test]
fn bot_removed_from_voice_tears_the_session_down() {
    let (service, _) = service();
    service.join(&user(1), VOICE).unwrap();

    service.on_bot_left_voice(GUILD, Some(VOICE));
    service.on_bot_left_voice(GUILD, Some(VOICE));

    assert!(service.registry().is_empty());
}

#[test]
fn late_report_of_our_own_leave_spares_the_next_session() {
    let (service, transport) = service();
    service.join(&user(1), VOICE).unwrap();
    service.leave(&user(1)).unwrap();
    service.join(&user(1), VOICE).unwrap();

    // the gateway reports the first leave only now
    service.on_bot_left_voice(GUILD, Some(VOICE));

    let snapshot = service.queue(&user(1)).unwrap();
    assert_eq!(snapshot.voice_channel, Some(VOICE));
    assert_eq!(
        transport.calls(),
        vec![
            Call::Connect(GUILD, VOICE),
            Call::Disconnect(GUILD),
            Call::Connect(GUILD, VOICE),
        ]
    );

    // once the rejoin is confirmed, a further leave is a real removal
    service.on_bot_joined_voice(GUILD);
    service.on_bot_left_voice(GUILD, Some(VOICE));
    assert!(service.registry().is_empty());
}

#[test]
fn leave_report_for_another_channel_is_ignored() {
    let (service, _) = service();
    service.join(&user(1), VOICE).unwrap();

    service.on_bot_left_voice(GUILD, Some(VOICE + 1));

    assert_eq!(service.queue(&user(1)).unwrap().voice_channel, Some(VOICE));
}

#[tokio::test]
async fn failed_voice_join_evicts_the_session() {
    let (service, transport) = service();
    service.play(&user(1), VOICE, "intro").await.unwrap();

    service.on_playback_event(PlaybackEvent::ConnectFailed {
        guild: GUILD,
        channel: VOICE,
        reason: "timed out".to_string(),
    });

    assert!(service.registry().is_empty());
    assert!(transport.calls().contains(&Call::Disconnect(GUILD)));

    let snapshot = service.queue(&user(1)).unwrap();
    assert_eq!(snapshot.status, PlaybackStatus::Disconnected);
}

#[test]
fn failed_join_of_a_channel_we_already_left_is_ignored() {
    let (service, _) = service();
    service.join(&user(1), VOICE).unwrap();
    service.switch(&user(1), VOICE + 1).unwrap();

    service.on_playback_event(PlaybackEvent::ConnectFailed {
        guild: GUILD,
        channel: VOICE,
        reason: "timed out".to_string(),
    });

    assert_eq!(service.queue(&user(1)).unwrap().voice_channel, Some(VOICE + 1));
}
