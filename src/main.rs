use std::sync::Arc;

use serenity::{
    async_trait,
    client::{Client, EventHandler},
    framework::{
        standard::{
            Args, CommandResult,
            macros::{command, group},
        },
        StandardFramework,
    },
    model::{channel::Message, gateway::Ready},
    prelude::GatewayIntents,
    Result as SerenityResult,
};
use serenity::cache::Cache;
use serenity::client::Context;
use serenity::framework::standard::CommandError;
use serenity::http::Http;
use serenity::model::channel::{Channel, ChannelType};
use serenity::model::channel::ReactionType::Unicode;
use serenity::model::guild::Guild;
use serenity::model::id::{ChannelId, GuildId};
use serenity::model::prelude::VoiceState;
use songbird::{SerenityInit, Songbird};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{info, info_span, warn};
use tracing_futures::Instrument;

use disco_bot::config::{Config, IdlePolicy};
use disco_bot::gateway::{listeners, user_voice_channel, CacheOccupancy};
use disco_bot::helpers::{channel_matches, format_queue, sanitize_title};
use disco_bot::rate_limit::CommandClass;
use disco_bot::service::PlayReport;
use disco_bot::session::{EnqueueOutcome, SkipOutcome};
use disco_bot::voice::{SongbirdTransport, YtDlpResolver};
use disco_bot::{CommandRequest, IdleDisconnect, IdleReason, IdleSupervisor, MusicService, PlayerError, SessionRegistry};

struct Handler;

pub struct MusicServiceKey;

impl serenity::prelude::TypeMapKey for MusicServiceKey {
    type Value = Arc<MusicService>;
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let guild_id = match new.guild_id {
            Some(guild_id) => guild_id,
            None => return,
        };

        let service = match music_service(&ctx).await {
            Ok(service) => service,
            Err(why) => {
                info!("{why}");
                return;
            }
        };

        let bot_id = ctx.cache.current_user_id();

        if new.user_id == bot_id {
            match new.channel_id {
                None => {
                    let left = old.and_then(|state| state.channel_id).map(|channel| channel.0);
                    info!("Bot left voice in guild {}", guild_id.0);
                    service.on_bot_left_voice(guild_id.0, left);
                    return;
                }
                Some(_) => service.on_bot_joined_voice(guild_id.0),
            }
        }

        if let Some(occupancy) = ctx.cache.guild(guild_id).and_then(|guild| listeners(&guild, bot_id)) {
            service.observe_occupancy(guild_id.0, occupancy);
        }
    }
}

#[group]
#[commands(join, switch, leave, play, pause, resume, stop, skip, queue, clear, remove, volume, setchannel, help)]
struct General;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env().expect("Invalid configuration");

    let prefix = config.prefix.clone();
    let framework = StandardFramework::new()
        .configure(|c| {
            c.prefix(prefix)
        })
        .group(&GENERAL_GROUP);

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::MESSAGE_CONTENT;

    let songbird = Songbird::serenity();
    let (playback_events, mut playback_events_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(SongbirdTransport::new(songbird.clone(), playback_events));
    let registry = Arc::new(SessionRegistry::new(transport, &config.allowed_channel));
    let service = Arc::new(MusicService::new(
        registry.clone(),
        Arc::new(YtDlpResolver),
        config.rate_limits,
    ));

    let mut client = Client::builder(&config.token, intents)
        .event_handler(Handler)
        .framework(framework)
        .register_songbird_with(songbird)
        .await
        .expect("Err creating client");

    {
        let mut w = client.data.write().await;
        w.insert::<MusicServiceKey>(service.clone());
    }

    let events_service = service.clone();
    tokio::spawn(
        async move {
            while let Some(event) = playback_events_rx.recv().await {
                events_service.on_playback_event(event);
            }
        }
        .instrument(info_span!("playback_events")),
    );

    let cache = client.cache_and_http.cache.clone();
    let http = client.cache_and_http.http.clone();

    let (idle_notices, idle_notices_rx) = mpsc::unbounded_channel();
    let supervisor = IdleSupervisor::new(
        registry.clone(),
        Arc::new(CacheOccupancy::new(cache.clone())),
        config.idle,
    );
    supervisor.spawn(idle_notices);
    tokio::spawn(announce_idle_disconnects(idle_notices_rx, cache, http, config.idle));

    let purge_service = service.clone();
    let purge_every = config.idle.sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        loop {
            interval.tick().await;
            purge_service.purge_rate_limits();
        }
    });

    tokio::spawn(async move {
        let _ = client.start().await.map_err(|why| info!("Client ended: {why:?}"));
    });

    tokio::signal::ctrl_c().await.expect("Control-C interruption failed!");

    info!("Received Ctrl-C, shutting down.");
    registry.clear();
}

/// Posts a notice for every idle teardown into the guild's music channel.
async fn announce_idle_disconnects(
    mut notices: UnboundedReceiver<IdleDisconnect>,
    cache: Arc<Cache>,
    http: Arc<Http>,
    policy: IdlePolicy,
) {
    while let Some(notice) = notices.recv().await {
        let channel = cache
            .guild(GuildId(notice.guild))
            .and_then(|guild| find_text_channel(&guild, &notice.allowed_channel_name));

        let channel = match channel {
            Some(channel) => channel,
            None => {
                info!("No #{} channel in guild {} for idle notice", notice.allowed_channel_name, notice.guild);
                continue;
            }
        };

        let text = match notice.reason {
            IdleReason::Alone => "👋 Left the voice channel because everyone else left.".to_string(),
            IdleReason::Inactive => format!(
                "🔇 Disconnected due to inactivity ({} minutes without commands).",
                policy.inactivity_timeout.as_secs() / 60
            ),
        };

        check_msg(channel.say(&http, text).await);
    }
}

fn find_text_channel(guild: &Guild, allowed: &str) -> Option<ChannelId> {
    guild.channels.values().find_map(|channel| match channel {
        Channel::Guild(channel) if channel.kind == ChannelType::Text && channel_matches(&channel.name, allowed) => {
            Some(channel.id)
        }
        _ => None,
    })
}

#[command]
#[only_in(guilds)]
#[aliases("connect")]
async fn join(ctx: &Context, msg: &Message) -> CommandResult {
    let invocation = invocation(ctx, msg, CommandClass::Regular).await?;

    let connect_to = match invocation.voice_channel {
        Some(channel) => channel,
        None => {
            check_msg(msg.reply(ctx, "Not in a voice channel").await);

            return Ok(());
        }
    };

    match invocation.service.join(&invocation.request, connect_to.0) {
        Ok(()) => say(ctx, msg, format!("Joined <#{}>", connect_to.0)).await,
        Err(why) => report_error(ctx, msg, why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases("move")]
async fn switch(ctx: &Context, msg: &Message) -> CommandResult {
    let invocation = invocation(ctx, msg, CommandClass::Regular).await?;

    let connect_to = match invocation.voice_channel {
        Some(channel) => channel,
        None => {
            check_msg(msg.reply(ctx, "Not in a voice channel").await);

            return Ok(());
        }
    };

    match invocation.service.switch(&invocation.request, connect_to.0) {
        Ok(()) => say(ctx, msg, format!("Moved to <#{}>", connect_to.0)).await,
        Err(why) => report_error(ctx, msg, why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases("disconnect")]
async fn leave(ctx: &Context, msg: &Message) -> CommandResult {
    let invocation = invocation(ctx, msg, CommandClass::Regular).await?;

    match invocation.service.leave(&invocation.request) {
        Ok(()) => say(ctx, msg, "Left voice channel").await,
        Err(why) => report_error(ctx, msg, why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases("p")]
async fn play(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let user_input = args.message().trim();

    if user_input.is_empty() {
        say(ctx, msg, "Usage: play [URL|Title]").await;
        return Ok(());
    }

    info!("User input is {user_input}");

    let invocation = invocation(ctx, msg, CommandClass::Regular).await?;

    let connect_to = match invocation.voice_channel {
        Some(channel) => channel,
        None => {
            check_msg(msg.reply(ctx, "You need to be in a voice channel!").await);

            return Ok(());
        }
    };

    let loading_emoji = Unicode("⏳".to_string());
    react(ctx, msg, loading_emoji.clone()).await;

    let play_result = invocation
        .service
        .play(&invocation.request, connect_to.0, user_input)
        .await;

    if let Err(why) = msg
        .channel_id
        .delete_reaction(&ctx.http, msg.id, Some(ctx.cache.current_user_id()), loading_emoji)
        .await
    {
        info!("Removing loading reaction failed: {why:?}");
    }

    let answer_emoji = match play_result {
        Ok(_) => "👍",
        Err(_) => "💀",
    };
    react(ctx, msg, Unicode(answer_emoji.to_string())).await;

    match play_result {
        Ok(report) => say(ctx, msg, describe_play(&report)).await,
        Err(why) => report_error(ctx, msg, why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn pause(ctx: &Context, msg: &Message) -> CommandResult {
    let invocation = invocation(ctx, msg, CommandClass::Regular).await?;

    match invocation.service.pause(&invocation.request) {
        Ok(()) => say(ctx, msg, "⏸️ Paused").await,
        Err(why) => report_error(ctx, msg, why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases("unpause")]
async fn resume(ctx: &Context, msg: &Message) -> CommandResult {
    let invocation = invocation(ctx, msg, CommandClass::Regular).await?;

    match invocation.service.resume(&invocation.request) {
        Ok(()) => say(ctx, msg, "▶️ Resumed").await,
        Err(why) => report_error(ctx, msg, why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn stop(ctx: &Context, msg: &Message) -> CommandResult {
    let invocation = invocation(ctx, msg, CommandClass::Regular).await?;

    match invocation.service.stop(&invocation.request) {
        Ok(()) => say(ctx, msg, "⏹️ Stopped and cleared the queue").await,
        Err(why) => report_error(ctx, msg, why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases("next")]
async fn skip(ctx: &Context, msg: &Message) -> CommandResult {
    let invocation = invocation(ctx, msg, CommandClass::Regular).await?;

    match invocation.service.skip(&invocation.request) {
        Ok(SkipOutcome::Skipped { next: Some(track) }) => {
            say(ctx, msg, format!("⏭️ Skipped. Now playing: **{}**", sanitize_title(&track.title))).await
        }
        Ok(SkipOutcome::Skipped { next: None }) => say(ctx, msg, "⏭️ Skipped. The queue is empty!").await,
        Ok(SkipOutcome::Voted(tally)) => {
            say(ctx, msg, format!("🗳️ Skip vote registered ({}/{} votes)", tally.votes, tally.required)).await
        }
        Err(why) => report_error(ctx, msg, why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases("q")]
async fn queue(ctx: &Context, msg: &Message) -> CommandResult {
    let invocation = invocation(ctx, msg, CommandClass::Regular).await?;

    match invocation.service.queue(&invocation.request) {
        Ok(snapshot) => say(ctx, msg, format_queue(&snapshot)).await,
        Err(why) => report_error(ctx, msg, why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn clear(ctx: &Context, msg: &Message) -> CommandResult {
    let invocation = invocation(ctx, msg, CommandClass::Regular).await?;

    match invocation.service.clear(&invocation.request) {
        Ok(dropped) => say(ctx, msg, format!("🗑️ Removed {dropped} track(s) from the queue")).await,
        Err(why) => report_error(ctx, msg, why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn remove(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let position = match args.single::<usize>() {
        Ok(position) => position,
        Err(_) => {
            check_msg(msg.channel_id.say(&ctx.http, "Invalid track position. Check the queue to list the tracks.").await);

            return Ok(());
        }
    };

    let invocation = invocation(ctx, msg, CommandClass::Regular).await?;

    match invocation.service.remove(&invocation.request, position) {
        Ok(track) => say(ctx, msg, format!("Removed **{}** from the queue", sanitize_title(&track.title))).await,
        Err(why) => report_error(ctx, msg, why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases("vol")]
async fn volume(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let requested = if args.is_empty() {
        None
    } else {
        match args.single::<i64>() {
            Ok(percent) => Some(percent),
            Err(_) => {
                say(ctx, msg, "Usage: volume [0-100]").await;
                return Ok(());
            }
        }
    };

    let invocation = invocation(ctx, msg, CommandClass::Regular).await?;

    match (requested, invocation.service.volume(&invocation.request, requested)) {
        (Some(_), Ok(volume)) => say(ctx, msg, format!("🔊 Volume set to {volume}%")).await,
        (None, Ok(volume)) => say(ctx, msg, format!("🔊 Current volume: {volume}%")).await,
        (_, Err(why)) => report_error(ctx, msg, why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn setchannel(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let name = match args.single::<String>() {
        Ok(name) => name,
        Err(_) => {
            say(ctx, msg, "Usage: setchannel [name]").await;
            return Ok(());
        }
    };

    let invocation = invocation(ctx, msg, CommandClass::Privileged).await?;

    match invocation.service.set_channel(&invocation.request, &name) {
        Ok(allowed) => say(ctx, msg, format!("Music commands are now limited to #{allowed}")).await,
        Err(why) => report_error(ctx, msg, why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn help(ctx: &Context, msg: &Message) -> CommandResult {
    let message = r#"
**Commands:**
    **join** - Joins your voice channel.
    **switch** - Moves the bot to your voice channel.
    **leave** - Leaves the voice channel and forgets the queue.
    **play [URL|Title]** - Plays (or adds to the queue) new tracks given a URL or a video title (supports youtube playlists).
    **pause** - Pauses the current track.
    **resume** - Resumes the currently paused track.
    **stop** - Stops the current track and clears the queue.
    **skip** - Votes to skip the current track (admins and lone listeners skip right away).
    **queue** - Shows the queue of tracks.
    **remove [POSITION]** - Removes a track from the queue.
    **clear** - Empties the queue, keeping the current track.
    **volume [0-100]** - Shows or sets the volume.
    **setchannel [NAME]** - Limits music commands to one text channel (admins only).
    "#;

    check_msg(msg.channel_id.say(&ctx.http, message).await);

    Ok(())
}

/// A command's service handle, request and the author's voice channel.
struct Invocation {
    service: Arc<MusicService>,
    request: CommandRequest,
    voice_channel: Option<ChannelId>,
}

async fn invocation(ctx: &Context, msg: &Message, class: CommandClass) -> CommandResult<Invocation> {
    let service = music_service(ctx).await?;
    let guild = get_guild(ctx, msg)?;
    let bot_id = ctx.cache.current_user_id();

    let is_admin = match msg.member(ctx).await {
        Ok(member) => guild
            .member_permissions(ctx, member.user.id)
            .await
            .map_or(false, |permissions| permissions.administrator()),
        Err(why) => {
            info!("Could not load member {}: {why:?}", msg.author.id.0);
            false
        }
    };

    let request = CommandRequest {
        guild: guild.id.0,
        subject: msg.author.id.0,
        class,
        is_admin,
        occupancy: listeners(&guild, bot_id).unwrap_or(0),
        text_channel: text_channel_name(&guild, msg.channel_id),
    };

    Ok(Invocation {
        service,
        request,
        voice_channel: user_voice_channel(&guild, msg.author.id),
    })
}

async fn music_service(ctx: &Context) -> CommandResult<Arc<MusicService>> {
    let data = ctx.data.read().await;

    data.get::<MusicServiceKey>()
        .cloned()
        .ok_or(CommandError::from("Music service not initialised"))
}

fn text_channel_name(guild: &Guild, channel_id: ChannelId) -> Option<String> {
    match guild.channels.get(&channel_id) {
        Some(Channel::Guild(channel)) => Some(channel.name.clone()),
        _ => None,
    }
}

fn describe_play(report: &PlayReport) -> String {
    let title = sanitize_title(&report.first_title);

    match report.outcomes.as_slice() {
        [EnqueueOutcome::Started(track)] => format!("🎵 Now playing: **{}**", sanitize_title(&track.title)),
        [EnqueueOutcome::Queued { position }] => format!("Added to queue: **{title}** (position {position})"),
        outcomes => format!("Added {} tracks to the queue, starting with **{title}**", outcomes.len()),
    }
}

async fn say(ctx: &Context, msg: &Message, text: impl std::fmt::Display) {
    check_msg(msg.channel_id.say(&ctx.http, text).await);
}

async fn report_error(ctx: &Context, msg: &Message, why: PlayerError) {
    if matches!(why, PlayerError::Transport(_)) {
        warn!("Command failed in {}: {why}", msg.channel_id.0);
    }

    say(ctx, msg, format!("❌ {why}")).await;
}

async fn react(ctx: &Context, msg: &Message, emoji: serenity::model::channel::ReactionType) {
    if let Err(why) = msg.react(&ctx.http, emoji).await {
        info!("Error adding reaction: {why:?}");
    }
}

/// Checks that a message successfully sent; if not, then logs why to stdout.
fn check_msg(result: SerenityResult<Message>) {
    if let Err(why) = result {
        info!("Error sending message: {why:?}");
    }
}

fn get_guild(ctx: &Context, msg: &Message) -> CommandResult<Guild> {
    msg.guild(&ctx.cache).ok_or(CommandError::from("Guild not found"))
}
