mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use common::fake_media::{fake_media, fake_media_with_pcm};
use common::wait_for;
use futures_util::StreamExt;
use ogradio_core::graph::software::SoftwareFactory;
use ogradio_core::graph::{AudioContext, ContextFactory, GraphError};
use ogradio_core::media::MediaEvent;
use ogradio_core::session::{CoreSettings, SessionClient, SessionCore, SessionEvent};
use ogradio_core::visualizer::{Preset, VisualFrame};
use ogradio_proto::descriptor::PlaybackDescriptor;
use ogradio_proto::protocol::{Command, Notice, PlaybackPhase, Severity};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const RATE: u32 = 44100;
const HH1_SRC: &str = "/audio/stations/hip-hop/urban_beats.mp3";
const EL1_SRC: &str = "/audio/stations/electronic/future_bass.mp3";

fn hh1() -> PlaybackDescriptor {
    PlaybackDescriptor::station("hh1", "Urban Beats", HH1_SRC, Some("hip-hop"))
}

fn el1() -> PlaybackDescriptor {
    PlaybackDescriptor::station("el1", "Future Bass", EL1_SRC, Some("electronic"))
}

fn spawn() -> (SessionClient, JoinHandle<()>) {
    SessionCore::spawn(
        CoreSettings::default(),
        Arc::new(SoftwareFactory::new(RATE)),
    )
}

struct NoContext;

impl ContextFactory for NoContext {
    fn create(&self) -> Result<Box<dyn AudioContext>, GraphError> {
        Err(GraphError::Unavailable("no audio device".into()))
    }
}

async fn next_notice(rx: &mut broadcast::Receiver<Notice>, title: &str) -> Notice {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let notice = rx.recv().await.expect("notice channel open");
            if notice.title == title {
                return notice;
            }
        }
    })
    .await
    .expect("timed out waiting for notice")
}

fn tone(freq: f32, n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.1 * (2.0 * std::f32::consts::PI * freq * i as f32 / RATE as f32).sin())
        .collect()
}

#[tokio::test]
async fn play_request_settles_through_the_loop() {
    let (client, task) = spawn();
    let mut rx = client.subscribe();
    let (media, probe) = fake_media();
    client.register_handle(Some(media)).await.unwrap();
    wait_for(&mut rx, |s| s.handle_attached).await;

    client.command(Command::Play { item: hh1() }).await.unwrap();
    wait_for(&mut rx, |s| s.phase == PlaybackPhase::Loading).await;
    assert!(probe.resolve(HH1_SRC, Ok(())));

    let snap = wait_for(&mut rx, |s| s.is_playing).await;
    assert_eq!(snap.current.id, "station_hh1");
    assert_eq!(snap.active_theme_genre.as_deref(), Some("hip-hop"));

    client.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(probe.state().paused);
}

#[tokio::test]
async fn out_of_order_resolutions_keep_the_newest_station() {
    let (client, task) = spawn();
    let mut rx = client.subscribe();
    let (media, probe) = fake_media();
    client.register_handle(Some(media)).await.unwrap();

    client.command(Command::Play { item: hh1() }).await.unwrap();
    client.command(Command::Play { item: el1() }).await.unwrap();
    wait_for(&mut rx, |s| {
        s.current.id == "station_el1" && s.phase == PlaybackPhase::Loading
    })
    .await;

    assert!(probe.resolve(EL1_SRC, Ok(())));
    assert!(probe.resolve(HH1_SRC, Ok(())));

    let snap = wait_for(&mut rx, |s| s.is_playing).await;
    assert_eq!(snap.current.id, "station_el1");
    assert_eq!(snap.active_theme_genre.as_deref(), Some("electronic"));

    client.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn queued_play_starts_when_a_handle_registers() {
    let (client, task) = spawn();
    let mut rx = client.subscribe();
    client.command(Command::Volume { value: 0.4 }).await.unwrap();
    client.command(Command::Play { item: hh1() }).await.unwrap();
    wait_for(&mut rx, |s| s.phase == PlaybackPhase::Loading).await;

    let (media, probe) = fake_media();
    client.register_handle(Some(media)).await.unwrap();
    wait_for(&mut rx, |s| s.handle_attached).await;
    assert_eq!(probe.state().source.as_deref(), Some(HH1_SRC));
    assert!((probe.state().volume - 0.4).abs() < f32::EPSILON);

    assert!(probe.resolve(HH1_SRC, Ok(())));
    wait_for(&mut rx, |s| s.is_playing).await;

    client.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn handle_events_are_forwarded() {
    let (client, task) = spawn();
    let mut rx = client.subscribe();
    let (media, probe) = fake_media();
    client.register_handle(Some(media)).await.unwrap();

    client.command(Command::Play { item: hh1() }).await.unwrap();
    wait_for(&mut rx, |s| s.phase == PlaybackPhase::Loading).await;
    probe.resolve(HH1_SRC, Ok(()));
    wait_for(&mut rx, |s| s.is_playing).await;

    probe.emit(MediaEvent::TimeUpdate {
        position_secs: 3.0,
        duration_secs: None,
    });
    wait_for(&mut rx, |s| s.timeline.position_secs == 3.0).await;

    probe.emit(MediaEvent::Ended);
    let snap = wait_for(&mut rx, |s| s.phase == PlaybackPhase::Idle).await;
    assert_eq!(
        snap.last_non_trivial.as_ref().map(|d| d.id.as_str()),
        Some("station_hh1")
    );

    client.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn failed_play_notifies_and_goes_idle() {
    let (client, task) = spawn();
    let mut rx = client.subscribe();
    let mut notices = client.notices();
    let (media, probe) = fake_media();
    client.register_handle(Some(media)).await.unwrap();

    client.command(Command::Play { item: hh1() }).await.unwrap();
    wait_for(&mut rx, |s| s.phase == PlaybackPhase::Loading).await;
    probe.resolve(
        HH1_SRC,
        Err(ogradio_core::media::PlaybackError::Decode("bad header".into())),
    );

    let notice = next_notice(&mut notices, "Playback Error").await;
    assert_eq!(notice.detail, "Could not play this track.");
    wait_for(&mut rx, |s| s.phase == PlaybackPhase::Idle).await;

    client.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn alarm_resumes_last_item() {
    let (client, task) = spawn();
    let mut rx = client.subscribe();
    let mut notices = client.notices();
    let (media, probe) = fake_media();
    client.register_handle(Some(media)).await.unwrap();

    client.command(Command::Play { item: el1() }).await.unwrap();
    wait_for(&mut rx, |s| s.phase == PlaybackPhase::Loading).await;
    probe.resolve(EL1_SRC, Ok(()));
    wait_for(&mut rx, |s| s.is_playing).await;
    client.command(Command::Stop).await.unwrap();
    wait_for(&mut rx, |s| s.phase == PlaybackPhase::Idle).await;

    client
        .command(Command::SetAlarm {
            time: "07:30".into(),
        })
        .await
        .unwrap();
    wait_for(&mut rx, |s| s.alarm.as_deref() == Some("07:30")).await;

    let fire_at = NaiveDate::from_ymd_opt(2030, 1, 2)
        .unwrap()
        .and_hms_opt(7, 30, 5)
        .unwrap();
    client.send(SessionEvent::AlarmTick(fire_at)).await.unwrap();

    let notice = next_notice(&mut notices, "Alarm Triggered!").await;
    assert_eq!(notice.detail, "Resuming \"Future Bass\"");
    let snap = wait_for(&mut rx, |s| s.current.id == "station_el1").await;
    assert_eq!(snap.alarm, None);

    client.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn alarm_is_refused_without_history() {
    let (client, task) = spawn();
    let mut notices = client.notices();

    client
        .command(Command::SetAlarm {
            time: "06:15".into(),
        })
        .await
        .unwrap();
    let notice = next_notice(&mut notices, "Choose Your WakeupMusic!").await;
    assert_eq!(notice.severity, Severity::Warning);
    assert_eq!(client.snapshot().alarm, None);

    let fire_at = NaiveDate::from_ymd_opt(2030, 1, 2)
        .unwrap()
        .and_hms_opt(6, 15, 0)
        .unwrap();
    client.send(SessionEvent::AlarmTick(fire_at)).await.unwrap();
    client.command(Command::Volume { value: 0.5 }).await.unwrap();
    let mut rx = client.subscribe();
    let snap = wait_for(&mut rx, |s| s.volume == 0.5).await;
    assert_eq!(snap.current.id, "empty_state");
    assert_eq!(snap.alarm, None);

    client.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn alarm_can_be_rearmed_right_after_firing() {
    let (client, task) = spawn();
    let mut rx = client.subscribe();
    client.command(Command::Play { item: hh1() }).await.unwrap();
    wait_for(&mut rx, |s| s.current.id == "station_hh1").await;

    client
        .command(Command::SetAlarm {
            time: "07:30".into(),
        })
        .await
        .unwrap();
    wait_for(&mut rx, |s| s.alarm.is_some()).await;
    let fire_at = NaiveDate::from_ymd_opt(2030, 1, 2)
        .unwrap()
        .and_hms_opt(7, 30, 0)
        .unwrap();
    client.send(SessionEvent::AlarmTick(fire_at)).await.unwrap();
    wait_for(&mut rx, |s| s.alarm.is_none()).await;

    client
        .command(Command::SetAlarm {
            time: "07:45".into(),
        })
        .await
        .unwrap();
    wait_for(&mut rx, |s| s.alarm.as_deref() == Some("07:45")).await;

    client.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn invalid_alarm_time_is_reported() {
    let (client, task) = spawn();
    let mut notices = client.notices();
    let mut rx = client.subscribe();
    client.command(Command::Play { item: hh1() }).await.unwrap();
    wait_for(&mut rx, |s| s.current.id == "station_hh1").await;

    client
        .command(Command::SetAlarm {
            time: "half past".into(),
        })
        .await
        .unwrap();
    next_notice(&mut notices, "Alarm Not Set").await;
    assert_eq!(client.snapshot().alarm, None);

    client.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn visualizer_follows_playback() {
    let (client, task) = spawn();
    let mut rx = client.subscribe();
    let (media, probe) = fake_media_with_pcm(RATE);
    client.register_handle(Some(media)).await.unwrap();
    wait_for(&mut rx, |s| s.handle_attached).await;
    assert!(client.graph().is_some());

    let mut viz = client.visualizer(16);
    assert_eq!(viz.frame(), Some(VisualFrame::Clear));
    assert_eq!(viz.frame(), None);

    client.command(Command::Play { item: el1() }).await.unwrap();
    wait_for(&mut rx, |s| s.phase == PlaybackPhase::Loading).await;
    probe.resolve(EL1_SRC, Ok(()));
    wait_for(&mut rx, |s| s.is_playing).await;

    probe.feed().unwrap().push(tone(1000.0, 2048));
    match viz.frame() {
        Some(VisualFrame::Spectrum { preset, bands }) => {
            assert_eq!(preset, Preset::Electronic);
            assert_eq!(bands.len(), 16);
            assert!(bands.iter().any(|&b| b > 0.0));
        }
        other => panic!("expected spectrum, got {other:?}"),
    }

    client.command(Command::PauseAll).await.unwrap();
    wait_for(&mut rx, |s| s.phase == PlaybackPhase::Paused).await;
    assert_eq!(viz.frame(), Some(VisualFrame::Clear));
    assert_eq!(viz.frame(), None);

    client.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn detaching_a_handle_releases_its_graph() {
    let (client, task) = spawn();
    let mut rx = client.subscribe();
    let (media, _probe) = fake_media_with_pcm(RATE);
    client.register_handle(Some(media)).await.unwrap();
    wait_for(&mut rx, |s| s.handle_attached).await;
    let graph = client.graph().unwrap();
    assert!(!graph.filter_chain().is_empty());

    client.register_handle(None).await.unwrap();
    wait_for(&mut rx, |s| !s.handle_attached).await;
    assert!(client.graph().is_none());
    assert_eq!(Arc::strong_count(&graph), 1);
    assert!(graph.filter_chain().is_empty());

    let (next, _next_probe) = fake_media_with_pcm(RATE);
    let next_id = next.id();
    client.register_handle(Some(next)).await.unwrap();
    wait_for(&mut rx, |s| s.handle_attached).await;
    assert_eq!(client.graph().unwrap().handle(), next_id);

    client.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn frame_stream_starts_with_clear() {
    let (client, task) = spawn();
    let mut frames = Box::pin(client.visualizer(8).into_stream(60));
    assert_eq!(frames.next().await, Some(VisualFrame::Clear));

    client.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn missing_audio_context_only_degrades_visuals() {
    let (client, task) = SessionCore::spawn(CoreSettings::default(), Arc::new(NoContext));
    let mut rx = client.subscribe();
    let (media, probe) = fake_media_with_pcm(RATE);
    client.register_handle(Some(media)).await.unwrap();
    wait_for(&mut rx, |s| s.handle_attached).await;
    assert!(client.graph().is_none());

    client.command(Command::Play { item: hh1() }).await.unwrap();
    wait_for(&mut rx, |s| s.phase == PlaybackPhase::Loading).await;
    probe.resolve(HH1_SRC, Ok(()));
    wait_for(&mut rx, |s| s.is_playing).await;

    let mut viz = client.visualizer(8);
    assert_eq!(
        viz.frame(),
        Some(VisualFrame::Static {
            preset: Preset::Default
        })
    );

    client.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn equalizer_gains_are_clamped() {
    let (client, task) = spawn();
    let (media, _probe) = fake_media_with_pcm(RATE);
    client.register_handle(Some(media)).await.unwrap();
    client
        .command(Command::EqGain {
            band: 5,
            gain_db: 20.0,
        })
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while client.equalizer_gains()[5] != 15.0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("gain applied");

    client.command(Command::EqReset).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while client.equalizer_gains()[5] != 0.0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("gains reset");
    assert_eq!(client.graph().unwrap().filter_chain().len(), 10);

    client.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn welcome_only_plays_once_per_session() {
    let (client, task) = spawn();
    let mut rx = client.subscribe();
    let mut notices = client.notices();
    let (media, probe) = fake_media();
    client.register_handle(Some(media)).await.unwrap();

    client.command(Command::PlayWelcome).await.unwrap();
    let snap = wait_for(&mut rx, |s| s.welcome_played).await;
    assert_eq!(snap.current.title, "Welcome to OG Radio");

    client.command(Command::PlayWelcome).await.unwrap();
    next_notice(&mut notices, "Welcome already played").await;
    assert_eq!(probe.state().plays, 1);

    client.shutdown().await.unwrap();
    task.await.unwrap();
}
