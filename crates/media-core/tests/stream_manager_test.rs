//! Stream manager scenarios
//!
//! Runs the manager against in-memory sources and a recording transport.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use callcore_infra_common::DispatchQueue;
use parking_lot::Mutex;
use serial_test::serial;

use callcore_media_core::prelude::*;
use callcore_media_core::{AudioFrames, MediaSourceFactory, StreamKey};
use common::{wait_for, MemoryFactory, MockTransport};

fn updates() -> Arc<DispatchQueue> {
    Arc::new(DispatchQueue::new("stream-manager-test").unwrap())
}

fn manager_with(factory: Arc<MemoryFactory>, config: StreamManagerConfig) -> StreamManager {
    let factory: Arc<dyn MediaSourceFactory> = factory;
    StreamManager::with_factory(updates(), config, factory)
}

fn file_microphone() -> AudioDescription {
    AudioDescription::new(MediaSource::File, "mic.pcm", 48000, 2)
}

fn device_camera() -> VideoDescription {
    VideoDescription::new(MediaSource::Device, "cam0", 16, 16, 50)
}

fn external_screen() -> VideoDescription {
    VideoDescription::new(MediaSource::External, "", 32, 32, 30)
}

fn count_upgrades(manager: &StreamManager) -> Arc<Mutex<Vec<MediaState>>> {
    let upgrades = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&upgrades);
    manager.on_upgrade(Arc::new(move |state: MediaState| sink.lock().push(state)));
    upgrades
}

#[test]
#[serial]
fn test_capture_status_transitions() {
    common::init_logging();
    println!("🧪 Testing capture status Idling -> Active -> Paused -> Active -> Idling");
    let manager = manager_with(MemoryFactory::endless(), StreamManagerConfig::default());
    assert_eq!(manager.status(Mode::Capture), Status::Idling);

    let desc = MediaDescription::new().with_microphone(file_microphone());
    manager.set_stream_sources(Mode::Capture, &desc).unwrap();
    manager.start().unwrap();
    assert_eq!(manager.status(Mode::Capture), Status::Active);
    assert_eq!(manager.status(Mode::Playback), Status::Idling);

    assert!(manager.pause());
    assert_eq!(manager.status(Mode::Capture), Status::Paused);
    assert!(!manager.pause(), "second pause must report no change");

    assert!(manager.resume());
    assert_eq!(manager.status(Mode::Capture), Status::Active);

    manager.set_stream_sources(Mode::Capture, &MediaDescription::new()).unwrap();
    assert_eq!(manager.status(Mode::Capture), Status::Idling);
    assert_eq!(
        manager.media_status(),
        MediaStatus {
            playback: Status::Idling,
            capture: Status::Idling
        }
    );
    println!("✅ Capture status transitions verified");
}

#[test]
#[serial]
fn test_mute_twice_reports_change_once() {
    let manager = manager_with(MemoryFactory::endless(), StreamManagerConfig::default());
    assert!(!manager.mute(), "nothing to mute before configuration");

    let desc = MediaDescription::new()
        .with_microphone(file_microphone())
        .with_camera(device_camera());
    manager.set_stream_sources(Mode::Capture, &desc).unwrap();

    assert_eq!((manager.mute(), manager.mute()), (true, false));
    let state = manager.get_state();
    assert!(state.muted);
    assert!(state.video_paused);
    assert!(state.presentation_paused);
    assert!(!state.video_stopped);

    assert_eq!((manager.unmute(), manager.unmute()), (true, false));
    assert!(!manager.get_state().muted);
}

#[test]
#[serial]
fn test_upgrade_fires_once_per_state_change() {
    let manager = manager_with(MemoryFactory::endless(), StreamManagerConfig::default());
    let upgrades = count_upgrades(&manager);

    let desc = MediaDescription::new().with_microphone(file_microphone());
    manager.set_stream_sources(Mode::Capture, &desc).unwrap();
    // first capture configuration initializes silently
    manager.set_stream_sources(Mode::Capture, &desc).unwrap();

    assert!(manager.mute());
    assert!(!manager.mute());
    assert!(wait_for(Duration::from_secs(1), || upgrades.lock().len() == 1));
    std::thread::sleep(Duration::from_millis(50));

    let upgrades = upgrades.lock();
    assert_eq!(upgrades.len(), 1);
    assert!(upgrades[0].muted);
}

#[test]
#[serial]
fn test_adding_video_raises_upgrade() {
    let manager = manager_with(MemoryFactory::endless(), StreamManagerConfig::default());
    let upgrades = count_upgrades(&manager);

    let audio_only = MediaDescription::new().with_microphone(file_microphone());
    manager.set_stream_sources(Mode::Capture, &audio_only).unwrap();
    assert!(manager.get_state().video_stopped);

    let with_screen = audio_only.clone().with_screen(external_screen());
    manager.set_stream_sources(Mode::Capture, &with_screen).unwrap();
    assert!(wait_for(Duration::from_secs(1), || upgrades.lock().len() == 1));
    assert!(!upgrades.lock()[0].video_stopped);
}

#[test]
#[serial]
fn test_simulcast_disabled_rejects_camera_and_screen() {
    let manager = manager_with(
        MemoryFactory::endless(),
        StreamManagerConfig::default().with_video_simulcast(false),
    );
    let camera_only = MediaDescription::new().with_camera(device_camera());
    manager.set_stream_sources(Mode::Capture, &camera_only).unwrap();
    let before = manager.get_state();

    let both = camera_only.clone().with_screen(external_screen());
    let result = manager.set_stream_sources(Mode::Capture, &both);
    assert!(matches!(result, Err(MediaError::InvalidParams(ref msg)) if msg.contains("Cannot mix")));

    assert_eq!(manager.get_state(), before);
    assert!(manager.has_device(Mode::Capture, Device::Camera));
    assert!(!manager.has_device(Mode::Capture, Device::Screen));

    // switching the shared slot from camera to screen is allowed
    let screen_only = MediaDescription::new().with_screen(external_screen());
    manager.set_stream_sources(Mode::Capture, &screen_only).unwrap();
    assert!(!manager.has_device(Mode::Capture, Device::Camera));
    assert!(manager.has_device(Mode::Capture, Device::Screen));
    manager
        .send_external_frame(Device::Screen, Bytes::from(vec![0u8; 32 * 32 * 3 / 2]), FrameData::default())
        .unwrap();
}

#[test]
#[serial]
fn test_failed_source_leaves_table_unchanged() {
    let factory = MemoryFactory::endless();
    let manager = manager_with(Arc::clone(&factory), StreamManagerConfig::default());
    let desc = MediaDescription::new().with_screen(external_screen());
    manager.set_stream_sources(Mode::Capture, &desc).unwrap();

    factory.fail.store(true, Ordering::SeqCst);
    let replacement = MediaDescription::new().with_microphone(file_microphone());
    assert!(manager.set_stream_sources(Mode::Capture, &replacement).is_err());

    assert!(manager.has_device(Mode::Capture, Device::Screen));
    assert!(!manager.has_device(Mode::Capture, Device::Microphone));
}

#[test]
#[serial]
fn test_rejected_configuration_sends_no_frames() {
    println!("🧪 Testing that a rejected configuration never starts its readers");
    let factory = MemoryFactory::endless();
    let manager = manager_with(Arc::clone(&factory), StreamManagerConfig::default());
    let transport = MockTransport::new();
    manager.add_track(Mode::Capture, Device::Microphone, transport.as_ref());
    let frames = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&frames);
    manager.on_frame(Arc::new(
        move |_source_id: i64, _mode: Mode, _device: Device, _data: Bytes, _frame_data: FrameData| {
            sink.fetch_add(1, Ordering::SeqCst);
        },
    ));

    let initial = MediaDescription::new().with_screen(external_screen());
    manager.set_stream_sources(Mode::Capture, &initial).unwrap();
    manager.start().unwrap();

    *factory.fail_device.lock() = Some(Device::Screen);
    let rejected = MediaDescription::new()
        .with_microphone(file_microphone())
        .with_camera(device_camera())
        .with_screen(VideoDescription::new(MediaSource::File, "screen.yuv", 32, 32, 30));
    assert!(manager.set_stream_sources(Mode::Capture, &rejected).is_err());

    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(transport.sent_count(Device::Microphone), 0);
    assert_eq!(frames.load(Ordering::SeqCst), 0);
    assert!(!manager.has_device(Mode::Capture, Device::Microphone));
    assert!(manager.has_device(Mode::Capture, Device::Screen));
    println!("✅ Prepared readers were discarded unopened");
}

#[test]
#[serial]
fn test_send_external_frame_requires_external_source() {
    let manager = manager_with(MemoryFactory::endless(), StreamManagerConfig::default());
    let transport = MockTransport::new();

    let frame = || Bytes::from(vec![1u8; 1920]);
    assert!(matches!(
        manager.send_external_frame(Device::Microphone, frame(), FrameData::default()),
        Err(MediaError::InvalidParams(_))
    ));

    let reader_backed = MediaDescription::new().with_microphone(file_microphone());
    manager.set_stream_sources(Mode::Capture, &reader_backed).unwrap();
    assert!(matches!(
        manager.send_external_frame(Device::Microphone, frame(), FrameData::default()),
        Err(MediaError::InvalidParams(_))
    ));

    let external = MediaDescription::new().with_microphone(AudioDescription::external());
    manager.set_stream_sources(Mode::Capture, &external).unwrap();
    manager.add_track(Mode::Capture, Device::Microphone, transport.as_ref());
    manager
        .send_external_frame(Device::Microphone, frame(), FrameData::default())
        .unwrap();

    let sent = transport.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, Device::Microphone);
    assert!(sent[0].2.absolute_capture_timestamp_ms > 0);
    drop(sent);
    assert_eq!(manager.time(Mode::Capture), Duration::from_millis(10));
}

#[test]
#[serial]
fn test_captured_frames_reach_transport_and_observer() {
    let manager = manager_with(MemoryFactory::endless(), StreamManagerConfig::default());
    let transport = MockTransport::new();
    let local_frames = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&local_frames);
    manager.on_frame(Arc::new(
        move |source_id: i64, mode: Mode, device: Device, data: Bytes, frame_data: FrameData| {
            assert_eq!((source_id, mode, device), (0, Mode::Capture, Device::Camera));
            assert_eq!(data.len(), 16 * 16 * 3 / 2);
            assert_eq!((frame_data.width, frame_data.height), (16, 16));
            observed.fetch_add(1, Ordering::SeqCst);
        },
    ));

    let desc = MediaDescription::new()
        .with_microphone(file_microphone())
        .with_camera(device_camera());
    manager.set_stream_sources(Mode::Capture, &desc).unwrap();
    manager.add_track(Mode::Capture, Device::Microphone, transport.as_ref());
    manager.add_track(Mode::Capture, Device::Camera, transport.as_ref());
    manager.start().unwrap();

    assert!(wait_for(Duration::from_secs(2), || {
        transport.sent_count(Device::Microphone) >= 5 && transport.sent_count(Device::Camera) >= 3
    }));
    assert!(local_frames.load(Ordering::SeqCst) >= 3);
    assert!(manager.time(Mode::Capture) > Duration::ZERO);

    // muted audio stops reaching the transport, video keeps flowing
    assert!(manager.mute());
    std::thread::sleep(Duration::from_millis(30));
    let muted_at = transport.sent_count(Device::Microphone);
    let camera_at = transport.sent_count(Device::Camera);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(transport.sent_count(Device::Microphone), muted_at);
    assert!(transport.sent_count(Device::Camera) > camera_at);
    manager.close();
}

#[test]
#[serial]
fn test_reader_end_of_stream_removes_device() {
    common::init_logging();
    let manager = manager_with(MemoryFactory::limited(5), StreamManagerConfig::default());
    let ended = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&ended);
    manager.on_stream_end(Arc::new(move |stream_type: StreamType, device: Device| {
        sink.lock().push((stream_type, device));
    }));

    let desc = MediaDescription::new().with_microphone(file_microphone());
    manager.set_stream_sources(Mode::Capture, &desc).unwrap();
    manager.start().unwrap();

    assert!(wait_for(Duration::from_secs(2), || !ended.lock().is_empty()));
    assert_eq!(ended.lock()[0], (StreamType::Audio, Device::Microphone));
    assert!(!manager.has_device(Mode::Capture, Device::Microphone));
    assert_eq!(manager.status(Mode::Capture), Status::Idling);

    // re-applying the same description rebuilds the missing reader, which
    // runs dry again
    manager.set_stream_sources(Mode::Capture, &desc).unwrap();
    assert!(wait_for(Duration::from_secs(2), || ended.lock().len() == 2));
}

#[test]
#[serial]
fn test_playback_audio_routing() {
    let factory = MemoryFactory::endless();
    let manager = manager_with(Arc::clone(&factory), StreamManagerConfig::default());
    let transport = MockTransport::new();
    let remote = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&remote);
    manager.on_frame(Arc::new(
        move |source_id: i64, mode: Mode, device: Device, _data: Bytes, _frame_data: FrameData| {
            sink.lock().push((source_id, mode, device));
        },
    ));

    let external = MediaDescription::new().with_microphone(AudioDescription::external());
    manager.set_stream_sources(Mode::Playback, &external).unwrap();
    manager.add_track(Mode::Playback, Device::Microphone, transport.as_ref());
    manager.optimize_sources(transport.as_ref());
    assert_eq!(*transport.audio_incoming.lock(), Some(true));
    assert_eq!(*transport.camera_incoming.lock(), Some(false));
    assert_eq!(manager.status(Mode::Playback), Status::Idling);

    let mut tick = AudioFrames::new();
    tick.insert(11, Bytes::from(vec![0u8; 1920]));
    tick.insert(22, Bytes::from(vec![0u8; 1920]));
    let audio_sink = Arc::clone(&transport.audio_sinks.lock()[0]);
    audio_sink.push(&tick);
    assert_eq!(
        *remote.lock(),
        vec![
            (11, Mode::Playback, Device::Microphone),
            (22, Mode::Playback, Device::Microphone)
        ]
    );

    // switching to a writer routes the same sink into the mixer instead
    let written = MediaDescription::new().with_microphone(file_microphone());
    manager.set_stream_sources(Mode::Playback, &written).unwrap();
    manager.start().unwrap();
    assert_eq!(manager.status(Mode::Playback), Status::Active);
    audio_sink.push(&tick);
    let collected = Arc::clone(&factory.sinks.lock()[0]);
    assert!(wait_for(Duration::from_secs(1), || collected.frames.lock().len() == 1));
    assert_eq!(remote.lock().len(), 2);

    manager.set_stream_sources(Mode::Playback, &MediaDescription::new()).unwrap();
    manager.optimize_sources(transport.as_ref());
    assert_eq!(*transport.audio_incoming.lock(), Some(false));
}

#[test]
#[serial]
fn test_playback_video_requires_external() {
    let manager = manager_with(MemoryFactory::endless(), StreamManagerConfig::default());
    let transport = MockTransport::new();
    let desc = MediaDescription::new().with_screen(VideoDescription::new(MediaSource::Shell, "cat", 32, 32, 30));
    assert!(matches!(
        manager.set_stream_sources(Mode::Playback, &desc),
        Err(MediaError::InvalidParams(ref msg)) if msg.contains("Invalid input mode")
    ));

    let frames = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&frames);
    manager.on_frame(Arc::new(
        move |source_id: i64, mode: Mode, device: Device, _data: Bytes, _frame_data: FrameData| {
            assert_eq!((source_id, mode, device), (7, Mode::Playback, Device::Screen));
            counter.fetch_add(1, Ordering::SeqCst);
        },
    ));
    let desc = MediaDescription::new().with_screen(external_screen());
    manager.set_stream_sources(Mode::Playback, &desc).unwrap();
    manager.add_track(Mode::Playback, Device::Screen, transport.as_ref());
    let (video_sink, is_screencast) = transport.video_sinks.lock()[0].clone();
    assert!(is_screencast);
    video_sink.push(7, Bytes::from_static(b"yuv"), FrameData::default());
    assert_eq!(frames.load(Ordering::SeqCst), 1);
    assert_eq!(manager.time(Mode::Playback), Duration::from_secs(1) / 30);
}

#[test]
#[serial]
fn test_tracks_survive_endpoint_replacement() {
    let manager = manager_with(MemoryFactory::endless(), StreamManagerConfig::default());
    let transport = MockTransport::new();
    let external = MediaDescription::new().with_microphone(AudioDescription::external());
    manager.set_stream_sources(Mode::Capture, &external).unwrap();
    manager.add_track(Mode::Capture, Device::Microphone, transport.as_ref());

    let mono = MediaDescription::new().with_microphone(AudioDescription::new(MediaSource::External, "", 16000, 1));
    manager.set_stream_sources(Mode::Capture, &mono).unwrap();
    manager
        .send_external_frame(Device::Microphone, Bytes::from(vec![0u8; 320]), FrameData::default())
        .unwrap();

    assert_eq!(transport.tracks.lock().len(), 1);
    assert_eq!(
        transport.tracks.lock()[0].key(),
        StreamKey::new(Mode::Capture, Device::Microphone)
    );
    assert_eq!(transport.sent_count(Device::Microphone), 1);
}

#[test]
#[serial]
fn test_drop_before_start_is_clean() {
    let ended = Arc::new(AtomicUsize::new(0));
    {
        let manager = manager_with(MemoryFactory::limited(3), StreamManagerConfig::default());
        let counter = Arc::clone(&ended);
        manager.on_stream_end(Arc::new(move |_: StreamType, _: Device| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let desc = MediaDescription::new()
            .with_microphone(file_microphone())
            .with_camera(device_camera());
        manager.set_stream_sources(Mode::Capture, &desc).unwrap();
        manager.set_stream_sources(Mode::Playback, &MediaDescription::new().with_speaker(file_microphone())).unwrap();
    }
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(ended.load(Ordering::SeqCst), 0);
}

#[test]
#[serial]
fn test_close_silences_observers() {
    let manager = manager_with(MemoryFactory::endless(), StreamManagerConfig::default());
    let upgrades = count_upgrades(&manager);
    let desc = MediaDescription::new().with_microphone(file_microphone());
    manager.set_stream_sources(Mode::Capture, &desc).unwrap();
    manager.start().unwrap();

    manager.close();
    assert!(!manager.mute());
    assert!(!manager.pause());
    assert_eq!(manager.status(Mode::Capture), Status::Idling);
    assert!(manager.start().is_err());
    std::thread::sleep(Duration::from_millis(30));
    assert!(upgrades.lock().is_empty());
}
