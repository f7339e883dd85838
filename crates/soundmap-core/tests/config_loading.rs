use std::path::PathBuf;

use soundmap_core::{
    config::SoundmapConfig,
    envelope::EnvelopePreset,
    mixer::Mixer,
    render::{EngineKind, RenderFormat},
};

#[test]
fn full_config_file_is_applied() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("soundmap.config.toml");
    std::fs::write(
        &path,
        r#"
[audio]
sample_rate = 48000
channels = 2
master_volume = 0.5

[engine]
kind = "sequential"
worker_threads = 4
partition_frames = 128
gpu_fallback = false

[envelope]
preset = "slow_piano"

[recording]
queue_blocks = 8

[diagnostics]
rust_log_filter = "warn"
trace_file_prefix = "bench"
log_dir = "target/logs"
"#,
    )
    .expect("config should be writable");

    let config = SoundmapConfig::from_path(&path).expect("config should load");
    assert_eq!(config.audio.format(), RenderFormat::stereo(48_000));
    assert_eq!(config.engine.kind, EngineKind::Sequential);
    assert_eq!(config.engine.worker_threads, 4);
    assert!(!config.engine.gpu_fallback);
    assert_eq!(config.envelope.preset, EnvelopePreset::SlowPiano);
    assert_eq!(config.recording.queue_blocks, 8);
    assert_eq!(config.diagnostics.log_dir, PathBuf::from("target/logs"));

    let mixer = Mixer::new("configured");
    mixer.set_envelope_preset(config.envelope.preset);
    mixer
        .set_master_volume(config.audio.master_volume)
        .expect("configured volume should be valid");
    mixer
        .start_playback_with(config.audio.format(), &config.engine)
        .expect("configured engine should start");
    assert_eq!(mixer.status().engine.as_deref(), Some("Singlethread"));
    assert_eq!(mixer.envelope(), EnvelopePreset::SlowPiano.envelope());
}

#[test]
fn malformed_config_reports_its_path() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("broken.toml");
    std::fs::write(&path, "[engine]\nkind = \"quantum\"\n").expect("config should be writable");

    let error = SoundmapConfig::from_path(&path).expect_err("unknown engine should fail");
    assert!(
        format!("{error:#}").contains("broken.toml"),
        "error should name the file: {error:#}"
    );
}

#[test]
fn missing_config_file_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    assert!(SoundmapConfig::from_path(&temp.path().join("absent.toml")).is_err());
}
