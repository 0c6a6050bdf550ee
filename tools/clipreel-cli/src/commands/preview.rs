//! Play a clip without a display.

use std::path::PathBuf;
use std::time::Duration;

use clipreel_common::config::AppConfig;
use clipreel_playback::{PlaybackSequencer, SequencerOptions, SequencerState};
use clipreel_render_engine::export::ExportSettings;
use clipreel_render_engine::overlay::OverlayLayer;
use clipreel_render_engine::preview::PreviewPlayer;

use super::OpenedProject;
use crate::backend::media_backend;

pub async fn run(
    config: &AppConfig,
    path: PathBuf,
    clip_key: String,
    seconds: Option<f64>,
) -> anyhow::Result<()> {
    let opened = OpenedProject::open(&path)?;
    let clip = opened.clip(&clip_key)?;
    let backend = media_backend()?;

    let element = backend.create_decode_element()?;
    let mut sequencer = PlaybackSequencer::new(
        clip,
        opened.sources.clone(),
        element,
        SequencerOptions::from_config(&config.playback),
    )?;
    let segment_count = clip.segments.len();
    let playable = sequencer.segments().len();
    if playable < segment_count {
        tracing::info!(
            clip = %clip.name,
            skipped = segment_count - playable,
            "Previewing without empty segments"
        );
    }
    sequencer.on_segment_change(Box::new(move |index| {
        tracing::debug!(segment_index = index, "Segment changed");
        println!("  Now playing segment {}/{}", index + 1, segment_count);
    }));
    let loop_secs = sequencer.loop_duration();

    let font = ExportSettings::from_config(config).font;
    let overlay = clip
        .text_overlay
        .clone()
        .map(|overlay| OverlayLayer::new(overlay, font));

    println!(
        "Previewing clip '{}' ({:.2}s, {} segment(s)); Ctrl-C to stop",
        clip.name, loop_secs, playable
    );
    let player = PreviewPlayer::start(sequencer, overlay, config.export.fps)?;

    let run_for = Duration::from_secs_f64(seconds.unwrap_or(loop_secs).max(0.1));
    let mut status = player.session().watch_status();
    let blocked = async {
        loop {
            if status.changed().await.is_err() {
                return None;
            }
            let current = status.borrow_and_update().clone();
            if let SequencerState::Blocked { reason, .. } = current.state {
                return Some(reason);
            }
        }
    };

    tokio::select! {
        _ = tokio::time::sleep(run_for) => {}
        _ = tokio::signal::ctrl_c() => println!("Stopping preview..."),
        Some(reason) = blocked => {
            tracing::warn!(clip = %clip.name, %reason, "Preview blocked");
            println!("  [WARN] Playback blocked: {reason}");
        }
    }

    let status = player.status();
    let (_, stats) = player.stop().await?;
    println!(
        "Preview stopped after {} loop(s); {} frame(s) rendered",
        status.loops, stats.frames_rendered
    );
    Ok(())
}
