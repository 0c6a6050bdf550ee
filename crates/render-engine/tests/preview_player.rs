use std::sync::Arc;
use std::time::Duration;

use clipreel_clip_model::{Clip, Segment, Source, SourceRegistry, TextOverlay};
use clipreel_media_core::element::DecodeElement;
use clipreel_media_core::testing::{MockElement, MockMedia};
use clipreel_playback::{PlaybackSequencer, SequencerOptions, SequencerState};
use clipreel_render_engine::{OverlayLayer, PreviewPlayer};

#[tokio::test]
async fn preview_renders_at_source_size_and_stops_cleanly() {
    let element = Arc::new(
        MockElement::new()
            .with_media("a.webm", MockMedia::new(4.0).with_dimensions(48, 32))
            .with_media("b.webm", MockMedia::new(4.0).with_dimensions(40, 30))
            .autoplay(true),
    );
    let sources: SourceRegistry = vec![
        Source::new("a", "a.webm", 4.0),
        Source::new("b", "b.webm", 4.0),
    ]
    .into_iter()
    .collect();
    let clip = Clip::new(
        3,
        "preview",
        vec![Segment::new("a", 0.0, 1.0), Segment::new("b", 1.0, 2.0)],
    )
    .with_overlay(TextOverlay::from_content("caption"));

    let sequencer = PlaybackSequencer::new(
        &clip,
        sources,
        element.clone() as Arc<dyn DecodeElement>,
        SequencerOptions::default(),
    )
    .unwrap();
    let overlay = clip
        .text_overlay
        .clone()
        .map(|o| OverlayLayer::new(o, None));

    let player = PreviewPlayer::start(sequencer, overlay, 120).unwrap();
    let mut frames = player.frames();
    let frame = tokio::time::timeout(
        Duration::from_secs(5),
        frames.wait_for(|f| f.as_ref().is_some_and(|img| img.dimensions() == (48, 32))),
    )
    .await
    .expect("a frame at the first source's size")
    .unwrap()
    .clone();
    assert!(frame.is_some());

    tokio::time::timeout(
        Duration::from_secs(5),
        player.session().wait_until(|s| s.loops >= 1),
    )
    .await
    .expect("preview should loop")
    .unwrap();

    let (sequencer, stats) = player.stop().await.unwrap();
    assert_eq!(sequencer.state(), &SequencerState::Idle);
    assert!(stats.frames_rendered >= 1);
    assert!(!element.is_playing());
}
