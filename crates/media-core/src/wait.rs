//! Single-shot suspension points on a decode element.
//!
//! Each wait subscribes to the element's events *before* issuing the action
//! it waits on, resolves at most once, and drops its receiver on every exit
//! path (success, element error, or abort), so nothing lingers across
//! segments.

use std::time::Duration;

use clipreel_common::error::{ClipreelError, ClipreelResult};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::abort::AbortSignal;
use crate::element::{is_ready_for, DecodeElement, MediaEvent};

/// Tolerances shared by all waits.
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    /// Position tolerance in seconds.
    pub epsilon: f64,

    /// Log a warning after this long without any event.
    pub stall_warning: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            epsilon: 0.01,
            stall_warning: Duration::from_secs(10),
        }
    }
}

impl WaitOptions {
    pub fn from_config(playback: &clipreel_common::config::PlaybackDefaults) -> Self {
        Self {
            epsilon: playback.epsilon,
            stall_warning: Duration::from_secs(playback.stall_warning_secs.max(1)),
        }
    }
}

/// Next event, or `None` when events were dropped and the caller should
/// re-check element state.
async fn next_event(
    events: &mut broadcast::Receiver<MediaEvent>,
    signal: &AbortSignal,
    opts: &WaitOptions,
    waiting_for: &'static str,
) -> ClipreelResult<Option<MediaEvent>> {
    loop {
        tokio::select! {
            biased;
            _ = signal.aborted() => return Err(ClipreelError::Cancelled),
            received = events.recv() => {
                return match received {
                    Ok(event) => Ok(Some(event)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, waiting_for, "Media events lagged");
                        Ok(None)
                    }
                    Err(RecvError::Closed) => Err(ClipreelError::playback_failed(format!(
                        "Decode element closed while waiting for {waiting_for}"
                    ))),
                };
            }
            _ = tokio::time::sleep(opts.stall_warning) => {
                tracing::warn!(
                    waiting_for,
                    stalled_secs = opts.stall_warning.as_secs_f64(),
                    "No media events received"
                );
            }
        }
    }
}

/// Make sure `handle` is bound and has metadata loaded.
///
/// Returns immediately when the element already holds `handle` with
/// metadata; otherwise binds (or reloads the same handle) and waits for the
/// `LoadedMetadata` event answering that bind.
pub async fn ensure_source(
    element: &dyn DecodeElement,
    handle: &str,
    signal: &AbortSignal,
    opts: &WaitOptions,
) -> ClipreelResult<()> {
    if signal.is_aborted() {
        return Err(ClipreelError::Cancelled);
    }
    if is_ready_for(element, handle) {
        return Ok(());
    }

    let mut events = element.subscribe();
    let ticket = if element.bound_handle().as_deref() == Some(handle) {
        element.reload()?
    } else {
        element.bind(handle)?
    };
    tracing::debug!(%ticket, handle, "Waiting for source metadata");

    loop {
        match next_event(&mut events, signal, opts, "source metadata").await? {
            Some(MediaEvent::LoadedMetadata { bind }) if bind == ticket => return Ok(()),
            Some(MediaEvent::LoadedMetadata { bind }) => {
                tracing::debug!(stale = %bind, expected = %ticket, "Ignoring stale metadata event");
            }
            Some(MediaEvent::Error { message }) => {
                return Err(ClipreelError::playback_failed(format!(
                    "Failed to load video source: {message}"
                )));
            }
            Some(_) => {}
            None if is_ready_for(element, handle) => return Ok(()),
            None => {}
        }
    }
}

/// Seek to `target` and wait for the element to confirm. A no-op when the
/// element is already within epsilon of the target.
pub async fn seek_to(
    element: &dyn DecodeElement,
    target: f64,
    signal: &AbortSignal,
    opts: &WaitOptions,
) -> ClipreelResult<()> {
    if signal.is_aborted() {
        return Err(ClipreelError::Cancelled);
    }
    if (element.current_time() - target).abs() <= opts.epsilon {
        return Ok(());
    }

    let mut events = element.subscribe();
    element.seek(target).map_err(|e| {
        ClipreelError::seek_failed(format!("Unable to seek within the source video: {e}"))
    })?;

    loop {
        match next_event(&mut events, signal, opts, "seek").await? {
            Some(MediaEvent::Seeked) => return Ok(()),
            Some(MediaEvent::Error { message }) => {
                return Err(ClipreelError::seek_failed(format!(
                    "Unable to seek within the source video: {message}"
                )));
            }
            Some(_) => {}
            None if (element.current_time() - target).abs() <= opts.epsilon => return Ok(()),
            None => {}
        }
    }
}

/// Wait until the already-playing element reaches `end` (within epsilon)
/// or the media ends. Resolves immediately when the position is already
/// there.
pub async fn wait_for_position(
    element: &dyn DecodeElement,
    end: f64,
    signal: &AbortSignal,
    opts: &WaitOptions,
) -> ClipreelResult<()> {
    if signal.is_aborted() {
        return Err(ClipreelError::Cancelled);
    }
    let mut events = element.subscribe();
    position_reached(element, &mut events, end, signal, opts).await
}

/// Start playback, then [`wait_for_position`]. The subscription is taken
/// before `play` so no early update is missed.
pub async fn play_until(
    element: &dyn DecodeElement,
    end: f64,
    signal: &AbortSignal,
    opts: &WaitOptions,
) -> ClipreelResult<()> {
    if signal.is_aborted() {
        return Err(ClipreelError::Cancelled);
    }

    let mut events = element.subscribe();
    element.play().map_err(|e| {
        ClipreelError::playback_failed(format!(
            "Unable to start playback while exporting clip: {e}"
        ))
    })?;
    position_reached(element, &mut events, end, signal, opts).await
}

async fn position_reached(
    element: &dyn DecodeElement,
    events: &mut broadcast::Receiver<MediaEvent>,
    end: f64,
    signal: &AbortSignal,
    opts: &WaitOptions,
) -> ClipreelResult<()> {
    let reached = |position: f64| position >= end - opts.epsilon;
    if reached(element.current_time()) || element.is_ended() {
        return Ok(());
    }

    loop {
        match next_event(events, signal, opts, "segment end").await? {
            Some(MediaEvent::TimeUpdate { position }) if reached(position) => return Ok(()),
            Some(MediaEvent::Ended) => return Ok(()),
            Some(MediaEvent::Error { message }) => {
                return Err(ClipreelError::playback_failed(format!(
                    "Video playback failed during export: {message}"
                )));
            }
            Some(_) => {}
            None if reached(element.current_time()) || element.is_ended() => return Ok(()),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::AbortController;
    use crate::element::ReadyState;
    use crate::testing::{ElementCall, MockElement, MockMedia};

    fn element() -> MockElement {
        MockElement::new()
            .with_media("a.webm", MockMedia::new(10.0))
            .with_media("b.webm", MockMedia::new(6.0))
    }

    #[tokio::test]
    async fn test_ensure_source_binds_and_waits() {
        let element = element();
        let opts = WaitOptions::default();
        ensure_source(&element, "a.webm", &AbortSignal::never(), &opts)
            .await
            .unwrap();
        assert_eq!(element.bound_handle().as_deref(), Some("a.webm"));
        assert!(element.ready_state() >= ReadyState::Metadata);

        // Already ready: no second bind.
        ensure_source(&element, "a.webm", &AbortSignal::never(), &opts)
            .await
            .unwrap();
        let binds = element
            .calls()
            .iter()
            .filter(|c| matches!(c, ElementCall::Bind(_)))
            .count();
        assert_eq!(binds, 1);
        assert_eq!(element.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_source_reports_load_error() {
        let element = element();
        let err = ensure_source(
            &element,
            "missing.webm",
            &AbortSignal::never(),
            &WaitOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Failed to load video source"));
        assert_eq!(element.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_seek_within_epsilon_is_noop() {
        let element = element();
        let opts = WaitOptions::default();
        ensure_source(&element, "a.webm", &AbortSignal::never(), &opts)
            .await
            .unwrap();
        seek_to(&element, 0.005, &AbortSignal::never(), &opts)
            .await
            .unwrap();
        assert!(!element
            .calls()
            .iter()
            .any(|c| matches!(c, ElementCall::Seek(_))));

        seek_to(&element, 4.0, &AbortSignal::never(), &opts)
            .await
            .unwrap();
        assert!((element.current_time() - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_play_until_reaches_end() {
        let element = element().autoplay(true);
        let opts = WaitOptions::default();
        let signal = AbortSignal::never();
        ensure_source(&element, "a.webm", &signal, &opts).await.unwrap();
        seek_to(&element, 1.0, &signal, &opts).await.unwrap();
        play_until(&element, 2.0, &signal, &opts).await.unwrap();
        assert!(element.current_time() >= 2.0 - opts.epsilon);
        assert_eq!(element.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_play_until_resolves_on_natural_end() {
        let element = element().autoplay(true);
        let opts = WaitOptions::default();
        let signal = AbortSignal::never();
        ensure_source(&element, "b.webm", &signal, &opts).await.unwrap();
        seek_to(&element, 5.0, &signal, &opts).await.unwrap();
        // Recorded end is past the media's real end.
        play_until(&element, 9.0, &signal, &opts).await.unwrap();
        assert!(element.is_ended());
    }

    #[tokio::test]
    async fn test_wait_aborts() {
        let element = element();
        let controller = AbortController::new();
        let signal = controller.signal();
        let opts = WaitOptions::default();
        ensure_source(&element, "a.webm", &signal, &opts).await.unwrap();

        // Manual mode: no time updates arrive, so only the abort can end it.
        let aborter = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            aborter.abort();
        });
        let err = play_until(&element, 5.0, &signal, &opts).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(element.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_position_already_reached() {
        let element = element();
        let opts = WaitOptions::default();
        let signal = AbortSignal::never();
        ensure_source(&element, "a.webm", &signal, &opts).await.unwrap();
        seek_to(&element, 3.0, &signal, &opts).await.unwrap();
        wait_for_position(&element, 3.005, &signal, &opts)
            .await
            .unwrap();
        assert_eq!(element.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_play_failure_is_descriptive() {
        let element = element().fail_play_at_call(0);
        let opts = WaitOptions::default();
        let signal = AbortSignal::never();
        ensure_source(&element, "a.webm", &signal, &opts).await.unwrap();
        let err = play_until(&element, 5.0, &signal, &opts).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("Unable to start playback while exporting clip"));
    }
}
