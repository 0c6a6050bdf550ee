//! Live preview: a [`PlaybackSequencer`] driven by its element's event stream.

use clipreel_clip_model::Source;
use clipreel_common::error::{ClipreelError, ClipreelResult};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::sequencer::{PlaybackSequencer, PlaybackStatus};

/// Requests accepted by a running preview.
#[derive(Debug)]
pub enum PreviewCommand {
    /// Supply a re-imported source; resumes playback blocked on it.
    Reconnect(Source),
    /// Start over from the first segment.
    Restart,
    Stop,
}

/// Spawns preview tasks.
pub struct PreviewSession;

impl PreviewSession {
    /// Start playing `sequencer` on a tokio task.
    pub fn spawn(mut sequencer: PlaybackSequencer) -> PreviewHandle {
        let (command_tx, mut commands) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(sequencer.status());

        let task = tokio::spawn(async move {
            // Subscribe before start so the first load's answer is seen.
            let mut events = sequencer.element().subscribe();
            sequencer.start();
            publish(&status_tx, &sequencer);

            loop {
                tokio::select! {
                    biased;
                    command = commands.recv() => match command {
                        Some(PreviewCommand::Reconnect(source)) => sequencer.reconnect(source),
                        Some(PreviewCommand::Restart) => sequencer.start(),
                        Some(PreviewCommand::Stop) | None => break,
                    },
                    received = events.recv() => match received {
                        Ok(event) => sequencer.handle_event(&event),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Preview fell behind media events; resyncing");
                            sequencer.resync();
                        }
                        Err(RecvError::Closed) => {
                            tracing::warn!("Decode element closed; ending preview");
                            break;
                        }
                    },
                }
                publish(&status_tx, &sequencer);
            }

            sequencer.stop();
            publish(&status_tx, &sequencer);
            sequencer
        });

        PreviewHandle {
            commands: command_tx,
            status: status_rx,
            task,
        }
    }
}

fn publish(tx: &watch::Sender<PlaybackStatus>, sequencer: &PlaybackSequencer) {
    let status = sequencer.status();
    tx.send_if_modified(|current| {
        if *current == status {
            false
        } else {
            *current = status;
            true
        }
    });
}

/// Control side of a running preview.
pub struct PreviewHandle {
    commands: mpsc::Sender<PreviewCommand>,
    status: watch::Receiver<PlaybackStatus>,
    task: JoinHandle<PlaybackSequencer>,
}

impl PreviewHandle {
    /// Latest published status.
    pub fn status(&self) -> PlaybackStatus {
        self.status.borrow().clone()
    }

    /// A receiver for status changes, e.g. to follow the playing segment.
    pub fn watch_status(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.clone()
    }

    /// Wait until the published status satisfies `predicate`.
    pub async fn wait_until(
        &self,
        mut predicate: impl FnMut(&PlaybackStatus) -> bool,
    ) -> ClipreelResult<PlaybackStatus> {
        let mut status = self.status.clone();
        let matched = status
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| ClipreelError::playback_failed("Preview ended"))?;
        Ok(matched.clone())
    }

    pub async fn reconnect(&self, source: Source) -> ClipreelResult<()> {
        self.send(PreviewCommand::Reconnect(source)).await
    }

    pub async fn restart(&self) -> ClipreelResult<()> {
        self.send(PreviewCommand::Restart).await
    }

    /// Stop playback and hand the sequencer back.
    pub async fn stop(self) -> ClipreelResult<PlaybackSequencer> {
        // The task may already have ended on its own.
        let _ = self.commands.send(PreviewCommand::Stop).await;
        self.task
            .await
            .map_err(|e| ClipreelError::playback_failed(format!("Preview task failed: {e}")))
    }

    async fn send(&self, command: PreviewCommand) -> ClipreelResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClipreelError::playback_failed("Preview is not running"))
    }
}
