//! Export a clip to video.

use std::io::Write;
use std::path::PathBuf;

use clipreel_common::config::AppConfig;
use clipreel_media_core::abort::AbortController;
use clipreel_render_engine::export::{
    ClipExporter, ExportJob, ExportOptions, ExportProgress, ExportSettings, ExportStage,
};

use super::OpenedProject;
use crate::backend::media_backend;

pub async fn run(
    config: &AppConfig,
    path: PathBuf,
    clip_key: String,
    output: Option<PathBuf>,
    fps: Option<u32>,
    include_text_overlay: bool,
) -> anyhow::Result<()> {
    let opened = OpenedProject::open(&path)?;
    let clip = opened.clip(&clip_key)?.clone();
    let options = ExportOptions {
        include_text_overlay,
        fps: fps.unwrap_or(config.export.fps).max(1),
    };

    println!("Exporting clip '{}' from {}", clip.name, path.display());
    println!("  Segments: {}", clip.segments.len());
    println!("  FPS: {}", options.fps);
    println!(
        "  Overlay: {}",
        match (&clip.text_overlay, include_text_overlay) {
            (Some(_), true) => "burned in",
            (Some(_), false) => "skipped",
            (None, _) => "none",
        }
    );

    let exporter =
        ClipExporter::new(media_backend()?).with_settings(ExportSettings::from_config(config));
    let job = ExportJob::new(clip.clone(), opened.sources.clone())
        .with_options(options)
        .with_progress(Box::new(print_progress));

    // Ctrl-C aborts; the export still tears everything down before returning.
    let controller = AbortController::new();
    let signal = controller.signal();
    let export = exporter.export(&job, &signal);
    tokio::pin!(export);
    let outcome = tokio::select! {
        outcome = &mut export => outcome,
        _ = tokio::signal::ctrl_c() => {
            println!("\nCancelling export...");
            tracing::info!(clip = %clip.name, "Export cancelled by user");
            controller.abort();
            export.await
        }
    };

    let artifact = match outcome {
        Ok(artifact) => artifact,
        Err(e) => {
            tracing::error!(clip = %clip.name, error = %e, "Export failed");
            println!("\nExport failed: {e}");
            return Err(e.into());
        }
    };

    let output_path = output.unwrap_or_else(|| {
        opened
            .base_dir
            .join("exports")
            .join(format!("{}.{}", file_stem(&clip.name), artifact.extension()))
    });
    artifact.write_to(&output_path)?;
    tracing::info!(
        clip = %clip.name,
        output = %output_path.display(),
        bytes = artifact.len(),
        frames = artifact.frames,
        "Export written"
    );

    println!("\nExport complete: {}", output_path.display());
    println!("  Format: {}", artifact.mime_type);
    println!("  Size: {} bytes, {} frames", artifact.len(), artifact.frames);
    for warning in &artifact.warnings {
        tracing::warn!(clip = %clip.name, %warning, "Export warning");
        println!("  [WARN] {warning}");
    }
    Ok(())
}

fn print_progress(p: ExportProgress) {
    match p.stage {
        ExportStage::Rendering => print!(
            "\r  Progress: {:.0}% (segment {}/{})  ",
            p.progress * 100.0,
            p.segment_index + 1,
            p.segment_count
        ),
        ExportStage::Finalizing => print!("\r  Finalizing...                 "),
        _ => return,
    }
    let _ = std::io::stdout().flush();
}

/// Clip names are free text; keep them filesystem friendly.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "clip".to_string()
    } else {
        stem.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("Intro cut #2"), "Intro_cut__2");
        assert_eq!(file_stem("///"), "clip");
        assert_eq!(file_stem("take-1"), "take-1");
    }
}
