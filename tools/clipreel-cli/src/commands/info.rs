//! Show project information.

use std::path::PathBuf;

use clipreel_clip_model::SEGMENT_EPSILON;

use super::OpenedProject;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let opened = OpenedProject::open(&path)?;
    let p = &opened.project;

    println!("Project: {}", p.name);
    println!("  Version: {}", p.version);
    println!("  Created: {}", p.created_at);
    println!("  Modified: {}", p.modified_at);
    println!();

    println!("Sources:");
    for source in opened.sources.iter() {
        let dims = source
            .dimensions()
            .map(|(w, h)| format!(", {w}x{h}"))
            .unwrap_or_default();
        match source.playable_handle() {
            Some(handle) => println!(
                "  {}: {} ({:.1}s{dims})",
                source.id, handle, source.duration_secs
            ),
            None => println!("  {}: <unavailable, re-import>", source.id),
        }
    }
    println!();

    println!("Clips:");
    for clip in &p.clips {
        println!(
            "  [{}] {} ({:.2}s, {} segment(s){}{})",
            clip.id,
            clip.name,
            clip.playable_duration(SEGMENT_EPSILON),
            clip.segments.len(),
            if clip.is_multi_source() { ", multi-source" } else { "" },
            if clip.is_combined { ", combined" } else { "" },
        );
        for (index, segment) in clip.segments.iter().enumerate() {
            println!(
                "      {index}: {} {:.2}..{:.2}",
                segment.source_id, segment.start, segment.end
            );
        }
        if let Some(overlay) = &clip.text_overlay {
            println!(
                "      overlay: {:?} at {:?}",
                overlay.content, overlay.position
            );
        }
    }

    Ok(())
}
