//! Validate a Clipreel project file.

use std::path::PathBuf;

use super::OpenedProject;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    println!("Validating project at: {}", path.display());

    let opened = OpenedProject::open(&path)?;
    let project = &opened.project;

    println!("  Name: {}", project.name);
    println!("  Version: {}", project.version);
    println!("  Sources: {}", project.sources.len());
    println!("  Clips: {}", project.clips.len());

    let mut errors = project.validate();
    for source in opened.sources.iter() {
        let Some(handle) = source.playable_handle() else {
            continue;
        };
        if !handle.contains("://") && !std::path::Path::new(handle).exists() {
            errors.push(format!("Source '{}' file not found: {handle}", source.id));
        }
    }

    if errors.is_empty() {
        println!("\nProject is valid.");
    } else {
        println!("\nValidation issues:");
        for error in &errors {
            println!("  - {error}");
        }
        println!(
            "\n{} issue(s) found. Project may not be fully usable.",
            errors.len()
        );
    }

    Ok(())
}
