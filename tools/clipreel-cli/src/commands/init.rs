//! Initialize a new Clipreel project file.

use std::path::PathBuf;

use clipreel_clip_model::{ClipProject, Source};

pub fn run(name: String, output: PathBuf, sources: Vec<String>) -> anyhow::Result<()> {
    let path = output.join(format!("{name}.clipreel.json"));
    if path.exists() {
        anyhow::bail!("Refusing to overwrite existing project {}", path.display());
    }
    println!("Creating project '{}' at {}", name, path.display());

    let mut project = ClipProject::new(&name);
    for spec in &sources {
        project.add_source(parse_source(spec)?);
    }
    project
        .save(&path)
        .map_err(|e| anyhow::anyhow!("Failed to create project: {e}"))?;

    println!("Project created successfully:");
    println!("  File: {}", path.display());
    println!("  Sources: {}", project.sources.len());
    for source in project.sources.iter() {
        println!(
            "    {} -> {} ({:.1}s)",
            source.id,
            source.playable_handle().unwrap_or("-"),
            source.duration_secs
        );
    }
    Ok(())
}

/// Parse `ID=PATH[:DURATION_SECS]`.
fn parse_source(spec: &str) -> anyhow::Result<Source> {
    let (id, rest) = spec
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Invalid source '{spec}'; expected ID=PATH[:SECS]"))?;
    if id.trim().is_empty() {
        anyhow::bail!("Invalid source '{spec}'; the id is empty");
    }

    let (handle, duration) = match rest.rsplit_once(':') {
        Some((handle, secs)) if !handle.is_empty() && secs.parse::<f64>().is_ok() => {
            (handle, secs.parse::<f64>()?)
        }
        _ => (rest, 0.0),
    };
    if !duration.is_finite() || duration < 0.0 {
        anyhow::bail!("Invalid duration in source '{spec}'");
    }
    Ok(Source::new(id.trim(), handle, duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_with_duration() {
        let source = parse_source("cam=footage/a.webm:12.5").unwrap();
        assert_eq!(source.id.as_str(), "cam");
        assert_eq!(source.playable_handle(), Some("footage/a.webm"));
        assert!((source.duration_secs - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_source_keeps_uri_colons() {
        let source = parse_source("remote=https://cdn.example/b.webm").unwrap();
        assert_eq!(source.playable_handle(), Some("https://cdn.example/b.webm"));
        assert_eq!(source.duration_secs, 0.0);
    }

    #[test]
    fn test_parse_source_rejects_missing_id() {
        assert!(parse_source("a.webm").is_err());
        assert!(parse_source("=a.webm").is_err());
    }
}
