pub mod check;
pub mod export;
pub mod info;
pub mod init;
pub mod preview;
pub mod validate;

use std::path::{Path, PathBuf};

use clipreel_clip_model::{Clip, ClipProject, SourceRegistry};

/// A project file plus the registry with handles resolved against it.
pub struct OpenedProject {
    pub project: ClipProject,
    pub base_dir: PathBuf,
    pub sources: SourceRegistry,
}

impl OpenedProject {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let project =
            ClipProject::load(path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let sources = project.registry_relative_to(&base_dir);
        Ok(Self {
            project,
            base_dir,
            sources,
        })
    }

    pub fn clip(&self, key: &str) -> anyhow::Result<&Clip> {
        self.project.find_clip(key).ok_or_else(|| {
            anyhow::anyhow!(
                "No clip '{key}' in project '{}'. Run `clipreel info` to list clips.",
                self.project.name
            )
        })
    }
}
