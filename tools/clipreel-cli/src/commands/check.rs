//! Check media backend capabilities.

use clipreel_common::config::{config_file_path, AppConfig};
use clipreel_media_core::capability::CapabilityRegistry;

use crate::backend::media_backend;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Clipreel System Check");
    println!("{}", "=".repeat(50));
    println!("Config: {}", config_file_path().display());

    let backend = match media_backend() {
        Ok(backend) => backend,
        Err(e) => {
            println!("[WARN] Media backend: {e}");
            return Ok(());
        }
    };
    println!("[OK] Media backend: {}", backend.name());

    println!();
    println!("Output formats (preference order):");
    for mime in &config.export.mime_candidates {
        let status = if backend.is_mime_type_supported(mime) {
            "OK"
        } else {
            "--"
        };
        println!("  [{status}] {mime}");
    }

    let registry = CapabilityRegistry::global();
    let lease = registry.acquire();
    let selected = lease.select_mime_type(backend.as_ref(), &config.export.mime_candidates);
    lease.release();

    println!();
    match selected {
        Ok(mime) => println!("Exports will use {mime}. Clipreel is ready."),
        Err(e) => println!("Exports are unavailable: {e}"),
    }
    Ok(())
}
