use anyhow::Result;
use log::info;
use std::io::Write;
use std::path::Path;

use crate::auth::Subject;
use crate::engine::load_boot_config;
use crate::runtime::Runtime;
use crate::service::FeaturesService;

/// Apply the boot configuration at `path`, if present.
#[tracing::instrument(skip(runtime, service, subject, out))]
pub async fn boot<R: Runtime>(
    runtime: &R,
    service: &dyn FeaturesService,
    subject: &Subject,
    path: &Path,
    out: &mut dyn Write,
) -> Result<()> {
    let Some(config) = load_boot_config(runtime, path)? else {
        writeln!(out, "No boot configuration at {}", path.display())?;
        return Ok(());
    };
    info!(
        "Booting {} repository(ies) and {} feature(s)",
        config.repositories.len(),
        config.boot_features.len()
    );

    let report = service.boot(subject, &config).await?;
    for id in &report.installed {
        writeln!(out, "Installed {}", id)?;
    }
    if report.installed.is_empty() {
        writeln!(out, "No changes")?;
    }
    Ok(())
}
