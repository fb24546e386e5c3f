use anyhow::Result;
use log::info;
use std::io::Write;

use crate::auth::Subject;
use crate::service::{FeaturesService, RepositoryInfo};

use super::table::Table;

fn print_repositories(verb: &str, repos: &[RepositoryInfo], out: &mut dyn Write) -> Result<()> {
    for repo in repos {
        writeln!(out, "{} repository {} ({})", verb, repo.name, repo.locator)?;
    }
    Ok(())
}

/// Register a repository (and its imports), optionally installing its boot features
#[tracing::instrument(skip(service, subject, out))]
pub async fn repo_add(
    service: &dyn FeaturesService,
    subject: &Subject,
    locator: &str,
    install: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let added = service.add_repository(subject, locator, install).await?;
    if added.is_empty() {
        info!("Repository {} is already registered", locator);
        writeln!(out, "Repository {} is already registered", locator)?;
    }
    print_repositories("Added", &added, out)
}

#[tracing::instrument(skip(service, subject, out))]
pub async fn repo_remove(
    service: &dyn FeaturesService,
    subject: &Subject,
    selector: &str,
    force: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let removed = service.remove_repository(subject, selector, force).await?;
    print_repositories("Removed", &removed, out)
}

#[tracing::instrument(skip(service, subject, out))]
pub async fn repo_refresh(
    service: &dyn FeaturesService,
    subject: &Subject,
    selector: &str,
    out: &mut dyn Write,
) -> Result<()> {
    let refreshed = service.refresh_repository(subject, selector).await?;
    print_repositories("Refreshed", &refreshed, out)
}

pub fn repo_list(service: &dyn FeaturesService, out: &mut dyn Write) -> Result<()> {
    let mut table = Table::new(&["Repository", "Repository URL"]);
    for repo in service.list_repositories()? {
        table.row(vec![repo.name, repo.locator]);
    }
    table.write_to(out)?;
    Ok(())
}
