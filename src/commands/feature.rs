use anyhow::Result;
use std::io::Write;

use crate::auth::Subject;
use crate::model::FeatureRef;
use crate::service::{
    FeaturesService, InstallOptions, ListFilter, ProvisionReport, UninstallOptions,
};

use super::table::Table;

fn parse_refs(features: &[String]) -> Result<Vec<FeatureRef>> {
    features.iter().map(|f| parse_ref(f)).collect()
}

fn parse_ref(feature: &str) -> Result<FeatureRef> {
    Ok(feature.parse()?)
}

fn print_report(report: &ProvisionReport, verbose: bool, out: &mut dyn Write) -> Result<()> {
    if report.is_empty() {
        writeln!(out, "No changes")?;
        return Ok(());
    }
    for id in &report.uninstalled {
        writeln!(out, "Uninstalled {}", id)?;
    }
    for id in &report.installed {
        writeln!(out, "Installed {}", id)?;
    }
    if verbose {
        for m in &report.stopped_modules {
            writeln!(out, "  stopped {}", m)?;
        }
        for m in &report.started_modules {
            writeln!(out, "  started {}", m)?;
        }
    }
    Ok(())
}

#[tracing::instrument(skip(service, subject, out))]
pub async fn feature_install(
    service: &dyn FeaturesService,
    subject: &Subject,
    features: &[String],
    options: InstallOptions,
    out: &mut dyn Write,
) -> Result<()> {
    let refs = parse_refs(features)?;
    let report = service.install(subject, &refs, options).await?;
    print_report(&report, options.verbose, out)
}

#[tracing::instrument(skip(service, subject, out))]
pub async fn feature_uninstall(
    service: &dyn FeaturesService,
    subject: &Subject,
    feature: &str,
    options: UninstallOptions,
    out: &mut dyn Write,
) -> Result<()> {
    let reference = parse_ref(feature)?;
    let report = service.uninstall(subject, &reference, options).await?;
    print_report(&report, false, out)
}

#[tracing::instrument(skip(service, subject, out))]
pub async fn feature_upgrade(
    service: &dyn FeaturesService,
    subject: &Subject,
    feature: &str,
    options: InstallOptions,
    out: &mut dyn Write,
) -> Result<()> {
    let reference = parse_ref(feature)?;
    let report = service.upgrade(subject, &reference, options).await?;
    print_report(&report, options.verbose, out)
}

pub fn feature_list(
    service: &dyn FeaturesService,
    filter: &ListFilter,
    out: &mut dyn Write,
) -> Result<()> {
    let mut table = Table::new(&[
        "Name",
        "Version",
        "Required",
        "State",
        "Repository",
        "Description",
    ]);
    for feature in service.list_features(filter)? {
        table.row(vec![
            feature.id.name,
            feature.id.version.to_string(),
            if feature.required { "x" } else { "" }.to_string(),
            feature.state.to_string(),
            feature.repository,
            feature.description.unwrap_or_default(),
        ]);
    }
    table.write_to(out)?;
    Ok(())
}

pub fn feature_version_list(
    service: &dyn FeaturesService,
    selector: &str,
    out: &mut dyn Write,
) -> Result<()> {
    let mut table = Table::new(&["Version", "Repository", "Repository URL", "State"]);
    for row in service.version_list(selector)? {
        table.row(vec![
            row.id.version.to_string(),
            row.repository,
            row.locator,
            row.state.to_string(),
        ]);
    }
    table.write_to(out)?;
    Ok(())
}

pub fn feature_status(service: &dyn FeaturesService, feature: &str, out: &mut dyn Write) -> Result<()> {
    let status = service.status(&parse_ref(feature)?)?;
    let required = if status.required { " (required)" } else { "" };
    writeln!(out, "{} {}{}", status.id, status.state, required)?;
    Ok(())
}

pub fn config_exists(service: &dyn FeaturesService, pid: &str, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "{}", service.config_exists(pid))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeatureError;
    use crate::model::{FeatureId, FeatureState, ModuleRef};
    use crate::service::{FeatureInfo, FeatureStatus, FeatureVersionInfo, MockFeaturesService};

    fn subject() -> Subject {
        Subject::new("ops", ["admin"])
    }

    fn output(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_install_passes_refs_and_options() {
        let mut service = MockFeaturesService::new();
        service
            .expect_install()
            .withf(|_, refs, options| {
                refs.len() == 2
                    && refs[0].name == "ssh"
                    && refs[1].name == "jdbc"
                    && options.no_auto_refresh
            })
            .returning(|_, _, _| {
                Ok(ProvisionReport {
                    installed: vec![FeatureId::new("shell", "1.0"), FeatureId::new("ssh", "1.0")],
                    started_modules: vec![ModuleRef::new("m:ssh")],
                    ..Default::default()
                })
            });

        let options = InstallOptions {
            no_auto_refresh: true,
            verbose: true,
        };
        let mut out = Vec::new();
        feature_install(
            &service,
            &subject(),
            &["ssh".into(), "jdbc/[1.0,2.0)".into()],
            options,
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(
            output(out),
            "Installed shell/1.0\nInstalled ssh/1.0\n  started m:ssh\n"
        );
    }

    #[tokio::test]
    async fn test_install_rejects_malformed_reference_before_calling_service() {
        let service = MockFeaturesService::new();
        let mut out = Vec::new();
        let result = feature_install(
            &service,
            &subject(),
            &["".into()],
            InstallOptions::default(),
            &mut out,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_uninstall_reports_no_changes() {
        let mut service = MockFeaturesService::new();
        service
            .expect_uninstall()
            .withf(|_, reference, options| reference.name == "ssh" && options.delete_config)
            .returning(|_, _, _| Ok(ProvisionReport::default()));

        let options = UninstallOptions {
            delete_config: true,
            ..Default::default()
        };
        let mut out = Vec::new();
        feature_uninstall(&service, &subject(), "ssh", options, &mut out)
            .await
            .unwrap();
        assert_eq!(output(out), "No changes\n");
    }

    #[tokio::test]
    async fn test_upgrade_propagates_errors() {
        let mut service = MockFeaturesService::new();
        service.expect_upgrade().returning(|_, _, _| {
            Err(FeatureError::not_found("No matching features for web/2.0"))
        });

        let mut out = Vec::new();
        let err = feature_upgrade(
            &service,
            &subject(),
            "web/2.0",
            InstallOptions::default(),
            &mut out,
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "No matching features for web/2.0");
    }

    #[test]
    fn test_feature_list_table() {
        let mut service = MockFeaturesService::new();
        service
            .expect_list_features()
            .withf(|filter| filter.installed_only)
            .returning(|_| {
                Ok(vec![FeatureInfo {
                    id: FeatureId::new("ssh", "1.0"),
                    required: true,
                    state: FeatureState::Started,
                    repository: "core".into(),
                    description: Some("Secure shell".into()),
                    region: "root".into(),
                }])
            });

        let filter = ListFilter {
            installed_only: true,
            repository: None,
        };
        let mut out = Vec::new();
        feature_list(&service, &filter, &mut out).unwrap();

        let text = output(out);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Name | Version | Required | State   | Repository | Description"
        );
        assert_eq!(
            lines[2],
            "ssh  | 1.0     | x        | Started | core       | Secure shell"
        );
    }

    #[test]
    fn test_version_list_empty_still_prints_header() {
        let mut service = MockFeaturesService::new();
        service.expect_version_list().returning(|_| Ok(vec![]));

        let mut out = Vec::new();
        feature_version_list(&service, "nothing", &mut out).unwrap();

        let text = output(out);
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("Version | Repository | Repository URL | State\n"));
    }

    #[test]
    fn test_version_list_rows() {
        let mut service = MockFeaturesService::new();
        service.expect_version_list().returning(|_| {
            Ok(vec![FeatureVersionInfo {
                id: FeatureId::new("web", "2.0"),
                repository: "core".into(),
                locator: "file:/srv/core.json".into(),
                state: FeatureState::Uninstalled,
            }])
        });

        let mut out = Vec::new();
        feature_version_list(&service, "web", &mut out).unwrap();
        assert!(output(out).contains("2.0     | core       | file:/srv/core.json | Uninstalled"));
    }

    #[test]
    fn test_status_and_config_exists() {
        let mut service = MockFeaturesService::new();
        service.expect_status().returning(|_| {
            Ok(FeatureStatus {
                id: FeatureId::new("ssh", "1.0"),
                state: FeatureState::Started,
                required: true,
            })
        });
        service
            .expect_config_exists()
            .withf(|pid| pid == "org.example.ssh")
            .returning(|_| false);

        let mut out = Vec::new();
        feature_status(&service, "ssh", &mut out).unwrap();
        config_exists(&service, "org.example.ssh", &mut out).unwrap();

        assert_eq!(output(out), "ssh/1.0 Started (required)\nfalse\n");
    }
}
