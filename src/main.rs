use anyhow::Result;
use clap::Parser;
use provi::{
    auth::DEFAULT_ADMIN_ROLE,
    commands::{self, Config},
    runtime::RealRuntime,
    service::{FeaturesService, InstallOptions, ListFilter, UninstallOptions},
};
use std::io::Write;
use std::path::PathBuf;

/// provi - feature provisioning
///
/// Register feature repositories, then install, upgrade and uninstall the
/// features they declare together with their dependencies.
///
/// If the PROVI_TOKEN environment variable is set, it is sent as a bearer
/// token when fetching http(s) repositories.
///
/// Examples:
///   provi repo-add file:/opt/repos/standard.json
///   provi feature-install ssh webconsole/1.2.0
///   provi feature-list --installed
#[derive(Parser, Debug)]
#[command(author, version = env!("PROVI_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// State root directory (overrides defaults; also via PROVI_ROOT)
    #[arg(long = "root", env = "PROVI_ROOT", value_name = "PATH", global = true)]
    pub root: Option<PathBuf>,

    /// Role held by the caller; repeat for several (also via PROVI_ROLE, comma separated)
    #[arg(
        long = "role",
        env = "PROVI_ROLE",
        value_name = "ROLE",
        value_delimiter = ',',
        default_value = DEFAULT_ADMIN_ROLE,
        global = true
    )]
    pub roles: Vec<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Register a repository and the repositories it imports
    RepoAdd(RepoAddArgs),

    /// Remove repositories by locator or regular expression
    RepoRemove(RepoRemoveArgs),

    /// Re-fetch repositories by locator or regular expression
    RepoRefresh(SelectorArgs),

    /// List registered repositories
    RepoList,

    /// Install features and their dependencies
    FeatureInstall(FeatureInstallArgs),

    /// Uninstall a feature
    FeatureUninstall(FeatureUninstallArgs),

    /// Replace an installed feature with another version
    FeatureUpgrade(FeatureUpgradeArgs),

    /// List known features
    FeatureList(FeatureListArgs),

    /// List the versions of features matching a name or regular expression
    FeatureVersionList(SelectorArgs),

    /// Show the state of a feature
    FeatureStatus(FeatureArg),

    /// Check whether a configuration PID has been written
    ConfigExists(ConfigExistsArgs),

    /// Apply <root>/etc/features.json
    Boot,
}

impl Commands {
    fn verbose(&self) -> bool {
        match self {
            Commands::FeatureInstall(args) => args.verbose,
            Commands::FeatureUpgrade(args) => args.verbose,
            _ => false,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct RepoAddArgs {
    /// Repository locator (file:, http: or https:)
    #[arg(value_name = "LOCATOR")]
    pub locator: String,

    /// Install the features the repository flags for installation
    #[arg(long)]
    pub install: bool,
}

#[derive(clap::Args, Debug)]
pub struct RepoRemoveArgs {
    #[arg(value_name = "LOCATOR_OR_REGEX")]
    pub selector: String,

    /// Uninstall features from the repository (and their dependents) first
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args, Debug)]
pub struct SelectorArgs {
    #[arg(value_name = "NAME_OR_REGEX")]
    pub selector: String,
}

#[derive(clap::Args, Debug)]
pub struct FeatureInstallArgs {
    /// Features as name or name/version
    #[arg(value_name = "FEATURE", required = true)]
    pub features: Vec<String>,

    /// Do not refresh modules after provisioning
    #[arg(short = 'r', long)]
    pub no_auto_refresh: bool,

    /// Print every provisioning step
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

#[derive(clap::Args, Debug)]
pub struct FeatureUninstallArgs {
    #[arg(value_name = "FEATURE")]
    pub feature: String,

    /// Do not refresh modules after provisioning
    #[arg(short = 'r', long)]
    pub no_auto_refresh: bool,

    /// Delete the configuration the feature created
    #[arg(short = 'c', long)]
    pub delete_config: bool,
}

#[derive(clap::Args, Debug)]
pub struct FeatureUpgradeArgs {
    #[arg(value_name = "FEATURE")]
    pub feature: String,

    /// Do not refresh modules after provisioning
    #[arg(short = 'r', long)]
    pub no_auto_refresh: bool,

    /// Print every provisioning step
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

#[derive(clap::Args, Debug)]
pub struct FeatureListArgs {
    /// Only installed features
    #[arg(short = 'i', long)]
    pub installed: bool,

    /// Only features of this repository (name or locator)
    #[arg(long, value_name = "NAME")]
    pub repository: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct FeatureArg {
    #[arg(value_name = "FEATURE")]
    pub feature: String,
}

#[derive(clap::Args, Debug)]
pub struct ConfigExistsArgs {
    #[arg(value_name = "PID")]
    pub pid: String,
}

async fn run(
    command: Commands,
    config: &Config<RealRuntime>,
    service: &dyn FeaturesService,
    out: &mut dyn Write,
) -> Result<()> {
    let subject = &config.subject;
    match command {
        Commands::RepoAdd(args) => {
            commands::repo_add(service, subject, &args.locator, args.install, out).await
        }
        Commands::RepoRemove(args) => {
            commands::repo_remove(service, subject, &args.selector, args.force, out).await
        }
        Commands::RepoRefresh(args) => {
            commands::repo_refresh(service, subject, &args.selector, out).await
        }
        Commands::RepoList => commands::repo_list(service, out),
        Commands::FeatureInstall(args) => {
            let options = InstallOptions {
                no_auto_refresh: args.no_auto_refresh,
                verbose: args.verbose,
            };
            commands::feature_install(service, subject, &args.features, options, out).await
        }
        Commands::FeatureUninstall(args) => {
            let options = UninstallOptions {
                no_auto_refresh: args.no_auto_refresh,
                delete_config: args.delete_config,
            };
            commands::feature_uninstall(service, subject, &args.feature, options, out).await
        }
        Commands::FeatureUpgrade(args) => {
            let options = InstallOptions {
                no_auto_refresh: args.no_auto_refresh,
                verbose: args.verbose,
            };
            commands::feature_upgrade(service, subject, &args.feature, options, out).await
        }
        Commands::FeatureList(args) => {
            let filter = ListFilter {
                installed_only: args.installed,
                repository: args.repository,
            };
            commands::feature_list(service, &filter, out)
        }
        Commands::FeatureVersionList(args) => {
            commands::feature_version_list(service, &args.selector, out)
        }
        Commands::FeatureStatus(args) => commands::feature_status(service, &args.feature, out),
        Commands::ConfigExists(args) => commands::config_exists(service, &args.pid, out),
        Commands::Boot => {
            let path = config.boot_config_path();
            commands::boot(config.runtime.as_ref(), service, subject, &path, out).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.command.verbose() { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = Config::new(RealRuntime, cli.root, cli.roles)?;
    let engine = config.engine()?;
    let mut out = std::io::stdout();
    run(cli.command, &config, &engine, &mut out).await
}
