use anyhow::{Context, Result};
use log::debug;
use reqwest::{
    Client,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    auth::Subject,
    engine::{Engine, EngineOptions},
    http::HttpClient,
    module::InMemoryModuleRuntime,
    runtime::Runtime,
    source::{FileSource, HttpSource, SourceRegistry},
    state::StateStore,
};

use super::paths;

/// Environment variable holding a bearer token for `http(s):` repositories.
pub const TOKEN_ENV: &str = "PROVI_TOKEN";

/// Client for `http(s):` repositories, sending `token` as a bearer credential when set.
pub fn build_http_client(token: Option<&str>) -> Result<HttpClient> {
    let mut builder = Client::builder()
        .user_agent(concat!("provi/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10));
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        let mut bearer = HeaderValue::try_from(format!("Bearer {}", token))
            .with_context(|| format!("{} is not a valid header value", TOKEN_ENV))?;
        bearer.set_sensitive(true);
        builder = builder.default_headers(HeaderMap::from_iter([(AUTHORIZATION, bearer)]));
        debug!("Sending a bearer token to http(s) repositories");
    }
    let client = builder.build().context("Failed to build HTTP client")?;
    Ok(HttpClient::new(client))
}

/// Everything a command needs to reach the engine.
pub struct Config<R: Runtime> {
    pub runtime: Arc<R>,
    pub root: PathBuf,
    pub subject: Subject,
}

impl<R: Runtime + 'static> Config<R> {
    /// Resolve the root (explicit, or the per-user / system default) and the calling subject.
    pub fn new(runtime: R, root: Option<PathBuf>, roles: Vec<String>) -> Result<Self> {
        let root = match root {
            Some(path) => path,
            None => paths::default_root(&runtime)?,
        };
        let name = runtime
            .env_var("USER")
            .unwrap_or_else(|_| "provi".to_string());
        debug!("Using root {:?} as '{}' with roles {:?}", root, name, roles);

        Ok(Self {
            runtime: Arc::new(runtime),
            root,
            subject: Subject::new(name, roles),
        })
    }

    pub fn state_path(&self) -> PathBuf {
        paths::state_path(&self.root)
    }

    pub fn etc_dir(&self) -> PathBuf {
        paths::etc_dir(&self.root)
    }

    pub fn boot_config_path(&self) -> PathBuf {
        paths::boot_config_path(&self.root)
    }

    /// Sources for `file:` and `http(s):` locators.
    pub fn sources(&self) -> Result<SourceRegistry> {
        let token = self.runtime.env_var(TOKEN_ENV).ok();
        let http = build_http_client(token.as_deref())?;
        Ok(SourceRegistry::new()
            .with(Arc::new(FileSource::new(self.runtime.clone())))
            .with(Arc::new(HttpSource::new(http))))
    }

    /// Open the engine persisted under the root.
    ///
    /// Modules are only tracked, so the ones recorded by the previous run are
    /// replayed into a fresh in-memory runtime.
    pub fn engine(&self) -> Result<Engine<R>> {
        let state = StateStore::persistent(self.runtime.clone(), self.state_path());
        let modules = Arc::new(InMemoryModuleRuntime::new());
        let engine = Engine::new(
            self.runtime.clone(),
            Arc::new(self.sources()?),
            modules.clone(),
            state,
            EngineOptions::new(self.etc_dir()),
        )
        .with_context(|| format!("Failed to open state under {:?}", self.root))?;

        let running = engine.state().read(|s| {
            s.modules
                .values()
                .map(|m| (m.module.clone(), m.state))
                .collect::<Vec<_>>()
        })?;
        modules.restore(running);
        Ok(engine)
    }
}
