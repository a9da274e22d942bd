//! Remote git backend.
//!
//! Clones a single branch or tag with depth 1 through the `git` CLI into a
//! temporary directory, reads it into a [`VirtualTree`] and serves the
//! configured sub-directory as a module directory.
//!
//! Basic-auth credentials reach `git` as an `http.extraHeader` set through
//! the `GIT_CONFIG_*` environment, so they never appear on a command line.
//!
//! Clones are cached per `(url, ref)` for the life of the [`CloneCache`].
//! A branch that moves after the first clone keeps serving the old tip until
//! the process exits; plugins are loaded once per orchestration run, so the
//! run stays deterministic.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DirectoryRepository, ModuleLayout, SourceBundle, SourceRepository, VirtualTree};
use crate::cache::SingleFlight;
use crate::{Error, Result};

const DEFAULT_CLONE_TIMEOUT: Duration = Duration::from_secs(60);

const BASIC_AUTH_PREFIX: &str = "Authorization: Basic ";

/// Optional basic-auth credentials for HTTP(S) remotes.
#[derive(Clone, Debug, Deserialize)]
pub struct GitAuth {
    pub username: String,
    pub password: SecretString,
}

impl GitAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GitSourceConfig {
    pub url: String,
    /// Tag or branch name; tags win when both exist.
    pub reference: String,
    /// Absolute directory from the repository root holding the module.
    pub dir: String,
    pub auth: Option<GitAuth>,
    /// Deadline for the whole clone, every reference attempt included.
    pub timeout: Duration,
}

impl GitSourceConfig {
    pub fn new(url: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reference: reference.into(),
            dir: "/".to_string(),
            auth: None,
            timeout: DEFAULT_CLONE_TIMEOUT,
        }
    }

    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn auth(mut self, auth: GitAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn validate(&mut self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::InvalidConfig("git url is required".into()));
        }
        if self.reference.is_empty() {
            return Err(Error::InvalidConfig("git ref is required".into()));
        }
        if self.dir.is_empty() {
            self.dir = "/".to_string();
        }
        if !self.dir.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "repo dir '{}' should be absolute from the repo root",
                self.dir
            )));
        }
        Ok(())
    }

    /// `http.extraHeader` value for authenticated HTTP(S) remotes.
    ///
    /// `None` without credentials or with an empty password.
    fn auth_header(&self) -> Result<Option<SecretString>> {
        let Some(auth) = &self.auth else {
            return Ok(None);
        };
        if auth.password.expose_secret().is_empty() {
            return Ok(None);
        }

        let url = url::Url::parse(&self.url)
            .map_err(|e| Error::InvalidConfig(format!("invalid git url '{}': {e}", self.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "basic auth requires an http(s) url, got '{}'",
                url.scheme()
            )));
        }

        let token = BASE64_STANDARD.encode(format!(
            "{}:{}",
            auth.username,
            auth.password.expose_secret()
        ));
        Ok(Some(SecretString::from(format!("{BASIC_AUTH_PREFIX}{token}"))))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CloneKey {
    url: String,
    reference: String,
}

/// Process-lifetime cache of cloned trees, single-flighted per `(url, ref)`.
#[derive(Default)]
pub struct CloneCache {
    clones: SingleFlight<CloneKey, Arc<VirtualTree>>,
}

impl CloneCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache shared by every [`GitRepository::fetch`] call in the process.
    pub fn shared() -> &'static CloneCache {
        static SHARED: OnceLock<CloneCache> = OnceLock::new();
        SHARED.get_or_init(CloneCache::new)
    }

    pub fn len(&self) -> usize {
        self.clones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) async fn get_or_clone<F, Fut>(
        &self,
        url: &str,
        reference: &str,
        clone: F,
    ) -> Result<Arc<VirtualTree>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<VirtualTree>>,
    {
        let key = CloneKey {
            url: url.to_string(),
            reference: reference.to_string(),
        };
        let (tree, cloned) = self
            .clones
            .get_or_try_init(key, || async { clone().await.map(Arc::new) })
            .await?;
        if !cloned {
            debug!(url, reference, "Using cached clone");
        }
        Ok(tree)
    }
}

impl std::fmt::Debug for CloneCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneCache")
            .field("clones", &self.clones.len())
            .finish()
    }
}

/// Module directory served from a remote git reference.
#[derive(Debug, Clone)]
pub struct GitRepository {
    inner: DirectoryRepository,
}

impl GitRepository {
    /// Clones (or reuses) the reference through the process-wide [`CloneCache`].
    pub async fn fetch(config: GitSourceConfig, layout: &ModuleLayout) -> Result<Self> {
        let cancel = CancellationToken::new();
        Self::fetch_with(config, layout, CloneCache::shared(), &cancel).await
    }

    pub async fn fetch_with(
        mut config: GitSourceConfig,
        layout: &ModuleLayout,
        cache: &CloneCache,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let clone = || clone_tree(&config, cancel);
        let tree = cache
            .get_or_clone(&config.url, &config.reference, clone)
            .await?;

        let name = format!("git:{}@{}{}", config.url, config.reference, config.dir);
        let inner = DirectoryRepository::build(name, &tree.subtree(&config.dir), layout)?;
        Ok(Self { inner })
    }

    pub fn module(&self) -> &str {
        self.inner.module()
    }
}

#[async_trait]
impl SourceRepository for GitRepository {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_code(&self) -> Result<SourceBundle> {
        self.inner.get_code().await
    }

    fn identity(&self) -> Option<&str> {
        self.inner.identity()
    }
}

async fn clone_tree(config: &GitSourceConfig, cancel: &CancellationToken) -> Result<VirtualTree> {
    let header = config.auth_header()?;
    let candidates = [
        format!("refs/tags/{}", config.reference),
        format!("refs/heads/{}", config.reference),
    ];

    let attempts = async {
        let mut last_error = String::new();
        for refname in &candidates {
            match clone_ref(&config.url, refname, header.as_ref(), cancel).await {
                Ok(tree) => {
                    info!(
                        url = %config.url,
                        reference = %refname,
                        files = tree.len(),
                        "Cloned plugin repository"
                    );
                    return Ok(tree);
                }
                Err(e) => {
                    debug!(
                        url = %config.url,
                        reference = %refname,
                        error = %e,
                        "Clone attempt failed"
                    );
                    last_error = e;
                    if cancel.is_cancelled() {
                        break;
                    }
                }
            }
        }
        Err(last_error)
    };

    with_deadline(config.timeout, attempts).await.map_err(|e| {
        Error::retrieval(
            format!("git:{}", config.url),
            format!("could not clone '{}': {e}", config.reference),
        )
    })
}

/// Fails with a timeout message once `timeout` elapses; dropping `attempt`
/// kills any `git` child it still has running.
async fn with_deadline<T, F>(timeout: Duration, attempt: F) -> std::result::Result<T, String>
where
    F: Future<Output = std::result::Result<T, String>>,
{
    tokio::time::timeout(timeout, attempt)
        .await
        .unwrap_or_else(|_| Err(format!("timed out after {timeout:?}")))
}

async fn clone_ref(
    url: &str,
    refname: &str,
    header: Option<&SecretString>,
    cancel: &CancellationToken,
) -> std::result::Result<VirtualTree, String> {
    let workdir = tempfile::tempdir().map_err(|e| format!("temp dir: {e}"))?;
    let dir = workdir.path();

    run_git(git_command(dir, &["init", "--quiet"], None), cancel).await?;
    let fetch = ["fetch", "--quiet", "--depth", "1", url, refname];
    run_git(git_command(dir, &fetch, header), cancel)
        .await
        .map_err(|e| redact(&e, header))?;
    let checkout = ["checkout", "--quiet", "FETCH_HEAD"];
    run_git(git_command(dir, &checkout, None), cancel).await?;

    let tree = VirtualTree::from_dir(dir).await.map_err(|e| e.to_string())?;
    Ok(strip_git_dir(tree))
}

fn strip_git_dir(tree: VirtualTree) -> VirtualTree {
    let mut stripped = VirtualTree::new();
    for (path, data) in tree.iter() {
        if !path.starts_with(".git/") {
            stripped.insert(path, data);
        }
    }
    stripped
}

fn git_command(dir: &Path, args: &[&str], header: Option<&SecretString>) -> Command {
    let mut command = Command::new("git");
    command
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(header) = header {
        command
            .env("GIT_CONFIG_COUNT", "1")
            .env("GIT_CONFIG_KEY_0", "http.extraHeader")
            .env("GIT_CONFIG_VALUE_0", header.expose_secret());
    }
    command
}

async fn run_git(
    mut command: Command,
    cancel: &CancellationToken,
) -> std::result::Result<(), String> {
    let subcommand = command
        .as_std()
        .get_args()
        .next()
        .map(|arg| arg.to_string_lossy().into_owned())
        .unwrap_or_default();

    let output = tokio::select! {
        _ = cancel.cancelled() => return Err("clone cancelled".to_string()),
        res = command.output() => res.map_err(|e| format!("could not run git: {e}"))?,
    };

    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "git {subcommand} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

fn redact(message: &str, header: Option<&SecretString>) -> String {
    let token = header.and_then(|h| h.expose_secret().strip_prefix(BASIC_AUTH_PREFIX));
    match token {
        Some(token) if !token.is_empty() => message.replace(token, "***"),
        _ => message.to_string(),
    }
}
