//! Job configuration
//!
//! A job file (JSON, YAML or TOML) describes one reconciliation target. It is
//! split into five sections: `Common`, `Git`, `Docker`, `Deploy` and `Sync`.
//! A loaded [`JobSpec`] is never mutated by the runtime; an edited file is
//! reloaded into a fresh value.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::backoff::effective_interval_secs;
use crate::substitute::{replace_env, replace_self_tokens};
use crate::{Fingerprint, Result, TagpilotError};

/// Process-wide run mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    Production,
    /// Allows check intervals below the production minimum
    Development,
}

impl RunMode {
    pub fn allows_short_intervals(self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" | "" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            _ => Err(format!("Invalid run mode: {}", s)),
        }
    }
}

/// How a job discovers candidate releases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Keep a local working copy and build from it
    Clone,
    /// List remote tags without a working copy; deploy only
    Watch,
}

/// On-disk job file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFormat {
    Json,
    Yaml,
    Toml,
}

impl JobFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            _ => Err(TagpilotError::Config(format!(
                "unsupported job file extension: {}",
                path.display()
            ))),
        }
    }
}

/// A parsed job and the fingerprint of the exact bytes it was parsed from
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedJob {
    pub spec: JobSpec,
    pub fingerprint: Fingerprint,
}

impl LoadedJob {
    /// Read a job file once, fingerprint it and parse it
    pub async fn read(path: &Path, mode: RunMode) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            TagpilotError::Config(format!("failed to read job file {}: {}", path.display(), e))
        })?;
        let fingerprint = Fingerprint::of_bytes(&bytes);
        let raw = String::from_utf8(bytes).map_err(|_| {
            TagpilotError::Config(format!("job file {} is not valid UTF-8", path.display()))
        })?;
        Ok(Self {
            spec: JobSpec::from_source(path, &raw, mode)?,
            fingerprint,
        })
    }
}

/// Complete configuration of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(rename = "Common", default)]
    pub common: CommonSpec,

    #[serde(rename = "Git", default)]
    pub git: GitSpec,

    #[serde(rename = "Docker", default)]
    pub docker: DockerSpec,

    #[serde(rename = "Deploy", default)]
    pub deploy: DeploySpec,

    #[serde(rename = "Sync", default)]
    pub sync: SyncSpec,

    /// File the job was loaded from
    #[serde(skip)]
    pub source_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonSpec {
    #[serde(default)]
    pub job_name: String,

    #[serde(default = "default_job_type")]
    pub job_type: String,

    /// Poll interval in seconds
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    #[serde(default = "default_true", deserialize_with = "flexible_bool")]
    pub is_active: bool,

    #[serde(default)]
    pub variable_1: String,
    #[serde(default)]
    pub variable_2: String,
    #[serde(default)]
    pub variable_3: String,
    #[serde(default)]
    pub variable_4: String,
    #[serde(default)]
    pub variable_5: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitSpec {
    #[serde(default = "default_true", deserialize_with = "flexible_bool")]
    pub do_git_clone: bool,

    #[serde(default = "default_repo_url")]
    pub git_repo_url: String,

    /// Path to a private key, or `VAR:NAME` to read the key from `$NAME`
    #[serde(default = "default_private_key")]
    pub git_private_key: String,

    #[serde(default = "default_start_tag")]
    pub git_start_tag: String,

    /// Ceiling; empty means unbounded
    #[serde(default)]
    pub git_max_tag: String,

    #[serde(default = "default_branch")]
    pub git_branch: String,

    #[serde(default = "default_tag_prefix")]
    pub git_tag_prefix: String,

    /// Base path of the persisted applied-tag file
    #[serde(default = "default_start_tag_file")]
    pub git_start_tag_file: String,

    #[serde(default = "default_local_folder")]
    pub git_local_folder: String,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerSpec {
    #[serde(default, deserialize_with = "flexible_bool")]
    pub do_docker_build: bool,

    #[serde(default = "default_docker_file")]
    pub docker_file: String,

    #[serde(default)]
    pub docker_image: String,

    #[serde(default = "default_platforms")]
    pub docker_platforms: Vec<String>,

    #[serde(default = "default_docker_server")]
    pub docker_server: String,

    #[serde(default)]
    pub docker_user: String,

    #[serde(default)]
    pub docker_password: String,

    /// Directory holding a ready-made registry `config.json`
    #[serde(default)]
    pub docker_config_dir: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploySpec {
    #[serde(default, deserialize_with = "flexible_bool")]
    pub do_manifest_deploy: bool,

    /// Track remote tags without a working copy
    #[serde(default, deserialize_with = "flexible_bool")]
    pub do_watch_image_tag: bool,

    #[serde(default)]
    pub kubeconfig: String,

    #[serde(default)]
    pub context_k8s: String,

    #[serde(default = "default_namespace")]
    pub namespace_k8s: String,

    #[serde(default)]
    pub deployment_name_k8s: String,

    /// Manifest template path
    #[serde(default)]
    pub manifests_k8s: String,

    #[serde(default = "default_secrets_path")]
    pub secrets_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSpec {
    #[serde(default, deserialize_with = "flexible_bool")]
    pub do_subfolder_sync: bool,

    /// Subfolder of the working copy; empty mirrors the whole tree
    #[serde(default)]
    pub git_sub_folder: String,

    #[serde(default)]
    pub target_folder: String,
}

impl fmt::Debug for DockerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerSpec")
            .field("do_docker_build", &self.do_docker_build)
            .field("docker_file", &self.docker_file)
            .field("docker_image", &self.docker_image)
            .field("docker_platforms", &self.docker_platforms)
            .field("docker_server", &self.docker_server)
            .field("docker_user", &self.docker_user)
            .field(
                "docker_password",
                &if self.docker_password.is_empty() { "" } else { "<redacted>" },
            )
            .field("docker_config_dir", &self.docker_config_dir)
            .finish()
    }
}

// Default value providers
fn env_or(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn default_true() -> bool {
    true
}

fn default_job_type() -> String {
    env_or("JOB_TYPE", "tags-prefixed")
}

fn default_check_interval() -> u64 {
    std::env::var("CHECK_INTERVAL")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(300)
}

fn default_repo_url() -> String {
    env_or("GIT_REPO_URL", "")
}

fn default_private_key() -> String {
    env_or("GIT_PRIVATE_KEY", "")
}

fn default_start_tag() -> String {
    env_or("GIT_START_TAG", "v1.0.0")
}

fn default_branch() -> String {
    env_or("GIT_BRANCH", "main")
}

fn default_tag_prefix() -> String {
    env_or("GIT_TAG_PREFIX", "v")
}

fn default_start_tag_file() -> String {
    env_or("GIT_START_TAG_FILE", "/tmp/start-tag-file")
}

fn default_local_folder() -> String {
    env_or("GIT_LOCAL_FOLDER", "/tmp/git_local_repo")
}

fn default_docker_file() -> String {
    env_or("DOCKER_FILE", "Dockerfile")
}

fn default_platforms() -> Vec<String> {
    env_or("DOCKER_PLATFORMS", "linux/amd64")
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn default_docker_server() -> String {
    env_or("DOCKER_SERVER", "https://index.docker.io/v1/")
}

fn default_namespace() -> String {
    env_or("NAMESPACE_K8S", "default")
}

fn default_secrets_path() -> String {
    "/root/.config/pg".to_string()
}

/// Accept `true`, `false`, `"true"` and `"false"`
fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Str(String),
    }

    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => Ok(b),
        BoolOrString::Str(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, found '{}'",
                other
            ))),
        },
    }
}

impl Default for CommonSpec {
    fn default() -> Self {
        Self {
            job_name: String::new(),
            job_type: default_job_type(),
            check_interval: default_check_interval(),
            is_active: true,
            variable_1: String::new(),
            variable_2: String::new(),
            variable_3: String::new(),
            variable_4: String::new(),
            variable_5: String::new(),
        }
    }
}

impl Default for GitSpec {
    fn default() -> Self {
        Self {
            do_git_clone: true,
            git_repo_url: default_repo_url(),
            git_private_key: default_private_key(),
            git_start_tag: default_start_tag(),
            git_max_tag: String::new(),
            git_branch: default_branch(),
            git_tag_prefix: default_tag_prefix(),
            git_start_tag_file: default_start_tag_file(),
            git_local_folder: default_local_folder(),
        }
    }
}

impl Default for DockerSpec {
    fn default() -> Self {
        Self {
            do_docker_build: false,
            docker_file: default_docker_file(),
            docker_image: String::new(),
            docker_platforms: default_platforms(),
            docker_server: default_docker_server(),
            docker_user: String::new(),
            docker_password: String::new(),
            docker_config_dir: String::new(),
        }
    }
}

impl Default for DeploySpec {
    fn default() -> Self {
        Self {
            do_manifest_deploy: false,
            do_watch_image_tag: false,
            kubeconfig: String::new(),
            context_k8s: String::new(),
            namespace_k8s: default_namespace(),
            deployment_name_k8s: String::new(),
            manifests_k8s: String::new(),
            secrets_path: default_secrets_path(),
        }
    }
}

impl Default for SyncSpec {
    fn default() -> Self {
        Self {
            do_subfolder_sync: false,
            git_sub_folder: String::new(),
            target_folder: String::new(),
        }
    }
}

impl GitSpec {
    /// Whether the remote needs SSH credentials
    pub fn is_ssh_url(&self) -> bool {
        self.git_repo_url.starts_with("git@") || self.git_repo_url.starts_with("ssh://")
    }
}

impl JobSpec {
    /// Parse raw job file content read from `path`
    pub fn from_source(path: &Path, raw: &str, mode: RunMode) -> Result<Self> {
        let format = JobFormat::from_path(path)?;
        let mut spec = Self::parse(&replace_env(raw), format, mode)?;
        spec.source_path = path.to_path_buf();
        debug!("Loaded job '{}' from {}", spec.name(), path.display());
        Ok(spec)
    }

    /// Parse job file content that already had environment tokens replaced
    pub fn parse(content: &str, format: JobFormat, mode: RunMode) -> Result<Self> {
        let mut spec: JobSpec = match format {
            JobFormat::Json => serde_json::from_str(content)?,
            JobFormat::Yaml => serde_yaml::from_str(content)?,
            JobFormat::Toml => toml::from_str(content)?,
        };

        spec.resolve_self_references()?;
        spec.common.check_interval =
            effective_interval_secs(spec.common.check_interval, mode.allows_short_intervals());
        spec.validate()?;
        Ok(spec)
    }

    pub fn name(&self) -> &str {
        &self.common.job_name
    }

    pub fn is_active(&self) -> bool {
        self.common.is_active
    }

    pub fn interval_secs(&self) -> u64 {
        self.common.check_interval
    }

    pub fn tag_prefix(&self) -> &str {
        &self.git.git_tag_prefix
    }

    /// Path of the persisted applied-tag file: `<base>.<job name>`
    pub fn state_file_path(&self) -> PathBuf {
        let base = if self.git.git_start_tag_file.is_empty() {
            "/tmp/start-tag-file"
        } else {
            &self.git.git_start_tag_file
        };
        PathBuf::from(format!("{}.{}", base, self.common.job_name))
    }

    /// The single active reconciliation mode
    pub fn mode(&self) -> Result<ReconcileMode> {
        match (self.git.do_git_clone, self.deploy.do_watch_image_tag) {
            (true, false) => Ok(ReconcileMode::Clone),
            (false, true) => Ok(ReconcileMode::Watch),
            (true, true) => Err(TagpilotError::Config(format!(
                "job '{}': do_git_clone and do_watch_image_tag are mutually exclusive",
                self.name()
            ))),
            (false, false) => Err(TagpilotError::Config(format!(
                "job '{}': enable either do_git_clone or do_watch_image_tag",
                self.name()
            ))),
        }
    }

    /// Full image reference for a release
    pub fn image_for(&self, tag: &str) -> String {
        format!("{}:{}", self.docker.docker_image, tag)
    }

    /// Look up a field by `Section:field` for `{{ThisConfig:...}}` tokens.
    ///
    /// Only the keys listed here can be referenced.
    pub fn reference(&self, key: &str) -> Option<String> {
        let value = match key.to_lowercase().as_str() {
            "common:job_name" => &self.common.job_name,
            "common:job_type" => &self.common.job_type,
            "common:variable_1" => &self.common.variable_1,
            "common:variable_2" => &self.common.variable_2,
            "common:variable_3" => &self.common.variable_3,
            "common:variable_4" => &self.common.variable_4,
            "common:variable_5" => &self.common.variable_5,
            "git:git_repo_url" => &self.git.git_repo_url,
            "git:git_branch" => &self.git.git_branch,
            "git:git_tag_prefix" => &self.git.git_tag_prefix,
            "git:git_start_tag" => &self.git.git_start_tag,
            "git:git_max_tag" => &self.git.git_max_tag,
            "git:git_local_folder" => &self.git.git_local_folder,
            "docker:docker_image" => &self.docker.docker_image,
            "docker:docker_server" => &self.docker.docker_server,
            "deploy:namespace_k8s" => &self.deploy.namespace_k8s,
            "deploy:deployment_name_k8s" => &self.deploy.deployment_name_k8s,
            "deploy:context_k8s" => &self.deploy.context_k8s,
            "sync:git_sub_folder" => &self.sync.git_sub_folder,
            "sync:target_folder" => &self.sync.target_folder,
            _ => return None,
        };
        Some(value.clone())
    }

    fn resolve_self_references(&mut self) -> Result<()> {
        let snapshot = self.clone();
        let fields: [&mut String; 27] = [
            &mut self.common.job_name,
            &mut self.common.job_type,
            &mut self.common.variable_1,
            &mut self.common.variable_2,
            &mut self.common.variable_3,
            &mut self.common.variable_4,
            &mut self.common.variable_5,
            &mut self.git.git_repo_url,
            &mut self.git.git_private_key,
            &mut self.git.git_start_tag,
            &mut self.git.git_max_tag,
            &mut self.git.git_branch,
            &mut self.git.git_start_tag_file,
            &mut self.git.git_local_folder,
            &mut self.docker.docker_file,
            &mut self.docker.docker_image,
            &mut self.docker.docker_server,
            &mut self.docker.docker_config_dir,
            &mut self.deploy.kubeconfig,
            &mut self.deploy.context_k8s,
            &mut self.deploy.namespace_k8s,
            &mut self.deploy.deployment_name_k8s,
            &mut self.deploy.manifests_k8s,
            &mut self.deploy.secrets_path,
            &mut self.sync.git_sub_folder,
            &mut self.sync.target_folder,
            &mut self.git.git_tag_prefix,
        ];

        for field in fields {
            if let Some(replaced) = replace_self_tokens(field, |key| snapshot.reference(key))? {
                *field = replaced;
            }
        }
        Ok(())
    }

    /// Check cross-field requirements
    pub fn validate(&self) -> Result<()> {
        let name = self.name();
        if name.trim().is_empty() {
            return Err(TagpilotError::Config("job_name must not be empty".to_string()));
        }

        let fail = |msg: &str| Err(TagpilotError::Config(format!("job '{}': {}", name, msg)));

        let mode = self.mode()?;
        if self.git.git_repo_url.is_empty() {
            return fail("git_repo_url is required");
        }
        if !self.git.git_max_tag.is_empty() {
            crate::tag::decode(&self.git.git_max_tag, self.tag_prefix())?;
        }
        if self.docker.do_docker_build && self.docker.docker_image.is_empty() {
            return fail("docker_image is required when do_docker_build is set");
        }
        if self.docker.do_docker_build && self.docker.docker_platforms.is_empty() {
            return fail("docker_platforms must list at least one platform");
        }
        if self.sync.do_subfolder_sync && self.sync.target_folder.is_empty() {
            return fail("target_folder is required when do_subfolder_sync is set");
        }
        if self.deploy.do_manifest_deploy && self.deploy.deployment_name_k8s.is_empty() {
            return fail("deployment_name_k8s is required when do_manifest_deploy is set");
        }

        if mode == ReconcileMode::Watch {
            if self.docker.do_docker_build || self.sync.do_subfolder_sync {
                return fail("watch mode has no working copy to build or sync from");
            }
            if !self.deploy.do_manifest_deploy {
                return fail("watch mode requires do_manifest_deploy");
            }
        }
        if self.deploy.do_manifest_deploy && self.deploy.manifests_k8s.is_empty() {
            return fail("manifests_k8s is required when do_manifest_deploy is set");
        }
        // The live tag is read back from the deployment by image name
        if self.deploy.do_manifest_deploy && self.docker.docker_image.is_empty() {
            return fail("docker_image is required when do_manifest_deploy is set");
        }

        Ok(())
    }
}
