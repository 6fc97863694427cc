//! Image builds and registry credentials
//!
//! Every docker invocation uses `docker --config <credentials-dir>` so the
//! credential file never lands in the user's own docker config.

use std::path::{Path, PathBuf};
use tagpilot_core::{DockerSpec, Result, TagpilotError};
use tracing::{debug, info, instrument, warn};

use crate::command::{CommandRunner, CommandSpec};

/// Name of the credential file inside a docker config directory
pub const CREDENTIALS_FILE: &str = "config.json";

/// Resolved registry login
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryLogin {
    pub server: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryLogin")
            .field("server", &self.server)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl RegistryLogin {
    /// Take values from the job, falling back to `lookup` for
    /// `DOCKER_SERVER`, `DOCKER_USER` and `DOCKER_PASSWORD`
    pub fn resolve<F>(spec: &DockerSpec, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |value: &str, var: &str| -> Option<String> {
            if value.is_empty() {
                lookup(var).filter(|v| !v.is_empty())
            } else {
                Some(value.to_string())
            }
        };

        let missing = |what: &str| {
            TagpilotError::Credentials(format!(
                "no registry {} configured and {} is not set",
                what,
                match what {
                    "server" => "DOCKER_SERVER",
                    "user" => "DOCKER_USER",
                    _ => "DOCKER_PASSWORD",
                }
            ))
        };

        Ok(Self {
            server: pick(&spec.docker_server, "DOCKER_SERVER").ok_or_else(|| missing("server"))?,
            user: pick(&spec.docker_user, "DOCKER_USER").ok_or_else(|| missing("user"))?,
            password: pick(&spec.docker_password, "DOCKER_PASSWORD")
                .ok_or_else(|| missing("password"))?,
        })
    }
}

/// Path of the credential file inside `dir`
pub fn credentials_file(dir: &Path) -> PathBuf {
    dir.join(CREDENTIALS_FILE)
}

/// Make `<dir>/config.json` hold valid registry credentials.
///
/// A `config.json` in the job's `docker_config_dir` is copied as-is. Otherwise
/// `docker login --password-stdin` writes it. Missing login values are a
/// `Credentials` error; a copy or login that fails is a `Build` error.
#[instrument(skip(runner, spec), fields(dir = %dir.display()))]
pub async fn materialize_credentials<R: CommandRunner>(
    runner: &R,
    dir: &Path,
    spec: &DockerSpec,
) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    if !spec.docker_config_dir.is_empty() {
        let source = credentials_file(Path::new(&spec.docker_config_dir));
        if tokio::fs::try_exists(&source).await? {
            debug!("Copying registry credentials from {}", source.display());
            tokio::fs::copy(&source, credentials_file(dir))
                .await
                .map_err(|e| {
                    TagpilotError::Build(format!(
                        "failed to copy {}: {}",
                        source.display(),
                        e
                    ))
                })?;
            return Ok(());
        }
        warn!(
            "{} not found, falling back to registry login",
            source.display()
        );
    }

    let login = RegistryLogin::resolve(spec, |var| std::env::var(var).ok())?;
    let config_dir = dir.to_string_lossy().to_string();
    let cmd = CommandSpec::new("docker")
        .args([
            "--config",
            config_dir.as_str(),
            "login",
            "--username",
            login.user.as_str(),
            "--password-stdin",
            login.server.as_str(),
        ])
        .stdin(login.password.clone());
    runner
        .run(&cmd)
        .await?
        .check("docker login", TagpilotError::Build)?;

    info!("Logged in to {}", login.server);
    Ok(())
}

/// Remove `<dir>/config.json`; returns whether a file was removed
pub fn remove_credentials(dir: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(credentials_file(dir)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Multi-platform image builder using `docker buildx`
pub struct ImageBuilder<R: CommandRunner> {
    runner: R,
    credentials_dir: PathBuf,
}

impl<R: CommandRunner> ImageBuilder<R> {
    pub fn new(runner: R, credentials_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            credentials_dir: credentials_dir.into(),
        }
    }

    /// Build `image_ref` for all `platforms` from `context` and push it
    ///
    /// Executes: `docker --config {dir} buildx build --push --platform {p1,p2}
    /// --progress=plain -f {docker_file} -t {image_ref} .`
    #[instrument(skip(self, context), fields(context = %context.display()))]
    pub async fn build_and_push(
        &self,
        context: &Path,
        docker_file: &str,
        image_ref: &str,
        platforms: &[String],
    ) -> Result<()> {
        if platforms.is_empty() {
            return Err(TagpilotError::Build(
                "no target platforms configured".to_string(),
            ));
        }

        let platform_list = platforms.join(",");
        let config_dir = self.credentials_dir.to_string_lossy().to_string();
        info!("Building and pushing {} for {}", image_ref, platform_list);
        let cmd = CommandSpec::new("docker")
            .args([
                "--config",
                config_dir.as_str(),
                "buildx",
                "build",
                "--push",
                "--platform",
                platform_list.as_str(),
                "--progress=plain",
                "-f",
                docker_file,
                "-t",
                image_ref,
                ".",
            ])
            .cwd(context);

        self.runner
            .run(&cmd)
            .await?
            .check("docker buildx build", TagpilotError::Build)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, MockRunner};

    fn spec() -> DockerSpec {
        DockerSpec {
            do_docker_build: true,
            docker_image: "registry.example.com/app".to_string(),
            docker_server: "registry.example.com".to_string(),
            docker_user: "deployer".to_string(),
            docker_password: "s3cret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_login_falls_back_to_environment() {
        let mut spec = spec();
        spec.docker_user.clear();
        spec.docker_password.clear();

        let login = RegistryLogin::resolve(&spec, |var| match var {
            "DOCKER_USER" => Some("env-user".to_string()),
            "DOCKER_PASSWORD" => Some("env-pass".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(login.user, "env-user");
        assert_eq!(login.password, "env-pass");
        assert_eq!(login.server, "registry.example.com");
        assert!(!format!("{:?}", login).contains("env-pass"));
    }

    #[test]
    fn test_login_missing_password() {
        let mut spec = spec();
        spec.docker_password.clear();
        let err = RegistryLogin::resolve(&spec, |_| None).unwrap_err();
        assert!(matches!(err, TagpilotError::Credentials(msg) if msg.contains("DOCKER_PASSWORD")));
    }

    #[tokio::test]
    async fn test_materialize_via_login() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MockRunner::new().with_response("docker --config", CommandOutput::ok(""));

        materialize_credentials(&runner, dir.path(), &spec())
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0]
            .command
            .ends_with("login --username deployer --password-stdin registry.example.com"));
        assert_eq!(calls[0].stdin.as_deref(), Some("s3cret"));
    }

    #[tokio::test]
    async fn test_materialize_copies_existing_config() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join(CREDENTIALS_FILE), r#"{"auths":{}}"#).unwrap();

        let mut spec = spec();
        spec.docker_config_dir = source.path().to_string_lossy().to_string();
        let runner = MockRunner::new();

        materialize_credentials(&runner, target.path(), &spec)
            .await
            .unwrap();

        assert!(runner.calls().is_empty());
        let copied = std::fs::read_to_string(credentials_file(target.path())).unwrap();
        assert_eq!(copied, r#"{"auths":{}}"#);
    }

    #[tokio::test]
    async fn test_login_failure_is_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MockRunner::new().with_response(
            "docker",
            CommandOutput::failed("net/http: TLS handshake timeout"),
        );
        let err = materialize_credentials(&runner, dir.path(), &spec())
            .await
            .unwrap_err();
        assert!(matches!(err, TagpilotError::Build(ref msg) if msg.contains("docker login")));
        assert!(!err.is_process_fatal());
    }

    #[test]
    fn test_remove_credentials() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!remove_credentials(dir.path()).unwrap());
        std::fs::write(credentials_file(dir.path()), "{}").unwrap();
        assert!(remove_credentials(dir.path()).unwrap());
        assert!(!credentials_file(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_build_and_push_command() {
        let runner = MockRunner::new().with_response("docker", CommandOutput::ok(""));
        let builder = ImageBuilder::new(runner.clone(), "/creds");

        builder
            .build_and_push(
                Path::new("/work/app"),
                "Dockerfile",
                "registry.example.com/app:v1.2.0",
                &["linux/amd64".to_string(), "linux/arm64".to_string()],
            )
            .await
            .unwrap();

        let call = &runner.calls()[0];
        assert_eq!(
            call.command,
            "docker --config /creds buildx build --push --platform linux/amd64,linux/arm64 \
             --progress=plain -f Dockerfile -t registry.example.com/app:v1.2.0 ."
        );
        assert_eq!(call.cwd, Some(PathBuf::from("/work/app")));
    }

    #[tokio::test]
    async fn test_build_failure_is_build_error() {
        let runner = MockRunner::new().with_response("docker", CommandOutput::failed("no space"));
        let builder = ImageBuilder::new(runner, "/creds");
        let err = builder
            .build_and_push(Path::new("."), "Dockerfile", "img:v1.0.0", &["linux/amd64".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, TagpilotError::Build(_)));
    }
}
