//! Layered configuration.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults ([`Config::default`]).
//! 2. `config.toml` then `config.yaml` in the platform configuration
//!    directory, or a single explicitly given file.
//! 3. Environment variables prefixed with `DOCMIRROR_`, nested with `__`
//!    (`DOCMIRROR_EPISODES__ORDER_STEP=1000`).
//!
//! The merged result is validated before it's handed out.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

const ENV_PREFIX: &str = "DOCMIRROR_";
const APPLICATION: &str = "docmirror";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub install: InstallConfig,
    pub episodes: EpisodeConfig,
    pub repository: RepositoryConfig,
    /// URL of the repository to treat as main on startup.
    pub main: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Prefix of every repository URL (`<api_base>/<owner>/<name>`).
    pub api_base: String,
    /// Directory served by the local gateway. Defaults to the platform data directory.
    pub root: Option<PathBuf>,
    /// Owner of repositories created from templates.
    pub login: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherKind {
    /// Markdown image syntax.
    Images,
    /// Plain links to downloadable (non-document) files.
    Links,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Folder in the main repository that receives installed assets.
    pub directory: String,
    pub matchers: Vec<MatcherKind>,
    /// Commit message template; `{path}` is replaced with the file path.
    pub commit_message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    pub directories: Vec<String>,
    /// Gap between consecutive order keys after compaction.
    pub order_step: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub config_file: String,
    pub notes_file: String,
    /// Directory holding one intro file per topic.
    pub intro_directory: String,
    /// Intro used when the configured topic has none.
    pub fallback_topic: String,
    /// Topics a repository may be tagged with.
    pub topics: Vec<String>,
    /// Topic marking repositories that can be used as templates.
    pub template_topic: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com/repos".to_string(),
            root: None,
            login: APPLICATION.to_string(),
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            directory: "installed".to_string(),
            matchers: vec![MatcherKind::Images],
            commit_message: format!("{{path}} update by {APPLICATION}"),
        }
    }
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            directories: vec!["_episodes".to_string(), "_episodes_rmd".to_string()],
            order_step: 100_000,
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            config_file: "_config.yml".to_string(),
            notes_file: "notes.md".to_string(),
            intro_directory: "_includes/intro/topic-intros".to_string(),
            fallback_topic: "unknown-topic".to_string(),
            topics: ["open-data", "open-access", "open-code", "preprints", "preregistration"]
                .into_iter()
                .map(String::from)
                .collect(),
            template_topic: "ukrn-wb-template".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default locations, or from `explicit`
    /// (replacing the default file locations) when given.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(explicit)?)
    }

    /// The layered sources without extracting them.
    pub fn figment(explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match explicit {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::Missing(path.to_path_buf()));
                }
                figment = match path.extension().and_then(|e| e.to_str()) {
                    Some("toml") => figment.merge(Toml::file(path)),
                    Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                    Some("json") => figment.merge(Json::file(path)),
                    _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
                };
            },
            None => {
                if let Some(dirs) = project_dirs() {
                    let dir = dirs.config_dir();
                    tracing::debug!(dir = %dir.display(), "looking for configuration files");
                    figment = figment.merge(Toml::file(dir.join("config.toml"))).merge(Yaml::file(dir.join("config.yaml")));
                }
            },
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway.api_base.trim().is_empty() {
            exn::bail!(ErrorKind::invalid("gateway.api_base", "must not be empty"));
        }
        if self.gateway.login.trim().is_empty() || self.gateway.login.contains('/') {
            exn::bail!(ErrorKind::invalid("gateway.login", "must be a single non-empty name"));
        }
        if let Some(root) = &self.gateway.root
            && !root.is_absolute()
        {
            exn::bail!(ErrorKind::invalid("gateway.root", "must be an absolute path"));
        }
        if !is_relative_folder(&self.install.directory) {
            exn::bail!(ErrorKind::invalid("install.directory", "must be a relative path inside the repository"));
        }
        if self.install.matchers.is_empty() {
            exn::bail!(ErrorKind::invalid("install.matchers", "at least one matcher is required"));
        }
        if self.episodes.order_step == 0 {
            exn::bail!(ErrorKind::invalid("episodes.order_step", "must be greater than zero"));
        }
        if self.episodes.directories.iter().any(|d| !is_relative_folder(d)) {
            exn::bail!(ErrorKind::invalid("episodes.directories", "must be relative paths inside the repository"));
        }
        if self.repository.config_file.trim().is_empty() {
            exn::bail!(ErrorKind::invalid("repository.config_file", "must not be empty"));
        }
        Ok(())
    }

    /// Commit message for a change to `path`.
    pub fn commit_message(&self, path: &str) -> String {
        self.install.commit_message.replace("{path}", path)
    }

    /// Directory served by the local gateway.
    pub fn gateway_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.gateway.root {
            return Ok(root.clone());
        }
        match project_dirs() {
            Some(dirs) => Ok(dirs.data_dir().join("remote")),
            None => exn::bail!(ErrorKind::NoHomeDirectory),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APPLICATION)
}

fn is_relative_folder(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.episodes.order_step, 100_000);
        assert_eq!(config.commit_message("_episodes/01.md"), "_episodes/01.md update by docmirror");
    }

    #[test]
    fn test_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "docmirror.toml",
                r#"
                    main = "https://api.github.com/repos/me/workshop"
                    [install]
                    matchers = ["images", "links"]
                    [episodes]
                    order_step = 1000
                "#,
            )?;
            jail.set_env("DOCMIRROR_EPISODES__ORDER_STEP", "500");
            jail.set_env("DOCMIRROR_GATEWAY__LOGIN", "someone");
            let path = jail.directory().join("docmirror.toml");
            let config = Config::load(Some(path.as_path())).map_err(|e| e.to_string())?;
            assert_eq!(config.main.as_deref(), Some("https://api.github.com/repos/me/workshop"));
            assert_eq!(config.install.matchers, vec![MatcherKind::Images, MatcherKind::Links]);
            assert_eq!(config.episodes.order_step, 500);
            assert_eq!(config.gateway.login, "someone");
            // Untouched sections keep their defaults
            assert_eq!(config.repository, RepositoryConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file("docmirror.yaml", "install:\n  directory: vendor/assets\n")?;
            let path = jail.directory().join("docmirror.yaml");
            let config = Config::load(Some(path.as_path())).map_err(|e| e.to_string())?;
            assert_eq!(config.install.directory, "vendor/assets");
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Missing(_)));
    }

    #[rstest]
    #[case("episodes.order_step", |c: &mut Config| c.episodes.order_step = 0)]
    #[case("install.directory", |c: &mut Config| c.install.directory = "../outside".to_string())]
    #[case("install.directory", |c: &mut Config| c.install.directory = "/absolute".to_string())]
    #[case("install.matchers", |c: &mut Config| c.install.matchers.clear())]
    #[case("gateway.api_base", |c: &mut Config| c.gateway.api_base = " ".to_string())]
    #[case("gateway.login", |c: &mut Config| c.gateway.login = "a/b".to_string())]
    #[case("gateway.root", |c: &mut Config| c.gateway.root = Some(PathBuf::from("relative")))]
    fn test_validation(#[case] field: &str, #[case] change: fn(&mut Config)) {
        let mut config = Config::default();
        change(&mut config);
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid { field: f, .. } if f == field));
    }

    #[test]
    fn test_invalid_value_type() {
        Jail::expect_with(|jail| {
            jail.set_env("DOCMIRROR_EPISODES__ORDER_STEP", "lots");
            let err = Config::from_figment(Config::figment(None).map_err(|e| e.to_string())?).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load));
            Ok(())
        });
    }
}
