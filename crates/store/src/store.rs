use crate::busy::BusyFlags;
use crate::consts::SUFFIX_REGEX;
use crate::deps::{self, DependencyMatcher};
use crate::error::{ErrorKind, Result};
use crate::models::{ErrorRecord, File, NewFile, Repository, RepositoryView};
use docmirror_codec::{FrontMatter, compose, encoding};
use docmirror_config::Config;
use docmirror_gateway::{GatewayHandle, url};
use exn::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) files: BTreeMap<String, File>,
    pub(crate) repositories: BTreeMap<String, Repository>,
    pub(crate) templates: Vec<Repository>,
    pub(crate) errors: Vec<ErrorRecord>,
}

/// The local mirror.
///
/// Holds every known [`File`] and [`Repository`], keyed by URL (with any
/// `?ref=` suffix stripped). All methods take `&self`; state lives behind a
/// lock that is never held across a remote call, and per-resource exclusion
/// is handled by busy flags.
///
/// Local operations are synchronous. Operations that talk to the remote side
/// are `async` and return `Ok(None)` when the resource is busy or the remote
/// call failed (the failure is recorded in [`errors`](Self::errors)).
pub struct Store {
    pub(crate) gateway: GatewayHandle,
    pub(crate) config: Config,
    state: RwLock<State>,
    pub(crate) busy: BusyFlags,
    pub(crate) matchers: Vec<Box<dyn DependencyMatcher>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("gateway", &self.gateway.name())
            .field("busy", &self.busy)
            .finish_non_exhaustive()
    }
}

impl Store {
    pub fn new(gateway: GatewayHandle, config: Config) -> Self {
        let matchers = deps::matchers(&config.install.matchers);
        Self {
            gateway,
            config,
            state: RwLock::new(State::default()),
            busy: BusyFlags::default(),
            matchers,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gateway(&self) -> &GatewayHandle {
        &self.gateway
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a repository.
    ///
    /// Rejected if it claims to be main while a different repository already is.
    pub fn add_repository(&self, mut repository: Repository) -> Result<()> {
        repository.url = url::strip_ref(&repository.url).to_string();
        let mut state = self.write();
        if repository.is_main
            && state.repositories.values().any(|r| r.is_main && r.url != repository.url)
        {
            exn::bail!(ErrorKind::MultipleMainRepositories);
        }
        state.repositories.insert(repository.url.clone(), repository);
        Ok(())
    }

    /// Insert a file from its transfer-encoded form.
    pub fn add_file(&self, file: NewFile, overwrite: bool) -> Result<File> {
        let url = url::strip_ref(&file.url).to_string();
        let content = encoding::decode(&file.content).or_raise(|| ErrorKind::InvalidEncoding)?;
        let remote_content = match &file.remote_content {
            Some(remote) => encoding::decode(remote).or_raise(|| ErrorKind::InvalidEncoding)?,
            None => content.clone(),
        };
        let mut state = self.write();
        if !overwrite && state.files.contains_key(&url) {
            exn::bail!(ErrorKind::FileExists(url));
        }
        let record = File::new(url.clone(), file.path, content, remote_content, file.sha);
        state.files.insert(url, record.clone());
        Ok(record)
    }

    /// Replace a file's content in place.
    pub fn set_file_content(&self, url: &str, content: impl Into<String>) -> Result<File> {
        let mut state = self.write();
        let file = state
            .files
            .get_mut(url::strip_ref(url))
            .ok_or_raise(|| ErrorKind::UnknownFile(url.to_string()))?;
        file.set_content(content.into());
        Ok(file.clone())
    }

    /// Replace a file's content with `front_matter` and `body` composed together.
    ///
    /// Leading blank lines of the body are dropped.
    pub fn set_file_content_from_yaml(&self, url: &str, front_matter: &FrontMatter, body: &str) -> Result<File> {
        let content = compose(front_matter, body.trim_start_matches('\n')).or_raise(|| ErrorKind::Codec)?;
        self.set_file_content(url, content)
    }

    /// Copy a file under the first free `_N`-suffixed path.
    ///
    /// The copy has no version token and an empty remote content, so it
    /// counts as changed until pushed.
    pub fn duplicate_file(&self, url: &str) -> Result<File> {
        let mut state = self.write();
        let file = state
            .files
            .get(url::strip_ref(url))
            .cloned()
            .ok_or_raise(|| ErrorKind::UnknownFile(url.to_string()))?;
        let mut path = file.path.clone();
        let mut new_url = file.url.clone();
        while state.files.contains_key(&new_url) {
            path = next_path(&path);
            new_url = replace_path(&file.url, &file.path, &path);
        }
        let copy = File {
            url: new_url.clone(),
            path,
            remote_content: String::new(),
            sha: None,
            ..file
        };
        state.files.insert(new_url, copy.clone());
        tracing::debug!(from = %url, to = %copy.url, "duplicated file");
        Ok(copy)
    }

    pub fn remove_file(&self, url: &str) -> Result<File> {
        self.write()
            .files
            .remove(url::strip_ref(url))
            .ok_or_raise(|| ErrorKind::UnknownFile(url.to_string()))
    }

    /// Remove a repository record. Its files stay.
    pub fn remove_repository(&self, url: &str) -> Result<Repository> {
        self.write()
            .repositories
            .remove(url::strip_ref(url))
            .ok_or_raise(|| ErrorKind::UnknownRepository(url.to_string()))
    }

    /// Move the main flag to the repository at `url`.
    pub fn set_main_repository(&self, url: &str) -> Result<()> {
        let url = url::strip_ref(url);
        let mut state = self.write();
        if !state.repositories.contains_key(url) {
            exn::bail!(ErrorKind::UnknownRepository(url.to_string()));
        }
        for repository in state.repositories.values_mut() {
            repository.is_main = repository.url == url;
        }
        Ok(())
    }

    pub fn file(&self, url: &str) -> Option<File> {
        self.read().files.get(url::strip_ref(url)).cloned()
    }

    pub fn require_file(&self, url: &str) -> Result<File> {
        self.file(url).ok_or_raise(|| ErrorKind::UnknownFile(url.to_string()))
    }

    pub fn files_by_filter(&self, filter: impl Fn(&File) -> bool) -> Vec<File> {
        self.read().files.values().filter(|f| filter(f)).cloned().collect()
    }

    pub fn main_repository(&self) -> Option<Repository> {
        self.read().repositories.values().find(|r| r.is_main).cloned()
    }

    pub(crate) fn require_main(&self) -> Result<Repository> {
        self.main_repository().ok_or_raise(|| ErrorKind::NoMainRepository)
    }

    /// The repository at `url` with its files, or the main repository when
    /// `url` is `None` (`Ok(None)` if there isn't one).
    pub fn repository(&self, url: Option<&str>) -> Result<Option<RepositoryView>> {
        let state = self.read();
        let repository = match url {
            Some(url) => state
                .repositories
                .get(url::strip_ref(url))
                .ok_or_raise(|| ErrorKind::UnknownRepository(url.to_string()))?,
            None => match state.repositories.values().find(|r| r.is_main) {
                Some(main) => main,
                None => return Ok(None),
            },
        };
        Ok(Some(self.view(&state, repository)))
    }

    pub fn repositories_by_filter(&self, filter: impl Fn(&Repository) -> bool) -> Vec<RepositoryView> {
        let state = self.read();
        state.repositories.values().filter(|r| filter(r)).map(|r| self.view(&state, r)).collect()
    }

    fn view(&self, state: &State, repository: &Repository) -> RepositoryView {
        let settings = &self.config.repository;
        let files: Vec<File> =
            state.files.values().filter(|f| url::is_member(&f.url, &repository.url)).cloned().collect();
        let find = |path: &str| files.iter().find(|f| f.path == path).cloned();
        let config = find(&settings.config_file);
        let notes = find(&settings.notes_file);
        let topic = config.as_ref().and_then(|c| c.front_matter.get_str("topic"));
        let intro = topic
            .into_iter()
            .chain([settings.fallback_topic.as_str()])
            .find_map(|t| find(&format!("{}/{t}.md", settings.intro_directory)));
        let mut episodes: Vec<File> = files
            .iter()
            .filter(|f| self.is_episode_path(&f.path) && !f.front_matter.has_rule("hidden"))
            .cloned()
            .collect();
        episodes.sort_by(|a, b| {
            a.front_matter
                .order_key()
                .total_cmp(&b.front_matter.order_key())
                .then_with(|| a.path.cmp(&b.path))
        });
        let episode_template = files.iter().find(|f| f.front_matter.has_rule("template")).cloned();
        RepositoryView {
            busy: self.busy.is_busy(&repository.url),
            repository: repository.clone(),
            files,
            config,
            episodes,
            episode_template,
            notes,
            intro,
        }
    }

    pub(crate) fn is_episode_path(&self, path: &str) -> bool {
        self.config
            .episodes
            .directories
            .iter()
            .any(|dir| path.strip_prefix(dir.as_str()).is_some_and(|rest| rest.starts_with('/')))
    }

    pub fn has_changed(&self, url: &str) -> Result<bool> {
        Ok(self.require_file(url)?.has_changed())
    }

    /// Does the file at `url` belong to the main repository?
    pub fn in_main_repository(&self, url: &str) -> bool {
        self.main_repository().is_some_and(|main| url::is_member(url, &main.url))
    }

    /// Problems with a repository config file, keyed by field.
    ///
    /// An unparseable header is reported alone under `yaml`.
    pub fn config_errors(&self, url: &str) -> Result<BTreeMap<&'static str, &'static str>> {
        let file = self.require_file(url)?;
        let mut errors = BTreeMap::new();
        if file.parse_error.is_some() {
            errors.insert("yaml", "The config must have YAML content signified by ---");
            return Ok(errors);
        }
        let present = |key: &str| file.front_matter.get(key).is_some_and(|v| !v.is_null() && v.as_str() != Some(""));
        if !present("workshop_id") {
            errors.insert("id", "The workshop must have an identifier");
        }
        if !present("title") {
            errors.insert("title", "The title cannot be blank");
        }
        if !present("topic") {
            errors.insert("topic", "The topic cannot be empty");
        }
        Ok(errors)
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.busy.is_busy(key)
    }

    /// Template repositories found by the last template search.
    pub fn templates(&self) -> Vec<Repository> {
        self.read().templates.clone()
    }

    pub(crate) fn set_templates(&self, templates: Vec<Repository>) {
        self.write().templates = templates;
    }

    /// Every remote failure recorded so far, oldest first.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.read().errors.clone()
    }

    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.read().errors.last().cloned()
    }

    pub(crate) fn record_error(&self, operation: &'static str, target: &str, error: &impl Display) {
        tracing::warn!(operation, resource = target, error = %error, "remote operation failed");
        self.write().errors.push(ErrorRecord {
            operation,
            target: target.to_string(),
            message: error.to_string(),
        });
    }
}

/// `dir/name.ext` => `dir/name_1.ext`, `dir/name_1.ext` => `dir/name_2.ext`.
pub(crate) fn next_path(path: &str) -> String {
    let Some(captures) = SUFFIX_REGEX.captures(path) else {
        return format!("{path}_1");
    };
    let name = captures.name("name").map_or(path, |m| m.as_str());
    let ext = captures.name("ext").map_or("", |m| m.as_str());
    let counter = captures
        .name("counter")
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map_or(1, |n| n + 1);
    format!("{name}_{counter}{ext}")
}

/// `url` with its trailing `old_path` swapped for `new_path`.
fn replace_path(url: &str, old_path: &str, new_path: &str) -> String {
    match url.strip_suffix(old_path) {
        Some(prefix) => format!("{prefix}{new_path}"),
        None => url.replacen(old_path, new_path, 1),
    }
}
