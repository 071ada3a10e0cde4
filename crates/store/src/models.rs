use docmirror_codec::{Decomposed, FrontMatter, decompose};
use docmirror_gateway::{RemoteFile, RemoteRepository};
use std::fmt;

/// One versioned document in the mirror.
///
/// `content` is always what [`compose`](docmirror_codec::compose) would
/// produce from `front_matter` and `body`, or the raw text when the header
/// couldn't be parsed.
#[derive(Clone, Debug, PartialEq)]
pub struct File {
    pub url: String,
    pub path: String,
    pub content: String,
    /// Last content known to exist on the remote side. Empty for files that
    /// only exist locally.
    pub remote_content: String,
    /// Version token. `None` for files not yet created remotely.
    pub sha: Option<String>,
    pub front_matter: FrontMatter,
    pub body: String,
    pub parse_error: Option<String>,
}

impl File {
    pub(crate) fn new(url: String, path: String, content: String, remote_content: String, sha: Option<String>) -> Self {
        let Decomposed {
            front_matter,
            body,
            parse_error,
        } = decompose(&content);
        Self {
            url,
            path,
            content,
            remote_content,
            sha,
            front_matter,
            body,
            parse_error,
        }
    }

    /// Replace the content, re-deriving front matter and body.
    pub(crate) fn set_content(&mut self, content: String) {
        let Decomposed {
            front_matter,
            body,
            parse_error,
        } = decompose(&content);
        self.content = content;
        self.front_matter = front_matter;
        self.body = body;
        self.parse_error = parse_error;
    }

    pub fn has_changed(&self) -> bool {
        self.content != self.remote_content
    }

    /// Directory part of the path (`""` for top-level files).
    pub fn directory(&self) -> &str {
        self.path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or_default()
    }
}

/// Payload for [`Store::add_file`](crate::Store::add_file).
///
/// Content arrives transfer-encoded, as the remote side serves it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewFile {
    pub url: String,
    pub path: String,
    /// Base64-encoded content.
    pub content: String,
    pub sha: Option<String>,
    /// Base64-encoded remote content; defaults to `content`.
    pub remote_content: Option<String>,
}

impl From<RemoteFile> for NewFile {
    fn from(file: RemoteFile) -> Self {
        Self {
            url: file.url,
            path: file.path,
            content: file.content,
            sha: Some(file.sha),
            remote_content: None,
        }
    }
}

/// One remote document tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Repository {
    pub url: String,
    pub owner_login: String,
    pub name: String,
    pub topics: Vec<String>,
    pub description: Option<String>,
    pub is_main: bool,
}

impl From<RemoteRepository> for Repository {
    fn from(repository: RemoteRepository) -> Self {
        Self {
            url: repository.url,
            owner_login: repository.owner.login,
            name: repository.name,
            topics: repository.topics,
            description: repository.description,
            is_main: false,
        }
    }
}

impl Repository {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner_login, self.name)
    }

    pub(crate) fn main(mut self) -> Self {
        self.is_main = true;
        self
    }
}

/// A repository together with the files derived from it.
#[derive(Clone, Debug, PartialEq)]
pub struct RepositoryView {
    pub repository: Repository,
    pub files: Vec<File>,
    pub config: Option<File>,
    /// Visible episodes, by order key.
    pub episodes: Vec<File>,
    pub episode_template: Option<File>,
    pub notes: Option<File>,
    /// Introduction for the configured topic.
    pub intro: Option<File>,
    pub busy: bool,
}

impl RepositoryView {
    pub fn changed_files(&self) -> impl Iterator<Item = &File> {
        self.files.iter().filter(|f| f.has_changed())
    }
}

/// What happened to each resource touched by a delete.
///
/// Entries name dependencies by origin (`owner/name/path`) and the deleted
/// file itself by URL.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteTally {
    pub deleted: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Outcome of pushing every changed file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub successes: Vec<String>,
    pub failures: Vec<String>,
}

/// Options for [`Store::find_repository_files`](crate::Store::find_repository_files).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchOptions {
    pub episodes: bool,
    pub extra_files: bool,
    pub overwrite: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            episodes: true,
            extra_files: true,
            overwrite: true,
        }
    }
}

/// A remote failure recorded by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorRecord {
    pub operation: &'static str,
    pub target: String,
    pub message: String,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}): {}", self.operation, self.target, self.message)
    }
}
