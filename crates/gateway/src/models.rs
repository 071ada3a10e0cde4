use serde::{Deserialize, Serialize};

/// A file as the remote side serves it.
///
/// `content` is transfer-encoded (base64), exactly as received.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub url: String,
    pub path: String,
    /// Opaque version token. Required to update or delete the file.
    pub sha: String,
    pub content: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub login: String,
}

/// Repository metadata as the remote side serves it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepository {
    pub url: String,
    pub name: String,
    pub owner: Owner,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_template: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub url: String,
    pub kind: EntryKind,
}

/// Repository search parameters. Empty fields don't constrain the search.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub topics: Vec<String>,
    pub owner: Option<String>,
}

impl SearchQuery {
    pub fn topics(topics: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            owner: None,
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn matches(&self, repository: &RemoteRepository) -> bool {
        let owner_ok = self.owner.as_ref().is_none_or(|owner| &repository.owner.login == owner);
        let topics_ok = self.topics.iter().all(|t| repository.topics.contains(t));
        owner_ok && topics_ok
    }
}

/// A create-or-update request for a single file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRequest {
    pub url: String,
    pub path: String,
    /// Transfer-encoded (base64) content.
    pub content: String,
    /// Current version token; `None` creates a new file.
    pub sha: Option<String>,
    pub message: String,
}

/// Site build state of a repository.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "message")]
pub enum BuildStatus {
    #[default]
    Unknown,
    Queued,
    Building,
    Built,
    Errored(String),
}
