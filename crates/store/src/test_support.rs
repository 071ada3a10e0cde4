//! Shared fixtures: a main repository `me/workshop` and a foreign `org/lesson`
//! whose episodes reference two figures.

use crate::models::{FetchOptions, NewFile};
use crate::store::Store;
use docmirror_config::Config;
use docmirror_gateway::backend::MockGateway;
use std::sync::Arc;

pub(crate) const API: &str = "https://api.github.com/repos";

pub(crate) fn gateway() -> MockGateway {
    MockGateway::default()
        .with_repository("me", "workshop", ["open-data"])
        .with_file("me/workshop", "_config.yml", "workshop_id: w\ntitle: Workshop\ntopic: open-data\n")
        .with_file("me/workshop", "notes.md", "Notes")
        .with_file("me/workshop", "_includes/intro/topic-intros/open-data.md", "Open data")
        .with_file("me/workshop", "_episodes/01-intro.md", "---\nday: 1\norder: 1\ntitle: Intro\n---\nHello\n")
        .with_file("me/workshop", "_episodes/.draft.md", "draft")
        .with_file("me/workshop", "_episodes/_partial.md", "partial")
        .with_file("me/workshop", "_episodes/fig/own.png", "own")
        .with_repository("org", "lesson", ["open-data"])
        .with_file(
            "org/lesson",
            "_episodes/02-data.md",
            "---\ntitle: Data\n---\n![a](../fig/a.png)\n![b](../fig/b.png)\n",
        )
        .with_file("org/lesson", "_episodes/03-more.md", "---\ntitle: More\n---\n![a](../fig/a.png)\n")
        .with_file(
            "org/lesson",
            "_episodes/04-reused.md",
            "---\ntitle: Reused\noriginalRepository: third/repo\ndependencies:\n- /fig/z.png\n---\n\
             ![z]({% include installedFile.lqd path='/fig/z.png' %})\n",
        )
        .with_file("org/lesson", "installed/third/repo/fig/z.png", "Z")
        .with_file("org/lesson", "fig/a.png", "A")
        .with_file("org/lesson", "fig/b.png", "B")
}

/// A store with `me/workshop` loaded as main and its files fetched.
pub(crate) async fn main_store() -> (Store, Arc<MockGateway>) {
    let gateway = Arc::new(gateway());
    let store = Store::new(gateway.clone(), Config::default());
    let repository = gateway.repository_url("me/workshop");
    store.load_repository(&repository).await.unwrap().unwrap();
    store.find_repository_files(&repository, FetchOptions::default()).await.unwrap().unwrap();
    (store, gateway)
}

pub(crate) fn other_file(gateway: &MockGateway) -> String {
    gateway.file_url("org/lesson", "_episodes/02-data.md")
}

/// Pull a file of `org/lesson` into the store, returning its URL.
pub(crate) async fn fetch_path(store: &Store, gateway: &MockGateway, path: &str) -> String {
    let url = gateway.file_url("org/lesson", path);
    let remote = store.pull_url(&url).await.unwrap().unwrap();
    store.add_file(NewFile::from(remote), true).unwrap();
    url
}

pub(crate) async fn fetch_other(store: &Store, gateway: &MockGateway) -> String {
    fetch_path(store, gateway, "_episodes/02-data.md").await
}
