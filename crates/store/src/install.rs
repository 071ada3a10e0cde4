//! Installing files from foreign repositories into the main repository.
//!
//! An installed file records where it came from (`originalRepository`) and
//! which of its referenced assets have been copied (`dependencies`) or are
//! still outstanding (`missingDependencies`). Assets land under
//! `<install dir>/<owner>/<name>/<path>` in the main repository.

use crate::deps;
use crate::error::{ErrorKind, Result};
use crate::models::{File, NewFile};
use crate::store::{Store, next_path};
use docmirror_asyncutils::settle_all;
use docmirror_codec::encoding;
use docmirror_gateway::url;

impl Store {
    /// Copy a foreign file into the main repository.
    ///
    /// The copy takes the same relative path (with an `_N` suffix if that's
    /// taken), its dependencies are installed, and it's pushed. Only once the
    /// push succeeds is the original record dropped. If it fails the unpushed
    /// copy stays in the store and `Ok(None)` is returned.
    pub async fn install(&self, source_url: &str) -> Result<Option<File>> {
        let main = self.require_main()?;
        let source = self.require_file(source_url)?;
        if url::is_member(&source.url, &main.url) {
            exn::bail!(ErrorKind::SelfInstall(source.url));
        }
        let Some(origin) = url::origin_of(&self.config.gateway.api_base, &source.url, &source.path) else {
            exn::bail!(ErrorKind::InvalidRemoteUrl(source.url));
        };
        let Some(_source_guard) = self.busy.acquire(&source.url) else {
            tracing::debug!(url = %source.url, "install skipped, file is busy");
            return Ok(None);
        };

        let mut path = source.path.clone();
        let mut target_url = url::contents_url(&main.url, &path);
        while self.file(&target_url).is_some() {
            path = next_path(&path);
            target_url = url::contents_url(&main.url, &path);
        }
        let installed = self.add_file(
            NewFile {
                url: target_url.clone(),
                path,
                content: encoding::encode(&source.content),
                sha: None,
                remote_content: Some(String::new()),
            },
            false,
        )?;
        let target_guard = self.busy.acquire(&installed.url);

        // A source that was itself installed points at assets of its own origin.
        let body = match source.front_matter.original_repository.as_deref() {
            Some(previous) => {
                deps::expand_installed(&self.matchers, &source.body, &self.config.install.directory, previous)
            },
            None => source.body.clone(),
        };
        let mut front_matter = installed.front_matter.clone();
        front_matter.missing_dependencies = Some(deps::find_dependencies(&self.matchers, &body, source.directory()));
        front_matter.dependencies = Some(Vec::new());
        front_matter.original_repository = Some(origin.clone());
        self.set_file_content_from_yaml(&installed.url, &front_matter, &body)?;

        self.copy_dependencies(&installed.url).await?;
        drop(target_guard);

        match self.push_file(&installed.url).await? {
            Some(pushed) => {
                self.remove_file(&source.url)?;
                tracing::info!(from = %source.url, to = %pushed.url, origin = %origin, "installed file");
                Ok(Some(pushed))
            },
            None => {
                tracing::warn!(url = %installed.url, "installed copy could not be pushed; original kept");
                Ok(None)
            },
        }
    }

    /// Copy every still-missing dependency of an installed file into the
    /// main repository.
    ///
    /// Best effort: each copied asset moves from `missingDependencies` to
    /// `dependencies` and its references in the body are rewritten to the
    /// installed form; failed copies stay missing and can be retried by
    /// calling this again. Returns `Ok(None)` while the file is busy.
    pub async fn install_dependencies(&self, url: &str) -> Result<Option<File>> {
        let file = self.require_file(url)?;
        let Some(_guard) = self.busy.acquire(&file.url) else {
            tracing::debug!(url = %file.url, "dependency install skipped, file is busy");
            return Ok(None);
        };
        self.copy_dependencies(&file.url).await.map(Some)
    }

    /// [`install_dependencies`](Self::install_dependencies) for a caller
    /// already holding the file's busy flag.
    async fn copy_dependencies(&self, url: &str) -> Result<File> {
        let file = self.require_file(url)?;
        let main = self.require_main()?;
        let missing = file.front_matter.missing_dependencies().to_vec();
        if missing.is_empty() {
            return Ok(file);
        }
        let Some(origin) = file.front_matter.original_repository.clone() else {
            exn::bail!(ErrorKind::NotInstalled(file.url));
        };

        let origin_url = url::repository_url(&self.config.gateway.api_base, &origin);
        let message = self.config.commit_message(&file.path);
        let copies: Vec<(String, String, String)> = missing
            .iter()
            .map(|dependency| {
                let from = url::contents_url(&origin_url, dependency);
                let to = url::contents_url(&main.url, &self.installed_path(&origin, dependency));
                (dependency.clone(), from, to)
            })
            .collect();
        let settled = settle_all(
            copies
                .iter()
                .map(|(dependency, from, to)| (dependency.clone(), self.gateway.copy_file(from, to, true, &message))),
        )
        .await;
        for (dependency, err) in &settled.failures {
            tracing::warn!(dependency = %dependency, origin = %origin, error = %err, "unable to install dependency");
        }
        if settled.successes.is_empty() {
            return Ok(file);
        }

        let installed: Vec<String> = settled.successes.into_iter().map(|(dependency, _)| dependency).collect();
        let mut front_matter = file.front_matter.clone();
        front_matter.missing_dependencies = Some(missing.into_iter().filter(|d| !installed.contains(d)).collect());
        let mut dependencies = file.front_matter.dependencies().to_vec();
        dependencies.extend(installed.iter().filter(|d| !file.front_matter.dependencies().contains(d)).cloned());
        front_matter.dependencies = Some(dependencies);
        let body = deps::rewrite_references(&self.matchers, &file.body, file.directory(), &installed);
        tracing::debug!(url = %file.url, installed = installed.len(), "installed dependencies");
        self.set_file_content_from_yaml(&file.url, &front_matter, &body)
    }

    /// Repository path of an installed copy of `dependency` from `origin`.
    pub(crate) fn installed_path(&self, origin: &str, dependency: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.install.directory.trim_end_matches('/'),
            origin.trim_matches('/'),
            dependency.trim_start_matches('/')
        )
    }
}
