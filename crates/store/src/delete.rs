//! Deleting files from the main repository, along with assets nothing else needs.

use crate::error::{ErrorKind, Result};
use crate::models::DeleteTally;
use crate::store::Store;
use docmirror_asyncutils::settle_all;
use docmirror_gateway::{error::Result as GatewayResult, url};

impl Store {
    /// Delete a main-repository file remotely and locally.
    ///
    /// With `delete_dependencies`, each installed asset of the file is
    /// deleted too, unless another main-repository file installed from the
    /// same origin still depends on it. If the file itself can't be deleted
    /// its record is kept, with the assets that were deleted moved back to
    /// `missingDependencies`, so a retry only repeats outstanding work.
    pub async fn delete_file(&self, url: &str, delete_dependencies: bool) -> Result<Option<DeleteTally>> {
        let main = self.require_main()?;
        if !url::is_member(url, &main.url) {
            exn::bail!(ErrorKind::NotInMainRepository(url.to_string()));
        }
        let file = self.require_file(url)?;
        let Some(_guard) = self.busy.acquire(&file.url) else {
            tracing::debug!(url = %file.url, "delete skipped, file is busy");
            return Ok(None);
        };
        let message = self.config.commit_message(&file.path);
        let mut tally = DeleteTally::default();
        let mut deleted = Vec::new();

        if delete_dependencies && let Some(origin) = file.front_matter.original_repository.as_deref() {
            let mut orphans = Vec::new();
            for dependency in file.front_matter.dependencies() {
                let shared = !self
                    .files_by_filter(|other| {
                        other.url != file.url
                            && url::is_member(&other.url, &main.url)
                            && other.front_matter.original_repository.as_deref() == Some(origin)
                            && other.front_matter.dependencies().contains(dependency)
                    })
                    .is_empty();
                match shared {
                    true => tally.skipped.push(format!("{origin}{dependency}")),
                    false => orphans.push((
                        dependency.clone(),
                        url::contents_url(&main.url, &self.installed_path(origin, dependency)),
                    )),
                }
            }
            let settled = settle_all(
                orphans
                    .iter()
                    .map(|(dependency, asset_url)| (dependency.clone(), self.delete_remote(asset_url, &message))),
            )
            .await;
            for (dependency, err) in settled.failures {
                tracing::warn!(dependency = %dependency, error = %err, "unable to delete dependency");
                tally.failed.push(format!("{origin}{dependency}"));
            }
            for (dependency, ()) in settled.successes {
                tally.deleted.push(format!("{origin}{dependency}"));
                deleted.push(dependency);
            }
        }

        let removed = match &file.sha {
            Some(sha) => match self.gateway.delete_file(&file.url, sha, &message).await {
                Err(err) if !err.is_not_found() => Err(err),
                _ => Ok(()),
            },
            // Never pushed, nothing to delete remotely.
            None => Ok(()),
        };
        match removed {
            Ok(()) => {
                self.remove_file(&file.url)?;
                tally.deleted.push(file.url.clone());
                tracing::info!(url = %file.url, dependencies = tally.deleted.len() - 1, "deleted file");
            },
            Err(err) => {
                self.record_error("delete_file", &file.url, &err);
                tally.failed.push(file.url.clone());
                if !deleted.is_empty() {
                    let mut front_matter = file.front_matter.clone();
                    front_matter.dependencies = Some(
                        file.front_matter.dependencies().iter().filter(|d| !deleted.contains(d)).cloned().collect(),
                    );
                    let mut missing = file.front_matter.missing_dependencies().to_vec();
                    missing.extend(deleted);
                    front_matter.missing_dependencies = Some(missing);
                    self.set_file_content_from_yaml(&file.url, &front_matter, &file.body)?;
                }
            },
        }
        Ok(Some(tally))
    }

    /// Delete whatever is at `asset_url`; already gone counts as deleted.
    async fn delete_remote(&self, asset_url: &str, message: &str) -> GatewayResult<()> {
        let existing = match self.gateway.fetch_file(asset_url).await {
            Ok(existing) => existing,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };
        match self.gateway.delete_file(asset_url, &existing.sha, message).await {
            Err(err) if !err.is_not_found() => Err(err),
            _ => Ok(()),
        }
    }
}
