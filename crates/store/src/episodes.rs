use crate::error::{ErrorKind, Result};
use crate::models::File;
use crate::store::Store;
use docmirror_codec::{Number, Value};
use docmirror_gateway::url;

impl Store {
    /// Renumber the episodes of `day` in the main repository to
    /// `step, 2 * step, ...`, keeping their current order.
    ///
    /// Episodes whose URL is in `ignore` keep their order key and don't
    /// consume a slot. Only local content changes; push to publish.
    pub fn rewrite_episode_orders(&self, day: &Value, ignore: &[String]) -> Result<Vec<File>> {
        let Some(view) = self.repository(None)? else {
            exn::bail!(ErrorKind::NoMainRepository);
        };
        let mut episodes: Vec<File> =
            view.episodes.into_iter().filter(|e| e.front_matter.day.as_ref() == Some(day)).collect();
        episodes.sort_by(|a, b| a.front_matter.order_key().total_cmp(&b.front_matter.order_key()));

        let step = self.config.episodes.order_step;
        let mut order = 0;
        let mut updated = Vec::with_capacity(episodes.len());
        for episode in episodes {
            if ignore.iter().any(|u| url::strip_ref(u) == episode.url) {
                continue;
            }
            order += step;
            let mut front_matter = episode.front_matter.clone();
            front_matter.order = Some(Number::from(order));
            tracing::debug!(path = %episode.path, order, "reordered episode");
            updated.push(self.set_file_content_from_yaml(&episode.url, &front_matter, &episode.body)?);
        }
        Ok(updated)
    }
}
