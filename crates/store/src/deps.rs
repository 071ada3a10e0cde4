//! Dependency discovery and reference rewriting.
//!
//! A dependency is a repository-local asset referenced from a file's body.
//! What counts as a reference is decided by a [`DependencyMatcher`]; the
//! store runs every configured matcher and merges their findings in order of
//! first appearance.
//!
//! Targets are normalized to `/`-rooted repository paths, so `../fig/a.png`
//! in `_episodes/intro.md` and `/fig/a.png` name the same asset. Installed
//! references use the wrapper form
//! `{% include installedFile.lqd path='/fig/a.png' %}`, which is unwrapped
//! again when scanning.

use crate::consts::{IMAGE_REGEX, INSTALLED_REGEX, LINK_REGEX, SCHEME_REGEX};
use docmirror_config::MatcherKind;
use std::collections::HashSet;
use std::fmt::Debug;
use std::ops::Range;

/// Extensions of files that are documents in their own right, not assets.
const DOCUMENT_EXTENSIONS: &[&str] = &["md", "markdown", "html", "htm"];

/// One reference found in a body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    /// Byte range of the raw target within the body.
    pub span: Range<usize>,
    /// The raw target text.
    pub target: String,
}

/// Finds asset references in a body.
pub trait DependencyMatcher: Debug + Send + Sync {
    fn references(&self, body: &str) -> Vec<Reference>;
}

/// Markdown images.
#[derive(Debug, Default)]
pub struct ImageMatcher;

impl DependencyMatcher for ImageMatcher {
    fn references(&self, body: &str) -> Vec<Reference> {
        IMAGE_REGEX
            .captures_iter(body)
            .filter_map(|captures| captures.name("target"))
            .map(|target| Reference {
                span: target.range(),
                target: target.as_str().to_string(),
            })
            .collect()
    }
}

/// Plain links to downloadable files (anything with a non-document extension).
#[derive(Debug, Default)]
pub struct LinkMatcher;

impl DependencyMatcher for LinkMatcher {
    fn references(&self, body: &str) -> Vec<Reference> {
        LINK_REGEX
            .captures_iter(body)
            .filter(|captures| captures.name("bang").is_none_or(|bang| bang.as_str().is_empty()))
            .filter_map(|captures| captures.name("target"))
            .filter(|target| is_asset_link(target.as_str()))
            .map(|target| Reference {
                span: target.range(),
                target: target.as_str().to_string(),
            })
            .collect()
    }
}

fn is_asset_link(target: &str) -> bool {
    let path = unwrap_installed(target).unwrap_or(target);
    let path = strip_suffixes(path);
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            !DOCUMENT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        },
        _ => false,
    }
}

/// Build the matchers named in configuration.
pub fn matchers(kinds: &[MatcherKind]) -> Vec<Box<dyn DependencyMatcher>> {
    let mut seen = HashSet::new();
    kinds
        .iter()
        .filter(|kind| seen.insert(**kind))
        .map(|kind| -> Box<dyn DependencyMatcher> {
            match kind {
                MatcherKind::Images => Box::new(ImageMatcher),
                MatcherKind::Links => Box::new(LinkMatcher),
            }
        })
        .collect()
}

/// The path inside an installed-reference wrapper, if `target` is one.
pub fn unwrap_installed(target: &str) -> Option<&str> {
    INSTALLED_REGEX.captures(target).and_then(|c| c.name("path")).map(|m| m.as_str())
}

/// Wrap a `/`-rooted path as an installed reference.
pub fn wrap_installed(path: &str) -> String {
    format!("{{% include installedFile.lqd path='{path}' %}}")
}

fn strip_suffixes(target: &str) -> &str {
    let end = target.find(['#', '?']).unwrap_or(target.len());
    &target[..end]
}

/// Resolve a raw reference target to a `/`-rooted repository path.
///
/// `directory` is the directory of the referencing file. Returns `None` for
/// targets that aren't repository-local (absolute URLs, `data:` URIs,
/// fragment-only links) or that resolve to nothing.
pub fn normalize_reference(target: &str, directory: &str) -> Option<String> {
    if let Some(path) = unwrap_installed(target) {
        return resolve(path, "");
    }
    if target.starts_with('#') || target.starts_with("//") || SCHEME_REGEX.is_match(target) {
        return None;
    }
    resolve(strip_suffixes(target), directory)
}

fn resolve(path: &str, directory: &str) -> Option<String> {
    let mut segments: Vec<&str> = match path.starts_with('/') {
        true => Vec::new(),
        false => directory.split('/').filter(|s| !s.is_empty()).collect(),
    };
    for segment in path.split('/') {
        match segment {
            "" | "." => {},
            // Climbing past the root stays at the root.
            ".." => {
                segments.pop();
            },
            segment => segments.push(segment),
        }
    }
    (!segments.is_empty()).then(|| format!("/{}", segments.join("/")))
}

/// Every reference found by `matchers`, ordered by position.
fn collect(matchers: &[Box<dyn DependencyMatcher>], body: &str) -> Vec<Reference> {
    let mut references: Vec<Reference> = matchers.iter().flat_map(|m| m.references(body)).collect();
    references.sort_by_key(|r| (r.span.start, r.span.end));
    references.dedup_by(|a, b| a.span == b.span);
    references
}

/// Distinct normalized dependency paths, in order of first appearance.
pub fn find_dependencies(matchers: &[Box<dyn DependencyMatcher>], body: &str, directory: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    collect(matchers, body)
        .into_iter()
        .filter_map(|r| normalize_reference(&r.target, directory))
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

/// Turn installed references into plain references to where the assets
/// actually live in the file's repository: under `install_directory`, in the
/// folder of `origin`, the repository the file was itself installed from.
///
/// A file installed again from a repository that installed it keeps working
/// this way, since its wrapped paths only make sense relative to `origin`.
pub fn expand_installed(
    matchers: &[Box<dyn DependencyMatcher>],
    body: &str,
    install_directory: &str,
    origin: &str,
) -> String {
    let prefix = format!("/{}/{}", install_directory.trim_matches('/'), origin.trim_matches('/'));
    let mut rewritten = body.to_string();
    for reference in collect(matchers, body).into_iter().rev() {
        if let Some(path) = unwrap_installed(&reference.target).and_then(|p| resolve(p, "")) {
            rewritten.replace_range(reference.span, &format!("{prefix}{path}"));
        }
    }
    rewritten
}

/// Rewrite every reference to one of `installed` into the wrapper form.
///
/// References that are already wrapped are left alone, so rewriting twice
/// is the same as rewriting once.
pub fn rewrite_references(
    matchers: &[Box<dyn DependencyMatcher>],
    body: &str,
    directory: &str,
    installed: &[String],
) -> String {
    let mut rewritten = body.to_string();
    // Back to front so earlier spans stay valid.
    for reference in collect(matchers, body).into_iter().rev() {
        if unwrap_installed(&reference.target).is_some() {
            continue;
        }
        let Some(path) = normalize_reference(&reference.target, directory) else {
            continue;
        };
        if installed.contains(&path) {
            rewritten.replace_range(reference.span, &wrap_installed(&path));
        }
    }
    rewritten
}
