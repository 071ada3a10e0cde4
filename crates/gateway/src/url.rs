//! URL conventions shared by the gateway and the store.
//!
//! A repository is addressed as `<api_base>/<owner>/<name>` and a file inside
//! it as `<repository>/contents/<path>`. Membership of a file in a repository
//! is decided by [`is_member`] alone.

use crate::error::{ErrorKind, Result};

const CONTENTS: &str = "/contents/";

/// Drop any query suffix (the remote appends `?ref=<branch>` to content URLs).
pub fn strip_ref(url: &str) -> &str {
    match url.find('?') {
        Some(idx) => &url[..idx],
        None => url,
    }
}

/// Is the file at `file_url` part of the repository at `repository_url`?
///
/// Prefix containment on the ref-stripped URLs, with the prefix required to
/// end on a path boundary so `owner/repo` doesn't claim `owner/repo-two`.
pub fn is_member(file_url: &str, repository_url: &str) -> bool {
    let file_url = strip_ref(file_url);
    let repository_url = strip_ref(repository_url).trim_end_matches('/');
    if repository_url.is_empty() {
        return false;
    }
    match file_url.strip_prefix(repository_url) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Content URL for `path` in the repository at `repository_url`.
pub fn contents_url(repository_url: &str, path: &str) -> String {
    format!(
        "{}{CONTENTS}{}",
        strip_ref(repository_url).trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Repository URL for `owner/name` under `api_base`.
pub fn repository_url(api_base: &str, full_name: &str) -> String {
    format!("{}/{}", api_base.trim_end_matches('/'), full_name.trim_matches('/'))
}

/// A parsed content URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentUrl {
    pub owner: String,
    pub name: String,
    pub path: String,
}

impl ContentUrl {
    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn repository_url(&self, api_base: &str) -> String {
        repository_url(api_base, &self.full_name())
    }
}

/// Split a repository URL into `(owner, name)`.
pub fn parse_repository(api_base: &str, url: &str) -> Result<(String, String)> {
    let url = strip_ref(url).trim_end_matches('/');
    let rest = strip_base(api_base, url)?;
    match rest.split('/').collect::<Vec<_>>().as_slice() {
        [owner, name] if valid_segment(owner) && valid_segment(name) => Ok((owner.to_string(), name.to_string())),
        _ => exn::bail!(ErrorKind::InvalidUrl(url.to_string())),
    }
}

/// Split a content URL into owner, repository name and path.
pub fn parse_contents(api_base: &str, url: &str) -> Result<ContentUrl> {
    let url = strip_ref(url);
    let rest = strip_base(api_base, url)?;
    let mut parts = rest.splitn(3, '/');
    let (Some(owner), Some(name), Some(tail)) = (parts.next(), parts.next(), parts.next()) else {
        exn::bail!(ErrorKind::InvalidUrl(url.to_string()));
    };
    let Some(path) = tail.strip_prefix(&CONTENTS[1..]) else {
        exn::bail!(ErrorKind::InvalidUrl(url.to_string()));
    };
    if !valid_segment(owner) || !valid_segment(name) || path.is_empty() {
        exn::bail!(ErrorKind::InvalidUrl(url.to_string()));
    }
    Ok(ContentUrl {
        owner: owner.to_string(),
        name: name.to_string(),
        path: path.to_string(),
    })
}

/// The `owner/name` a file was served from, provided its URL is exactly
/// `<api_base>/<owner>/<name>/contents/<path>`.
pub fn origin_of(api_base: &str, file_url: &str, path: &str) -> Option<String> {
    let parsed = parse_contents(api_base, file_url).ok()?;
    (parsed.path == path.trim_start_matches('/')).then(|| parsed.full_name())
}

/// The repository-relative path of a content URL, without knowing its base.
pub fn parse_contents_path(url: &str) -> Option<String> {
    let url = strip_ref(url);
    let idx = url.find(CONTENTS)?;
    let path = &url[idx + CONTENTS.len()..];
    (!path.is_empty()).then(|| path.to_string())
}

fn strip_base<'a>(api_base: &str, url: &'a str) -> Result<&'a str> {
    let base = api_base.trim_end_matches('/');
    match url.strip_prefix(base).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) => Ok(rest),
        None => exn::bail!(ErrorKind::InvalidUrl(url.to_string())),
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains(['/', '?', '#'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const API: &str = "https://api.github.com/repos";

    #[rstest]
    #[case("https://x/repos/a/b/contents/f.md?ref=main", "https://x/repos/a/b/contents/f.md")]
    #[case("https://x/repos/a/b/contents/f.md", "https://x/repos/a/b/contents/f.md")]
    fn test_strip_ref(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(strip_ref(input), expected);
    }

    #[rstest]
    #[case("https://api.github.com/repos/a/b/contents/x.md", "https://api.github.com/repos/a/b", true)]
    #[case("https://api.github.com/repos/a/b/contents/x.md?ref=gh-pages", "https://api.github.com/repos/a/b", true)]
    #[case("https://api.github.com/repos/a/b", "https://api.github.com/repos/a/b/", true)]
    #[case("https://api.github.com/repos/a/bc/contents/x.md", "https://api.github.com/repos/a/b", false)]
    #[case("https://api.github.com/repos/c/d/contents/x.md", "https://api.github.com/repos/a/b", false)]
    #[case("https://api.github.com/repos/a/b/contents/x.md", "", false)]
    fn test_is_member(#[case] file: &str, #[case] repo: &str, #[case] expected: bool) {
        assert_eq!(is_member(file, repo), expected);
    }

    #[test]
    fn test_contents_url() {
        assert_eq!(contents_url(&format!("{API}/a/b"), "/fig/x.png"), format!("{API}/a/b/contents/fig/x.png"));
        assert_eq!(contents_url(&format!("{API}/a/b/"), "_config.yml"), format!("{API}/a/b/contents/_config.yml"));
    }

    #[test]
    fn test_parse_contents() {
        let parsed = parse_contents(API, &format!("{API}/owner/repo/contents/_episodes/01.md?ref=main")).unwrap();
        assert_eq!(parsed.full_name(), "owner/repo");
        assert_eq!(parsed.path, "_episodes/01.md");
        assert_eq!(parsed.repository_url(API), format!("{API}/owner/repo"));
    }

    #[rstest]
    #[case("https://example.com/owner/repo/contents/a.md")]
    #[case("https://api.github.com/repos/owner/repo/a.md")]
    #[case("https://api.github.com/repos/owner/repo/contents/")]
    #[case("https://api.github.com/repos/owner")]
    fn test_parse_contents_rejects(#[case] url: &str) {
        let err = parse_contents(API, url).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidUrl(_)));
    }

    #[rstest]
    #[case("https://x/repos/o/r/contents/installed/a/b/fig/x.png", Some("installed/a/b/fig/x.png"))]
    #[case("https://x/repos/o/r/contents/", None)]
    #[case("https://x/repos/o/r", None)]
    fn test_parse_contents_path(#[case] url: &str, #[case] expected: Option<&str>) {
        assert_eq!(parse_contents_path(url).as_deref(), expected);
    }

    #[test]
    fn test_parse_repository() {
        assert_eq!(
            parse_repository(API, &format!("{API}/owner/repo")).unwrap(),
            ("owner".to_string(), "repo".to_string())
        );
        assert!(parse_repository(API, &format!("{API}/owner/repo/contents/x")).is_err());
    }

    #[rstest]
    #[case("https://api.github.com/repos/o/r/contents/_episodes/a.md", "_episodes/a.md", Some("o/r"))]
    #[case("https://api.github.com/repos/o/r/contents/_episodes/a.md", "_episodes/b.md", None)]
    #[case("https://elsewhere.org/o/r/contents/_episodes/a.md", "_episodes/a.md", None)]
    fn test_origin_of(#[case] url: &str, #[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(origin_of(API, url, path).as_deref(), expected);
    }
}
