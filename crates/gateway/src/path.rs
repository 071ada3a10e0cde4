//! Repository-relative path validation.
//!
//! Content URLs carry a path that ends up joined onto a local directory, so
//! it must never be allowed to climb out of its repository.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Normalize a repository-relative path, rejecting anything that would leave
/// the repository root (`..` past the top, platform prefixes, null bytes) or
/// that normalizes to nothing.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use docmirror_gateway::validate_path;
/// assert!(validate_path("_episodes/01-intro.md").is_ok());
/// assert!(validate_path("_episodes/../fig/a.png").is_ok());
/// assert!(validate_path("../other-repo/a.md").is_err());
/// assert_eq!(validate_path("/fig//./a.png").unwrap(), Path::new("fig/a.png"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let invalid = || ErrorKind::InvalidUrl(path.as_ref().display().to_string());
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes survive Path::components() on Unix but truncate in syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(invalid()),
        false => Ok(components.into_iter().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("_episodes/01.md", "_episodes/01.md")]
    #[case("/installed/o/r/fig/a.png", "installed/o/r/fig/a.png")]
    #[case("_episodes/./../fig//a.png", "fig/a.png")]
    #[case("_config.yml/", "_config.yml")]
    fn test_normalizes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("../a.md")]
    #[case("_episodes/../../a.md")]
    #[case("a\0b")]
    #[case("")]
    #[case("./")]
    #[case("//")]
    fn test_rejects(#[case] input: &str) {
        let err = validate(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidUrl(_)));
    }
}
