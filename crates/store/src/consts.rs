use regex::Regex;
use std::sync::LazyLock;

/// Target of a markdown reference: an installed-file wrapper or any run of non-space characters.
const TARGET: &str = r"(?P<target>\{%[^%]*%\}|[^\s)]+)";
/// Optional quoted title after the target.
const TITLE: &str = r#"(?:\s+["'][^"']*["'])?"#;
/// Bracketed text, allowing one level of nested brackets.
const TEXT: &str = r"\[(?:[^\[\]]|\[[^\[\]]*\])*\]";

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

// Markdown image: `![alt](target "title")`.
regex!(IMAGE_REGEX, format!(r"!{TEXT}\({TARGET}{TITLE}\)").as_str());
// Markdown link or image; `bang` is non-empty for images.
regex!(LINK_REGEX, format!(r"(?P<bang>!?){TEXT}\({TARGET}{TITLE}\)").as_str());
regex!(INSTALLED_REGEX, r#"^\{%\s*include\s+installedFile\.lqd\s+path=['"](?P<path>[^'"]+)['"]\s*%\}$"#);
regex!(SCHEME_REGEX, r"^[A-Za-z][A-Za-z0-9+.-]*:");
// `name_3.md` => name `name`, counter `3`, extension `.md`.
regex!(SUFFIX_REGEX, r"^(?P<name>.+?)(?:_(?P<counter>[0-9]+))?(?P<ext>\.[^./]*)?$");
