//! Which kind of extension code a page hosts, and the debug-mode URL rules.

use url::Url;

use crate::{
    manifest::{Manifest, GENERATED_BACKGROUND_PAGE},
    resources::{extension_prefix, EXTENSION_SCHEME},
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Content scripts in a sandbox over a web page.
    ContentScript,
    /// The background page of the extension.
    BackgroundScript,
    /// Any other page served from the extension itself.
    ProtocolPage,
    /// A debug page standing in for one of the above (`?type=...&url=...`).
    DebugModeManagedPage,
}

/// A debug page's request: what it stands in for and the URL it pretends
/// to be at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugTarget {
    pub environment: Environment,
    pub url: Url,
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidEnvironment {
        message: message.into(),
    }
}

fn page_path(url: &Url) -> &str {
    url.path().trim_start_matches('/')
}

/// Classifies the page at `page` for `extension_id`.
pub fn classify(page: &Url, extension_id: &str, manifest: &Manifest) -> Environment {
    if page.scheme() != EXTENSION_SCHEME {
        return Environment::ContentScript;
    }
    let path = page_path(page);
    if path == GENERATED_BACKGROUND_PAGE || path == manifest.background_page().trim_start_matches('/') {
        Environment::BackgroundScript
    } else {
        log::trace!("{page} is a protocol page of {extension_id}");
        Environment::ProtocolPage
    }
}

/// Whether `page` asks for a debug-managed environment.
pub fn is_debug_request(page: &Url) -> bool {
    page.query_pairs().any(|(key, _)| key == "type")
}

/// Reads `?type=b|p|m&url=<target>` of a debug page.
///
/// `b` is the background page, `p` a protocol page and `m` a web page that
/// gets content scripts. The `url` values `_options_` and `_popup_` name the
/// manifest's options and popup pages.
pub fn parse_debug_mode_url(page: &Url, extension_id: &str, manifest: &Manifest) -> Result<DebugTarget> {
    let query = |name: &str| {
        page.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    };
    let target = query("url").filter(|url| !url.is_empty());
    let prefix = extension_prefix(extension_id);
    let in_extension = |path: &str| Url::parse(&prefix)?.join(path).map_err(Error::from);

    let (environment, url) = match query("type").as_deref() {
        Some("b") => (
            Environment::BackgroundScript,
            in_extension(manifest.background_page())?,
        ),
        Some("p") => {
            let target = target.ok_or_else(|| invalid("Need a url"))?;
            let path = match target.as_str() {
                "_options_" => manifest
                    .options_page()
                    .ok_or_else(|| invalid("The extension has no options page"))?,
                "_popup_" => manifest
                    .popup_page()
                    .ok_or_else(|| invalid("The extension has no popup page"))?,
                path => path,
            };
            (Environment::ProtocolPage, in_extension(path)?)
        }
        Some("m") => {
            let target = target.ok_or_else(|| invalid("Need a url"))?;
            (Environment::ContentScript, Url::parse(&target)?)
        }
        other => {
            return Err(invalid(format!(
                "Unknown debug page type {}",
                other.unwrap_or("(none)")
            )))
        }
    };
    Ok(DebugTarget { environment, url })
}

/// Points extension and same-origin URLs at the debug server's
/// `/extension/<id>/` mount.
pub fn debug_mode_url_rewrite(page: &Url, extension_id: &str, url: &str) -> String {
    let Ok(base) = Url::parse(&extension_prefix(extension_id)) else {
        return url.to_string();
    };
    let Ok(target) = base.join(url) else {
        return url.to_string();
    };
    let mount = format!("/extension/{extension_id}");
    if target.scheme() == EXTENSION_SCHEME {
        let mut rewritten = page.clone();
        rewritten.set_path(&format!("{mount}{}", target.path()));
        rewritten.set_query(target.query());
        rewritten.set_fragment(target.fragment());
        return rewritten.to_string();
    }
    if target.origin() == page.origin() && !target.path().starts_with("/extension/") {
        let mut rewritten = target.clone();
        rewritten.set_path(&format!("{mount}{}", target.path()));
        return rewritten.to_string();
    }
    target.to_string()
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn manifest() -> Manifest {
        Manifest::from_json(
            r#"{
                "name": "demo", "version": "1.0", "manifest_version": 2,
                "background": { "page": "bg.html" },
                "options_ui": { "page": "options.html" }
            }"#,
        )
        .unwrap()
    }

    fn url(input: &str) -> Url {
        Url::parse(input).unwrap()
    }

    #[test]
    fn classifies_pages() {
        let manifest = manifest();

        assert_eq!(
            classify(&url("https://example.com/"), "ext", &manifest),
            Environment::ContentScript
        );
        assert_eq!(
            classify(&url("holoflows-extension://ext/bg.html"), "ext", &manifest),
            Environment::BackgroundScript
        );
        assert_eq!(
            classify(
                &url("holoflows-extension://ext/_generated_background_page.html"),
                "ext",
                &manifest
            ),
            Environment::BackgroundScript
        );
        assert_eq!(
            classify(&url("holoflows-extension://ext/popup.html"), "ext", &manifest),
            Environment::ProtocolPage
        );
    }

    #[test]
    fn reads_debug_requests() {
        let manifest = manifest();
        let page = url("http://localhost:8080/debug?type=p&url=_options_");

        assert!(is_debug_request(&page));
        let target = parse_debug_mode_url(&page, "ext", &manifest).unwrap();
        assert_eq!(target.environment, Environment::ProtocolPage);
        assert_eq!(target.url.as_str(), "holoflows-extension://ext/options.html");

        let target =
            parse_debug_mode_url(&url("http://localhost/?type=m&url=https://a.com/x"), "ext", &manifest)
                .unwrap();
        assert_eq!(target.environment, Environment::ContentScript);
        assert_eq!(target.url.as_str(), "https://a.com/x");
    }

    #[test]
    fn rejects_incomplete_debug_requests() {
        let manifest = manifest();

        let err = parse_debug_mode_url(&url("http://localhost/?type=m"), "ext", &manifest).unwrap_err();
        assert_eq!(err.to_string(), "Need a url");
        assert!(parse_debug_mode_url(&url("http://localhost/?type=z"), "ext", &manifest).is_err());
    }

    #[test]
    fn rewrites_urls_in_debug_mode() {
        let page = url("http://localhost:8080/debug?type=b");

        assert_eq!(
            debug_mode_url_rewrite(&page, "ext", "holoflows-extension://ext/js/a.js"),
            "http://localhost:8080/extension/ext/js/a.js"
        );
        assert_eq!(
            debug_mode_url_rewrite(&page, "ext", "http://localhost:8080/data.json"),
            "http://localhost:8080/extension/ext/data.json"
        );
        assert_eq!(
            debug_mode_url_rewrite(&page, "ext", "https://cdn.example.com/lib.js"),
            "https://cdn.example.com/lib.js"
        );
    }
}
