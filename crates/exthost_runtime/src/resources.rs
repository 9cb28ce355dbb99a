//! Extension resources: preloaded text first, the host's `fetch` second.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use exthost_transform::{parse_prebuilt_script, prebuilt_path, Mode, Transformer};
use serde_json::Value;

use crate::{
    envelope::{Envelope, Payload},
    loader::ModuleFetcher,
    rpc::FrameworkRpc,
    Result,
};

pub const EXTENSION_SCHEME: &str = "holoflows-extension";

/// `holoflows-extension://<id>/`
pub fn extension_prefix(extension_id: &str) -> String {
    format!("{EXTENSION_SCHEME}://{extension_id}/")
}

/// The absolute URL of `path` inside the extension. Paths that already are
/// URLs of the extension are returned as is.
pub fn extension_url(extension_id: &str, path: &str) -> String {
    let prefix = extension_prefix(extension_id);
    if path.starts_with(&prefix) {
        return path.to_string();
    }
    format!("{prefix}{}", path.trim_start_matches('/'))
}

pub fn is_extension_url(url: &str) -> bool {
    url.starts_with(&format!("{EXTENSION_SCHEME}:"))
}

pub struct Resources {
    extension_id: String,
    preloaded: HashMap<String, String>,
    rpc: FrameworkRpc,
    transformer: Rc<Transformer>,
    prebuilt_version: u32,
    /// Prebuilt artifacts already asked for, found or not.
    prebuilt: RefCell<HashMap<String, Option<String>>>,
}

impl Resources {
    /// `preloaded` maps paths (relative or absolute) to their text.
    pub fn new(
        extension_id: &str,
        preloaded: HashMap<String, String>,
        rpc: FrameworkRpc,
        transformer: Rc<Transformer>,
        prebuilt_version: u32,
    ) -> Self {
        let preloaded = preloaded
            .into_iter()
            .map(|(path, content)| (extension_url(extension_id, &path), content))
            .collect();
        Self {
            extension_id: extension_id.to_string(),
            preloaded,
            rpc,
            transformer,
            prebuilt_version,
            prebuilt: RefCell::default(),
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    fn key(&self, path: &str) -> String {
        if path.contains("://") {
            path.to_string()
        } else {
            extension_url(&self.extension_id, path)
        }
    }

    fn fetch_text(&self, url: &str) -> Result<Option<String>> {
        if let Some(content) = self.preloaded.get(url) {
            return Ok(Some(content.clone()));
        }
        let response = self.rpc.fetch(&self.extension_id, "GET", url)?;
        let status = response.get("status").and_then(Value::as_u64).unwrap_or(0);
        if !(200..300).contains(&status) {
            log::debug!("{url} answered {status}");
            return Ok(None);
        }
        let Some(data) = response.get("data") else {
            return Ok(None);
        };
        match Envelope::from_json(data)?.decode()? {
            Payload::Text(text) if text.is_empty() => Ok(None),
            Payload::Text(text) => Ok(Some(text)),
            _ => {
                log::error!("Not supported type for resource {url}");
                Ok(None)
            }
        }
    }

    /// The text of `path`. Fetching a `.js` file also looks for its prebuilt
    /// siblings and seeds the transformer with them.
    pub fn get(&self, path: &str) -> Result<Option<String>> {
        let url = self.key(path);
        let Some(content) = self.fetch_text(&url)? else {
            return Ok(None);
        };
        if url.ends_with(".js") {
            self.seed_prebuilt(&url, &content)?;
        }
        Ok(Some(content))
    }

    /// The prebuilt `mode` artifact of `url`. Each artifact is fetched at
    /// most once.
    fn prebuilt_artifact(&self, url: &str, mode: Mode) -> Result<Option<String>> {
        let path = prebuilt_path(url, self.prebuilt_version, mode);
        if let Some(known) = self.prebuilt.borrow().get(&path) {
            return Ok(known.clone());
        }
        let artifact = self.fetch_text(&path)?;
        self.prebuilt.borrow_mut().insert(path, artifact.clone());
        Ok(artifact)
    }

    fn seed_prebuilt(&self, url: &str, content: &str) -> Result<()> {
        if let Some(artifact) = self.prebuilt_artifact(url, Mode::Module)? {
            log::trace!("prebuilt module found for {url}");
            self.transformer.seed(content, Mode::Module, &artifact);
        }
        if let Some(artifact) = self.prebuilt_artifact(url, Mode::Script)? {
            match parse_prebuilt_script(&artifact) {
                Some((dynamic, body)) => {
                    log::trace!("prebuilt script found for {url}");
                    self.transformer.seed(content, Mode::Script, body);
                    self.transformer.seed_dynamic_import(content, dynamic);
                }
                None => log::warn!("Malformed prebuilt script for {url}"),
            }
        }
        Ok(())
    }
}

impl ModuleFetcher for Resources {
    fn fetch_source_text(&self, url: &str) -> Result<Option<String>> {
        self.get(url)
    }

    fn fetch_prebuilt(&self, mode: Mode, url: &str) -> Result<Option<String>> {
        self.prebuilt_artifact(&self.key(url), mode)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::debug_host::DebugHost;

    fn resources(host: Rc<DebugHost>, preloaded: &[(&str, &str)]) -> (Resources, Rc<Transformer>) {
        let transformer = Rc::new(Transformer::new());
        let preloaded = preloaded
            .iter()
            .map(|(path, content)| (path.to_string(), content.to_string()))
            .collect();
        let resources = Resources::new(
            "ext",
            preloaded,
            FrameworkRpc::new(host),
            transformer.clone(),
            exthost_transform::PREBUILT_VERSION,
        );
        (resources, transformer)
    }

    #[test]
    fn builds_extension_urls() {
        assert_eq!(extension_url("ext", "/a/b.js"), "holoflows-extension://ext/a/b.js");
        assert_eq!(extension_url("ext", "a.js"), "holoflows-extension://ext/a.js");
        assert_eq!(
            extension_url("ext", "holoflows-extension://ext/a.js"),
            "holoflows-extension://ext/a.js"
        );
        assert!(is_extension_url("holoflows-extension://ext/"));
        assert!(!is_extension_url("https://ext/"));
    }

    #[test]
    fn prefers_preloaded_text() {
        let host = Rc::new(DebugHost::new());
        host.insert_resource("ext", "a.js", "fetched");
        let (resources, _) = resources(host.clone(), &[("/a.js", "preloaded")]);

        assert_eq!(resources.get("a.js").unwrap().as_deref(), Some("preloaded"));
        assert!(host.calls_to("fetch").iter().all(|params| params[1]["url"] != "holoflows-extension://ext/a.js"));
    }

    #[test]
    fn missing_resources_are_none() {
        let host = Rc::new(DebugHost::new());
        let (resources, _) = resources(host, &[]);

        assert_eq!(resources.get("nope.js").unwrap(), None);
    }

    #[test]
    fn seeds_prebuilt_artifacts() {
        let host = Rc::new(DebugHost::new());
        host.insert_resource("ext", "a.js", "this.x = 1");
        host.insert_resource(
            "ext",
            &prebuilt_path("a.js", exthost_transform::PREBUILT_VERSION, Mode::Script),
            "//s\nprecompiled()",
        );
        let (resources, transformer) = resources(host, &[]);

        resources.get("a.js").unwrap();

        assert_eq!(
            transformer.transform("this.x = 1", Mode::Script, "a.js").unwrap(),
            "precompiled()"
        );
        assert_eq!(transformer.compilations(), 0);
        assert!(!transformer.has_dynamic_import("this.x = 1"));
    }

    #[test]
    fn prebuilt_siblings_are_fetched_once() {
        let host = Rc::new(DebugHost::new());
        host.insert_resource("ext", "a.js", "run()");
        let (resources, _) = resources(host.clone(), &[]);

        assert_eq!(resources.fetch_prebuilt(Mode::Script, "a.js").unwrap(), None);
        assert_eq!(resources.fetch_source_text("a.js").unwrap().as_deref(), Some("run()"));
        assert_eq!(resources.fetch_prebuilt(Mode::Module, "a.js").unwrap(), None);

        let urls: Vec<String> = host
            .calls_to("fetch")
            .iter()
            .filter_map(|params| params[1]["url"].as_str().map(str::to_string))
            .collect();
        let version = exthost_transform::PREBUILT_VERSION;
        assert_eq!(
            urls,
            vec![
                format!("holoflows-extension://ext/a.js.prebuilt-{version}-script"),
                "holoflows-extension://ext/a.js".to_string(),
                format!("holoflows-extension://ext/a.js.prebuilt-{version}-module"),
            ]
        );
    }
}
