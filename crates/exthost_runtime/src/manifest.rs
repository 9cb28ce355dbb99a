//! The parts of `manifest.json` the host reads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// The synthetic page that hosts `background.scripts`.
pub const GENERATED_BACKGROUND_PAGE: &str = "_generated_background_page.html";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub manifest_version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_scripts: Vec<ContentScript>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<Background>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options_ui: Option<OptionsUi>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_action: Option<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    /// Everything else, kept so `runtime.getManifest()` returns the whole
    /// document.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentScript {
    #[serde(default)]
    pub matches: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_matches: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_globs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_globs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_about_blank: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub js: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub css: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_frames: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<String>,
}

impl ContentScript {
    /// A rule that injects `js` everywhere, as `tabs.executeScript` does.
    pub fn all_urls(js: Vec<String>) -> Self {
        Self {
            matches: vec!["<all_urls>".to_string()],
            js,
            ..Default::default()
        }
    }

    /// Keys that are accepted but have no effect here.
    pub fn unsupported_keys(&self, index: usize) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.all_frames == Some(true) {
            warnings.push(format!(
                "all_frames not supported yet. Defined at manifest.content_scripts[{index}].all_frames"
            ));
        }
        if !self.css.is_empty() {
            warnings.push(format!(
                "css not supported yet. Defined at manifest.content_scripts[{index}].css"
            ));
        }
        if matches!(self.run_at.as_deref(), Some(run_at) if run_at != "document_start") {
            warnings.push(format!(
                "run_at not supported yet. Defined at manifest.content_scripts[{index}].run_at"
            ));
        }
        warnings
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Background {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsUi {
    pub page: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_popup: Option<String>,
}

impl Manifest {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The page the background scripts run in.
    pub fn background_page(&self) -> &str {
        self.background
            .as_ref()
            .and_then(|background| background.page.as_deref())
            .unwrap_or(GENERATED_BACKGROUND_PAGE)
    }

    pub fn background_scripts(&self) -> &[String] {
        self.background
            .as_ref()
            .map(|background| background.scripts.as_slice())
            .unwrap_or_default()
    }

    pub fn options_page(&self) -> Option<&str> {
        self.options_ui.as_ref().map(|options| options.page.as_str())
    }

    pub fn popup_page(&self) -> Option<&str> {
        self.browser_action
            .as_ref()
            .or(self.page_action.as_ref())
            .and_then(|action| action.default_popup.as_deref())
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const MANIFEST: &str = r#"{
        "name": "demo",
        "version": "1.0",
        "manifest_version": 2,
        "content_scripts": [{ "matches": ["<all_urls>"], "js": ["a.js"], "css": ["a.css"], "run_at": "document_idle" }],
        "browser_action": { "default_popup": "popup.html" },
        "icons": { "16": "icon.png" }
    }"#;

    #[test]
    fn parses_and_keeps_unknown_keys() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();

        assert_eq!(manifest.content_scripts[0].js, vec!["a.js".to_string()]);
        assert_eq!(manifest.popup_page(), Some("popup.html"));
        assert_eq!(manifest.background_page(), GENERATED_BACKGROUND_PAGE);
        assert_eq!(manifest.to_json()["icons"]["16"], "icon.png");
    }

    #[test]
    fn warns_about_unsupported_keys() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();

        let warnings = manifest.content_scripts[0].unsupported_keys(0);

        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("css not supported yet"));
        assert!(warnings[1].starts_with("run_at not supported yet"));
    }
}
