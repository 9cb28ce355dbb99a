//! Writes the `<file>.prebuilt-<version>-<mode>` artifacts a host picks up
//! instead of transforming at run time.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use exthost_runtime::resources::EXTENSION_SCHEME;
use exthost_transform::{prebuilt_path, Mode, Transformer};
use walkdir::WalkDir;

use crate::error::{bail_user_error, user_error, Result};

/// Prebuilds `file`, labelling its output with the extension path
/// `source_map_path` (`<extension-id>/<path>`). Returns the written
/// artifacts.
pub fn prebuild_file(
    transformer: &Transformer,
    version: u32,
    source_map_path: &str,
    file: &Path,
) -> Result<Vec<PathBuf>> {
    let source = fs::read_to_string(file)
        .map_err(|err| user_error!("Cannot read {}: {err}", file.display()))?;
    let Some(name) = file.file_name().and_then(|name| name.to_str()) else {
        bail_user_error!("{} is not a file", file.display());
    };
    let url = format!("{EXTENSION_SCHEME}://{source_map_path}");

    let mut written = Vec::new();
    for mode in [Mode::Module, Mode::Script] {
        let artifact = transformer
            .prebuilt(&source, mode, &url)
            .map_err(|err| user_error!("{} ({mode}): {err}", file.display()))?;
        let out = file.with_file_name(prebuilt_path(name, version, mode));
        fs::write(&out, artifact)
            .with_context(|| format!("writing {}", out.display()))?;
        log::debug!("wrote {}", out.display());
        written.push(out);
    }
    Ok(written)
}

/// Prebuilds every `.js` file under `dir` as a resource of `extension_id`.
pub fn prebuild_dir(
    transformer: &Transformer,
    version: u32,
    extension_id: &str,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail_user_error!("{} is not a directory", dir.display());
    }
    let mut written = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("js") {
            continue;
        }
        let relative = path
            .strip_prefix(dir)?
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        log::info!("Prebuilt for {} ...", path.display());
        written.extend(prebuild_file(
            transformer,
            version,
            &format!("{extension_id}/{relative}"),
            path,
        )?);
    }
    Ok(written)
}

#[cfg(test)]
mod test {
    use exthost_transform::{parse_prebuilt_script, PREBUILT_VERSION};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn writes_both_artifacts_next_to_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("index.js");
        fs::write(&file, "globalThis.loaded = this").unwrap();

        let written = prebuild_file(&Transformer::new(), PREBUILT_VERSION, "ext/index.js", &file).unwrap();

        let names: Vec<String> = written
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["index.js.prebuilt-1-module", "index.js.prebuilt-1-script"]
        );
        let script = fs::read_to_string(&written[1]).unwrap();
        let (dynamic, _) = parse_prebuilt_script(&script).unwrap();
        assert!(!dynamic);
    }

    #[test]
    fn flags_scripts_with_dynamic_import() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lazy.js");
        fs::write(&file, "import('./other.js')").unwrap();

        let written = prebuild_file(&Transformer::new(), 7, "ext/lazy.js", &file).unwrap();

        let script = fs::read_to_string(&written[1]).unwrap();
        assert!(script.starts_with("//d\n"));
        assert!(written[1].ends_with("lazy.js.prebuilt-7-script"));
    }

    #[test]
    fn walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("js/lib")).unwrap();
        fs::write(dir.path().join("js/a.js"), "1").unwrap();
        fs::write(dir.path().join("js/lib/b.js"), "2").unwrap();
        fs::write(dir.path().join("readme.txt"), "not code").unwrap();

        let written = prebuild_dir(&Transformer::new(), 1, "ext", dir.path()).unwrap();

        assert_eq!(written.len(), 4);
        assert!(dir.path().join("js/lib/b.js.prebuilt-1-module").exists());
        assert!(!dir.path().join("readme.txt.prebuilt-1-module").exists());
    }

    #[test]
    fn missing_inputs_are_user_errors() {
        let dir = tempfile::tempdir().unwrap();

        let err = prebuild_dir(&Transformer::new(), 1, "ext", &dir.path().join("nope")).unwrap_err();

        assert!(err.downcast_ref::<crate::error::UserError>().is_some());
    }
}
