use std::path::PathBuf;

use clap::{Parser, Subcommand};
use exthost_runtime::config::HostConfig;
use exthost_transform::Transformer;

mod error;
mod logger;
mod prebuilt;

use error::{user_error, Result};

#[derive(Debug, Parser)]
#[command(name = "exthost", version, about = "Prebuilds extension sources for the host's transform caches")]
struct Cli {
    /// JSON configuration file, layered under `EXTHOST_*` variables.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prebuilds one file.
    ///
    /// e.g. `exthost prebuilt eofkdgkhfoebecmamljfaepckoecjhib/js/index.js js/index.js`
    Prebuilt {
        /// The file's path inside the extension, `<extension-id>/<path>`.
        #[arg(value_name = "SOURCE_MAP_PATH")]
        source_map_path: String,
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Prebuilds every `.js` file of an unpacked extension.
    Prebuilts {
        #[arg(value_name = "EXTENSION_ID")]
        extension_id: String,
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
}

fn exec(cli: Cli) -> Result<()> {
    let config = HostConfig::load(cli.config.as_deref())
        .map_err(|err| user_error!("Invalid configuration: {err}"))?;
    let transformer = Transformer::new();
    let version = config.prebuilt_version;

    let written = match cli.command {
        Command::Prebuilt {
            source_map_path,
            file,
        } => prebuilt::prebuild_file(&transformer, version, &source_map_path, &file)?,
        Command::Prebuilts { extension_id, dir } => {
            prebuilt::prebuild_dir(&transformer, version, &extension_id, &dir)?
        }
    };
    log::info!(
        "{} artifacts written ({} compilations)",
        written.len(),
        transformer.compilations()
    );
    Ok(())
}

fn main() {
    logger::init_logger();

    let cli = Cli::parse();
    log::debug!("Command: {:?}", cli);

    if let Err(err) = exec(cli) {
        error::print(&err);
        std::process::exit(1);
    }
}
