use std::io::{self, Write};

use env_logger::{fmt, Builder, Env};

fn format(fmt: &mut fmt::Formatter, record: &log::Record<'_>) -> io::Result<()> {
    match record.level() {
        log::Level::Error => write!(fmt, "[ERROR] ")?,
        log::Level::Warn => write!(fmt, "[WARN] ")?,
        log::Level::Info | log::Level::Debug | log::Level::Trace => (),
    };

    writeln!(fmt, "{}", record.args())
}

pub fn init_logger() {
    let env = Env::default()
        .filter_or("EXTHOST_LOG", "info")
        .write_style_or("EXTHOST_LOG_STYLE", "auto");

    Builder::from_env(env).format(format).init();
}
