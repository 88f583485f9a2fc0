use colored::{ColoredString, Colorize};
use env_logger::Builder;
use log::{Level, LevelFilter, Record};
use std::io::Write;

use super::config::PackagePaths;

/// Level for this crate's own records. Dependencies stay at warn.
pub fn crate_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Colored tag for records that carry one (errors and warnings).
fn level_tag(level: Level) -> Option<ColoredString> {
    match level {
        Level::Error => Some("ERROR".red()),
        Level::Warn => Some("WARN".yellow()),
        _ => None,
    }
}

fn format_line(name: &str, record: &Record<'_>) -> String {
    match level_tag(record.level()) {
        Some(tag) => format!(
            "[{} {} {}] {}",
            name.cyan(),
            tag,
            record.target().white(),
            record.args()
        ),
        None => format!("[{}] {}", name.cyan(), record.args()),
    }
}

/// Install the colored stderr logger: dependencies at warn, this crate at [`crate_level`].
///
/// Per-module directives from `RUST_LOG` are kept for other modules. A bare global level in
/// `RUST_LOG` is overridden by the warn default, and this crate's level always wins.
///
/// Returns `false` when a logger was already installed (only the first call takes effect).
pub fn setup_logging(verbose: bool) -> bool {
    let name = PackagePaths::get().pkg_name();
    Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(name, crate_level(verbose))
        .format(move |buf, record| writeln!(buf, "{}", format_line(name, record)))
        .try_init()
        .is_ok()
}
