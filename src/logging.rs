use std::io::Write;
use std::sync::Once;

use chrono::Local;
use log::LevelFilter;

static INIT: Once = Once::new();

/// Installs the process logger.
///
/// `RUST_LOG` overrides `default_level`. Calling this more than once is a
/// no-op, so tests and the binary can both call it.
pub fn init(default_level: LevelFilter) {
    INIT.call_once(|| {
        let result = env_logger::Builder::new()
            .filter_level(default_level)
            .parse_default_env()
            .format(|buf, record| {
                let thread = std::thread::current();
                writeln!(
                    buf,
                    "{} [{}] ({}) {}: {}",
                    Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                    record.level(),
                    thread.name().unwrap_or("unnamed"),
                    record.target(),
                    record.args()
                )
            })
            .try_init();

        if let Err(e) = result {
            eprintln!("Logger already installed: {}", e);
        }
    });
}
