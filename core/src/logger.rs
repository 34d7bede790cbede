// core/src/logger.rs
//
// Single responsibility: setting up the logger.
// Lines go to the log file and are mirrored to stderr.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use env_logger::{Builder, Target};
use log::{LevelFilter, error, warn};

use crate::platform::LoggerSink;
use crate::scheduler::panic_message;

/// Writes every buffer to both sinks. A failing file never silences the console.
pub struct Tee<A, B> {
    primary: A,
    mirror: B,
}

impl<A: Write, B: Write> Tee<A, B> {
    pub fn new(primary: A, mirror: B) -> Self {
        Self { primary, mirror }
    }
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file_result = self.primary.write_all(buf);
        self.mirror.write_all(buf)?;
        file_result.map(|_| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let file_result = self.primary.flush();
        self.mirror.flush()?;
        file_result
    }
}

/// `timestamp - LEVEL - message`, the layout of the log file.
pub fn format_line(level: log::Level, message: &std::fmt::Arguments<'_>) -> String {
    format!(
        "{} - {} - {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        level,
        message
    )
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// env_logger backend appending to a file at a well-known path.
pub struct FileLogger {
    path: PathBuf,
    level: LevelFilter,
}

impl FileLogger {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            level: LevelFilter::Info,
        }
    }

    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LoggerSink for FileLogger {
    /// Initializes the logger for the entire application.
    /// Typically called early in `main()`. `RUST_LOG` overrides the level.
    fn init(&self) {
        let mut builder = Builder::new();
        builder
            .filter_level(self.level)
            .parse_default_env()
            .format(|buf, record| writeln!(buf, "{}", format_line(record.level(), record.args())));

        let file = open_append(&self.path);
        let file_error = match file {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(Tee::new(file, io::stderr()))));
                None
            }
            Err(e) => {
                builder.target(Target::Stderr);
                Some(e)
            }
        };

        if builder.try_init().is_err() {
            // Tests and embedders may have installed a logger already.
            return;
        }

        if let Some(e) = file_error {
            warn!(
                "Could not open log file {:?} ({}), logging to stderr only",
                self.path, e
            );
        }
    }
}

/// Log panics before the default hook prints them. Only a panic on the main thread
/// is fatal; worker panics are caught and reported by their owners.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!(" at {}:{}", l.file(), l.line()))
            .unwrap_or_default();
        let thread = std::thread::current();
        error!(
            "{}",
            panic_line(thread.name(), &panic_message(info.payload()), &location)
        );
        default_hook(info);
    }));
}

fn panic_line(thread: Option<&str>, message: &str, location: &str) -> String {
    match thread {
        Some("main") => format!("Fatal error: {message}{location}"),
        Some(name) => format!("Panic in thread '{name}': {message}{location}"),
        None => format!("Panic in unnamed thread: {message}{location}"),
    }
}
