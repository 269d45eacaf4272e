use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

pub struct LogGuard {
    file: Option<Arc<Mutex<File>>>,
}

struct MultiWriter {
    stderr_enabled: bool,
    file: Option<Arc<Mutex<File>>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stderr_enabled {
            let _ = io::stderr().write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.stderr_enabled {
            let _ = io::stderr().flush();
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

/// Install the global subscriber. Stdout carries command output, so log
/// lines only ever go to the log file and, when asked, stderr.
pub fn init_logging(log_dir: &Path, command: &str, mirror_stderr: bool) -> Option<LogGuard> {
    let level = env::var("VDB_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let guard = match open_log_file(log_dir, command) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = guard.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter {
        stderr_enabled: mirror_stderr,
        file: file.clone(),
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

fn open_log_file(log_dir: &Path, command: &str) -> io::Result<LogGuard> {
    if log_dir.as_os_str().is_empty() {
        return Ok(LogGuard { file: None });
    }
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(format!("vdb-{}.log", sanitize_component(command)));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn sanitize_component(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_is_named_after_the_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        let guard = open_log_file(dir.path(), "testgen").expect("open");
        assert!(guard.file.is_some());
        assert!(dir.path().join("vdb-testgen.log").exists());
    }

    #[test]
    fn empty_log_dir_disables_the_file() {
        let guard = open_log_file(Path::new(""), "health").expect("open");
        assert!(guard.file.is_none());
    }

    #[test]
    fn command_names_are_sanitized() {
        assert_eq!(sanitize_component("../status run"), "___status_run");
    }
}
