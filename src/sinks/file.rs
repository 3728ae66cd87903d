use super::Sink;
use crate::config::{parse_size, FileTarget, SinkConfig};
use crate::error::{LogweaveError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Size-based rotation: when a write would push the active file past
/// `max_bytes`, `file` becomes `file.1`, `file.1` becomes `file.2` and so on,
/// keeping at most `max_files` rotated files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rotation {
    pub max_bytes: u64,
    pub max_files: usize,
}

const DEFAULT_MAX_FILES: usize = 5;

impl Rotation {
    fn from_settings(max_size: Option<&str>, max_files: Option<usize>) -> Option<Self> {
        let raw = max_size?;
        match parse_size(raw) {
            Some(max_bytes) if max_bytes > 0 => Some(Self {
                max_bytes,
                max_files: max_files.unwrap_or(DEFAULT_MAX_FILES),
            }),
            _ => {
                warn!("Ignoring unparseable max size {:?}", raw);
                None
            }
        }
    }
}

struct FileState {
    writer: Option<BufWriter<File>>,
    written: u64,
    opened_once: bool,
}

/// Appends lines to a file, opening it on first write.
///
/// Writes are serialized by an internal lock so concurrent callers never
/// interleave within a line. Each line is flushed as it is written.
pub struct FileSink {
    path: PathBuf,
    append: bool,
    rotation: Option<Rotation>,
    state: Mutex<FileState>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, append: bool) -> Self {
        Self {
            path: path.into(),
            append,
            rotation: None,
            state: Mutex::new(FileState {
                writer: None,
                written: 0,
                opened_once: false,
            }),
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn from_config(config: &SinkConfig) -> Result<Self> {
        let path = config
            .path
            .as_ref()
            .ok_or_else(|| LogweaveError::Config("file sink requires a path".to_string()))?;
        let mut sink = Self::new(path, config.append);
        sink.rotation = Rotation::from_settings(config.max_size.as_deref(), config.max_files);
        Ok(sink)
    }

    pub fn from_target(target: &FileTarget) -> Self {
        let mut sink = Self::new(&target.path, target.append);
        sink.rotation = Rotation::from_settings(target.max_size.as_deref(), target.max_files);
        sink
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self, state: &mut FileState, truncate: bool) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = if truncate {
            OpenOptions::new().create(true).write(true).truncate(true).open(&self.path)?
        } else {
            OpenOptions::new().create(true).append(true).open(&self.path)?
        };
        state.written = file.metadata().map(|m| m.len()).unwrap_or(0);
        state.writer = Some(BufWriter::new(file));
        state.opened_once = true;
        debug!("Opened log file {}", self.path.display());
        Ok(())
    }

    fn rotate(&self, state: &mut FileState, rotation: Rotation) -> Result<()> {
        if let Some(mut writer) = state.writer.take() {
            writer.flush()?;
        }

        if rotation.max_files > 0 {
            let rotated = |index: usize| PathBuf::from(format!("{}.{}", self.path.display(), index));
            let oldest = rotated(rotation.max_files);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for index in (1..rotation.max_files).rev() {
                let from = rotated(index);
                if from.exists() {
                    fs::rename(&from, rotated(index + 1))?;
                }
            }
            if self.path.exists() {
                fs::rename(&self.path, rotated(1))?;
            }
        }

        debug!("Rotated log file {}", self.path.display());
        self.open(state, true)
    }
}

impl Sink for FileSink {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn write(&self, _severity: &str, message: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.writer.is_none() {
            // Only the first open may truncate; reopening after close appends.
            let truncate = !self.append && !state.opened_once;
            self.open(&mut state, truncate)?;
        }

        let line_len = message.len() as u64 + 1;
        if let Some(rotation) = self.rotation {
            if state.written > 0 && state.written + line_len > rotation.max_bytes {
                self.rotate(&mut state, rotation)?;
            }
        }

        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| LogweaveError::Sink(format!("{} is not open", self.path.display())))?;
        writeln!(writer, "{}", message)?;
        writer.flush()?;
        state.written += line_len;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(mut writer) = state.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/app.log");
        let sink = FileSink::new(&path, true);

        sink.write("INFO", "first").unwrap();
        sink.write("INFO", "second").unwrap();
        sink.close().unwrap();

        assert_eq!(read(&path), "first\nsecond\n");
    }

    #[test]
    fn test_append_keeps_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "old\n").unwrap();

        let sink = FileSink::new(&path, true);
        sink.write("INFO", "new").unwrap();
        sink.close().unwrap();

        assert_eq!(read(&path), "old\nnew\n");
    }

    #[test]
    fn test_truncate_on_first_open_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "old\n").unwrap();

        let sink = FileSink::new(&path, false);
        sink.write("INFO", "a").unwrap();
        sink.close().unwrap();
        sink.write("INFO", "b").unwrap();
        sink.close().unwrap();

        assert_eq!(read(&path), "a\nb\n");
    }

    #[test]
    fn test_rotation_keeps_bounded_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let sink = FileSink::new(&path, true).with_rotation(Rotation {
            max_bytes: 10,
            max_files: 2,
        });

        for line in ["aaaaaaa", "bbbbbbb", "ccccccc", "ddddddd"] {
            sink.write("INFO", line).unwrap();
        }
        sink.close().unwrap();

        assert_eq!(read(&path), "ddddddd\n");
        assert_eq!(read(&dir.path().join("app.log.1")), "ccccccc\n");
        assert_eq!(read(&dir.path().join("app.log.2")), "bbbbbbb\n");
        assert!(!dir.path().join("app.log.3").exists());
    }

    #[test]
    fn test_from_config_requires_path() {
        assert!(FileSink::from_config(&SinkConfig::new("file")).is_err());

        let config = SinkConfig::new("file").with_path("/tmp/x.log");
        assert_eq!(FileSink::from_config(&config).unwrap().path(), Path::new("/tmp/x.log"));
    }

    #[test]
    fn test_concurrent_writes_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let sink = Arc::new(FileSink::new(&path, true));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        sink.write("INFO", &format!("thread-{}-line-{}", t, i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        sink.close().unwrap();

        let content = read(&path);
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 200);
        assert!(lines.iter().all(|l| l.starts_with("thread-") && l.contains("-line-")));
    }
}
