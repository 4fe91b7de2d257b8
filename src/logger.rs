use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Transfer events reported by the client orchestrator.
pub trait Logger: Send + Sync {
    fn file_start(&self, _name: &str, _size: u64) {}
    fn chunk_sent(&self, _name: &str, _bytes_sent: u64, _size: u64) {}
    fn file_done(&self, _name: &str, _bytes: u64) {}
    fn file_failed(&self, _name: &str, _reason: &str) {}
    fn directory(&self, _name: &str, _depth: usize) {}
    fn done(&self, _files: u64, _bytes: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn file_start(&self, name: &str, size: u64) {
        self.line(&format!("START file={} size={}", name, size));
    }
    fn file_done(&self, name: &str, bytes: u64) {
        self.line(&format!("SENT file={} bytes={}", name, bytes));
    }
    fn file_failed(&self, name: &str, reason: &str) {
        self.line(&format!("FAILED file={} reason={}", name, reason));
    }
    fn directory(&self, name: &str, depth: usize) {
        self.line(&format!("DIR name={} depth={}", name, depth));
    }
    fn done(&self, files: u64, bytes: u64, seconds: f64) {
        self.line(&format!("DONE files={files} bytes={bytes} seconds={seconds:.3}"));
    }
}

/// Fan events out to several loggers
pub struct Tee(pub Vec<Box<dyn Logger>>);

impl Logger for Tee {
    fn file_start(&self, name: &str, size: u64) {
        self.0.iter().for_each(|l| l.file_start(name, size));
    }
    fn chunk_sent(&self, name: &str, bytes_sent: u64, size: u64) {
        self.0.iter().for_each(|l| l.chunk_sent(name, bytes_sent, size));
    }
    fn file_done(&self, name: &str, bytes: u64) {
        self.0.iter().for_each(|l| l.file_done(name, bytes));
    }
    fn file_failed(&self, name: &str, reason: &str) {
        self.0.iter().for_each(|l| l.file_failed(name, reason));
    }
    fn directory(&self, name: &str, depth: usize) {
        self.0.iter().for_each(|l| l.directory(name, depth));
    }
    fn done(&self, files: u64, bytes: u64, seconds: f64) {
        self.0.iter().for_each(|l| l.done(files, bytes, seconds));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_logger_appends_stamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/transfer.log");
        let logger = TextLogger::new(&path).unwrap();
        logger.file_start("a.bin", 10);
        logger.file_done("a.bin", 10);
        logger.file_failed("b.bin", "aborted");
        logger.done(1, 10, 0.5);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("START file=a.bin size=10"));
        assert!(lines[2].ends_with("FAILED file=b.bin reason=aborted"));
        assert!(lines[3].ends_with("DONE files=1 bytes=10 seconds=0.500"));
    }

    #[test]
    fn test_tee_forwards_to_all() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        let tee = Tee(vec![
            Box::new(TextLogger::new(&a).unwrap()),
            Box::new(NoopLogger),
            Box::new(TextLogger::new(&b).unwrap()),
        ]);
        tee.directory("photos", 1);
        assert!(std::fs::read_to_string(&a).unwrap().contains("DIR name=photos depth=1"));
        assert!(std::fs::read_to_string(&b).unwrap().contains("DIR name=photos depth=1"));
    }
}
