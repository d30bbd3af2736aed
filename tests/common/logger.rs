//! Phase-tagged test output.
//!
//! Set `TEST_LOG_JSON=1` to emit one JSON object per line (for CI parsing).

use std::time::Instant;

use super::log_capture::TestLogCapture;

pub struct TestLogger {
    name: String,
    started: Instant,
    json: bool,
}

impl TestLogger {
    pub fn new(name: &str) -> Self {
        let logger = Self {
            name: name.to_string(),
            started: Instant::now(),
            json: std::env::var("TEST_LOG_JSON").is_ok_and(|v| v == "1"),
        };
        logger.emit("start", "");
        logger
    }

    /// Logger plus a capture of everything traced on this thread.
    pub fn with_capture(name: &str) -> (Self, TestLogCapture) {
        (Self::new(name), TestLogCapture::start())
    }

    pub fn phase(&self, phase: &str) {
        self.emit("phase", phase);
    }

    pub fn info(&self, message: &str) {
        self.emit("info", message);
    }

    pub fn finish_ok(&self) {
        self.emit("ok", &format!("{}ms", self.elapsed_ms()));
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    fn emit(&self, kind: &str, message: &str) {
        if self.json {
            eprintln!(
                "{}",
                serde_json::json!({ "test": self.name, "kind": kind, "message": message })
            );
        } else {
            eprintln!("[{}] {kind}: {message}", self.name);
        }
    }
}
