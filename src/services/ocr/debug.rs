use crate::models::config::DebugConfig;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub const DEBUG_ENV_VAR: &str = "HUD_TELEMETRY_OCR_DEBUG";

/// Writes every rendered candidate image as `NNNN_<tag>.png` for offline
/// inspection. Writes run on the blocking pool and failures are only logged.
pub struct DebugSink {
    dir: Option<PathBuf>,
    counter: AtomicU64,
}

impl DebugSink {
    pub fn new(config: &DebugConfig) -> Self {
        let dir = if config.enabled {
            Some(config.dir.clone().unwrap_or_else(default_debug_dir))
        } else {
            None
        };
        Self {
            dir,
            counter: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self {
            dir: None,
            counter: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// Queue a PNG for writing; returns the target path when enabled
    pub fn save(&self, tag: &str, png: &[u8]) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) % 10_000;
        let path = dir.join(format!("{:04}_{}.png", seq, sanitize_tag(tag)));

        let dir = dir.clone();
        let target = path.clone();
        let bytes = png.to_vec();
        let write = move || {
            if let Err(e) = std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(&target, bytes)) {
                debug!("Debug image {} not written: {}", target.display(), e);
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(write);
            }
            Err(_) => write(),
        }
        Some(path)
    }
}

fn default_debug_dir() -> PathBuf {
    std::env::temp_dir().join("hud-telemetry-debug")
}

fn sanitize_tag(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_sink_writes_nothing() {
        let sink = DebugSink::new(&DebugConfig::default());
        assert!(!sink.is_enabled());
        assert!(sink.save("exp_gold", b"png").is_none());
    }

    #[test]
    fn test_save_numbers_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DebugSink::new(&DebugConfig {
            enabled: true,
            dir: Some(dir.path().to_path_buf()),
        });

        let first = sink.save("exp_gold_s5", b"one").unwrap();
        let second = sink.save("exp gold/inv", b"two").unwrap();

        assert_eq!(first.file_name().unwrap(), "0000_exp_gold_s5.png");
        assert_eq!(second.file_name().unwrap(), "0001_exp_gold_inv.png");
        // outside a runtime the write is synchronous
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
    }
}
