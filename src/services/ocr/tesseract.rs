use super::engine::{LineOptions, OcrEngine};
use crate::error::EngineError;
use crate::models::config::EngineConfig;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::debug;

/// Tesseract driven as a subprocess, one process per line read.
///
/// The PNG is piped through stdin first. If that mode fails for any reason
/// other than a missing binary or a timeout, the read is retried once through
/// a temporary file within whatever is left of the same time budget.
pub struct TesseractCli {
    config: EngineConfig,
}

impl TesseractCli {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Options after the input/output positional arguments
    fn build_args(&self, options: &LineOptions) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(dir) = &self.config.tessdata_dir {
            args.push("--tessdata-dir".to_string());
            args.push(dir.to_string_lossy().to_string());
        }
        args.push("-l".to_string());
        args.push(self.config.language.clone());
        args.push("--oem".to_string());
        args.push(options.oem.to_string());
        args.push("--psm".to_string());
        args.push(options.psm.to_string());
        if let Some(whitelist) = options.whitelist.as_deref().filter(|w| !w.is_empty()) {
            args.push("-c".to_string());
            args.push(format!("tessedit_char_whitelist={}", whitelist));
        }
        args
    }

    fn spawn_error(&self, err: std::io::Error) -> EngineError {
        if err.kind() == ErrorKind::NotFound {
            EngineError::Unavailable(format!("{} not found", self.config.tesseract_path))
        } else {
            EngineError::Io(err)
        }
    }

    async fn run_with_stdin(&self, png: &[u8], options: &LineOptions) -> Result<String, EngineError> {
        let mut child = Command::new(&self.config.tesseract_path)
            .arg("stdin")
            .arg("stdout")
            .args(self.build_args(options))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Process("failed to access tesseract stdin".to_string()))?;
        stdin.write_all(png).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(EngineError::Process(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run_with_temp_file(&self, png: &[u8], options: &LineOptions) -> Result<String, EngineError> {
        let input = NamedTempFile::with_suffix(".png")?;
        tokio::fs::write(input.path(), png).await?;

        // tesseract appends .txt to the output base
        let output_base = input.path().with_extension("out");
        let output_file = output_base.with_extension("out.txt");

        let output = Command::new(&self.config.tesseract_path)
            .arg(input.path())
            .arg(&output_base)
            .args(self.build_args(options))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        let text = if output.status.success() {
            tokio::fs::read_to_string(&output_file)
                .await
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        } else {
            let _ = tokio::fs::remove_file(&output_file).await;
            return Err(EngineError::Process(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        };
        let _ = tokio::fs::remove_file(&output_file).await;
        Ok(text)
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn recognize_line(&self, png: &[u8], options: &LineOptions) -> Result<String, EngineError> {
        let millis = options.timeout.as_millis() as u64;
        let deadline = Instant::now() + options.timeout;

        match timeout_at(deadline, self.run_with_stdin(png, options)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(EngineError::Unavailable(msg))) => Err(EngineError::Unavailable(msg)),
            Ok(Err(err)) => {
                debug!("stdin mode failed ({}), retrying through a temp file", err);
                timeout_at(deadline, self.run_with_temp_file(png, options))
                    .await
                    .map_err(|_| EngineError::Timeout(millis))?
            }
            Err(_) => Err(EngineError::Timeout(millis)),
        }
    }

    async fn version(&self) -> Result<String, EngineError> {
        let output = timeout(
            std::time::Duration::from_secs(5),
            Command::new(&self.config.tesseract_path)
                .arg("--version")
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| EngineError::Timeout(5000))?
        .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(EngineError::Process(format!("tesseract --version exited with {}", output.status)));
        }
        // older builds print the version on stderr
        let text = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).to_string()
        } else {
            String::from_utf8_lossy(&output.stdout).to_string()
        };
        Ok(text
            .trim()
            .lines()
            .next()
            .unwrap_or("unknown")
            .to_string())
    }
}
