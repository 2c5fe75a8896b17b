// src/services/ytdlp.rs

//! Extraction through the `yt-dlp` command-line tool.
//!
//! Metadata comes from `--dump-single-json`; downloads select a format with
//! `-f` and report the final file location via `--print after_move:filepath`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{AppError, Result};
use crate::models::{AcquisitionConfig, RawMetadata};
use crate::services::{FetchRequest, MediaExtractor};
use crate::utils::find_binary;

/// Lines of stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 5;

/// `MediaExtractor` backed by a local `yt-dlp` install.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary: String,
    extract_timeout: Duration,
    download_timeout: Duration,
    merge_available: bool,
}

impl YtDlpExtractor {
    /// Build from the `[acquisition]` section. Stream merging is enabled when
    /// `ffmpeg` can be found on `PATH`.
    pub fn new(config: &AcquisitionConfig) -> Self {
        let merge_available = find_binary("ffmpeg").is_some();
        if !merge_available {
            log::warn!("ffmpeg not found; separate video/audio streams will not be merged");
        }
        Self {
            binary: config.ytdlp_binary.clone(),
            extract_timeout: Duration::from_secs(config.extract_timeout_secs),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
            merge_available,
        }
    }

    pub fn with_timeouts(mut self, extract: Duration, download: Duration) -> Self {
        self.extract_timeout = extract;
        self.download_timeout = download;
        self
    }

    pub fn with_merge(mut self, available: bool) -> Self {
        self.merge_available = available;
        self
    }

    /// Whether the configured binary can be located.
    pub fn is_installed(&self) -> bool {
        find_binary(&self.binary).is_some()
    }

    fn extract_args(url: &str) -> Vec<String> {
        vec![
            "--dump-single-json".into(),
            "--no-warnings".into(),
            "--".into(),
            url.into(),
        ]
    }

    fn fetch_args(request: &FetchRequest) -> Vec<String> {
        let template = request
            .dest_dir
            .join(format!("{}.%(ext)s", request.stem))
            .to_string_lossy()
            .into_owned();

        let mut args: Vec<String> = vec![
            "--no-warnings".into(),
            "--no-progress".into(),
            "-f".into(),
            request.strategy.format_selector().into(),
            "-o".into(),
            template,
            "--print".into(),
            "after_move:filepath".into(),
        ];
        if let Some(item) = request.playlist_item {
            args.push("--playlist-items".into());
            args.push(item.to_string());
        }
        if request.strategy.requires_merge() {
            args.push("--merge-output-format".into());
            args.push("mp4".into());
        }
        args.push("--".into());
        args.push(request.url.clone());
        args
    }

    /// Run the binary and return stdout, mapping spawn failures, timeouts and
    /// non-zero exits to errors that name `url`.
    async fn run(&self, args: &[String], limit: Duration, url: &str) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Ok(output) => {
                output.map_err(|e| AppError::extraction(url, format!("failed to run {}: {}", self.binary, e)))?
            }
            Err(_) => return Err(AppError::timeout(format!("yt-dlp {url}"), limit.as_secs())),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join(" | ");
            return Err(AppError::extraction(
                url,
                format!("yt-dlp exited with {}: {}", output.status, tail),
            ));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract(&self, url: &str) -> Result<RawMetadata> {
        let stdout = self
            .run(&Self::extract_args(url), self.extract_timeout, url)
            .await?;
        serde_json::from_slice(&stdout)
            .map_err(|e| AppError::extraction(url, format!("unreadable metadata: {e}")))
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<PathBuf> {
        log::debug!(
            "yt-dlp fetch {} with format {:?}",
            request.url,
            request.strategy.format_selector()
        );
        let stdout = self
            .run(&Self::fetch_args(request), self.download_timeout, &request.url)
            .await?;
        let stdout = String::from_utf8_lossy(&stdout);
        stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| AppError::extraction(&request.url, "yt-dlp reported no output file"))
    }

    fn can_merge_streams(&self) -> bool {
        self.merge_available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Strategy;

    fn request(strategy: Strategy, item: Option<usize>) -> FetchRequest {
        FetchRequest {
            url: "https://example.com/p/1".into(),
            strategy,
            dest_dir: PathBuf::from("/tmp/work"),
            stem: "abc".into(),
            playlist_item: item,
        }
    }

    #[test]
    fn test_fetch_args_muxed() {
        let args = YtDlpExtractor::fetch_args(&request(Strategy::Muxed, None));
        assert_eq!(
            args,
            vec![
                "--no-warnings",
                "--no-progress",
                "-f",
                "best[ext=mp4]",
                "-o",
                "/tmp/work/abc.%(ext)s",
                "--print",
                "after_move:filepath",
                "--",
                "https://example.com/p/1",
            ]
        );
    }

    #[test]
    fn test_fetch_args_merge_and_playlist_item() {
        let args = YtDlpExtractor::fetch_args(&request(Strategy::MergeBest, Some(3)));
        let joined = args.join(" ");
        assert!(joined.contains("-f bestvideo+bestaudio"));
        assert!(joined.contains("--playlist-items 3"));
        assert!(joined.contains("--merge-output-format mp4"));
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/p/1"));
    }

    #[cfg(unix)]
    fn fake_binary(dir: &std::path::Path, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    fn extractor(binary: String) -> YtDlpExtractor {
        let config = AcquisitionConfig {
            ytdlp_binary: binary,
            ..AcquisitionConfig::default()
        };
        YtDlpExtractor::new(&config).with_merge(false)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extract_parses_json() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bin = fake_binary(tmp.path(), r#"echo '{"id": "x1", "duration": 12.5, "title": "T"}'"#);

        let raw = extractor(bin).extract("https://example.com/v").await.unwrap();
        assert_eq!(raw.id.as_deref(), Some("x1"));
        assert_eq!(raw.duration, Some(12.5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extract_failure_carries_stderr() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bin = fake_binary(tmp.path(), "echo 'ERROR: Unsupported URL' >&2\nexit 1");

        let err = extractor(bin).extract("https://example.com/v").await.unwrap_err();
        match err {
            AppError::Extraction { url, message } => {
                assert_eq!(url, "https://example.com/v");
                assert!(message.contains("Unsupported URL"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_returns_printed_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bin = fake_binary(tmp.path(), "echo '/tmp/work/abc.mp4'");

        let path = extractor(bin)
            .fetch(&request(Strategy::BestSingle, None))
            .await
            .unwrap();
        assert_eq!(path, PathBuf::from("/tmp/work/abc.mp4"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_binary_times_out() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bin = fake_binary(tmp.path(), "sleep 5");

        let err = extractor(bin)
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(200))
            .extract("https://example.com/v")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout { .. }));
    }
}
