//! ffmpeg decode of the current source into a `PcmFeed`.
//!
//! mpv does not hand out samples, so a second decoder follows whatever the
//! player is on, paced with `-re` so chunks arrive at playback speed.

use std::path::PathBuf;

use ogradio_core::media::PcmFeed;
use ogradio_proto::platform;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Samples per chunk pushed into the feed.
pub const WINDOW_SAMPLES: usize = 1024;

pub struct PcmCapture {
    feed: PcmFeed,
    task: Option<JoinHandle<()>>,
}

impl PcmCapture {
    pub fn new(feed: PcmFeed) -> Self {
        Self { feed, task: None }
    }

    /// Decode `url` from `offset_secs`, replacing any running capture.
    pub fn start(&mut self, url: &str, offset_secs: f64) {
        self.stop();
        let url = url.to_string();
        let feed = self.feed.clone();
        self.task = Some(tokio::spawn(async move {
            match run_ffmpeg(&url, offset_secs, &feed).await {
                Ok(()) => debug!("pcm: capture of {} finished", url),
                Err(e) => warn!("pcm: capture of {} failed: {}", url, e),
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PcmCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ffmpeg_args(url: &str, offset_secs: f64, sample_rate: u32) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin", "-re"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if offset_secs > 0.0 {
        args.push("-ss".into());
        args.push(format!("{offset_secs:.3}"));
    }
    args.extend([
        "-i".to_string(),
        url.to_string(),
        "-vn".into(),
        "-ac".into(),
        "1".into(),
        "-ar".into(),
        sample_rate.to_string(),
        "-f".into(),
        "s16le".into(),
        "pipe:1".into(),
    ]);
    args
}

/// Little-endian s16 bytes to normalised f32.  A trailing odd byte is ignored.
pub fn s16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect()
}

async fn run_ffmpeg(url: &str, offset_secs: f64, feed: &PcmFeed) -> anyhow::Result<()> {
    let ffmpeg_bin = platform::find_ffmpeg_binary().unwrap_or_else(|| PathBuf::from("ffmpeg"));
    let mut child = Command::new(ffmpeg_bin)
        .args(ffmpeg_args(url, offset_secs, feed.sample_rate()))
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("ffmpeg stdout not captured"))?;
    let mut buf = vec![0u8; WINDOW_SAMPLES * 2];
    let mut carry: Vec<u8> = Vec::with_capacity(WINDOW_SAMPLES * 2);

    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        carry.extend_from_slice(&buf[..n]);
        while carry.len() >= WINDOW_SAMPLES * 2 {
            let chunk: Vec<u8> = carry.drain(..WINDOW_SAMPLES * 2).collect();
            feed.push(s16le_to_f32(&chunk));
        }
    }
    if carry.len() >= 2 {
        feed.push(s16le_to_f32(&carry));
    }

    let status = child.wait().await?;
    if !status.success() {
        anyhow::bail!("ffmpeg exited: {}", status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s16le_conversion() {
        let bytes = [0x00, 0x40, 0x00, 0xC0, 0xFF, 0x7F, 0x01];
        let samples = s16le_to_f32(&bytes);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0.5);
        assert_eq!(samples[1], -0.5);
        assert!(samples[2] > 0.999);
    }

    #[test]
    fn test_ffmpeg_args_seek_only_when_offset() {
        let args = ffmpeg_args("/a.mp3", 0.0, 44100);
        assert!(!args.contains(&"-ss".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-ar" && w[1] == "44100"));

        let args = ffmpeg_args("/a.mp3", 12.5, 22050);
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "12.500");
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut capture = PcmCapture::new(PcmFeed::new(44100));
        capture.stop();
        assert!(capture.task.is_none());
    }
}
