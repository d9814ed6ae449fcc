//! Live video sources.
//!
//! Videos are not cached as bitmaps: a transition needs a fresh frame every
//! tick, so the compositor holds a [`VideoFeed`] for the lifetime of the
//! configured pair and re-uploads whatever frame the feed has finished.
//! Extraction runs on the blocking pool, never on the render path.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use reelkit_core::frame::FrameBuffer;
use reelkit_core::{ReelkitError, ReelkitResult};

/// How a video source must behave while it backs a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackDirective {
    pub muted: bool,
    pub looping: bool,
    pub autoplay: bool,
}

impl PlaybackDirective {
    /// Muted, looping, playing immediately.
    pub const BACKGROUND_LOOP: PlaybackDirective = PlaybackDirective {
        muted: true,
        looping: true,
        autoplay: true,
    };

    /// Map elapsed playback time to a position within a clip of `duration` seconds.
    pub fn position(&self, elapsed: f64, duration: f64) -> f64 {
        if !self.autoplay || elapsed <= 0.0 || duration <= 0.0 {
            return 0.0;
        }
        if self.looping {
            elapsed % duration
        } else {
            elapsed.min(duration)
        }
    }
}

pub trait VideoSource: Send {
    fn dimensions(&self) -> (u32, u32);

    fn directive(&self) -> PlaybackDirective;

    /// The frame showing `elapsed` seconds after the source was opened.
    fn frame_at(&mut self, elapsed: f64) -> ReelkitResult<FrameBuffer>;
}

pub trait VideoOpener: Send + Sync {
    fn open(&self, url: &str, directive: PlaybackDirective) -> ReelkitResult<Box<dyn VideoSource>>;
}

/// Refuses every video; for hosts without a video backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVideo;

impl VideoOpener for NoVideo {
    fn open(&self, url: &str, _directive: PlaybackDirective) -> ReelkitResult<Box<dyn VideoSource>> {
        Err(ReelkitError::asset_unavailable(url, "video playback is not available"))
    }
}

/// Stream metadata reported by ffprobe.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    pub fps: f64,
}

/// Opens local files and http(s) URLs by shelling out to `ffprobe`/`ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegVideoOpener {
    /// Frames are scaled to fit within this box.
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for FfmpegVideoOpener {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1080,
        }
    }
}

impl FfmpegVideoOpener {
    pub fn is_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn input_of(url: &str) -> ReelkitResult<String> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        let path = if url.starts_with("file://") {
            url::Url::parse(url)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| ReelkitError::asset_unavailable(url, "malformed file URL"))?
        } else if url.contains("://") || url.starts_with("data:") || url.starts_with("blob:") {
            return Err(ReelkitError::asset_unavailable(
                url,
                "ffmpeg can only open files and http(s) URLs",
            ));
        } else {
            PathBuf::from(url)
        };
        if !path.exists() {
            return Err(ReelkitError::asset_unavailable(url, "video file not found"));
        }
        Ok(path.to_string_lossy().into_owned())
    }

    fn probe(input: &str) -> ReelkitResult<VideoInfo> {
        let output = Command::new("ffprobe")
            .args(["-v", "quiet", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(input)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| ReelkitError::asset_unavailable(input, format!("failed to run ffprobe: {}", e)))?;
        if !output.status.success() {
            return Err(ReelkitError::decode_failed(
                input,
                format!("ffprobe failed: {}", String::from_utf8_lossy(&output.stderr)),
            ));
        }
        parse_probe(input, &output.stdout)
    }
}

impl VideoOpener for FfmpegVideoOpener {
    fn open(&self, url: &str, directive: PlaybackDirective) -> ReelkitResult<Box<dyn VideoSource>> {
        if !Self::is_available() {
            return Err(ReelkitError::asset_unavailable(url, "ffmpeg not found in PATH"));
        }
        let input = Self::input_of(url)?;
        let info = Self::probe(&input)?;
        let (width, height) = fit_within(info.width, info.height, self.max_width, self.max_height);
        Ok(Box::new(FfmpegVideoSource {
            input,
            info,
            width,
            height,
            directive,
            memo: FrameMemo::default(),
        }))
    }
}

struct FfmpegVideoSource {
    input: String,
    info: VideoInfo,
    width: u32,
    height: u32,
    directive: PlaybackDirective,
    memo: FrameMemo,
}

/// The most recently extracted frame. Holding one frame keeps a looping clip
/// at constant memory; repeated requests for the same index are free.
#[derive(Default)]
struct FrameMemo {
    current: Option<(u64, FrameBuffer)>,
}

impl FrameMemo {
    fn get_or_extract(
        &mut self,
        index: u64,
        extract: impl FnOnce(u64) -> ReelkitResult<FrameBuffer>,
    ) -> ReelkitResult<FrameBuffer> {
        if let Some((held, frame)) = &self.current {
            if *held == index {
                return Ok(frame.clone());
            }
        }
        let frame = extract(index)?;
        self.current = Some((index, frame.clone()));
        Ok(frame)
    }

    fn retained(&self) -> usize {
        usize::from(self.current.is_some())
    }
}

impl FfmpegVideoSource {
    fn extract(&self, position: f64) -> ReelkitResult<FrameBuffer> {
        let ts = format!("{:.3}", position);
        let size = format!("{}x{}", self.width, self.height);
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-ss", &ts, "-i"]).arg(Path::new(&self.input));
        if self.directive.muted {
            cmd.arg("-an");
        }
        let output = cmd
            .args(["-vframes", "1", "-f", "rawvideo", "-pix_fmt", "rgba", "-s", &size, "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| ReelkitError::decode_failed(&self.input, format!("failed to run ffmpeg: {}", e)))?;

        let expected = (self.width as usize) * (self.height as usize) * 4;
        if !output.status.success() || output.stdout.len() < expected {
            warn!(
                input = %self.input,
                got = output.stdout.len(),
                expected,
                "ffmpeg produced no usable frame"
            );
            return Err(ReelkitError::decode_failed(
                &self.input,
                format!("no frame at {}s", ts),
            ));
        }
        FrameBuffer::from_rgba8(self.width, self.height, output.stdout[..expected].to_vec())
    }
}

impl VideoSource for FfmpegVideoSource {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn directive(&self) -> PlaybackDirective {
        self.directive
    }

    fn frame_at(&mut self, elapsed: f64) -> ReelkitResult<FrameBuffer> {
        let position = self.directive.position(elapsed, self.info.duration_secs);
        let mut index = (position * self.info.fps).floor() as u64;
        if self.info.duration_secs > 0.0 {
            let last = ((self.info.duration_secs * self.info.fps).ceil() as u64).saturating_sub(1);
            index = index.min(last);
        }
        let fps = self.info.fps;
        let mut memo = std::mem::take(&mut self.memo);
        let frame = memo.get_or_extract(index, |i| self.extract(i as f64 / fps));
        self.memo = memo;
        frame
    }
}

/// A source opened from bytes spooled to a temporary file. The file is
/// removed when the source is dropped.
struct SpooledVideo {
    source: Box<dyn VideoSource>,
    _spool: tempfile::NamedTempFile,
}

impl VideoSource for SpooledVideo {
    fn dimensions(&self) -> (u32, u32) {
        self.source.dimensions()
    }

    fn directive(&self) -> PlaybackDirective {
        self.source.directive()
    }

    fn frame_at(&mut self, elapsed: f64) -> ReelkitResult<FrameBuffer> {
        self.source.frame_at(elapsed)
    }
}

/// Whether `url` names bytes held in-process rather than a location a
/// video backend can open by itself.
pub fn needs_spooling(url: &str) -> bool {
    url.starts_with("local://") || url.starts_with("blob:") || url.starts_with("data:")
}

/// Write `bytes` to a temporary file and open it with `opener`. Blocking.
pub fn open_spooled(
    opener: &dyn VideoOpener,
    bytes: &[u8],
    directive: PlaybackDirective,
) -> ReelkitResult<Box<dyn VideoSource>> {
    let mut spool = tempfile::Builder::new().prefix("reelkit-video-").tempfile()?;
    spool.write_all(bytes)?;
    spool.flush()?;
    let path = spool.path().to_string_lossy().into_owned();
    debug!(path = %path, bytes = bytes.len(), "video spooled");
    let source = opener.open(&path, directive)?;
    Ok(Box::new(SpooledVideo {
        source,
        _spool: spool,
    }))
}

/// Frames of one [`VideoSource`], produced off the render path.
///
/// The render side posts the playback time it wants with [`request`] and
/// collects finished frames with [`latest`]; neither ever waits. At most one
/// finished frame is buffered, so a slow consumer never piles up frames.
///
/// [`request`]: VideoFeed::request
/// [`latest`]: VideoFeed::latest
pub struct VideoFeed {
    wanted: watch::Sender<f64>,
    frames: mpsc::Receiver<ReelkitResult<FrameBuffer>>,
    dimensions: (u32, u32),
}

impl VideoFeed {
    /// Start producing frames. The source is assumed to have shown the frame
    /// at 0s already. Must be called from within a tokio runtime.
    pub fn spawn(source: Box<dyn VideoSource>) -> Self {
        let dimensions = source.dimensions();
        let (wanted, wanted_rx) = watch::channel(0.0);
        let (frames_tx, frames) = mpsc::channel(1);
        tokio::spawn(produce(source, wanted_rx, frames_tx));
        Self {
            wanted,
            frames,
            dimensions,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    /// Ask for the frame at `elapsed` seconds. Supersedes any earlier request
    /// that has not started yet.
    pub fn request(&self, elapsed: f64) {
        self.wanted.send_if_modified(|current| {
            if *current == elapsed {
                false
            } else {
                *current = elapsed;
                true
            }
        });
    }

    /// The newest frame finished since the last call, if any.
    pub fn latest(&mut self) -> Option<ReelkitResult<FrameBuffer>> {
        let mut newest = None;
        while let Ok(result) = self.frames.try_recv() {
            newest = Some(result);
        }
        newest
    }
}

impl std::fmt::Debug for VideoFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFeed")
            .field("dimensions", &self.dimensions)
            .field("wanted", &*self.wanted.borrow())
            .finish()
    }
}

/// Runs until the feed is dropped.
async fn produce(
    mut source: Box<dyn VideoSource>,
    mut wanted: watch::Receiver<f64>,
    frames: mpsc::Sender<ReelkitResult<FrameBuffer>>,
) {
    while wanted.changed().await.is_ok() {
        let elapsed = *wanted.borrow_and_update();
        let extracted = tokio::task::spawn_blocking(move || {
            let frame = source.frame_at(elapsed);
            (source, frame)
        })
        .await;
        let frame = match extracted {
            Ok((back, frame)) => {
                source = back;
                frame
            }
            Err(e) => {
                let _ = frames
                    .send(Err(ReelkitError::Other(format!("video frame task failed: {}", e))))
                    .await;
                return;
            }
        };
        if frames.send(frame).await.is_err() {
            break;
        }
    }
    debug!("video feed closed");
}

fn parse_probe(input: &str, stdout: &[u8]) -> ReelkitResult<VideoInfo> {
    let bad = |why: &str| ReelkitError::decode_failed(input, why.to_string());
    let json: serde_json::Value = serde_json::from_slice(stdout)?;
    let stream = json["streams"]
        .as_array()
        .and_then(|s| s.iter().find(|s| s["codec_type"].as_str() == Some("video")))
        .ok_or_else(|| bad("no video stream found"))?;
    let width = stream["width"].as_u64().ok_or_else(|| bad("missing width"))? as u32;
    let height = stream["height"].as_u64().ok_or_else(|| bad("missing height"))? as u32;
    let fps = parse_frame_rate(stream["r_frame_rate"].as_str().unwrap_or("30/1"));
    let duration_secs = json["format"]["duration"]
        .as_str()
        .or_else(|| stream["duration"].as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);
    Ok(VideoInfo {
        width,
        height,
        duration_secs,
        fps,
    })
}

/// "30/1" or "24000/1001" or "25"; anything unparsable is 30 fps.
fn parse_frame_rate(rate: &str) -> f64 {
    let fps = match rate.split_once('/') {
        Some((num, den)) => match (num.parse::<f64>(), den.parse::<f64>()) {
            (Ok(n), Ok(d)) if d > 0.0 => n / d,
            _ => 30.0,
        },
        None => rate.parse::<f64>().unwrap_or(30.0),
    };
    if fps > 0.0 {
        fps
    } else {
        30.0
    }
}

/// Shrink `(w, h)` to fit the box, keeping aspect ratio and even dimensions.
fn fit_within(w: u32, h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if w == 0 || h == 0 {
        return (max_w.max(2), max_h.max(2));
    }
    let scale = (max_w as f64 / w as f64).min(max_h as f64 / h as f64).min(1.0);
    let even = |v: f64| ((v.round() as u32) & !1).max(2);
    (even(w as f64 * scale), even(h as f64 * scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_loop_position_wraps() {
        let d = PlaybackDirective::BACKGROUND_LOOP;
        assert!((d.position(7.5, 3.0) - 1.5).abs() < 1e-9);
        let once = PlaybackDirective {
            looping: false,
            ..d
        };
        assert_eq!(once.position(7.5, 3.0), 3.0);
        let paused = PlaybackDirective {
            autoplay: false,
            ..d
        };
        assert_eq!(paused.position(7.5, 3.0), 0.0);
    }

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("24000/1001") - 23.976).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), 25.0);
        assert_eq!(parse_frame_rate("30/0"), 30.0);
        assert_eq!(parse_frame_rate("junk"), 30.0);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{"streams":[{"codec_type":"audio"},
            {"codec_type":"video","width":640,"height":360,"r_frame_rate":"30/1"}],
            "format":{"duration":"4.5"}}"#;
        let info = parse_probe("clip.mp4", json).unwrap();
        assert_eq!(info, VideoInfo { width: 640, height: 360, duration_secs: 4.5, fps: 30.0 });
        assert!(parse_probe("clip.mp4", br#"{"streams":[]}"#).is_err());
    }

    #[test]
    fn test_fit_within_keeps_aspect() {
        assert_eq!(fit_within(3840, 2160, 1920, 1080), (1920, 1080));
        assert_eq!(fit_within(640, 360, 1920, 1080), (640, 360));
        assert_eq!(fit_within(1080, 1920, 1920, 1080), (608, 1080));
    }

    #[test]
    fn test_memo_holds_a_single_frame() {
        let mut memo = FrameMemo::default();
        let mut extracted = 0;
        for index in (0..120u64).chain(0..120) {
            for _ in 0..3 {
                memo.get_or_extract(index, |i| {
                    extracted += 1;
                    Ok(FrameBuffer::new(i as u32 + 1, 1, reelkit_core::PixelFormat::Rgba8))
                })
                .unwrap();
            }
            assert_eq!(memo.retained(), 1);
        }
        // one extraction per index change, none for repeats
        assert_eq!(extracted, 240);

        let failed = memo.get_or_extract(500, |_| Err(ReelkitError::Other("gone".to_string())));
        assert!(failed.is_err());
        assert_eq!(memo.retained(), 1);
    }

    #[test]
    fn test_spooling_schemes() {
        assert!(needs_spooling("local://clip"));
        assert!(needs_spooling("blob:reelkit/3"));
        assert!(needs_spooling("data:video/mp4;base64,AAAA"));
        assert!(!needs_spooling("https://cdn.example.com/a.mp4"));
        assert!(!needs_spooling("/videos/a.mp4"));
    }

    /// Frames are solid and as wide as the requested second; odd seconds fail.
    struct Ticker {
        delay: std::time::Duration,
    }

    impl VideoSource for Ticker {
        fn dimensions(&self) -> (u32, u32) {
            (8, 1)
        }

        fn directive(&self) -> PlaybackDirective {
            PlaybackDirective::BACKGROUND_LOOP
        }

        fn frame_at(&mut self, elapsed: f64) -> ReelkitResult<FrameBuffer> {
            std::thread::sleep(self.delay);
            if elapsed as u32 % 2 == 1 {
                return Err(ReelkitError::decode_failed("ticker", "odd second"));
            }
            Ok(FrameBuffer::new(elapsed as u32 + 1, 1, reelkit_core::PixelFormat::Rgba8))
        }
    }

    async fn next_frame(feed: &mut VideoFeed) -> ReelkitResult<FrameBuffer> {
        for _ in 0..200 {
            if let Some(frame) = feed.latest() {
                return frame;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("feed produced nothing");
    }

    #[tokio::test]
    async fn test_feed_never_blocks_the_caller() {
        let mut feed = VideoFeed::spawn(Box::new(Ticker {
            delay: std::time::Duration::from_millis(200),
        }));
        assert_eq!(feed.dimensions(), (8, 1));

        let start = std::time::Instant::now();
        feed.request(2.0);
        assert!(feed.latest().is_none());
        assert!(start.elapsed() < std::time::Duration::from_millis(100));

        assert_eq!(next_frame(&mut feed).await.unwrap().width, 3);
    }

    #[tokio::test]
    async fn test_feed_reports_failures_and_recovers() {
        let mut feed = VideoFeed::spawn(Box::new(Ticker {
            delay: std::time::Duration::ZERO,
        }));
        feed.request(1.0);
        assert!(next_frame(&mut feed).await.is_err());
        feed.request(4.0);
        assert_eq!(next_frame(&mut feed).await.unwrap().width, 5);
        // repeating the current request produces nothing new
        feed.request(4.0);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(feed.latest().is_none());
    }

    #[test]
    fn test_spooled_source_reads_the_bytes() {
        struct Echo;

        impl VideoOpener for Echo {
            fn open(&self, url: &str, _d: PlaybackDirective) -> ReelkitResult<Box<dyn VideoSource>> {
                if std::fs::read(url)? != b"abc" {
                    return Err(ReelkitError::decode_failed(url, "unexpected contents"));
                }
                Ok(Box::new(Ticker {
                    delay: std::time::Duration::ZERO,
                }))
            }
        }

        let source = open_spooled(&Echo, b"abc", PlaybackDirective::BACKGROUND_LOOP).unwrap();
        assert_eq!(source.dimensions(), (8, 1));
    }

    #[test]
    fn test_unsupported_inputs() {
        assert!(FfmpegVideoOpener::input_of("local://clip").is_err());
        assert!(FfmpegVideoOpener::input_of("/definitely/missing/clip.mp4").is_err());
        assert_eq!(
            FfmpegVideoOpener::input_of("https://cdn.example.com/a.mp4").unwrap(),
            "https://cdn.example.com/a.mp4"
        );
        assert!(NoVideo.open("clip.mp4", PlaybackDirective::BACKGROUND_LOOP).is_err());
    }
}
