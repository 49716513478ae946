// Сборка описаний GStreamer конвейеров для аудио и видео трека

use crate::config::Config;
use crate::peer::types::MediaKind;
use clap::ValueEnum;
use std::time::Duration;

pub const APPSINK_NAME: &str = "appsink";

const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_FPS: u64 = 30;

/// Длительность кадра opusenc по умолчанию
pub const AUDIO_FRAME_DURATION: Duration = Duration::from_millis(20);

/// Кодировщик H.264
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEncoder {
    /// NVIDIA NVENC (`nvh264enc`)
    Nvidia,
    /// Программный `x264enc`
    X264,
}

impl VideoEncoder {
    fn element(&self, bitrate: u32) -> String {
        match self {
            VideoEncoder::Nvidia => {
                format!("nvh264enc preset=low-latency-hq bitrate={bitrate} rc-mode=cbr")
            }
            VideoEncoder::X264 => format!(
                "x264enc tune=zerolatency speed-preset=ultrafast bitrate={bitrate} key-int-max=60"
            ),
        }
    }
}

/// `WxH` → (ширина, высота); при ошибке 1280x720
pub fn parse_resolution(res: &str) -> (u32, u32) {
    let parsed = res.split_once(['x', 'X']).and_then(|(w, h)| {
        let w = w.trim().parse::<u32>().ok()?;
        let h = h.trim().parse::<u32>().ok()?;
        (w > 0 && h > 0).then_some((w, h))
    });
    parsed.unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT))
}

/// `N/D` → длительность одного кадра; при ошибке 30 fps
pub fn frame_duration(framerate: &str) -> Duration {
    let parsed = framerate.split_once('/').and_then(|(n, d)| {
        let n = n.trim().parse::<u64>().ok()?;
        let d = d.trim().parse::<u64>().ok()?;
        if n == 0 || d == 0 {
            return None;
        }
        let nanos = 1_000_000_000u64.checked_mul(d)? / n;
        (nanos > 0).then(|| Duration::from_nanos(nanos))
    });
    parsed.unwrap_or(Duration::from_nanos(1_000_000_000 / DEFAULT_FPS))
}

/// Если у буфера нет длительности, берём длительность кадра
pub fn fallback_duration(kind: MediaKind, config: &Config) -> Duration {
    match kind {
        MediaKind::Audio => AUDIO_FRAME_DURATION,
        MediaKind::Video => frame_duration(&config.framerate),
    }
}

fn appsink() -> String {
    format!("appsink name={APPSINK_NAME}")
}

pub fn audio_pipeline(config: &Config) -> String {
    format!(
        "{} ! audioconvert ! audioresample ! audio/x-raw,channels=1,rate=48000 ! queue ! opusenc ! {}",
        config.audio_src,
        appsink()
    )
}

pub fn video_pipeline(config: &Config) -> String {
    let (width, height) = parse_resolution(&config.resolution);
    format!(
        "{} device={} ! videoconvert ! videoscale ! \
         video/x-raw,width={width},height={height},framerate={},format=NV12 ! queue ! \
         {} ! h264parse ! video/x-h264,stream-format=byte-stream ! {}",
        config.video_src,
        config.video_device,
        config.framerate,
        config.encoder.element(config.bitrate),
        appsink()
    )
}

pub fn pipeline_for(kind: MediaKind, config: &Config) -> String {
    match kind {
        MediaKind::Audio => audio_pipeline(config),
        MediaKind::Video => video_pipeline(config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn resolution_parsing_falls_back() {
        assert_eq!(parse_resolution("1920x1080"), (1920, 1080));
        assert_eq!(parse_resolution("640X480"), (640, 480));
        assert_eq!(parse_resolution("wide"), (1280, 720));
        assert_eq!(parse_resolution("0x720"), (1280, 720));
        assert_eq!(parse_resolution("1280x"), (1280, 720));
    }

    #[test]
    fn frame_duration_follows_framerate() {
        assert_eq!(frame_duration("30/1"), Duration::from_nanos(33_333_333));
        assert_eq!(frame_duration("25/1"), Duration::from_millis(40));
        assert_eq!(frame_duration("30000/1001"), Duration::from_nanos(33_366_666));
        assert_eq!(frame_duration("fast"), Duration::from_nanos(33_333_333));
        assert_eq!(frame_duration("0/1"), Duration::from_nanos(33_333_333));

        let config = Config::parse_from(["webcast", "--framerate", "50/1"]);
        assert_eq!(fallback_duration(MediaKind::Video, &config), Duration::from_millis(20));
        assert_eq!(fallback_duration(MediaKind::Audio, &config), AUDIO_FRAME_DURATION);
    }

    #[test]
    fn video_pipeline_uses_device_bitrate_and_encoder() {
        let config = Config::parse_from([
            "webcast",
            "--video-device",
            "/dev/video2",
            "--bitrate",
            "3500",
            "--resolution",
            "1920x1080",
        ]);
        let p = video_pipeline(&config);
        assert!(p.starts_with("v4l2src device=/dev/video2 ! "));
        assert!(p.contains("width=1920,height=1080,framerate=30/1"));
        assert!(p.contains("nvh264enc preset=low-latency-hq bitrate=3500"));
        assert!(p.ends_with("stream-format=byte-stream ! appsink name=appsink"));
    }

    #[test]
    fn software_encoder_can_be_selected() {
        let config = Config::parse_from(["webcast", "--encoder", "x264"]);
        let p = pipeline_for(MediaKind::Video, &config);
        assert!(p.contains("x264enc tune=zerolatency"));
        assert!(!p.contains("nvh264enc"));
    }

    #[test]
    fn audio_pipeline_encodes_opus() {
        let config = Config::parse_from(["webcast", "--audio-src", "audiotestsrc"]);
        assert_eq!(
            pipeline_for(MediaKind::Audio, &config),
            "audiotestsrc ! audioconvert ! audioresample ! audio/x-raw,channels=1,rate=48000 ! queue ! opusenc ! appsink name=appsink"
        );
    }
}
