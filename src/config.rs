// Конфигурация процесса: задаётся один раз при старте и дальше не меняется

use crate::error::ConfigError;
use crate::media::pipeline::VideoEncoder;
use crate::peer::types::{IceServerKind, ServerConfig};
use clap::Parser;
use std::path::PathBuf;

// В режиме отладки логируем подробно
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "debug,webrtc=info,webrtc_ice=info";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "info,webrtc=warn";

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Parser, Debug, Clone)]
#[command(name = "webcast", version, about = "Stream a local camera and microphone to a browser over WebRTC")]
pub struct Config {
    /// HTTP server port
    #[arg(long, env = "WEBCAST_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Video device to use
    #[arg(long, env = "WEBCAST_VIDEO_DEVICE", default_value = "/dev/video0")]
    pub video_device: String,

    /// Video bitrate in kbps
    #[arg(long, env = "WEBCAST_BITRATE", default_value_t = 2000)]
    pub bitrate: u32,

    /// GStreamer audio source element
    #[arg(long, default_value = "pulsesrc")]
    pub audio_src: String,

    /// GStreamer video source element
    #[arg(long, default_value = "v4l2src")]
    pub video_src: String,

    /// Video framerate
    #[arg(long, default_value = "30/1")]
    pub framerate: String,

    /// Video resolution (widthxheight)
    #[arg(long, default_value = "1280x720")]
    pub resolution: String,

    /// H.264 encoder
    #[arg(long, value_enum, default_value_t = VideoEncoder::Nvidia)]
    pub encoder: VideoEncoder,

    /// STUN server URL, may be repeated
    #[arg(long = "stun", default_value = DEFAULT_STUN_SERVER)]
    pub stun_servers: Vec<String>,

    /// TURN server URL, may be repeated
    #[arg(long = "turn")]
    pub turn_servers: Vec<String>,

    #[arg(long, env = "WEBCAST_TURN_USERNAME")]
    pub turn_username: Option<String>,

    #[arg(long, env = "WEBCAST_TURN_CREDENTIAL")]
    pub turn_credential: Option<String>,

    /// Directory with the client page
    #[arg(long, default_value = "static")]
    pub static_dir: PathBuf,

    /// tracing filter directive
    #[arg(long, env = "RUST_LOG", default_value = DEFAULT_LOG_FILTER)]
    pub log: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["webcast"])
    }
}

impl Config {
    /// Собирает и валидирует список ICE серверов
    pub fn ice_servers(&self) -> Result<Vec<ServerConfig>, ConfigError> {
        let stun = self.stun_servers.iter().map(|url| ServerConfig {
            kind: IceServerKind::Stun,
            url: url.clone(),
            username: None,
            credential: None,
        });
        let turn = self.turn_servers.iter().map(|url| ServerConfig {
            kind: IceServerKind::Turn,
            url: url.clone(),
            username: self.turn_username.clone(),
            credential: self.turn_credential.clone(),
        });
        let servers: Vec<ServerConfig> = stun.chain(turn).collect();

        for server in &servers {
            if server.url.trim().is_empty() {
                return Err(ConfigError::EmptyIceUrl);
            }
            if server.kind == IceServerKind::Turn
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::MissingTurnCredentials(server.url.clone()));
            }
        }
        Ok(servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_server() {
        let config = Config::parse_from(["webcast"]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.video_device, "/dev/video0");
        assert_eq!(config.bitrate, 2000);
        assert_eq!(config.encoder, VideoEncoder::Nvidia);
        assert_eq!(config.stun_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
    }

    #[test]
    fn turn_requires_credentials() {
        let config = Config::parse_from(["webcast", "--turn", "turn.example.org:3478"]);
        assert!(matches!(
            config.ice_servers(),
            Err(ConfigError::MissingTurnCredentials(_))
        ));

        let config = Config::parse_from([
            "webcast",
            "--turn",
            "turn.example.org:3478",
            "--turn-username",
            "alice",
            "--turn-credential",
            "secret",
        ]);
        let servers = config.ice_servers().unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].kind, IceServerKind::Turn);
        assert_eq!(servers[1].username.as_deref(), Some("alice"));
    }

    #[test]
    fn empty_url_is_rejected() {
        let config = Config::parse_from(["webcast", "--stun", " "]);
        assert!(matches!(config.ice_servers(), Err(ConfigError::EmptyIceUrl)));
    }
}
