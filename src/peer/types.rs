use crate::error::SignalingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// Тип сигнального сообщения
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Offer,
    Answer,
    Candidate,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::Candidate => "candidate",
        }
    }
}

impl FromStr for MessageKind {
    type Err = SignalingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offer" => Ok(MessageKind::Offer),
            "answer" => Ok(MessageKind::Answer),
            "candidate" => Ok(MessageKind::Candidate),
            other => Err(SignalingError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Сообщение сигнального канала: `{ "type": ..., "data": ... }`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub data: String,
}

impl SignalingMessage {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Offer,
            data: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Answer,
            data: sdp.into(),
        }
    }

    pub fn candidate(candidate: &IceCandidate) -> Self {
        Self {
            kind: MessageKind::Candidate,
            data: candidate.candidate.clone(),
        }
    }
}

/// ICE кандидат для WebRTC соединения
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Разбирает `data` кандидата: либо строка `candidate:...`, либо JSON
    /// в формате `RTCIceCandidate.toJSON()` браузера.
    pub fn parse(data: &str) -> Result<Self, SignalingError> {
        let data = data.trim();
        if data.starts_with('{') {
            let parsed: IceCandidate = serde_json::from_str(data)
                .map_err(|e| SignalingError::InvalidCandidate(e.to_string()))?;
            let line = validate_candidate_line(&parsed.candidate)?;
            return Ok(IceCandidate {
                candidate: line,
                ..parsed
            });
        }

        Ok(IceCandidate {
            candidate: validate_candidate_line(data)?,
            sdp_mid: None,
            sdp_mline_index: None,
        })
    }

    pub fn to_init(&self) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: self.candidate.clone(),
            sdp_mid: self.sdp_mid.clone(),
            sdp_mline_index: self.sdp_mline_index,
            username_fragment: None,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }
}

// candidate:<foundation> <component> <transport> <priority> <addr> <port> typ <type> ...
fn validate_candidate_line(raw: &str) -> Result<String, SignalingError> {
    let line = raw.trim();
    let line = line.strip_prefix("a=").unwrap_or(line);

    if line.is_empty() {
        return Err(SignalingError::InvalidCandidate("empty candidate".into()));
    }
    let Some(body) = line.strip_prefix("candidate:") else {
        return Err(SignalingError::InvalidCandidate(format!(
            "missing 'candidate:' prefix in {line:?}"
        )));
    };

    let fields: Vec<&str> = body.split_whitespace().collect();
    if fields.len() < 8 {
        return Err(SignalingError::InvalidCandidate(format!(
            "expected at least 8 fields, got {}",
            fields.len()
        )));
    }
    if fields[1].parse::<u16>().is_err()
        || fields[3].parse::<u32>().is_err()
        || fields[5].parse::<u16>().is_err()
    {
        return Err(SignalingError::InvalidCandidate(format!(
            "non-numeric component/priority/port in {line:?}"
        )));
    }
    if fields[6] != "typ" {
        return Err(SignalingError::InvalidCandidate(format!(
            "missing 'typ' in {line:?}"
        )));
    }

    Ok(line.to_string())
}

/// Вид медиа-трека
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaKind::Audio => MIME_TYPE_OPUS,
            MediaKind::Video => MIME_TYPE_H264,
        }
    }

    pub fn track_id(&self) -> String {
        self.as_str().to_owned()
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IceServerKind {
    Stun,
    Turn,
}

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub kind: IceServerKind,
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}
