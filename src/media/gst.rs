// GStreamer-источник семплов: конвейер заканчивается `appsink`, отдельный
// поток блокирующе тянет из него семплы и кладёт в ограниченную очередь.

use crate::config::Config;
use crate::error::BridgeError;
use crate::media::pipeline::{fallback_duration, pipeline_for, APPSINK_NAME};
use crate::media::source::{
    channel_source, ChannelSource, EncodedBuffer, SampleSource, SourceEvent, SourceFactory,
    SourceFeeder,
};
use crate::peer::types::MediaKind;
use async_trait::async_trait;
use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Глубина очереди между appsink и мостом
const SOURCE_QUEUE_DEPTH: usize = 16;

const BUS_POLL_MS: u64 = 100;

pub fn init() -> Result<(), BridgeError> {
    gst::init().map_err(|e| BridgeError::Pipeline(e.to_string()))
}

/// Запускает свой конвейер на каждый трек каждой сессии
pub struct PipelineSources {
    audio: String,
    video: String,
    audio_frame: Duration,
    video_frame: Duration,
}

impl PipelineSources {
    pub fn new(config: &Config) -> Self {
        Self {
            audio: pipeline_for(MediaKind::Audio, config),
            video: pipeline_for(MediaKind::Video, config),
            audio_frame: fallback_duration(MediaKind::Audio, config),
            video_frame: fallback_duration(MediaKind::Video, config),
        }
    }
}

impl SourceFactory for PipelineSources {
    fn start(&self, kind: MediaKind) -> Result<Box<dyn SampleSource>, BridgeError> {
        let (description, frame) = match kind {
            MediaKind::Audio => (&self.audio, self.audio_frame),
            MediaKind::Video => (&self.video, self.video_frame),
        };
        info!(%kind, pipeline = %description, "launching pipeline");
        Ok(Box::new(GstSampleSource::launch(kind, description, frame)?))
    }
}

pub struct GstSampleSource {
    pipeline: gst::Pipeline,
    events: ChannelSource,
}

impl GstSampleSource {
    /// `frame` подставляется, если у буфера нет длительности
    pub fn launch(kind: MediaKind, description: &str, frame: Duration) -> Result<Self, BridgeError> {
        let pipeline = gst::parse::launch(description)
            .map_err(|e| BridgeError::SourceStart(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| BridgeError::SourceStart("description is not a pipeline".into()))?;

        let appsink = pipeline
            .by_name(APPSINK_NAME)
            .ok_or_else(|| BridgeError::SourceStart(format!("no element named {APPSINK_NAME}")))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| BridgeError::SourceStart(format!("{APPSINK_NAME} is not an appsink")))?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| BridgeError::SourceStart("pipeline has no bus".into()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| BridgeError::SourceStart(e.to_string()))?;

        let (feeder, events) = channel_source(SOURCE_QUEUE_DEPTH);

        let pull_feeder = feeder.clone();
        std::thread::Builder::new()
            .name(format!("{kind}-appsink"))
            .spawn(move || pull_loop(appsink, pull_feeder, frame))
            .map_err(|e| BridgeError::SourceStart(e.to_string()))?;

        std::thread::Builder::new()
            .name(format!("{kind}-bus"))
            .spawn(move || bus_loop(bus, feeder))
            .map_err(|e| BridgeError::SourceStart(e.to_string()))?;

        Ok(Self { pipeline, events })
    }
}

impl Drop for GstSampleSource {
    fn drop(&mut self) {
        // appsink сразу вернёт ошибку, и поток выборки завершится
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(error = %e, "failed to stop pipeline");
        }
    }
}

#[async_trait]
impl SampleSource for GstSampleSource {
    async fn next_event(&mut self) -> SourceEvent {
        self.events.next_event().await
    }
}

fn pull_loop(appsink: gst_app::AppSink, feeder: SourceFeeder, frame: Duration) {
    let mut warned = false;
    loop {
        let event = match appsink.pull_sample() {
            Ok(sample) => match sample.buffer() {
                Some(buffer) => match buffer.map_readable() {
                    Ok(map) => SourceEvent::Buffer(EncodedBuffer {
                        data: Bytes::copy_from_slice(map.as_slice()),
                        duration: match buffer.duration() {
                            Some(d) => Duration::from_nanos(d.nseconds()),
                            None => {
                                if !warned {
                                    warn!(?frame, "buffer without duration, using frame duration");
                                    warned = true;
                                }
                                frame
                            }
                        },
                    }),
                    Err(_) => SourceEvent::Missing,
                },
                None => SourceEvent::Missing,
            },
            Err(_) if appsink.is_eos() => SourceEvent::EndOfStream,
            Err(e) => SourceEvent::Error(e.to_string()),
        };

        let last = !matches!(event, SourceEvent::Buffer(_));
        if !feeder.blocking_push(event) || last {
            break;
        }
    }
    debug!("appsink pull loop finished");
}

fn bus_loop(bus: gst::Bus, feeder: SourceFeeder) {
    use gst::MessageView;

    while !feeder.is_closed() {
        let timeout = gst::ClockTime::from_mseconds(BUS_POLL_MS);
        let Some(msg) = bus.timed_pop_filtered(timeout, &[gst::MessageType::Error]) else {
            continue;
        };
        if let MessageView::Error(err) = msg.view() {
            let reason = format!(
                "{} ({})",
                err.error(),
                err.debug().map(|d| d.to_string()).unwrap_or_default()
            );
            feeder.blocking_push(SourceEvent::Error(reason));
            break;
        }
    }
    debug!("bus watch finished");
}
