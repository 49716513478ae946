pub mod bridge;
#[cfg(feature = "gst")]
pub mod gst;
pub mod pipeline;
pub mod source;

pub use bridge::{BridgeHandle, BridgeReport, BridgeState, MediaBridge};
pub use source::{
    channel_source, ChannelSource, EncodedBuffer, SampleSource, SourceEvent, SourceFactory,
    SourceFeeder,
};
