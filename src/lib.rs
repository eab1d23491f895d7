// Screenrec - rendered-frame recorder
// Library entry point
//
// Frames are read back from a render target, encoded to VP8 and written to
// WebM. Bounded sessions keep only the most recent seconds in memory until
// stop. A separate muxer combines a recording with a looped audio track.
//
// The GStreamer vp8enc backend sits behind the `gstreamer` cargo feature,
// which is off by default. Without it the session, container and muxer APIs
// still build and are exercised through stand-in encoders.

pub mod config;
pub mod encoding;
pub mod events;
pub mod recording;
pub mod webm;

/// Initialize env_logger, honoring `RUST_LOG` and falling back to `default_level`.
pub fn init_logging(default_level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .try_init();
}
