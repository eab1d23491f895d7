//! GStreamer initialization
//!
//! Initializes GStreamer once per process and checks that the plugins the
//! VP8 backend depends on are installed.

use std::sync::OnceLock;

use gstreamer as gst;

use super::{EncoderError, Result};

static GSTREAMER_INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Elements the VP8 pipeline is built from
const REQUIRED_ELEMENTS: &[&str] = &["appsrc", "vp8enc", "appsink"];

/// Initialize GStreamer, returning the cached outcome on later calls.
pub fn init_gstreamer() -> Result<()> {
    GSTREAMER_INIT
        .get_or_init(|| match gst::init() {
            Ok(()) => {
                log_gstreamer_version();
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to initialize GStreamer: {}", e);
                Err(e.to_string())
            }
        })
        .clone()
        .map_err(EncoderError::Gst)
}

fn log_gstreamer_version() {
    let (major, minor, micro, nano) = gst::version();
    let nano_str = match nano {
        0 => String::new(),
        1 => " (CVS)".to_string(),
        2 => " (prerelease)".to_string(),
        _ => format!(" (nano: {})", nano),
    };
    log::info!("GStreamer version: {}.{}.{}{}", major, minor, micro, nano_str);
}

/// Check that GStreamer starts and every element the encoder needs exists.
pub fn check_vp8_available() -> Result<()> {
    init_gstreamer()?;
    for name in REQUIRED_ELEMENTS {
        if gst::ElementFactory::find(name).is_none() {
            return Err(EncoderError::NotAvailable(format!(
                "GStreamer element '{}' is not installed",
                name
            )));
        }
    }
    Ok(())
}
