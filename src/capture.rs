//! Screen capture module
//! Uses `xcap` for cross-platform screenshots of the primary display.
//! The scan loop treats a failed grab as "no frame this tick", never as
//! a fatal condition.
//! Permissions note: on macOS, grant "Screen & System Audio Recording"
//! permission to the terminal in System Settings > Privacy & Security.

use std::time::Instant;

use image::RgbaImage;
use tracing::trace;
use xcap::Monitor;

use crate::error::{Error, Result};

/// Where the frame came from, in screen coordinates. Highlight
/// rectangles are expressed relative to this region's origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// One scan tick's pixel buffer. Consumed by the pipeline, never
/// mutated.
#[derive(Debug)]
pub struct Frame {
    pub image: RgbaImage,
    pub region: CaptureRegion,
}

/// Captures the primary monitor.
pub fn capture_frame() -> Result<Frame> {
    let start = Instant::now();

    let monitors = Monitor::all().map_err(|e| Error::Capture(e.to_string()))?;
    let primary = monitors.into_iter().next().ok_or(Error::NoMonitor)?;

    let image = primary.capture_image().map_err(|e| {
        Error::Capture(format!(
            "{} (on macOS, ensure the terminal has Screen Recording permission)",
            e
        ))
    })?;

    if image.width() == 0 || image.height() == 0 {
        return Err(Error::Capture(
            "captured an empty screenshot; possible permission issue or no display".into(),
        ));
    }

    let region = CaptureRegion {
        x: 0,
        y: 0,
        width: image.width(),
        height: image.height(),
    };

    trace!("capture latency: {:?}", start.elapsed());
    Ok(Frame { image, region })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires graphical display and screen recording permissions"]
    fn capture_yields_nonempty_frame() {
        let frame = capture_frame().expect("capture_frame failed");
        assert!(frame.image.width() > 0 && frame.image.height() > 0);
        assert_eq!(frame.region.width, frame.image.width());
    }
}
