//! Debounced filter runs for the live preview.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::config::FilterConfig;
use image::GrayImage;
use tracing::{debug, warn};

use crate::filter;

/// How long parameters must stay unchanged before the preview is refiltered.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

struct PendingRequest {
    image: Option<Arc<GrayImage>>,
    config: FilterConfig,
    requested: Instant,
}

/// Coalesces preview requests into a single slot. Each new request replaces
/// the pending one and restarts the quiescence window; [`PreviewScheduler::tick`]
/// runs the filter once the window has passed.
pub struct PreviewScheduler {
    debounce: Duration,
    pending: Option<PendingRequest>,
    current: GrayImage,
}

impl PreviewScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: None,
            current: filter::placeholder(),
        }
    }

    pub fn request(&mut self, image: Option<Arc<GrayImage>>, config: FilterConfig, now: Instant) {
        self.pending = Some(PendingRequest {
            image,
            config,
            requested: now,
        });
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Runs the latest request if it has been quiet for the debounce window.
    /// Returns whether the preview image was refiltered.
    pub fn tick(&mut self, now: Instant) -> bool {
        let ready = (self.pending.as_ref())
            .is_some_and(|pending| now.saturating_duration_since(pending.requested) >= self.debounce);
        let Some(pending) = ready.then(|| self.pending.take()).flatten() else {
            return false;
        };

        let start = Instant::now();
        match filter::process(pending.image.as_deref(), &pending.config) {
            Ok(image) => {
                debug!("Refiltered preview in {:?}", start.elapsed());
                self.current = image;
                true
            }
            Err(err) => {
                warn!("Preview filter failed, keeping the previous image: {err}");
                false
            }
        }
    }

    /// The most recent successfully filtered image, or the placeholder before
    /// the first success.
    pub fn current(&self) -> &GrayImage {
        &self.current
    }
}

impl Default for PreviewScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
