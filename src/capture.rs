//! Visual snapshots bound to the element map that produced them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::browser::BrowserSession;
use crate::errors::Result;
use crate::registry::{ElementMap, ElementRegistry};

/// A screenshot and the element map current at the instant it was taken,
/// produced as one unit so callers never observe a mismatched pair.
#[derive(Debug, Clone)]
pub struct Capture {
    /// base64 data URI of the annotated page image.
    pub image: String,
    pub element_map: ElementMap,
    pub url: String,
    pub title: String,
    pub taken_at: DateTime<Utc>,
}

pub struct CaptureService;

impl CaptureService {
    /// Scan first (which marks and outlines the interactable elements), then
    /// photograph the annotated page.
    pub async fn capture(
        session: &BrowserSession,
        registry: &mut ElementRegistry,
    ) -> Result<Capture> {
        let element_map = registry.scan(session.tab()).await?.clone();
        let bytes = session.screenshot_webp().await?;
        let image = format!("data:image/webp;base64,{}", STANDARD.encode(bytes));
        let title = session.title().await?;
        debug!(
            elements = element_map.len(),
            image_bytes = image.len(),
            "capture taken"
        );

        Ok(Capture {
            image,
            element_map,
            url: session.current_url(),
            title,
            taken_at: Utc::now(),
        })
    }
}
