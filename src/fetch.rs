//! Image-source capability.
//!
//! `FrameSource` is the boundary to the upstream camera API. The HTTP
//! implementation hits a URL template with the camera id and a cache-busting
//! timestamp substituted in. Every request carries explicit timeouts; an
//! unbounded wait toward a flaky upstream is a defect.

use std::io::Read;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

/// Upper bound on a single frame payload.
const MAX_FRAME_BYTES: usize = 5 * 1024 * 1024;

/// Capability that produces raw frame bytes for a camera.
pub trait FrameSource: Send + Sync {
    /// Fetch one frame. `timestamp` is epoch seconds, used by HTTP sources
    /// to defeat intermediate caches.
    fn fetch(&self, camera_id: &str, timestamp: u64) -> Result<Vec<u8>>;
}

/// Settings for [`HttpFrameSource`].
#[derive(Clone, Debug)]
pub struct FetchSettings {
    /// URL template with `{id}` and optional `{ts}` placeholders.
    pub url_template: String,
    /// Per-request timeout (connect and read).
    pub timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            url_template: "http://127.0.0.1:8080/cameras/{id}/frame?t={ts}".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP frame source backed by a shared ureq agent.
#[derive(Debug)]
pub struct HttpFrameSource {
    agent: ureq::Agent,
    url_template: String,
}

impl HttpFrameSource {
    pub fn new(settings: FetchSettings) -> Result<Self> {
        if !settings.url_template.contains("{id}") {
            return Err(anyhow!(
                "fetch url template must contain an {{id}} placeholder: {}",
                settings.url_template
            ));
        }
        // Validate the template shape up front with a dummy substitution.
        let probe = settings
            .url_template
            .replace("{id}", "probe")
            .replace("{ts}", "0");
        Url::parse(&probe).with_context(|| {
            format!("fetch url template is not a valid URL: {}", settings.url_template)
        })?;

        let agent = ureq::builder()
            .timeout_connect(settings.timeout)
            .timeout(settings.timeout)
            .build();

        Ok(Self {
            agent,
            url_template: settings.url_template,
        })
    }

    fn frame_url(&self, camera_id: &str, timestamp: u64) -> String {
        self.url_template
            .replace("{id}", camera_id)
            .replace("{ts}", &timestamp.to_string())
    }
}

impl FrameSource for HttpFrameSource {
    fn fetch(&self, camera_id: &str, timestamp: u64) -> Result<Vec<u8>> {
        let url = self.frame_url(camera_id, timestamp);
        let response = self
            .agent
            .get(&url)
            .call()
            .with_context(|| format!("fetch frame for camera {camera_id}"))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_FRAME_BYTES as u64 + 1)
            .read_to_end(&mut bytes)
            .with_context(|| format!("read frame body for camera {camera_id}"))?;

        if bytes.len() > MAX_FRAME_BYTES {
            return Err(anyhow!(
                "frame for camera {} exceeds {} byte limit",
                camera_id,
                MAX_FRAME_BYTES
            ));
        }
        if bytes.is_empty() {
            return Err(anyhow!("empty frame body for camera {camera_id}"));
        }
        Ok(bytes)
    }
}
