//! Authentication bootstrap after a 401

/// Starts whatever out-of-band flow lets the user authenticate.
/// Fire-and-forget: the controller never waits for it.
pub trait AuthBootstrap: Send + Sync {
    fn begin(&self);
}

/// Opens the auth URL in the user's browser.
#[derive(Debug, Clone)]
pub struct BrowserAuthBootstrap {
    url: String,
}

impl BrowserAuthBootstrap {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl AuthBootstrap for BrowserAuthBootstrap {
    fn begin(&self) {
        if self.url.is_empty() {
            log::warn!("Authentication required but no auth URL is configured");
            return;
        }
        log::info!("Opening {} to authenticate", self.url);
        if let Err(e) = open::that(&self.url) {
            log::error!("Failed to open auth URL {}: {}", self.url, e);
        }
    }
}
