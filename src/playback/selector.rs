use log::debug;
use std::sync::Arc;

use crate::collaborators::WirelessLink;
use crate::models::{SinkKind, SinkPreference};

/// Resolves a sink preference against the wireless link, once per session.
/// A live session is never re-routed.
#[derive(Clone)]
pub struct SinkSelector {
    link: Arc<dyn WirelessLink>,
}

impl SinkSelector {
    pub fn new(link: Arc<dyn WirelessLink>) -> Self {
        Self { link }
    }

    pub fn resolve(&self, preference: SinkPreference) -> (SinkKind, &'static str) {
        let connected = match preference {
            SinkPreference::Auto => self.link.is_audio_connected(),
            _ => false,
        };
        let resolved = resolve_with(preference, connected);
        debug!("Sink preference {:?} resolved to {} ({})", preference, resolved.0, resolved.1);
        resolved
    }
}

/// `Auto` goes wireless only if the link has an audio connection right now
pub fn resolve_with(preference: SinkPreference, wireless_connected: bool) -> (SinkKind, &'static str) {
    match preference {
        SinkPreference::Local => (SinkKind::Local, "requested"),
        SinkPreference::Wireless => (SinkKind::Wireless, "requested"),
        SinkPreference::Auto if wireless_connected => (SinkKind::Wireless, "wireless link connected"),
        SinkPreference::Auto => (SinkKind::Local, "no wireless connection"),
    }
}
