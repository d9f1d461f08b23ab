use std::sync::Arc;

use reqwest::header::{HeaderMap, COOKIE, REFERER};
use url::Url;

use crate::{blocker::AdBlocker, engine::third_party, rules::ResourceType};

// call-in surface for the host's request interception hooks

#[derive(Debug, Clone)]
pub struct RequestDetails<'a> {
    pub url: &'a str,
    pub resource_type: ResourceType,
    /// Page that initiated the request; empty when unknown.
    pub referrer: &'a str,
    pub tab_id: Option<u64>,
}

impl<'a> RequestDetails<'a> {
    pub fn new(url: &'a str, resource_type: impl Into<ResourceType>) -> Self {
        Self {
            url,
            resource_type: resource_type.into(),
            referrer: "",
            tab_id: None,
        }
    }

    pub fn with_referrer(mut self, referrer: &'a str) -> Self {
        self.referrer = referrer;
        self
    }

    pub fn with_tab(mut self, tab_id: u64) -> Self {
        self.tab_id = Some(tab_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    Continue,
    Cancel,
}

/// Cheap handle given to every interception callback.
#[derive(Debug, Clone)]
pub struct Interceptor {
    blocker: Arc<AdBlocker>,
}

impl Interceptor {
    pub fn new(blocker: Arc<AdBlocker>) -> Self {
        Self { blocker }
    }

    pub fn blocker(&self) -> &Arc<AdBlocker> {
        &self.blocker
    }

    /// Called synchronously before a request is dispatched.
    pub fn on_before_request(&self, details: &RequestDetails<'_>) -> RequestAction {
        if !self
            .blocker
            .should_block(details.url, &details.resource_type, details.referrer)
        {
            return RequestAction::Continue;
        }

        self.blocker.record_block(details.tab_id);
        tracing::trace!(url = %truncated(details.url), resource_type = %details.resource_type, "request blocked");
        RequestAction::Cancel
    }

    /// Strips `Cookie` and `Referer` from third-party requests to blocked
    /// domains. Returns whether any header was removed.
    pub fn on_before_send_headers(
        &self,
        details: &RequestDetails<'_>,
        headers: &mut HeaderMap,
    ) -> bool {
        if !self.blocker.is_enabled() {
            return false;
        }

        let Some(request_host) = Url::parse(details.url)
            .ok()
            .and_then(|url| url.host_str().map(|host| host.to_ascii_lowercase()))
        else {
            return false;
        };

        if third_party(&request_host, details.referrer) != Some(true)
            || !self.blocker.is_domain_blocked(&request_host)
        {
            return false;
        }

        let cookie = headers.remove(COOKIE).is_some();
        let referer = headers.remove(REFERER).is_some();
        cookie || referer
    }
}

fn truncated(url: &str) -> &str {
    match url.char_indices().nth(80) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}
