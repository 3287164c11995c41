//! Per-recipient content transformation
//!
//! Interpolates `{{key}}` placeholders from the contact's variables, then
//! replaces every bare URL with a tracked short link.

use crate::links::LinkShortener;
use pulsecast_common::types::{CampaignId, Contact};
use pulsecast_common::Result;
use regex::{Captures, Regex};
use std::sync::{Arc, OnceLock};

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"https?://[^\s<>]+").expect("url pattern is valid"))
}

/// Replace every `{{key}}` with the contact's value, case-insensitively.
/// Missing keys become the empty string.
pub fn interpolate(template: &str, contact: &Contact) -> String {
    placeholder_pattern()
        .replace_all(template, |caps: &Captures| {
            contact.variable(&caps[1]).unwrap_or_default().to_string()
        })
        .into_owned()
}

/// Bare URLs in `text`, in order of appearance
pub fn find_urls(text: &str) -> Vec<&str> {
    url_pattern()
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(&['.', ',', ';', ':', '!', '?', ')'][..]))
        .collect()
}

/// Applies interpolation and link shortening
#[derive(Clone)]
pub struct ContentTransformer {
    shortener: Arc<dyn LinkShortener>,
}

impl ContentTransformer {
    pub fn new(shortener: Arc<dyn LinkShortener>) -> Self {
        Self { shortener }
    }

    /// Final text for one recipient
    ///
    /// Links are associated with the campaign only; the message row does not
    /// exist yet when its content is built.
    pub async fn render(
        &self,
        template: &str,
        contact: &Contact,
        campaign_id: CampaignId,
    ) -> Result<String> {
        let text = interpolate(template, contact);
        self.shorten_links(&text, campaign_id).await
    }

    async fn shorten_links(&self, text: &str, campaign_id: CampaignId) -> Result<String> {
        let urls = find_urls(text);
        if urls.is_empty() {
            return Ok(text.to_string());
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        for url in urls {
            let Some(at) = rest.find(url) else {
                continue;
            };
            let short = self.shortener.shorten(url, campaign_id, None).await?;
            out.push_str(&rest[..at]);
            out.push_str(&short);
            rest = &rest[at + url.len()..];
        }
        out.push_str(rest);
        Ok(out)
    }
}
