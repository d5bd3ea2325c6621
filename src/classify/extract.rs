//! Scholar alert HTML → paper metadata.
//!
//! Alert emails carry one `<h3><a href>` per paper, followed by two `<div>`
//! blocks holding the author line and the abstract snippet. The markup is
//! flat and machine-generated, so regex extraction is reliable here.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

use crate::models::{MailMessage, Paper};

static TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<h3[^>]*>.*?<a[^>]+href="([^"]+)"[^>]*>(.*?)</a>"#).unwrap()
});
static DIV_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<div[^>]*>(.*?)</div>").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());

/// Title fragments that mark patent notices rather than papers.
const PATENT_MARKERS: &[&str] = &["patent", "apparatus", "method and system"];

/// Extract every paper advertised in the snapshot's messages, de-duplicated
/// by lowercased title and URL, with patent notices filtered out.
pub fn extract_papers(messages: &[MailMessage]) -> Vec<Paper> {
    let mut seen_titles: HashSet<String> = HashSet::new();
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut papers = Vec::new();

    for message in messages {
        let found = extract_from_html(&message.html);
        debug!(
            message = %message.id,
            count = found.len(),
            "papers extracted from alert"
        );
        for paper in found {
            let title_key = paper.title.to_lowercase();
            let url_key = paper.url.to_lowercase();
            if seen_titles.contains(&title_key)
                || (!url_key.is_empty() && seen_urls.contains(&url_key))
            {
                debug!(title = %paper.title, "skipping duplicate paper");
                continue;
            }
            if PATENT_MARKERS.iter().any(|m| title_key.contains(m)) {
                debug!(title = %paper.title, "skipping patent notice");
                continue;
            }
            seen_titles.insert(title_key);
            if !url_key.is_empty() {
                seen_urls.insert(url_key);
            }
            papers.push(paper);
        }
    }
    papers
}

fn extract_from_html(html: &str) -> Vec<Paper> {
    let mut papers = Vec::new();

    let matches: Vec<_> = TITLE_RE.captures_iter(html).collect();
    for (i, caps) in matches.iter().enumerate() {
        let title = clean_text(&caps[2]);
        if title.is_empty() {
            continue;
        }
        let link = unwrap_scholar_url(&caps[1]);

        // The author line and abstract live in the divs between this match
        // and the next paper heading.
        let tail_start = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let tail_end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(html.len());
        let tail = &html[tail_start..tail_end];

        let mut sections = DIV_RE
            .captures_iter(tail)
            .map(|c| clean_text(&c[1]))
            .filter(|t| !t.is_empty());
        let authors_line = sections.next().unwrap_or_default();
        let abstract_text = sections.next().unwrap_or_default();

        if authors_line.is_empty() {
            continue;
        }

        papers.push(Paper {
            title,
            authors: vec![authors_line],
            abstract_text,
            venue: String::new(),
            url: link,
        });
    }
    papers
}

/// Scholar links route through `scholar_url?url=<target>&…` — unwrap back to
/// the direct link when that query parameter is present.
fn unwrap_scholar_url(href: &str) -> String {
    match Url::parse(href) {
        Ok(parsed) => parsed
            .query_pairs()
            .find(|(k, _)| k == "url")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_else(|| href.to_string()),
        Err(_) => String::new(),
    }
}

fn clean_text(fragment: &str) -> String {
    let stripped = TAG_RE.replace_all(fragment, " ");
    let decoded = decode_entities(&stripped);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&hellip;", "…")
}
