//! Finds the latest report on the publisher's landing page.
//!
//! The lookup is purely structural (the Nth heading, then a fixed sibling
//! after it), so any redesign of the page breaks it. It sits behind
//! `ReportLocator` so another strategy can replace it without touching the
//! rest of the pipeline.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{PipelineError, PipelineResult};

static NOISE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<!--.*?-->|<script\b.*?</script\s*>|<style\b.*?</style\s*>").unwrap());
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<(/)?([A-Za-z][A-Za-z0-9]*)([^>]*)>").unwrap());
static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

pub trait ReportLocator {
    /// Resolve the absolute URL of the latest report from landing page markup.
    fn locate(&self, page_html: &str) -> PipelineResult<String>;
}

/// "Take the `heading_index`-th `<heading_tag>`, step `sibling_offset`
/// elements past it, and follow the first link inside."
#[derive(Debug, Clone)]
pub struct HeadingSiblingLink {
    pub heading_tag: String,
    pub heading_index: usize,
    pub sibling_offset: usize,
    pub base_url: String,
}

impl HeadingSiblingLink {
    pub fn new(base_url: &str, heading_index: usize) -> Self {
        HeadingSiblingLink {
            heading_tag: "h5".into(),
            heading_index,
            sibling_offset: 2,
            base_url: base_url.to_string(),
        }
    }
}

impl ReportLocator for HeadingSiblingLink {
    fn locate(&self, page_html: &str) -> PipelineResult<String> {
        let html = NOISE_RE.replace_all(page_html, "");
        let tags = scan_tags(&html);
        let mismatch = |what: String| PipelineError::SourceLayoutMismatch(what);

        let heading = tags
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.closing && t.name == self.heading_tag)
            .map(|(i, _)| i)
            .nth(self.heading_index)
            .ok_or_else(|| {
                mismatch(format!(
                    "fewer than {} <{}> headings",
                    self.heading_index + 1,
                    self.heading_tag
                ))
            })?;
        let heading_end = element_end(&tags, heading)
            .ok_or_else(|| mismatch(format!("<{}> #{} is never closed", self.heading_tag, self.heading_index)))?;

        let (start, end) = nth_sibling(&tags, heading_end + 1, self.sibling_offset).ok_or_else(|| {
            mismatch(format!(
                "<{}> #{} has fewer than {} following siblings",
                self.heading_tag, self.heading_index, self.sibling_offset
            ))
        })?;

        let href = tags
            .get(start + 1..end)
            .unwrap_or_default()
            .iter()
            .filter(|t| !t.closing && t.name == "a")
            .find_map(|t| href_of(t.attrs))
            .ok_or_else(|| mismatch(format!("no link under <{}> sibling", tags[start].name)))?;

        Ok(resolve(&self.base_url, &href))
    }
}

#[derive(Debug)]
struct Tag<'a> {
    name: String,
    closing: bool,
    void: bool,
    attrs: &'a str,
}

fn scan_tags(html: &str) -> Vec<Tag<'_>> {
    TAG_RE
        .captures_iter(html)
        .filter_map(|c| {
            let name = c.get(2)?.as_str().to_ascii_lowercase();
            let attrs = c.get(3).map(|m| m.as_str()).unwrap_or("");
            let void = VOID_TAGS.contains(&name.as_str()) || attrs.trim_end().ends_with('/');
            Some(Tag {
                closing: c.get(1).is_some(),
                void,
                name,
                attrs,
            })
        })
        .collect()
}

/// Index of the tag closing the element opened at `open`.
fn element_end(tags: &[Tag], open: usize) -> Option<usize> {
    let name = &tags[open].name;
    if tags[open].void {
        return Some(open);
    }
    let mut depth = 0usize;
    for (j, t) in tags.iter().enumerate().skip(open + 1) {
        if &t.name != name || t.void {
            continue;
        }
        if t.closing {
            if depth == 0 {
                return Some(j);
            }
            depth -= 1;
        } else {
            depth += 1;
        }
    }
    None
}

/// The `n`-th (1-based) element sibling starting at tag index `from`, as
/// `(open, close)` tag indices. Stops at the parent's closing tag.
fn nth_sibling(tags: &[Tag], from: usize, n: usize) -> Option<(usize, usize)> {
    let mut j = from;
    let mut count = 0;
    while j < tags.len() {
        if tags[j].closing {
            return None;
        }
        let end = element_end(tags, j)?;
        count += 1;
        if count == n {
            return Some((j, end));
        }
        j = end + 1;
    }
    None
}

fn href_of(attrs: &str) -> Option<String> {
    let caps = HREF_RE.captures(attrs)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
    (!raw.is_empty()).then(|| raw.replace("&amp;", "&"))
}

fn resolve(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if let Some(rest) = href.strip_prefix("//") {
        format!("https://{}", rest)
    } else if href.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), href)
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), href)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><body>
  <!-- <h5>commented out</h5> -->
  <h5>Статистика</h5>
  <p>Щоденні дані</p>
  <div><a href="/storage/old.xlsx">old</a></div>
  <h5>Ліжковий фонд</h5>
  <p>Опис</p>
  <div class="links"><a href="/storage/beds.xlsx">beds</a></div>
  <section>
    <h5>Забезпеченість тестами</h5>
    <p>Дані по закладах<br>оновлюються щодня</p>
    <div class="doc"><span><img src="x.png"/></span><a class="btn" href="/storage/editor/files/supply_2024_01_02.xlsx?v=1&amp;d=2">Завантажити</a></div>
    <div><a href="/storage/other.xlsx">other</a></div>
  </section>
  <script>var s = "<h5>not a heading</h5>";</script>
</body></html>"#;

    #[test]
    fn follows_third_heading_second_sibling() {
        let loc = HeadingSiblingLink::new("https://moz.gov.ua", 2);
        assert_eq!(
            loc.locate(PAGE).unwrap(),
            "https://moz.gov.ua/storage/editor/files/supply_2024_01_02.xlsx?v=1&d=2"
        );
    }

    #[test]
    fn other_headings_are_addressable() {
        let loc = HeadingSiblingLink::new("https://moz.gov.ua/", 1);
        assert_eq!(loc.locate(PAGE).unwrap(), "https://moz.gov.ua/storage/beds.xlsx");
    }

    #[test]
    fn missing_heading_is_layout_mismatch() {
        let loc = HeadingSiblingLink::new("https://moz.gov.ua", 5);
        assert!(matches!(loc.locate(PAGE), Err(PipelineError::SourceLayoutMismatch(_))));
    }

    #[test]
    fn heading_without_enough_siblings_is_layout_mismatch() {
        let html = "<div><h5>a</h5><p>only one</p></div><div><a href='/x.xlsx'>x</a></div>";
        let loc = HeadingSiblingLink::new("https://moz.gov.ua", 0);
        assert!(matches!(loc.locate(html), Err(PipelineError::SourceLayoutMismatch(_))));
    }

    #[test]
    fn sibling_without_link_is_layout_mismatch() {
        let html = "<h5>a</h5><p>one</p><div>no link here</div>";
        let loc = HeadingSiblingLink::new("https://moz.gov.ua", 0);
        assert!(matches!(loc.locate(html), Err(PipelineError::SourceLayoutMismatch(_))));
    }

    #[test]
    fn link_resolution() {
        assert_eq!(resolve("https://a.b", "https://c.d/x"), "https://c.d/x");
        assert_eq!(resolve("https://a.b", "//cdn.a.b/x"), "https://cdn.a.b/x");
        assert_eq!(resolve("https://a.b/", "/x"), "https://a.b/x");
        assert_eq!(resolve("https://a.b", "x"), "https://a.b/x");
    }
}
