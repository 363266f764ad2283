use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

use super::{DocumentFacts, FormFacts};

static ANCHOR_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']+)["']"#).expect("anchor pattern")
});
static VIEWPORT_META: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta\b[^>]*\bname\s*=\s*["']viewport["']"#).expect("viewport pattern")
});
static MOBILE_NAV_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\bclass\s*=\s*["'][^"']*(mobile|hamburger|menu-toggle)[^"']*["']"#)
        .expect("mobile nav pattern")
});
static FORM_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<form\b[^>]*>(.*?)</form>").expect("form pattern"));
static INPUT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b[^>]*>").expect("input pattern"));
static BUTTON_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<button\b[^>]*>").expect("button pattern"));
static IMG_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").expect("img pattern"));
static ALT_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\balt\s*=").expect("alt pattern"));
static HTML_LANG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<html\b[^>]*\blang\s*=\s*["']?[a-z]"#).expect("lang pattern")
});
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>\s*[^<\s]").expect("title pattern"));
static LABEL_FOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<label\b[^>]*\bfor\s*=\s*["']([^"']+)["']"#).expect("label pattern")
});
static ID_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bid\s*=\s*["']([^"']+)["']"#).expect("id pattern"));
static TYPE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\btype\s*=\s*["']?([a-z]+)"#).expect("type pattern")
});
static ARIA_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\baria-label(ledby)?\s*=").expect("aria pattern"));
static SUBRESOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<script\b[^>]*\bsrc\s*=|<img\b[^>]*\bsrc\s*=|<link\b[^>]*\brel\s*=\s*["']?stylesheet"#,
    )
    .expect("subresource pattern")
});

/// Scan raw HTML for the structural facts the probes need. This is a
/// best-effort textual scan, not a DOM parse.
pub fn scan_document(html: &str, base: &Url) -> DocumentFacts {
    let labelled_ids: HashSet<String> = LABEL_FOR
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect();

    let forms = FORM_BLOCK
        .captures_iter(html)
        .map(|c| scan_form(&c[1], &labelled_ids))
        .collect();

    let inputs_without_label = INPUT_TAG
        .find_iter(html)
        .filter(|m| is_labelable(m.as_str()) && !is_labelled(m.as_str(), &labelled_ids))
        .count() as u32;

    let images: Vec<&str> = IMG_TAG.find_iter(html).map(|m| m.as_str()).collect();
    let images_missing_alt = images.iter().filter(|tag| !ALT_ATTR.is_match(tag)).count() as u32;

    DocumentFacts {
        links: extract_links(html, base),
        has_viewport_meta: VIEWPORT_META.is_match(html),
        mobile_nav_elements: MOBILE_NAV_CLASS.find_iter(html).count() as u32,
        viewport_width: None,
        forms,
        images_total: images.len() as u32,
        images_missing_alt,
        inputs_without_label,
        has_lang: HTML_LANG.is_match(html),
        has_title: TITLE.is_match(html),
    }
}

/// Count of script, stylesheet and image references in the document.
pub fn count_subresources(html: &str) -> u32 {
    SUBRESOURCE.find_iter(html).count() as u32
}

/// Absolute http(s) links in document order, deduplicated.
pub fn extract_links(html: &str, base: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for cap in ANCHOR_HREF.captures_iter(html) {
        let href = cap[1].trim();
        if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
            continue;
        }
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        let link = resolved.to_string();
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }

    links
}

fn scan_form(body: &str, labelled_ids: &HashSet<String>) -> FormFacts {
    let inputs: Vec<&str> = INPUT_TAG
        .find_iter(body)
        .map(|m| m.as_str())
        .filter(|tag| input_type(tag).as_deref() != Some("hidden"))
        .collect();
    let buttons: Vec<&str> = BUTTON_TAG.find_iter(body).map(|m| m.as_str()).collect();

    // A <button> without an explicit type submits its form.
    let has_submit = buttons
        .iter()
        .any(|tag| !matches!(input_type(tag).as_deref(), Some("button") | Some("reset")))
        || inputs
            .iter()
            .any(|tag| matches!(input_type(tag).as_deref(), Some("submit") | Some("image")));

    let unlabeled_inputs = inputs
        .iter()
        .filter(|tag| is_labelable(tag) && !is_labelled(tag, labelled_ids))
        .count() as u32;

    FormFacts {
        inputs: inputs.len() as u32,
        buttons: buttons.len() as u32,
        has_submit,
        unlabeled_inputs,
    }
}

fn input_type(tag: &str) -> Option<String> {
    TYPE_ATTR.captures(tag).map(|c| c[1].to_lowercase())
}

fn is_labelable(tag: &str) -> bool {
    !matches!(
        input_type(tag).as_deref(),
        Some("hidden") | Some("submit") | Some("button") | Some("reset") | Some("image")
    )
}

fn is_labelled(tag: &str, labelled_ids: &HashSet<String>) -> bool {
    if ARIA_LABEL.is_match(tag) {
        return true;
    }
    ID_ATTR
        .captures(tag)
        .map(|c| labelled_ids.contains(&c[1]))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<!doctype html>
<html lang="en">
<head>
  <title>Shop</title>
  <meta name="viewport" content="width=device-width">
  <link rel="stylesheet" href="/main.css">
  <script src="/app.js"></script>
</head>
<body>
  <nav class="site-nav mobile-nav"><button class="menu-toggle" type="button">Menu</button></nav>
  <a href="/about">About</a>
  <a href="https://cdn.example.net/docs">Docs</a>
  <a href="/about">About again</a>
  <a href="#top">Top</a>
  <a href="mailto:hi@example.com">Mail</a>
  <img src="/logo.png" alt="Logo">
  <img src="/banner.png">
  <form action="/subscribe">
    <label for="email">Email</label>
    <input id="email" type="email">
    <input type="text" name="nick">
    <input type="hidden" name="csrf" value="x">
    <button>Subscribe</button>
  </form>
  <form action="/search"><input type="search" aria-label="Search"></form>
</body>
</html>"##;

    fn base() -> Url {
        Url::parse("https://shop.example.com/").unwrap()
    }

    #[test]
    fn test_links_resolved_and_deduplicated() {
        let links = extract_links(PAGE, &base());
        assert_eq!(
            links,
            vec![
                "https://shop.example.com/about".to_string(),
                "https://cdn.example.net/docs".to_string(),
            ]
        );
    }

    #[test]
    fn test_document_facts() {
        let facts = scan_document(PAGE, &base());
        assert!(facts.has_viewport_meta);
        assert!(facts.has_lang);
        assert!(facts.has_title);
        assert_eq!(facts.mobile_nav_elements, 2);
        assert_eq!(facts.images_total, 2);
        assert_eq!(facts.images_missing_alt, 1);
        assert_eq!(facts.inputs_without_label, 1);
    }

    #[test]
    fn test_forms() {
        let facts = scan_document(PAGE, &base());
        assert_eq!(facts.forms.len(), 2);

        let subscribe = &facts.forms[0];
        assert_eq!(subscribe.inputs, 2);
        assert_eq!(subscribe.buttons, 1);
        assert!(subscribe.has_submit);
        assert_eq!(subscribe.unlabeled_inputs, 1);

        let search = &facts.forms[1];
        assert!(!search.has_submit);
        assert_eq!(search.unlabeled_inputs, 0);
    }

    #[test]
    fn test_bare_document() {
        let facts = scan_document("<html><body><p>hi</p></body></html>", &base());
        assert!(!facts.has_lang);
        assert!(!facts.has_title);
        assert!(!facts.has_viewport_meta);
        assert!(facts.links.is_empty());
        assert!(facts.forms.is_empty());
    }

    #[test]
    fn test_count_subresources() {
        assert_eq!(count_subresources(PAGE), 4);
    }
}
