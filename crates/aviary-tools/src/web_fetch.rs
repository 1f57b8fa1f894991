//! The `web_fetch` tool: fetch a page, extract readable text.
//! Uses `scraper`/`html5ever` for parsing rather than a hand-rolled tag
//! stripper.

use async_trait::async_trait;
use ego_tree::NodeRef;
use scraper::{Html, Node};
use serde_json::json;

use crate::registry::{Tool, ToolOutcome};

const MAX_INPUT_BYTES: usize = 2 * 1024 * 1024;
const MAX_OUTPUT_CHARS: usize = 8_000;
const TRUNCATION_MARKER: &str = "\n[... truncated]";

const SKIP_TAGS: &[&str] = &["script", "style", "nav", "footer", "aside", "svg", "iframe", "noscript"];
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "section",
    "article", "header", "table", "ul", "ol", "pre",
];

pub struct WebFetchTool {
    pub http: reqwest::Client,
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its readable text content."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "url": { "type": "string" } },
            "required": ["url"],
        })
    }

    async fn call(&self, args: serde_json::Value) -> ToolOutcome {
        let Some(url) = args.get("url").and_then(|v| v.as_str()) else {
            return ToolOutcome::err("missing required argument: url");
        };

        let resp = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ToolOutcome::err(format!("fetch failed: {e}")),
        };
        if !resp.status().is_success() {
            return ToolOutcome::err(format!("fetch failed: http {}", resp.status()));
        }
        let bytes = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => return ToolOutcome::err(format!("fetch failed: {e}")),
        };

        let capped = &bytes[..bytes.len().min(MAX_INPUT_BYTES)];
        let html = String::from_utf8_lossy(capped);
        ToolOutcome::ok(extract_readable_text(&html))
    }
}

/// Parse `html` and extract readable text: skip subtrees rooted at
/// script/style/nav/footer/aside/svg/iframe/noscript, insert newlines
/// after block-level tags, collapse whitespace, cap at
/// [`MAX_OUTPUT_CHARS`] with a truncation marker when cut.
pub fn extract_readable_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    walk(document.tree.root(), &mut raw);

    let collapsed: String = raw
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if collapsed.chars().count() > MAX_OUTPUT_CHARS {
        let truncated: String = collapsed.chars().take(MAX_OUTPUT_CHARS).collect();
        format!("{truncated}{TRUNCATION_MARKER}")
    } else {
        collapsed
    }
}

fn walk(node: NodeRef<Node>, out: &mut String) {
    match node.value() {
        Node::Element(el) => {
            let tag = el.name();
            if SKIP_TAGS.contains(&tag) {
                return;
            }
            for child in node.children() {
                walk(child, out);
            }
            if BLOCK_TAGS.contains(&tag) {
                out.push('\n');
            }
        }
        Node::Text(text) => out.push_str(text),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_script_and_style_subtrees() {
        let html = "<html><body><script>var x=1;</script><style>.a{}</style><p>hello</p></body></html>";
        let text = extract_readable_text(html);
        assert_eq!(text, "hello");
    }

    #[test]
    fn inserts_newlines_after_block_tags() {
        let html = "<p>one</p><p>two</p>";
        let text = extract_readable_text(html);
        assert_eq!(text, "one\ntwo");
    }

    #[test]
    fn collapses_internal_whitespace() {
        let html = "<p>one   two\n\nthree</p>";
        let text = extract_readable_text(html);
        assert_eq!(text, "one two three");
    }

    #[test]
    fn truncates_past_output_cap() {
        let long = "word ".repeat(3000);
        let html = format!("<p>{long}</p>");
        let text = extract_readable_text(&html);
        assert!(text.ends_with(TRUNCATION_MARKER));
        assert!(text.chars().count() <= MAX_OUTPUT_CHARS + TRUNCATION_MARKER.len());
    }
}
