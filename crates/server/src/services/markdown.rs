/// Renders comment source text to the HTML cached next to it.
pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, source: &str) -> String;
}

/// Fallback renderer: escapes HTML, turns blank-line separated blocks into
/// paragraphs and single newlines into line breaks.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParagraphRenderer;

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

impl MarkdownRenderer for ParagraphRenderer {
    fn render(&self, source: &str) -> String {
        let normalized = source.replace("\r\n", "\n");
        normalized
            .split("\n\n")
            .map(str::trim)
            .filter(|block| !block.is_empty())
            .map(|block| {
                let lines: Vec<String> = block.lines().map(escape_html).collect();
                format!("<p>{}</p>\n", lines.join("<br>\n"))
            })
            .collect()
    }
}
