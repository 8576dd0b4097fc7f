//! Content markup conversion
//!
//! Local messages and bios are markdown; ActivityPub content is HTML.

use std::collections::HashSet;

use pulldown_cmark::{Options, Parser, html};

/// Render markdown as sanitized HTML for outbound objects.
pub fn markdown_to_html(markdown: &str) -> String {
    let options = Options::ENABLE_STRIKETHROUGH;
    let parser = Parser::new_ext(markdown, options);
    let mut html_output = String::new();
    html::push_html(&mut html_output, parser);
    ammonia::clean(&html_output).trim_end().to_string()
}

/// Convert remote HTML into markdown.
///
/// The input is sanitized first so only a small, well-formed tag set
/// survives; anything else is reduced to its text.
pub fn html_to_markdown(content: &str) -> String {
    let tags: HashSet<&str> = [
        "a",
        "b",
        "blockquote",
        "br",
        "code",
        "del",
        "em",
        "i",
        "li",
        "ol",
        "p",
        "pre",
        "s",
        "strong",
        "ul",
    ]
    .into_iter()
    .collect();

    let sanitized = ammonia::Builder::default()
        .tags(tags)
        .link_rel(None)
        .url_relative(ammonia::UrlRelative::Deny)
        .clean(content)
        .to_string();

    let mut writer = MarkdownWriter::default();
    let mut rest = sanitized.as_str();
    while let Some(start) = rest.find('<') {
        writer.text(&rest[..start]);
        let Some(end) = rest[start..].find('>') else {
            rest = &rest[start..];
            break;
        };
        writer.tag(&rest[start + 1..start + end]);
        rest = &rest[start + end + 1..];
    }
    writer.text(rest);
    writer.finish()
}

#[derive(Default)]
struct MarkdownWriter {
    /// Output buffers; blockquotes open a nested one
    buffers: Vec<String>,
    /// Open lists, with the next item number for ordered ones
    lists: Vec<Option<usize>>,
    links: Vec<String>,
    in_pre: bool,
}

impl MarkdownWriter {
    fn out(&mut self) -> &mut String {
        if self.buffers.is_empty() {
            self.buffers.push(String::new());
        }
        let last = self.buffers.len() - 1;
        &mut self.buffers[last]
    }

    fn text(&mut self, raw: &str) {
        let decoded = html_escape::decode_html_entities(raw).to_string();
        if self.in_pre {
            self.out().push_str(&decoded);
            return;
        }

        let mut collapsed = String::with_capacity(decoded.len());
        for ch in decoded.chars() {
            if ch.is_whitespace() {
                if !collapsed.ends_with(' ') {
                    collapsed.push(' ');
                }
            } else {
                collapsed.push(ch);
            }
        }

        let out = self.out();
        let at_line_start = out.is_empty() || out.ends_with('\n');
        let collapsed = if at_line_start {
            collapsed.trim_start()
        } else {
            collapsed.as_str()
        };
        out.push_str(collapsed);
    }

    fn block_break(&mut self) {
        let out = self.out();
        let trimmed = out.trim_end_matches(' ').len();
        out.truncate(trimmed);
        if !out.is_empty() {
            out.push_str("\n\n");
        }
    }

    fn tag(&mut self, raw: &str) {
        let closing = raw.starts_with('/');
        let body = raw.trim_start_matches('/').trim_end_matches('/');
        let name = body
            .split(|c: char| c.is_whitespace())
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        match (name.as_str(), closing) {
            ("p", false) => {}
            ("p", true) => self.block_break(),
            ("br", _) => self.out().push('\n'),
            ("strong" | "b", _) => self.out().push_str("**"),
            ("em" | "i", _) => self.out().push('_'),
            ("del" | "s", _) => self.out().push_str("~~"),
            ("code", _) if self.in_pre => {}
            ("code", _) => self.out().push('`'),
            ("pre", false) => {
                self.block_break();
                self.out().push_str("```\n");
                self.in_pre = true;
            }
            ("pre", true) => {
                self.in_pre = false;
                let out = self.out();
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str("```\n\n");
            }
            ("a", false) => {
                self.links.push(href_of(body).unwrap_or_default());
                self.out().push('[');
            }
            ("a", true) => {
                let href = self.links.pop().unwrap_or_default();
                let out = self.out();
                out.push_str("](");
                out.push_str(&href);
                out.push(')');
            }
            ("blockquote", false) => {
                self.block_break();
                self.buffers.push(String::new());
            }
            ("blockquote", true) => {
                if self.buffers.len() < 2 {
                    return;
                }
                let quoted = self.buffers.pop().unwrap_or_default();
                let out = self.out();
                for line in quoted.trim().lines() {
                    out.push_str("> ");
                    out.push_str(line);
                    out.push('\n');
                }
                out.push('\n');
            }
            ("ul", false) => {
                self.block_break();
                self.lists.push(None);
            }
            ("ol", false) => {
                self.block_break();
                self.lists.push(Some(1));
            }
            ("ul" | "ol", true) => {
                self.lists.pop();
                self.block_break();
            }
            ("li", false) => {
                let depth = self.lists.len().saturating_sub(1);
                let marker = match self.lists.last_mut() {
                    Some(Some(next)) => {
                        let marker = format!("{}. ", next);
                        *next += 1;
                        marker
                    }
                    _ => "- ".to_string(),
                };
                let out = self.out();
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&"  ".repeat(depth));
                out.push_str(&marker);
            }
            ("li", true) => {
                let out = self.out();
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }

    fn finish(mut self) -> String {
        while self.buffers.len() > 1 {
            let inner = self.buffers.pop().unwrap_or_default();
            self.out().push_str(&inner);
        }
        let out = self.buffers.pop().unwrap_or_default();

        let mut result = String::with_capacity(out.len());
        let mut newlines = 0;
        for ch in out.chars() {
            if ch == '\n' {
                newlines += 1;
                if newlines > 2 {
                    continue;
                }
            } else {
                newlines = 0;
            }
            result.push(ch);
        }
        result.trim().to_string()
    }
}

fn href_of(tag_body: &str) -> Option<String> {
    let start = tag_body.find("href=\"")? + "href=\"".len();
    let end = tag_body[start..].find('"')?;
    Some(html_escape::decode_html_entities(&tag_body[start..start + end]).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_and_breaks() {
        assert_eq!(
            html_to_markdown("<p>hello\n  world</p><p>second<br>line</p>"),
            "hello world\n\nsecond\nline"
        );
    }

    #[test]
    fn inline_formatting_and_links() {
        assert_eq!(
            html_to_markdown(
                r#"<p><strong>bold</strong> <em>it</em> <a href="https://x.example/a?b=1&amp;c=2">link</a></p>"#
            ),
            "**bold** _it_ [link](https://x.example/a?b=1&c=2)"
        );
    }

    #[test]
    fn scripts_are_dropped_and_entities_decoded() {
        assert_eq!(
            html_to_markdown("<p>1 &lt; 2</p><script>alert(1)</script>"),
            "1 < 2"
        );
    }

    #[test]
    fn lists_and_quotes() {
        assert_eq!(
            html_to_markdown("<ul><li>a</li><li>b</li></ul><ol><li>x</li><li>y</li></ol>"),
            "- a\n- b\n\n1. x\n2. y"
        );
        assert_eq!(
            html_to_markdown("<blockquote><p>quoted</p></blockquote><p>reply</p>"),
            "> quoted\n\nreply"
        );
    }

    #[test]
    fn preformatted_code_keeps_whitespace() {
        assert_eq!(
            html_to_markdown("<pre><code>fn main() {\n    run();\n}</code></pre>"),
            "```\nfn main() {\n    run();\n}\n```"
        );
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(html_to_markdown("just text"), "just text");
        assert_eq!(html_to_markdown(""), "");
    }

    #[test]
    fn markdown_renders_to_html() {
        assert_eq!(markdown_to_html("hello **world**"), "<p>hello <strong>world</strong></p>");
        assert_eq!(markdown_to_html("~~gone~~"), "<p><del>gone</del></p>");
    }

    #[test]
    fn rendered_html_is_sanitized() {
        let html = markdown_to_html("hi <script>alert(1)</script>");
        assert!(!html.contains("<script"));
    }
}
