//! Message → HTML rendering.
//!
//! Bot turns are markdown: paragraphs, lists, blockquotes, tables and code,
//! with fenced blocks highlighted by syntect when the language tag is known.
//! User turns are literal text with their line breaks kept.

use pulldown_cmark::{CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};
use pulldown_cmark_escape::escape_html;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;
use tracing::debug;

use crate::models::{Message, Sender};

const THEME: &str = "InspiredGitHub";

pub trait Renderer: Send + Sync {
    fn render(&self, message: &Message) -> String;
}

/// Syntax and theme sets are loaded once; build one per process and share it.
pub struct MarkdownRenderer {
    syntax_set: SyntaxSet,
    theme: Theme,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        let mut themes = ThemeSet::load_defaults().themes;
        let theme = themes
            .remove(THEME)
            .or_else(|| themes.into_values().next())
            .unwrap_or_default();
        Self { syntax_set: SyntaxSet::load_defaults_newlines(), theme }
    }

    pub fn render_markdown(&self, text: &str) -> String {
        let options = Options::ENABLE_TABLES
            | Options::ENABLE_STRIKETHROUGH
            | Options::ENABLE_TASKLISTS;

        let mut events = Vec::new();
        let mut code: Option<(String, String)> = None;

        for event in Parser::new_ext(text, options) {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(info) => {
                            info.split_whitespace().next().unwrap_or_default().to_string()
                        }
                        CodeBlockKind::Indented => String::new(),
                    };
                    code = Some((lang, String::new()));
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some((lang, buf)) = code.take() {
                        events.push(Event::Html(CowStr::from(self.code_block(&lang, &buf))));
                    }
                }
                Event::Text(t) if code.is_some() => {
                    if let Some((_, buf)) = code.as_mut() {
                        buf.push_str(&t);
                    }
                }
                _ if code.is_some() => {}
                // Model output never gets to inject markup.
                Event::Html(raw) | Event::InlineHtml(raw) => events.push(Event::Text(raw)),
                other => events.push(other),
            }
        }

        let mut html = String::with_capacity(text.len() * 3 / 2);
        pulldown_cmark::html::push_html(&mut html, events.into_iter());
        html
    }

    fn code_block(&self, lang: &str, code: &str) -> String {
        let syntax = (!lang.is_empty())
            .then(|| self.syntax_set.find_syntax_by_token(lang))
            .flatten();

        if let Some(syntax) = syntax {
            match highlighted_html_for_string(code, &self.syntax_set, syntax, &self.theme) {
                Ok(highlighted) => {
                    return format!(
                        "<div class=\"code-block\" data-lang=\"{}\">{highlighted}</div>\n",
                        escape(lang)
                    );
                }
                Err(e) => debug!("highlighting {lang} failed, falling back to plain: {e}"),
            }
        }

        if lang.is_empty() {
            format!("<pre><code>{}</code></pre>\n", escape(code))
        } else {
            let lang = escape(lang);
            format!("<pre><code class=\"language-{lang}\">{}</code></pre>\n", escape(code))
        }
    }

    pub fn render_plain(&self, text: &str) -> String {
        escape(text).replace("\r\n", "\n").replace('\n', "<br>")
    }
}

impl Renderer for MarkdownRenderer {
    fn render(&self, message: &Message) -> String {
        match message.sender {
            Sender::Bot => self.render_markdown(&message.text),
            Sender::User => self.render_plain(&message.text),
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    // Writing into a String cannot fail.
    let _ = escape_html(&mut out, text);
    out
}
