//! Resource-request directives embedded in model output
//!
//! The model asks for auxiliary material by emitting a tagged element, e.g.
//!
//! ```text
//! <guide-request>["show-dont-tell", "dialogue-tags"]</guide-request>
//! <context-request version="1">character/mara, setting/harbor</context-request>
//! <context-request ids="chapter-03"/>
//! ```
//!
//! The grammar is permissive. Ids may be a JSON array, a JSON object with an
//! `ids` array, an `ids="..."` attribute, or a comma/newline separated list
//! (bullets and quotes are ignored). An unclosed tag runs to the end of the
//! text. A tag with an unreadable body still counts as a request, just an
//! empty one; parsing never fails.

use regex::Regex;

/// Directive grammar version understood by this parser
pub const DIRECTIVE_GRAMMAR_VERSION: u32 = 1;

/// Tag used for craft-guide requests
pub const GUIDE_REQUEST_TAG: &str = "guide-request";

/// Tag used for context-resource requests
pub const CONTEXT_REQUEST_TAG: &str = "context-request";

/// Outcome of parsing model output for a directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRequest {
    /// No directive present
    NoRequest,
    /// Directive present; ids in request order, duplicates kept. May be empty.
    Request(Vec<String>),
}

impl ResourceRequest {
    /// Whether a directive was present at all
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Requested ids (empty for `NoRequest`)
    pub fn ids(&self) -> &[String] {
        match self {
            Self::NoRequest => &[],
            Self::Request(ids) => ids,
        }
    }

    /// Whether there is anything to fetch
    pub fn wants_resources(&self) -> bool {
        !self.ids().is_empty()
    }
}

/// Parses and strips one directive family
pub trait DirectiveParser: Send + Sync {
    /// Extract the request from model text
    fn parse(&self, text: &str) -> ResourceRequest;

    /// Remove every directive from model text.
    ///
    /// Text without a directive is returned unchanged.
    fn strip(&self, text: &str) -> String;
}

struct DirectiveSpan {
    start: usize,
    end: usize,
    ids: Vec<String>,
}

/// Tag-based directive parser
#[derive(Debug, Clone)]
pub struct TagDirectiveParser {
    tag: String,
    open: Regex,
    close: Regex,
    ids_attr: Regex,
    version_attr: Regex,
}

impl TagDirectiveParser {
    /// Create a parser for `<tag>...</tag>` directives
    pub fn new(tag: &str) -> Result<Self, regex::Error> {
        let escaped = regex::escape(tag);
        Ok(Self {
            tag: tag.to_string(),
            open: Regex::new(&format!(r"(?i)<{}((?:\s[^>]*?)?)(/?)>", escaped))?,
            close: Regex::new(&format!(r"(?i)</{}\s*>", escaped))?,
            ids_attr: Regex::new(r#"(?i)\bids\s*=\s*(?:"([^"]*)"|'([^']*)')"#)?,
            version_attr: Regex::new(r#"(?i)\bversion\s*=\s*["']?(\d+)"#)?,
        })
    }

    /// Parser for guide requests
    pub fn guides() -> Self {
        Self::new(GUIDE_REQUEST_TAG).expect("guide directive pattern compiles")
    }

    /// Parser for context-resource requests
    pub fn context() -> Self {
        Self::new(CONTEXT_REQUEST_TAG).expect("context directive pattern compiles")
    }

    /// The tag this parser recognizes
    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn spans(&self, text: &str) -> Vec<DirectiveSpan> {
        let mut spans = Vec::new();
        let mut cursor = 0;

        while let Some(open) = self.open.captures_at(text, cursor) {
            let Some(whole) = open.get(0) else { break };
            let attrs = open.get(1).map_or("", |m| m.as_str());
            let self_closing = open.get(2).is_some_and(|m| !m.as_str().is_empty());

            let (body, end) = if self_closing {
                ("", whole.end())
            } else {
                match self.close.find_at(text, whole.end()) {
                    Some(close) => (&text[whole.end()..close.start()], close.end()),
                    None => (&text[whole.end()..], text.len()),
                }
            };

            if let Some(version) = self.version_of(attrs) {
                if version != DIRECTIVE_GRAMMAR_VERSION {
                    tracing::debug!(
                        tag = %self.tag,
                        version,
                        "directive version not recognized, parsing with v1 rules"
                    );
                }
            }

            let mut ids = self.attribute_ids(attrs);
            ids.extend(parse_id_list(body));

            spans.push(DirectiveSpan {
                start: whole.start(),
                end,
                ids,
            });
            cursor = end;
        }

        spans
    }

    fn attribute_ids(&self, attrs: &str) -> Vec<String> {
        self.ids_attr
            .captures(attrs)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| split_plain_list(m.as_str()))
            .unwrap_or_default()
    }

    fn version_of(&self, attrs: &str) -> Option<u32> {
        self.version_attr
            .captures(attrs)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

impl DirectiveParser for TagDirectiveParser {
    fn parse(&self, text: &str) -> ResourceRequest {
        let spans = self.spans(text);
        if spans.is_empty() {
            return ResourceRequest::NoRequest;
        }
        ResourceRequest::Request(spans.into_iter().flat_map(|s| s.ids).collect())
    }

    fn strip(&self, text: &str) -> String {
        let mut spans = self.spans(text);
        if spans.is_empty() {
            return text.to_string();
        }

        // Removing a span can join its surroundings into a new directive,
        // so repeat until nothing matches.
        let mut current = text.to_string();
        while !spans.is_empty() {
            let mut stripped = String::with_capacity(current.len());
            let mut cursor = 0;
            for span in &spans {
                stripped.push_str(&current[cursor..span.start]);
                cursor = span.end;
            }
            stripped.push_str(&current[cursor..]);
            current = stripped;
            spans = self.spans(&current);
        }
        current.trim().to_string()
    }
}

fn parse_id_list(body: &str) -> Vec<String> {
    let body = body.trim();
    if body.is_empty() {
        return Vec::new();
    }

    if body.starts_with('[') {
        return match serde_json::from_str::<Vec<serde_json::Value>>(body) {
            Ok(values) => values.iter().filter_map(json_id).collect(),
            Err(_) => Vec::new(),
        };
    }

    if body.starts_with('{') {
        return match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value) => value
                .get("ids")
                .and_then(|ids| ids.as_array())
                .map(|ids| ids.iter().filter_map(json_id).collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };
    }

    split_plain_list(body)
}

fn json_id(value: &serde_json::Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn split_plain_list(raw: &str) -> Vec<String> {
    raw.split(|c| c == ',' || c == '\n' || c == ';')
        .map(|item| {
            item.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim()
                .trim_matches(|c| c == '"' || c == '\'' || c == '`')
                .trim()
        })
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
