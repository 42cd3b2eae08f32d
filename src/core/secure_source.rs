//! Hardened XML source construction.
//!
//! Every document handed to the XSLT engine (the message body as well as the
//! stylesheet itself) passes through [`SecureSourceBuilder`]. The builder
//! inspects the document prolog before the engine ever sees it:
//!
//! * an external DTD subset is refused (or dropped in `blank` mode)
//! * `SYSTEM` / `PUBLIC` entities are refused (or declared empty in `blank` mode)
//! * parameter entities and entities whose replacement text references other
//!   entities are always refused, which rules out exponential expansion
//! * the number of entity declarations is capped
//! * the total replacement text produced by entity references in the document
//!   is capped, which rules out quadratic expansion
//!
//! The builder holds no mutable state and can be shared freely across threads.
use std::{borrow::Cow, collections::HashMap};

use once_cell::sync::Lazy;
use quick_xml::{Reader, events::Event};
use regex::Regex;
use xrust::{item::Node, parser::xml::parse as parse_xml, trees::smite::RNode};

use crate::{
    config::{ExternalEntityPolicy, SecurityConfig},
    core::error::SecurityViolation,
};

/// `<!ENTITY [%] name (SYSTEM|PUBLIC ... | "value" ...)>`
static ENTITY_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"<!ENTITY\s+(%\s+)?([^\s%"'>]+)\s+(?:(SYSTEM|PUBLIC)\b[^>]*|("[^"]*"|'[^']*')[^>]*)>"#,
    )
    .expect("valid regex")
});

/// Any entity declaration opener, used to detect declarations the pattern above did not understand.
static ENTITY_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<!ENTITY\b").expect("valid regex"));

/// Root element name followed by an external identifier.
static EXTERNAL_SUBSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\S+)\s+(?:SYSTEM|PUBLIC)\b").expect("valid regex"));

/// A general or parameter entity reference (character references are fine).
static ENTITY_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[&%][A-Za-z_:]").expect("valid regex"));

/// A general entity reference such as `&name;`.
static GENERAL_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&([^\s&;#]+);").expect("valid regex"));

/// Why a document prolog was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrologError {
    Violation(SecurityViolation),
    Malformed(String),
}

impl From<SecurityViolation> for PrologError {
    fn from(violation: SecurityViolation) -> Self {
        PrologError::Violation(violation)
    }
}

/// Builds locked-down sources for the XSLT engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureSourceBuilder {
    external_entities: ExternalEntityPolicy,
    max_entity_declarations: usize,
    max_entity_expansion: usize,
}

impl Default for SecureSourceBuilder {
    fn default() -> Self {
        Self::new(&SecurityConfig::default())
    }
}

impl SecureSourceBuilder {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            external_entities: config.external_entities,
            max_entity_declarations: config.max_entity_declarations,
            max_entity_expansion: config.max_entity_expansion,
        }
    }

    /// Wrap `text` in a source that is safe to hand to the parser.
    pub fn build<'a>(&self, text: &'a str) -> Result<SecureSource<'a>, PrologError> {
        match self.inspect_prolog(text)? {
            Some(rewritten) => Ok(SecureSource {
                text: Cow::Owned(rewritten),
            }),
            None => Ok(SecureSource {
                text: Cow::Borrowed(text),
            }),
        }
    }

    /// Scan up to the root element looking for a DOCTYPE. Returns the rewritten
    /// document when blanking changed the declaration.
    fn inspect_prolog(&self, text: &str) -> Result<Option<String>, PrologError> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);

        loop {
            let start = reader.buffer_position() as usize;
            match reader.read_event() {
                Ok(Event::DocType(doctype)) => {
                    let end = reader.buffer_position() as usize;
                    let content = std::str::from_utf8(doctype.as_ref())
                        .map_err(|e| PrologError::Malformed(e.to_string()))?;
                    return Ok(self.inspect_doctype(content, &text[end..])?.map(|sanitized| {
                        format!("{}<!DOCTYPE {}>{}", &text[..start], sanitized, &text[end..])
                    }));
                }
                Ok(Event::Start(_)) | Ok(Event::Empty(_)) | Ok(Event::Eof) => return Ok(None),
                Ok(_) => continue,
                Err(e) => return Err(PrologError::Malformed(e.to_string())),
            }
        }
    }

    fn inspect_doctype(&self, content: &str, body: &str) -> Result<Option<String>, PrologError> {
        let (mut head, subset) = match (content.find('['), content.rfind(']')) {
            (Some(open), Some(close)) if open < close => {
                (Cow::Borrowed(&content[..open]), Some(&content[open + 1..close]))
            }
            _ => (Cow::Borrowed(content), None),
        };
        let mut changed = false;

        if let Some(captures) = EXTERNAL_SUBSET.captures(&head) {
            match self.external_entities {
                ExternalEntityPolicy::Reject => {
                    return Err(SecurityViolation::ExternalDtd.into());
                }
                ExternalEntityPolicy::Blank => {
                    head = Cow::Owned(format!("{} ", &captures[1]));
                    changed = true;
                }
            }
        }

        let Some(subset) = subset else {
            return Ok(changed.then(|| head.into_owned()));
        };

        let declared = ENTITY_OPEN.find_iter(subset).count();
        if declared > self.max_entity_declarations {
            return Err(SecurityViolation::TooManyEntities {
                count: declared,
                limit: self.max_entity_declarations,
            }
            .into());
        }

        let mut sanitized = String::with_capacity(subset.len());
        let mut last = 0;
        let mut understood = 0;
        // Replacement text length per internal entity
        let mut replacement_lengths = HashMap::new();
        for captures in ENTITY_DECL.captures_iter(subset) {
            understood += 1;
            let name = captures[2].to_string();
            if captures.get(1).is_some() {
                return Err(SecurityViolation::ParameterEntity { name }.into());
            }
            if captures.get(3).is_some() {
                if self.external_entities == ExternalEntityPolicy::Reject {
                    return Err(SecurityViolation::ExternalEntity { name }.into());
                }
                let whole = captures.get(0).map_or(0..0, |m| m.range());
                sanitized.push_str(&subset[last..whole.start]);
                sanitized.push_str(&format!("<!ENTITY {name} \"\">"));
                last = whole.end;
                changed = true;
                continue;
            }
            if let Some(value) = captures.get(4)
                && ENTITY_REFERENCE.is_match(value.as_str())
            {
                return Err(SecurityViolation::NestedEntityExpansion { name }.into());
            }
            let length = captures
                .get(4)
                .map_or(0, |value| value.as_str().len().saturating_sub(2));
            replacement_lengths.insert(name, length);
        }

        if understood != declared {
            return Err(PrologError::Malformed(
                "unrecognized entity declaration in DOCTYPE".to_string(),
            ));
        }

        self.check_expansion(&replacement_lengths, body)?;

        if !changed {
            return Ok(None);
        }
        sanitized.push_str(&subset[last..]);
        Ok(Some(format!("{}[{}]", head, sanitized)))
    }

    /// Sum the replacement text every entity reference in `body` produces.
    fn check_expansion(
        &self,
        replacement_lengths: &HashMap<String, usize>,
        body: &str,
    ) -> Result<(), SecurityViolation> {
        if replacement_lengths.is_empty() {
            return Ok(());
        }
        let mut size = 0usize;
        for reference in GENERAL_REFERENCE.captures_iter(body) {
            if let Some(length) = replacement_lengths.get(&reference[1]) {
                size = size.saturating_add(*length);
                if size > self.max_entity_expansion {
                    return Err(SecurityViolation::ExcessiveExpansion {
                        size,
                        limit: self.max_entity_expansion,
                    });
                }
            }
        }
        Ok(())
    }
}

/// A document that passed prolog inspection and is ready to be parsed.
#[derive(Debug, Clone)]
pub struct SecureSource<'a> {
    text: Cow<'a, str>,
}

impl SecureSource<'_> {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether prolog inspection had to rewrite the document.
    pub fn was_rewritten(&self) -> bool {
        matches!(self.text, Cow::Owned(_))
    }

    /// Parse into a namespace-aware document tree.
    pub fn parse(&self) -> Result<RNode, String> {
        let doc = RNode::new_document();
        parse_xml(doc.clone(), self.text.as_ref(), None).map_err(|e| e.to_string())?;
        Ok(doc)
    }
}
