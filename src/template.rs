//! Placeholder templates.
//!
//! A template is plain text with bracketed placeholders:
//!
//! ```text
//! [name]                  free text, filled in by the holder, never signed
//! [role:Admin,User]       fixed options, every option is pre-signed
//! ```
//!
//! Parsing splits the text once into literal segments and placeholder slots.
//! Every rendering (expansion, preview, verification) walks those slots, so
//! a substituted value is never re-scanned for markers.

use std::collections::HashMap;
use std::ops::Range;

use tracing::debug;

use crate::error::{Error, Result};

/// Upper bound on placeholder occurrences in one template.
pub const MAX_PLACEHOLDERS: usize = 7;
/// Upper bound on options in one fixed-option placeholder.
pub const MAX_OPTIONS: usize = 3;

/// Holder answers keyed by placeholder name.
pub type Answers = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderKind {
    FreeText,
    FixedOptions(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    name: String,
    kind: PlaceholderKind,
}

impl Placeholder {
    pub fn new(name: impl Into<String>, kind: PlaceholderKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &PlaceholderKind {
        &self.kind
    }

    pub fn options(&self) -> Option<&[String]> {
        match &self.kind {
            PlaceholderKind::FixedOptions(options) => Some(options),
            PlaceholderKind::FreeText => None,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.options().is_some()
    }
}

/// What happens to free-text markers in text that gets signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeTextPolicy {
    /// The marker stays verbatim, e.g. `[name]`.
    Keep,
    /// The marker is removed.
    Strip,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(Range<usize>),
    Slot {
        placeholder: usize,
        span: Range<usize>,
    },
}

/// One placeholder span as written in the template.
#[derive(Debug, Clone)]
pub struct Occurrence<'a> {
    pub placeholder: &'a Placeholder,
    pub marker: &'a str,
    pub span: Range<usize>,
}

/// A parsed template. Parsing is a pure function of the text.
#[derive(Debug, Clone)]
pub struct Template {
    text: String,
    placeholders: Vec<Placeholder>,
    segments: Vec<Segment>,
}

/// One fully fixed-option-substituted rendering of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    text: String,
    choices: Vec<(String, String)>,
}

impl Variant {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// `(placeholder, option)` pairs in first-appearance order.
    pub fn choices(&self) -> &[(String, String)] {
        &self.choices
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl Template {
    pub fn parse(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let mut placeholders: Vec<Placeholder> = Vec::new();
        let mut segments = Vec::new();
        let mut occurrences = 0usize;
        let mut cursor = 0usize;

        while let Some(rel_open) = text[cursor..].find('[') {
            let open = cursor + rel_open;
            // an unterminated '[' is just text
            let Some(rel_close) = text[open..].find(']') else {
                break;
            };
            let close = open + rel_close;
            let content = &text[open + 1..close];

            if content.contains('[') {
                return Err(Error::template(format!(
                    "nested '[' inside placeholder at byte {open}"
                )));
            }

            occurrences += 1;
            if occurrences > MAX_PLACEHOLDERS {
                return Err(Error::template(format!(
                    "the text exceeds the limit of {MAX_PLACEHOLDERS} placeholders"
                )));
            }

            let parsed = parse_placeholder(content)?;
            let index = register(&mut placeholders, parsed)?;

            if open > cursor {
                segments.push(Segment::Literal(cursor..open));
            }
            segments.push(Segment::Slot {
                placeholder: index,
                span: open..close + 1,
            });
            cursor = close + 1;
        }

        if cursor < text.len() {
            segments.push(Segment::Literal(cursor..text.len()));
        }

        debug!(
            placeholders = placeholders.len(),
            occurrences, "parsed template"
        );

        Ok(Self {
            text,
            placeholders,
            segments,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Distinct placeholders in first-appearance order.
    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    pub fn placeholder(&self, name: &str) -> Option<&Placeholder> {
        self.placeholders.iter().find(|p| p.name == name)
    }

    /// Every placeholder span, left to right, repeats included.
    pub fn occurrences(&self) -> impl Iterator<Item = Occurrence<'_>> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Slot { placeholder, span } => Some(Occurrence {
                placeholder: &self.placeholders[*placeholder],
                marker: &self.text[span.clone()],
                span: span.clone(),
            }),
            Segment::Literal(_) => None,
        })
    }

    /// Number of variants [`expand`](Self::expand) will produce.
    pub fn variant_count(&self) -> usize {
        self.placeholders
            .iter()
            .filter_map(Placeholder::options)
            .map(<[String]>::len)
            .product()
    }

    /// Cartesian product over the fixed-option placeholders, in the order they
    /// first appear. Free-text slots are rendered according to `policy`.
    pub fn expand(&self, policy: FreeTextPolicy) -> Vec<Variant> {
        let fixed: Vec<usize> = self
            .placeholders
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_fixed())
            .map(|(i, _)| i)
            .collect();

        let mut combinations: Vec<Vec<usize>> = vec![Vec::new()];
        for &index in &fixed {
            let count = self.placeholders[index].options().map_or(0, <[String]>::len);
            combinations = combinations
                .into_iter()
                .flat_map(|prefix| {
                    (0..count).map(move |choice| {
                        let mut next = prefix.clone();
                        next.push(choice);
                        next
                    })
                })
                .collect();
        }

        let variants: Vec<Variant> = combinations
            .iter()
            .map(|combination| {
                let mut chosen: Vec<Option<&str>> = vec![None; self.placeholders.len()];
                let mut choices = Vec::with_capacity(fixed.len());
                for (&index, &choice) in fixed.iter().zip(combination) {
                    let placeholder = &self.placeholders[index];
                    if let Some(options) = placeholder.options() {
                        chosen[index] = Some(options[choice].as_str());
                        choices.push((placeholder.name.clone(), options[choice].clone()));
                    }
                }

                let text = self.render(|out, index, marker| match chosen[index] {
                    Some(option) => out.push_str(option),
                    None => push_free_text(out, marker, policy),
                });
                Variant { text, choices }
            })
            .collect();

        debug!(variants = variants.len(), "expanded template");
        variants
    }

    /// Human-readable preview: every answered placeholder is filled in,
    /// unanswered ones keep their marker.
    pub fn render_selected(&self, answers: &Answers) -> String {
        self.render(|out, index, marker| {
            match answers.get(self.placeholders[index].name()) {
                Some(answer) => out.push_str(answer),
                None => out.push_str(marker),
            }
        })
    }

    /// The text a signer would have produced for these answers: only
    /// fixed-option answers are substituted, free text follows `policy`.
    pub fn render_signed(&self, answers: &Answers, policy: FreeTextPolicy) -> String {
        self.render(|out, index, marker| {
            let placeholder = &self.placeholders[index];
            if !placeholder.is_fixed() {
                push_free_text(out, marker, policy);
                return;
            }
            match answers.get(placeholder.name()) {
                Some(answer) => out.push_str(answer),
                None => out.push_str(marker),
            }
        })
    }

    fn render(&self, mut fill: impl FnMut(&mut String, usize, &str)) -> String {
        let mut out = String::with_capacity(self.text.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(range) => out.push_str(&self.text[range.clone()]),
                Segment::Slot { placeholder, span } => {
                    fill(&mut out, *placeholder, &self.text[span.clone()])
                }
            }
        }
        out
    }
}

fn push_free_text(out: &mut String, marker: &str, policy: FreeTextPolicy) {
    if policy == FreeTextPolicy::Keep {
        out.push_str(marker);
    }
}

fn parse_placeholder(content: &str) -> Result<Placeholder> {
    let (name, kind) = match content.split_once(':') {
        Some((name, raw_options)) => {
            let name = name.trim();
            let options: Vec<String> = raw_options
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();

            if options.len() > MAX_OPTIONS {
                return Err(Error::template(format!(
                    "the placeholder '{name}' exceeds the limit of {MAX_OPTIONS} options"
                )));
            }

            if options.is_empty() {
                (name, PlaceholderKind::FreeText)
            } else {
                (name, PlaceholderKind::FixedOptions(options))
            }
        }
        None => (content.trim(), PlaceholderKind::FreeText),
    };

    if name.is_empty() {
        return Err(Error::template("placeholder with an empty name"));
    }

    Ok(Placeholder::new(name, kind))
}

/// Returns the index of `placeholder`, reusing an identical earlier definition.
fn register(placeholders: &mut Vec<Placeholder>, placeholder: Placeholder) -> Result<usize> {
    match placeholders.iter().position(|p| p.name == placeholder.name) {
        Some(index) if placeholders[index].kind == placeholder.kind => Ok(index),
        Some(_) => Err(Error::template(format!(
            "placeholder '{}' is redefined with a different definition",
            placeholder.name
        ))),
        None => {
            placeholders.push(placeholder);
            Ok(placeholders.len() - 1)
        }
    }
}
