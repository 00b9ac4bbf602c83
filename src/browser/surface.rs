//! Semantic action surface.
//!
//! Turns a page snapshot into a short, line-oriented inventory of the
//! elements an agent can act on:
//!
//! ```text
//! HEADING_1: [text="Welcome"] (Welcome)
//! INPUT: [placeholder="Search"] (Search)
//! BUTTON: [#login] (Login)
//! LINK: [href="/docs"] (Docs)
//! ```
//!
//! Selectors in the most recent surface are the only ones a later click or
//! type may use.

use std::collections::HashSet;
use std::fmt;

use super::service::{ElementSnapshot, PageSnapshot};

/// Labels longer than this are cut.
const MAX_LABEL_CHARS: usize = 80;

/// Form fields that are never worth typing into.
const NON_ACTIONABLE_INPUTS: &[&str] = &[
    "amount",
    "config",
    "authenticity_token",
    "__viewstate",
    "__viewstategenerator",
    "__eventvalidation",
    "__requestverificationtoken",
];

/// Input types that behave like buttons.
const BUTTON_INPUT_TYPES: &[&str] = &["submit", "button", "reset", "image", "checkbox", "radio"];

/// Input types that cannot be typed into or clicked usefully.
const SKIPPED_INPUT_TYPES: &[&str] = &["hidden", "file", "range", "color"];

const TEXT_ROLES: &[&str] = &["textbox", "searchbox", "combobox"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Input,
    Button,
    Link,
    Heading(u8),
}

impl fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceKind::Input => f.write_str("INPUT"),
            SurfaceKind::Button => f.write_str("BUTTON"),
            SurfaceKind::Link => f.write_str("LINK"),
            SurfaceKind::Heading(level) => write!(f, "HEADING_{}", level),
        }
    }
}

/// One actionable element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceEntry {
    pub kind: SurfaceKind,
    pub selector: String,
    pub label: String,
}

impl SurfaceEntry {
    /// Selector as printed: attribute selectors are already bracketed.
    pub fn display_selector(&self) -> String {
        if self.selector.starts_with('[') {
            self.selector.clone()
        } else {
            format!("[{}]", self.selector)
        }
    }
}

impl fmt::Display for SurfaceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.kind, self.display_selector(), self.label)
    }
}

/// The bounded inventory of a page's actionable elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSurface {
    entries: Vec<SurfaceEntry>,
}

impl ActionSurface {
    /// Extract the surface from a page, keeping at most `max_links` links.
    pub fn extract(page: &PageSnapshot, max_links: usize) -> Self {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut links = 0;

        for el in &page.elements {
            if !el.visible {
                continue;
            }
            let Some(kind) = classify(el) else { continue };

            match kind {
                SurfaceKind::Input if !is_fillable(el) => continue,
                SurfaceKind::Button if is_disabled(el) => continue,
                SurfaceKind::Link if links >= max_links => continue,
                _ => {}
            }

            let Some(selector) = build_selector(kind, el) else { continue };
            if !seen.insert(selector.clone()) {
                continue;
            }
            if kind == SurfaceKind::Link {
                links += 1;
            }

            entries.push(SurfaceEntry {
                kind,
                selector,
                label: label_for(kind, el),
            });
        }

        Self { entries }
    }

    pub fn entries(&self) -> &[SurfaceEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The canonical selector for `selector` if the surface lists it, in
    /// either its bare or its printed form.
    pub fn resolve(&self, selector: &str) -> Option<&str> {
        let wanted = selector.trim();
        self.entries
            .iter()
            .find(|e| e.selector == wanted || e.display_selector() == wanted)
            .map(|e| e.selector.as_str())
    }

    pub fn contains(&self, selector: &str) -> bool {
        self.resolve(selector).is_some()
    }

    /// One line per entry.
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return "(no actionable elements)".to_string();
        }
        self.entries
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The selector the surface would list for `el`, ignoring visibility.
pub fn selector_for(el: &ElementSnapshot) -> Option<String> {
    classify(el).and_then(|kind| build_selector(kind, el))
}

fn classify(el: &ElementSnapshot) -> Option<SurfaceKind> {
    let tag = el.tag.to_ascii_lowercase();
    let role = el.role.as_deref().map(|r| r.to_ascii_lowercase());

    if let Some(level) = heading_level(&tag) {
        return Some(SurfaceKind::Heading(level));
    }

    match tag.as_str() {
        "input" => {
            let kind = el.attr("type").unwrap_or("text").to_ascii_lowercase();
            if SKIPPED_INPUT_TYPES.contains(&kind.as_str()) {
                None
            } else if BUTTON_INPUT_TYPES.contains(&kind.as_str()) {
                Some(SurfaceKind::Button)
            } else {
                Some(SurfaceKind::Input)
            }
        }
        "textarea" => Some(SurfaceKind::Input),
        "button" => Some(SurfaceKind::Button),
        "a" if el.attr("href").is_some() => Some(SurfaceKind::Link),
        _ => match role.as_deref() {
            Some(r) if TEXT_ROLES.contains(&r) => Some(SurfaceKind::Input),
            Some("button") => Some(SurfaceKind::Button),
            Some("link") => Some(SurfaceKind::Link),
            Some("heading") => {
                let level = el
                    .attr("aria-level")
                    .and_then(|l| l.parse::<u8>().ok())
                    .filter(|l| (1..=6).contains(l))
                    .unwrap_or(2);
                Some(SurfaceKind::Heading(level))
            }
            _ => None,
        },
    }
}

fn heading_level(tag: &str) -> Option<u8> {
    let digit = tag.strip_prefix('h')?;
    let level: u8 = digit.parse().ok()?;
    (1..=6).contains(&level).then_some(level)
}

fn is_disabled(el: &ElementSnapshot) -> bool {
    el.has_attr("disabled") || el.attr("aria-disabled") == Some("true")
}

fn is_fillable(el: &ElementSnapshot) -> bool {
    if !el.editable || is_disabled(el) || el.has_attr("readonly") {
        return false;
    }
    match el.attr("name").map(|n| n.to_ascii_lowercase()) {
        Some(name) => {
            !(NON_ACTIONABLE_INPUTS.contains(&name.as_str())
                || name.starts_with("csrf")
                || name.starts_with("_csrf"))
        }
        None => true,
    }
}

fn build_selector(kind: SurfaceKind, el: &ElementSnapshot) -> Option<String> {
    match kind {
        SurfaceKind::Input => el
            .attr("placeholder")
            .map(|v| attr_selector("placeholder", v))
            .or_else(|| el.attr("name").map(|v| attr_selector("name", v)))
            .or_else(|| el.attr("id").map(|v| format!("#{}", v)))
            .or_else(|| el.attr("aria-label").map(|v| attr_selector("aria-label", v))),
        SurfaceKind::Button => el
            .attr("id")
            .map(|v| format!("#{}", v))
            .or_else(|| el.attr("data-testid").map(|v| attr_selector("data-testid", v)))
            .or_else(|| el.attr("aria-label").map(|v| attr_selector("aria-label", v)))
            .or_else(|| el.attr("name").map(|v| attr_selector("name", v)))
            .or_else(|| {
                let text = clean_label(&el.text);
                (!text.is_empty()).then(|| text_selector(&text))
            }),
        SurfaceKind::Link => el
            .attr("id")
            .map(|v| format!("#{}", v))
            .or_else(|| el.attr("href").map(|v| attr_selector("href", v))),
        SurfaceKind::Heading(_) => el.attr("id").map(|v| format!("#{}", v)).or_else(|| {
            let text = clean_label(&el.text);
            (!text.is_empty()).then(|| text_selector(&text))
        }),
    }
}

fn label_for(kind: SurfaceKind, el: &ElementSnapshot) -> String {
    let candidates: Vec<Option<&str>> = match kind {
        SurfaceKind::Input => vec![
            el.attr("placeholder"),
            el.attr("aria-label"),
            el.attr("name"),
            el.attr("id"),
        ],
        SurfaceKind::Button => vec![
            Some(el.text.as_str()),
            el.attr("aria-label"),
            el.attr("value"),
            el.attr("name"),
        ],
        SurfaceKind::Link => vec![Some(el.text.as_str()), el.attr("aria-label"), el.attr("href")],
        SurfaceKind::Heading(_) => vec![Some(el.text.as_str())],
    };

    candidates
        .into_iter()
        .flatten()
        .map(clean_label)
        .find(|c| !c.is_empty())
        .unwrap_or_default()
}

fn attr_selector(name: &str, value: &str) -> String {
    format!("[{}=\"{}\"]", name, escape(value))
}

fn text_selector(text: &str) -> String {
    format!("text=\"{}\"", escape(text))
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Collapse whitespace and cut to a readable length.
fn clean_label(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(MAX_LABEL_CHARS) {
        Some((idx, _)) => format!("{}...", &collapsed[..idx]),
        None => collapsed,
    }
}
