use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

static COLOR_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{color\|#[0-9A-Fa-f]{6}\|(.*?)\}\}").expect("valid color span regex")
});
static PIPED_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]|]+)\|([^\]]+)\]\]").expect("valid piped link regex"));
static BARE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("valid bare link regex"));
static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"''+(.*?)''+").expect("valid emphasis regex"));

const SNIPPET_CHARS: usize = 80;

/// Strip wiki decorations down to plain text.
///
/// The substitutions run in a fixed order: color spans are unwrapped before
/// links so that a link nested in a color span survives as display text, and
/// emphasis is stripped last among the pairs because link labels may carry it.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let text = COLOR_SPAN.replace_all(text, "$1");
    let text = PIPED_LINK.replace_all(&text, "$2");
    let text = BARE_LINK.replace_all(&text, "$1");
    let text = EMPHASIS.replace_all(&text, "$1");
    text.replace('*', "").trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RarityStyle {
    /// `"{n}{suffix}"`, e.g. `6星`.
    Suffix(&'static str),
    /// One `★` per star.
    Stars,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcess {
    Normalize,
    /// Trimmed only. Stat values may be expressions or ranges and are left to consumers.
    Verbatim,
    Rarity(RarityStyle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub post: PostProcess,
}

impl FieldSpec {
    pub const fn new(name: &'static str, label: &'static str, post: PostProcess) -> Self {
        Self { name, label, post }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldValue {
    pub name: &'static str,
    pub label: &'static str,
    /// `None` means the page exists but the source carries no such field.
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub fields: Vec<FieldValue>,
    pub skipped: usize,
}

impl Extraction {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .and_then(|field| field.value.as_deref())
    }

    pub fn merge(mut self, other: Extraction) -> Self {
        self.fields.extend(other.fields);
        self.skipped += other.skipped;
        self
    }
}

/// Convert a zero-based rarity into its display form (`0` is one star).
pub fn rarity_display(raw: &str, style: RarityStyle) -> Option<String> {
    let stars = raw.trim().parse::<u32>().ok()?.checked_add(1)?;
    Some(match style {
        RarityStyle::Suffix(suffix) => format!("{stars}{suffix}"),
        RarityStyle::Stars => "★".repeat(stars as usize),
    })
}

/// Pull every schema field out of `markup`. Fields are looked up independently,
/// so a missing or malformed field never disturbs the others.
pub fn extract_fields(markup: &str, schema: &[FieldSpec]) -> Extraction {
    let mut extraction = Extraction::default();
    for spec in schema {
        let raw =
            find_field(markup, spec.label, 0).map(|hit| &markup[hit.value_start..hit.value_end]);
        let value = match (raw, spec.post) {
            (None, _) => None,
            (Some(raw), PostProcess::Normalize) => Some(normalize(raw)),
            (Some(raw), PostProcess::Verbatim) => Some(raw.trim().to_string()),
            (Some(raw), PostProcess::Rarity(style)) => {
                let display = rarity_display(raw, style);
                if display.is_none() {
                    debug!(field = spec.name, raw, "rarity value is not an integer");
                    extraction.skipped += 1;
                }
                display
            }
        };
        extraction.fields.push(FieldValue {
            name: spec.name,
            label: spec.label,
            value,
        });
    }
    extraction
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldHit {
    start: usize,
    value_start: usize,
    value_end: usize,
}

/// Locate the first `|LABEL = value` occurrence at or after `from`.
fn find_field(markup: &str, label: &str, from: usize) -> Option<FieldHit> {
    let mut cursor = from;
    while let Some(offset) = markup.get(cursor..)?.find('|') {
        let start = cursor + offset;
        cursor = start + 1;
        let rest = &markup[cursor..];
        let after_ws = rest.trim_start_matches([' ', '\t']);
        let Some(after_label) = after_ws.strip_prefix(label) else {
            continue;
        };
        let after_label_ws = after_label.trim_start_matches([' ', '\t']);
        let Some(after_eq) = after_label_ws.strip_prefix('=') else {
            continue;
        };
        let value_text = after_eq.trim_start_matches([' ', '\t']);
        let value_start = markup.len() - value_text.len();
        let value_end = value_start + value_extent(value_text);
        return Some(FieldHit {
            start,
            value_start,
            value_end,
        });
    }
    None
}

/// Length of a field value: up to end of line, or the first `|` / `}}` not
/// nested inside `{{…}}` or `[[…]]`.
fn value_extent(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut braces = 0usize;
    let mut brackets = 0usize;
    let mut index = 0usize;
    while index < bytes.len() {
        let pair = bytes.get(index + 1).copied();
        match (bytes[index], pair) {
            (b'\n', _) | (b'\r', _) => return index,
            (b'{', Some(b'{')) => {
                braces += 1;
                index += 2;
                continue;
            }
            (b'}', Some(b'}')) => {
                if braces == 0 {
                    return index;
                }
                braces -= 1;
                index += 2;
                continue;
            }
            (b'[', Some(b'[')) => {
                brackets += 1;
                index += 2;
                continue;
            }
            (b']', Some(b']')) => {
                brackets = brackets.saturating_sub(1);
                index += 2;
                continue;
            }
            (b'|', _) if braces == 0 && brackets == 0 => return index,
            _ => {}
        }
        index += 1;
    }
    bytes.len()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockScan<'a> {
    /// Block bodies (text after the template name, before the balancing `}}`).
    pub blocks: Vec<&'a str>,
    pub unterminated: usize,
}

impl<'a> BlockScan<'a> {
    pub fn first(&self) -> Option<&'a str> {
        self.blocks.first().copied()
    }
}

/// Isolate every `{{NAME …}}` block, outermost and non-overlapping.
pub fn template_blocks<'a>(markup: &'a str, name: &str) -> BlockScan<'a> {
    let opener = format!("{{{{{name}");
    let mut scan = BlockScan::default();
    let mut cursor = 0usize;
    while let Some(offset) = markup[cursor..].find(&opener) {
        let open = cursor + offset;
        let body_start = open + opener.len();
        let boundary_ok = match markup[body_start..].chars().next() {
            None => true,
            Some(ch) => ch == '|' || ch == '}' || ch.is_whitespace(),
        };
        if !boundary_ok {
            cursor = body_start;
            continue;
        }
        match balanced_close(markup, open) {
            Some(close) => {
                scan.blocks.push(&markup[body_start..close]);
                cursor = close + 2;
            }
            None => {
                warn!(template = name, offset = open, "template block is never closed");
                scan.unterminated += 1;
                break;
            }
        }
    }
    scan
}

/// Byte offset of the `}}` balancing the `{{` at `open`.
fn balanced_close(markup: &str, open: usize) -> Option<usize> {
    let bytes = markup.as_bytes();
    let mut depth = 0usize;
    let mut index = open;
    while index + 1 < bytes.len() {
        match (bytes[index], bytes[index + 1]) {
            (b'{', b'{') => {
                depth += 1;
                index += 2;
            }
            (b'}', b'}') => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(index);
                }
                index += 2;
            }
            _ => index += 1,
        }
    }
    None
}

/// Within a leveled block, return the entry whose `|MARKER = n` equals `wanted`.
/// An entry runs from its marker line to the next marker (or block end).
pub fn select_level_entry<'a>(block: &'a str, marker: &str, wanted: i64) -> Option<&'a str> {
    let mut hits = Vec::new();
    let mut cursor = 0usize;
    while let Some(hit) = find_field(block, marker, cursor) {
        cursor = hit.value_end.max(hit.start + 1);
        hits.push(hit);
    }
    for (position, hit) in hits.iter().enumerate() {
        let index = block[hit.value_start..hit.value_end].trim().parse::<i64>();
        if index == Ok(wanted) {
            let end = hits
                .get(position + 1)
                .map(|next| next.start)
                .unwrap_or(block.len());
            return Some(&block[hit.start..end]);
        }
    }
    None
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectScan {
    pub objects: Vec<serde_json::Map<String, Value>>,
    pub skipped: usize,
}

/// Decode every self-contained `{…}` JSON object embedded in `text`.
///
/// `{{` opens a wiki template and is stepped into rather than decoded, so
/// objects wrapped in template parameters are still found; `{|` opens a wiki
/// table and is passed over. Any other candidate that fails to decode is
/// logged and counted, and scanning resumes after it. An unbalanced candidate
/// resumes one byte further on so later objects are still recovered.
pub fn scan_objects(text: &str) -> ObjectScan {
    let bytes = text.as_bytes();
    let mut scan = ObjectScan::default();
    let mut index = 0usize;
    while index < bytes.len() {
        if bytes[index] != b'{' {
            index += 1;
            continue;
        }
        match bytes.get(index + 1) {
            Some(b'{') => {
                index += 2;
                continue;
            }
            Some(b'|') => {
                index += 1;
                continue;
            }
            _ => {}
        }
        let Some(end) = object_end(bytes, index) else {
            warn!(offset = index, snippet = %snippet(&text[index..]), "unbalanced object in listing");
            scan.skipped += 1;
            index += 1;
            continue;
        };
        let candidate = &text[index..end];
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(object)) => scan.objects.push(object),
            Ok(_) => scan.skipped += 1,
            Err(error) => {
                warn!(offset = index, error = %error, snippet = %snippet(candidate), "skipping malformed object");
                scan.skipped += 1;
            }
        }
        index = end;
    }
    scan
}

/// Exclusive end of the brace-balanced span starting at `start`, string-literal aware.
fn object_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, byte) in bytes[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn snippet(text: &str) -> String {
    let mut out = text.chars().take(SNIPPET_CHARS).collect::<String>();
    if text.chars().nth(SNIPPET_CHARS).is_some() {
        out.push('…');
    }
    out
}
