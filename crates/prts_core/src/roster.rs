use std::fmt;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::markup::normalize;
use crate::resolver::normalize_key;
use crate::schema::LabelSchema;

static ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("valid row selector"));
static CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("valid cell selector"));
static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("valid anchor selector"));
static IMAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("valid image selector"));
static ICON_CLASS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".enemy-icon").expect("valid icon selector"));

/// Enemy avatar files are named `头像 敌人 <name>.png`; MediaWiki may render
/// the space as `_` in `src`.
const ICON_MARKERS: &[&str] = &["头像 敌人", "头像_敌人"];
/// Icon and name presentation cells precede the stats.
const LEADING_CELLS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageEnemyRow {
    pub name: String,
    /// Positional stat strings, raw text of each cell.
    pub stats: Vec<String>,
}

impl StageEnemyRow {
    pub fn labeled(&self, schema: &LabelSchema) -> Vec<StatCell> {
        label_stats(&self.stats, schema)
    }

    /// Case and markup insensitive name comparison.
    pub fn matches_name(&self, wanted: &str) -> bool {
        comparable(&self.name) == comparable(wanted)
    }
}

fn comparable(name: &str) -> String {
    normalize_key(&normalize(name)).to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatCell {
    Known {
        label: &'static str,
        value: String,
    },
    /// More cells than the label schema knows; kept rather than dropped.
    Unknown { position: usize, value: String },
    /// The label schema names a column the row did not have.
    Missing { label: &'static str },
}

impl fmt::Display for StatCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known { label, value } => write!(f, "{label}: {value}"),
            Self::Unknown { position, value } => {
                write!(f, "unknown attribute at position {position}: {value}")
            }
            Self::Missing { label } => write!(f, "{label}: -"),
        }
    }
}

/// Pair stats with labels by position. Positions are 1-based in reports.
pub fn label_stats(stats: &[String], schema: &LabelSchema) -> Vec<StatCell> {
    let width = stats.len().max(schema.labels.len());
    (0..width)
        .filter_map(|index| match (schema.labels.get(index).copied(), stats.get(index)) {
            (Some(label), Some(value)) => Some(StatCell::Known {
                label,
                value: value.clone(),
            }),
            (Some(label), None) => Some(StatCell::Missing { label }),
            (None, Some(value)) => Some(StatCell::Unknown {
                position: index + 1,
                value: value.clone(),
            }),
            (None, None) => None,
        })
        .collect()
}

/// Collect every enemy row from a rendered stage page.
///
/// A row counts only when it carries an enemy icon; its name is the `title` of
/// its first anchor. Icon rows without a named anchor are decorative and skipped.
pub fn scrape_roster(html: &str) -> Vec<StageEnemyRow> {
    let document = Html::parse_document(html);
    document
        .select(&ROW)
        .filter(|row| has_icon_marker(row))
        .filter_map(|row| {
            let name = row
                .select(&ANCHOR)
                .next()
                .and_then(|anchor| anchor.value().attr("title"))
                .map(str::trim)
                .filter(|title| !title.is_empty())?
                .to_string();
            let stats = row
                .select(&CELL)
                .skip(LEADING_CELLS)
                .map(|cell| cell_text(&cell))
                .collect();
            Some(StageEnemyRow { name, stats })
        })
        .collect()
}

fn has_icon_marker(row: &ElementRef<'_>) -> bool {
    if row.select(&ICON_CLASS).next().is_some() {
        return true;
    }
    row.select(&IMAGE).any(|image| {
        ["alt", "src"].iter().any(|attribute| {
            image
                .value()
                .attr(attribute)
                .is_some_and(|value| ICON_MARKERS.iter().any(|marker| value.contains(marker)))
        })
    })
}

fn cell_text(cell: &ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
