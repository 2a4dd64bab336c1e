use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};
use crate::markup::{RarityStyle, rarity_display};

/// One row of the public recruitment pool as stored in the wiki's cargo tables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecruitOperator {
    #[serde(alias = "cn", default)]
    pub name: String,
    #[serde(default)]
    pub profession: String,
    #[serde(default)]
    pub position: String,
    /// Zero-based, as stored.
    #[serde(default)]
    pub rarity: String,
    /// Space separated tag list, e.g. `治疗 支援`.
    #[serde(default)]
    pub tag: String,
}

impl RecruitOperator {
    pub fn stars(&self) -> Option<String> {
        rarity_display(&self.rarity, RarityStyle::Stars)
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.tag.contains(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecruitMatch {
    pub name: String,
    pub stars: Option<String>,
    pub profession: String,
    pub position: String,
    pub tags: String,
}

impl From<&RecruitOperator> for RecruitMatch {
    fn from(operator: &RecruitOperator) -> Self {
        Self {
            name: operator.name.clone(),
            stars: operator.stars(),
            profession: operator.profession.clone(),
            position: operator.position.clone(),
            tags: operator.tag.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagMatches {
    pub tag: String,
    pub operators: Vec<RecruitMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecruitReport {
    pub tags: Vec<String>,
    /// Operators carrying every requested tag.
    pub full: Vec<RecruitMatch>,
    /// Per requested tag, in input order; full matches are not repeated here.
    pub partial: Vec<TagMatches>,
}

/// Split user text on full-width or ASCII commas. An empty tag list is rejected.
pub fn parse_tags(text: &str) -> QueryResult<Vec<String>> {
    let tags = text
        .split(['，', ','])
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    if tags.is_empty() {
        return Err(QueryError::InvalidInput(
            "no recruitment tags given".to_string(),
        ));
    }
    Ok(tags)
}

pub fn match_tags(pool: &[RecruitOperator], tags: &[String]) -> RecruitReport {
    let full_indices = pool
        .iter()
        .enumerate()
        .filter(|(_, operator)| tags.iter().all(|tag| operator.has_tag(tag)))
        .map(|(index, _)| index)
        .collect::<Vec<_>>();

    let partial = tags
        .iter()
        .map(|tag| TagMatches {
            tag: tag.clone(),
            operators: pool
                .iter()
                .enumerate()
                .filter(|(index, operator)| {
                    operator.has_tag(tag) && !full_indices.contains(index)
                })
                .map(|(_, operator)| RecruitMatch::from(operator))
                .collect(),
        })
        .collect();

    RecruitReport {
        tags: tags.to_vec(),
        full: full_indices
            .iter()
            .map(|index| RecruitMatch::from(&pool[*index]))
            .collect(),
        partial,
    }
}

#[cfg(test)]
mod tests {
    use super::{RecruitOperator, match_tags, parse_tags};
    use crate::error::QueryError;

    fn operator(name: &str, rarity: &str, tag: &str) -> RecruitOperator {
        RecruitOperator {
            name: name.to_string(),
            profession: "医疗".to_string(),
            position: "远程位".to_string(),
            rarity: rarity.to_string(),
            tag: tag.to_string(),
        }
    }

    #[test]
    fn parse_tags_accepts_both_comma_styles() {
        assert_eq!(
            parse_tags("治疗，支援, 远程位").expect("tags"),
            vec!["治疗", "支援", "远程位"]
        );
        assert!(matches!(
            parse_tags(" ，, "),
            Err(QueryError::InvalidInput(_))
        ));
    }

    #[test]
    fn full_matches_are_not_repeated_in_partial_lists() {
        let pool = vec![
            operator("安赛尔", "2", "治疗"),
            operator("末药", "3", "治疗 支援"),
            operator("梓兰", "3", "减速 支援"),
        ];
        let tags = vec!["治疗".to_string(), "支援".to_string()];
        let report = match_tags(&pool, &tags);

        assert_eq!(report.full.len(), 1);
        assert_eq!(report.full[0].name, "末药");
        assert_eq!(report.full[0].stars.as_deref(), Some("★★★★"));

        assert_eq!(report.partial[0].tag, "治疗");
        let healers = report.partial[0]
            .operators
            .iter()
            .map(|entry| entry.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(healers, vec!["安赛尔"]);
        let support = report.partial[1]
            .operators
            .iter()
            .map(|entry| entry.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(support, vec!["梓兰"]);
    }

    #[test]
    fn cargo_rows_decode_from_cn_column() {
        let row: RecruitOperator = serde_json::from_str(
            r#"{"cn":"芙蓉","profession":"医疗","position":"远程位","rarity":"3","tag":"治疗"}"#,
        )
        .expect("decode");
        assert_eq!(row.name, "芙蓉");
        assert_eq!(row.stars().as_deref(), Some("★★★★"));
    }
}
