use serde::Serialize;

use crate::markup::{
    Extraction, FieldSpec, FieldValue, PostProcess, RarityStyle, extract_fields,
    select_level_entry, template_blocks,
};

pub const ENEMY_COMMON_BLOCK: &str = "敌人信息";
pub const ENEMY_LEVEL_BLOCK: &str = "敌人等级";
pub const LEVEL_MARKER: &str = "级别";
/// Baseline (unpromoted) stats.
pub const BASELINE_LEVEL: i64 = 0;

pub const OPERATOR_SCHEMA: &[FieldSpec] = &[
    FieldSpec::new("profession", "职业", PostProcess::Normalize),
    FieldSpec::new("branch", "分支", PostProcess::Normalize),
    FieldSpec::new(
        "rarity",
        "稀有度",
        PostProcess::Rarity(RarityStyle::Suffix("星")),
    ),
    FieldSpec::new("trait", "特性", PostProcess::Normalize),
    FieldSpec::new("trait_note", "特性备注", PostProcess::Normalize),
];

pub const ITEM_SCHEMA: &[FieldSpec] = &[
    FieldSpec::new("description", "描述", PostProcess::Normalize),
    FieldSpec::new("usage", "用途", PostProcess::Normalize),
    FieldSpec::new("obtain", "获得方式", PostProcess::Normalize),
    FieldSpec::new("category", "分类", PostProcess::Normalize),
];

pub const ENEMY_COMMON_SCHEMA: &[FieldSpec] = &[
    FieldSpec::new("name", "名称", PostProcess::Normalize),
    FieldSpec::new("race", "种族", PostProcess::Normalize),
    FieldSpec::new("level", "地位级别", PostProcess::Normalize),
    FieldSpec::new("attack_type", "攻击方式", PostProcess::Normalize),
    FieldSpec::new("damage_type", "伤害类型", PostProcess::Normalize),
    FieldSpec::new("motion", "行动方式", PostProcess::Normalize),
    FieldSpec::new("enemy_res", "元素抗性", PostProcess::Normalize),
    FieldSpec::new("enemy_damage_res", "损伤抵抗", PostProcess::Normalize),
    FieldSpec::new("ability", "能力", PostProcess::Normalize),
];

pub const ENEMY_LEVEL_SCHEMA: &[FieldSpec] = &[
    FieldSpec::new("endure", "生命值", PostProcess::Verbatim),
    FieldSpec::new("attack", "攻击力", PostProcess::Verbatim),
    FieldSpec::new("defence", "防御力", PostProcess::Verbatim),
    FieldSpec::new("resistance", "法术抗性", PostProcess::Verbatim),
    FieldSpec::new("move_speed", "移动速度", PostProcess::Verbatim),
    FieldSpec::new("attack_speed", "攻击间隔", PostProcess::Verbatim),
];

pub const STAGE_SCHEMA: &[FieldSpec] =
    &[FieldSpec::new("stage_id", "关卡id", PostProcess::Verbatim)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Operator,
    Item,
    Enemy,
    Stage,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Item => "item",
            Self::Enemy => "enemy",
            Self::Stage => "stage",
        }
    }
}

/// Extracted attributes of one page. Field order follows the kind's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityRecord {
    pub kind: EntityKind,
    pub title: String,
    pub fields: Vec<FieldValue>,
    /// Fragments that were present but could not be interpreted.
    pub skipped: usize,
}

impl EntityRecord {
    pub fn from_markup(kind: EntityKind, title: &str, markup: &str) -> Self {
        let extraction = match kind {
            EntityKind::Operator => extract_fields(markup, OPERATOR_SCHEMA),
            EntityKind::Item => extract_fields(markup, ITEM_SCHEMA),
            EntityKind::Enemy => extract_enemy(markup),
            EntityKind::Stage => extract_fields(markup, STAGE_SCHEMA),
        };
        Self {
            kind,
            title: title.to_string(),
            fields: extraction.fields,
            skipped: extraction.skipped,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .and_then(|field| field.value.as_deref())
    }

    pub fn present_fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.fields
            .iter()
            .filter_map(|field| field.value.as_deref().map(|value| (field.label, value)))
    }
}

/// Enemy pages keep their data in two template blocks. Each block is isolated
/// first, then read with its own schema; leveled stats come from the baseline entry.
pub fn extract_enemy(markup: &str) -> Extraction {
    let common_scan = template_blocks(markup, ENEMY_COMMON_BLOCK);
    let level_scan = template_blocks(markup, ENEMY_LEVEL_BLOCK);

    let common = extract_fields(common_scan.first().unwrap_or(""), ENEMY_COMMON_SCHEMA);
    let baseline = level_scan
        .first()
        .and_then(|block| select_level_entry(block, LEVEL_MARKER, BASELINE_LEVEL))
        .unwrap_or("");
    let leveled = extract_fields(baseline, ENEMY_LEVEL_SCHEMA);

    let mut extraction = common.merge(leveled);
    extraction.skipped += common_scan.unterminated + level_scan.unterminated;
    extraction
}

/// Positional labels for roster stat cells, versioned separately from the
/// scraper so that column drift on the source site is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelSchema {
    pub version: u32,
    pub labels: &'static [&'static str],
}

pub const ROSTER_LABELS: LabelSchema = LabelSchema {
    version: 1,
    labels: &[
        "数量",
        "生命值",
        "攻击力",
        "防御力",
        "法术抗性",
        "攻击间隔",
        "重量等级",
        "移动速度",
    ],
};

#[cfg(test)]
mod tests {
    use super::{EntityKind, EntityRecord, extract_enemy};

    const ENEMY_PAGE: &str = r#"
{{敌人信息
|名称=源石虫
|种族=[[感染生物]]
|地位级别=普通
|攻击方式=近战
|伤害类型=物理
|行动方式=地面
|能力=
}}
== 等级 ==
{{敌人等级
|级别=0
|生命值=550
|攻击力=130
|防御力=0
|法术抗性=0
|移动速度=1
|攻击间隔=1.7
|级别=1
|生命值=820
|攻击力=195
|防御力=0
|法术抗性=0
|移动速度=1
|攻击间隔=1.7
}}
"#;

    #[test]
    fn enemy_extraction_is_two_phase_with_baseline_stats() {
        let record = EntityRecord::from_markup(EntityKind::Enemy, "源石虫", ENEMY_PAGE);
        assert_eq!(record.get("name"), Some("源石虫"));
        assert_eq!(record.get("race"), Some("感染生物"));
        assert_eq!(record.get("endure"), Some("550"));
        assert_eq!(record.get("attack"), Some("130"));
        assert_eq!(record.get("attack_speed"), Some("1.7"));
        assert_eq!(record.get("ability"), Some(""));
        assert_eq!(record.get("enemy_res"), None);
        assert_eq!(record.skipped, 0);
    }

    #[test]
    fn common_fields_do_not_leak_from_outside_their_block() {
        let markup = "|名称=页外名称\n{{敌人信息\n|种族=无人机\n}}";
        let extraction = extract_enemy(markup);
        assert_eq!(extraction.get("name"), None);
        assert_eq!(extraction.get("race"), Some("无人机"));
    }

    #[test]
    fn missing_baseline_entry_leaves_leveled_fields_absent() {
        let markup = "{{敌人信息\n|名称=x\n}}{{敌人等级\n|级别=1\n|生命值=9000\n}}";
        let extraction = extract_enemy(markup);
        assert_eq!(extraction.get("name"), Some("x"));
        assert_eq!(extraction.get("endure"), None);
    }

    #[test]
    fn operator_record_reports_rarity_in_stars() {
        let markup = "{{人员信息\n|职业=[[术师]]\n|分支=中坚术师\n|稀有度=5\n|特性=攻击造成{{color|#00B0FF|法术伤害}}\n}}";
        let record = EntityRecord::from_markup(EntityKind::Operator, "娜仁图亚", markup);
        assert_eq!(record.get("profession"), Some("术师"));
        assert_eq!(record.get("rarity"), Some("6星"));
        assert_eq!(record.get("trait"), Some("攻击造成法术伤害"));
        assert_eq!(record.get("trait_note"), None);
        assert_eq!(record.present_fields().count(), 4);
    }

    #[test]
    fn stage_id_is_read_verbatim() {
        let record = EntityRecord::from_markup(
            EntityKind::Stage,
            "1-7",
            "{{关卡信息\n|关卡id=main_01-07|难度=普通\n}}",
        );
        assert_eq!(record.get("stage_id"), Some("main_01-07"));
    }
}
