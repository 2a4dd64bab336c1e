use std::sync::LazyLock;

use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::config::Settings;
use crate::error::{QueryError, QueryResult};
use crate::mediawiki::{RawPage, WikiReadApi};
use crate::name_index::{
    Clock, Freshness, IndexStatus, IndexStore, NameIndexCache, RefreshReport, SystemClock,
};
use crate::recruit::{RecruitReport, match_tags, parse_tags};
use crate::resolver::{Resolution, resolve};
use crate::roster::{StageEnemyRow, scrape_roster};
use crate::schema::{EntityKind, EntityRecord};

static TOKEN_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s,，]+").expect("valid token separator regex"));

pub const DEFAULT_SKIN: &str = "2";
const SEARCH_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnemyReport {
    pub record: EntityRecord,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub record: EntityRecord,
    pub map_preview_url: Option<String>,
    pub roster: Vec<StageEnemyRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageEnemyReport {
    pub stage: String,
    pub enemy: String,
    pub map_preview_url: Option<String>,
    pub row: StageEnemyRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorReport {
    pub record: EntityRecord,
    pub portrait_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOutcome {
    Enemy(EnemyReport),
    Stage(StageReport),
    EnemyInStage(StageEnemyReport),
}

/// Split free text on whitespace and either comma style.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_SEPARATORS
        .split(text)
        .filter(|token| !token.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Stage codes are upper-case on the wiki (`h8-4` is `H8-4`).
pub fn stage_title(token: &str) -> String {
    token.to_ascii_uppercase()
}

pub fn operator_portrait_title(name: &str, skin: &str) -> String {
    format!("文件:立绘 {name} {}.png", skin.replace("时装", "skin"))
}

pub fn enemy_avatar_title(name: &str) -> String {
    format!("文件:头像 敌人 {name}.png")
}

/// Owns the name index and answers every caller-facing query. Concurrent
/// callers share one engine; index refresh and reads happen under one lock.
pub struct QueryEngine<A, S> {
    api: A,
    cache: Mutex<NameIndexCache<S>>,
    clock: Box<dyn Clock>,
    map_preview_url: String,
}

impl<A: WikiReadApi, S: IndexStore> QueryEngine<A, S> {
    pub fn new(api: A, store: S, settings: &Settings) -> Self {
        Self::with_clock(api, store, settings, SystemClock)
    }

    /// Builds the engine and loads any persisted index before the first remote call.
    pub fn with_clock(api: A, store: S, settings: &Settings, clock: impl Clock + 'static) -> Self {
        let mut cache = NameIndexCache::new(
            store,
            settings.index_ttl_seconds,
            settings.aggregate_page.clone(),
        );
        cache.load_from_store();
        Self {
            api,
            cache: Mutex::new(cache),
            clock: Box::new(clock),
            map_preview_url: settings.map_preview_url.clone(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Dispatch free text: one token is an enemy or a stage, two tokens are an
    /// enemy within a stage. Tokens past the second are ignored.
    pub fn query_text(&self, text: &str) -> QueryResult<QueryOutcome> {
        let tokens = tokenize(text);
        match tokens.as_slice() {
            [] => Err(QueryError::InvalidInput("empty query".to_string())),
            [single] => self.query_single(single),
            [first, second, rest @ ..] => {
                if !rest.is_empty() {
                    debug!(ignored = rest.len(), "ignoring extra query tokens");
                }
                self.query_pair(first, second)
            }
        }
    }

    fn query_single(&self, token: &str) -> QueryResult<QueryOutcome> {
        let (resolution, is_enemy) = self.with_fresh_index(|cache| {
            let resolution = resolve(token, cache.names());
            let is_enemy = cache.contains(&resolution.name);
            (resolution, is_enemy)
        })?;
        debug!(
            token,
            resolved = %resolution.name,
            kind = ?resolution.kind,
            is_enemy,
            "dispatching single token"
        );
        if is_enemy {
            self.fetch_enemy(&resolution.name).map(QueryOutcome::Enemy)
        } else {
            self.lookup_roster(token).map(QueryOutcome::Stage)
        }
    }

    /// The second token is tested first: if it is a known enemy the pair reads
    /// `(stage, enemy)`, otherwise `(enemy, stage)`.
    fn query_pair(&self, first: &str, second: &str) -> QueryResult<QueryOutcome> {
        let second_is_enemy = self.with_fresh_index(|cache| cache.contains(second))?;
        let (stage, enemy) = if second_is_enemy {
            (first, second)
        } else {
            (second, first)
        };
        debug!(stage, enemy, second_is_enemy, "dispatching token pair");
        self.lookup_entity_in_stage(enemy, stage)
            .map(QueryOutcome::EnemyInStage)
    }

    /// Resolve `name` against the enemy index and fetch the enemy page with its avatar.
    pub fn lookup_entity(&self, name: &str) -> QueryResult<EnemyReport> {
        let resolution = self.resolve_name(name)?;
        self.fetch_enemy(&resolution.name)
    }

    pub fn lookup_roster(&self, stage: &str) -> QueryResult<StageReport> {
        let title = stage_title(stage);
        let (page, html) = rayon::join(
            || self.api.fetch_page_markup(&title),
            || self.api.fetch_rendered_html(&title),
        );
        let page = page?;
        let Some(markup) = page.markup.as_deref() else {
            return Err(QueryError::NotFound(title));
        };
        let record = EntityRecord::from_markup(EntityKind::Stage, &page.title, markup);
        let roster = match html? {
            Some(html) => scrape_roster(&html),
            None => {
                debug!(stage = %page.title, "stage has no rendered form");
                Vec::new()
            }
        };
        Ok(StageReport {
            map_preview_url: self.map_preview(&record),
            record,
            roster,
        })
    }

    pub fn lookup_entity_in_stage(
        &self,
        entity: &str,
        stage: &str,
    ) -> QueryResult<StageEnemyReport> {
        let resolution = self.resolve_name(entity)?;
        let report = self.lookup_roster(stage)?;
        let row = report
            .roster
            .into_iter()
            .find(|row| row.matches_name(&resolution.name) || row.matches_name(entity))
            .ok_or_else(|| {
                QueryError::NotFound(format!("{} in {}", resolution.name, report.record.title))
            })?;
        Ok(StageEnemyReport {
            stage: report.record.title,
            enemy: row.name.clone(),
            map_preview_url: report.map_preview_url,
            row,
        })
    }

    pub fn lookup_operator(&self, name: &str, skin: Option<&str>) -> QueryResult<OperatorReport> {
        let skin = skin.unwrap_or(DEFAULT_SKIN);
        if let Some(report) = self.fetch_operator(name, skin)? {
            return Ok(report);
        }
        let hit = self
            .api
            .search_titles(name, SEARCH_LIMIT)?
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::NotFound(name.to_string()))?;
        debug!(name, hit = %hit, "operator page absent; using first search hit");
        self.fetch_operator(&hit, skin)?
            .ok_or(QueryError::NotFound(hit))
    }

    pub fn lookup_item(&self, name: &str) -> QueryResult<EntityRecord> {
        let title = self
            .api
            .search_titles(name, SEARCH_LIMIT)?
            .into_iter()
            .next()
            .unwrap_or_else(|| name.to_string());
        let page = self.api.fetch_page_markup(&title)?;
        record_from_page(EntityKind::Item, page)
    }

    pub fn recruit(&self, text: &str) -> QueryResult<RecruitReport> {
        let tags = parse_tags(text)?;
        let pool = self.api.fetch_recruitable_operators()?;
        Ok(match_tags(&pool, &tags))
    }

    /// Forced refresh. Unlike the lazy path, a failed save is reported.
    pub fn refresh_index(&self) -> QueryResult<RefreshReport> {
        let mut cache = self.cache.lock();
        let report = cache.refresh_in_memory(&self.api, self.clock.now_unix())?;
        cache.persist()?;
        Ok(report)
    }

    pub fn index_status(&self) -> IndexStatus {
        self.cache.lock().status(self.clock.now_unix())
    }

    fn resolve_name(&self, input: &str) -> QueryResult<Resolution> {
        self.with_fresh_index(|cache| resolve(input, cache.names()))
    }

    fn with_fresh_index<R>(&self, read: impl FnOnce(&NameIndexCache<S>) -> R) -> QueryResult<R> {
        let mut cache = self.cache.lock();
        if let Freshness::Degraded(error) = cache.ensure_fresh(&self.api, self.clock.now_unix())
            && cache.names().is_empty()
        {
            debug!(error = %error, "name index was never populated");
            return Err(QueryError::NotFound(
                "enemy name index is unavailable".to_string(),
            ));
        }
        Ok(read(&*cache))
    }

    fn fetch_enemy(&self, name: &str) -> QueryResult<EnemyReport> {
        let avatar = [enemy_avatar_title(name)];
        let (page, images) = rayon::join(
            || self.api.fetch_page_markup(name),
            || self.api.fetch_image_urls(&avatar),
        );
        let record = record_from_page(EntityKind::Enemy, page?)?;
        Ok(EnemyReport {
            record,
            avatar_url: images?.into_iter().next(),
        })
    }

    /// `Ok(None)` when the page does not exist.
    fn fetch_operator(&self, name: &str, skin: &str) -> QueryResult<Option<OperatorReport>> {
        let portrait = [operator_portrait_title(name, skin)];
        let (page, images) = rayon::join(
            || self.api.fetch_page_markup(name),
            || self.api.fetch_image_urls(&portrait),
        );
        let record = match record_from_page(EntityKind::Operator, page?) {
            Ok(record) => record,
            Err(QueryError::NotFound(_)) => return Ok(None),
            Err(error) => return Err(error),
        };
        Ok(Some(OperatorReport {
            record,
            portrait_url: images?.into_iter().next(),
        }))
    }

    fn map_preview(&self, record: &EntityRecord) -> Option<String> {
        record
            .get("stage_id")
            .filter(|id| !id.is_empty())
            .map(|id| format!("{}/{id}.png", self.map_preview_url))
    }
}

fn record_from_page(kind: EntityKind, page: RawPage) -> QueryResult<EntityRecord> {
    match page.markup {
        Some(markup) => Ok(EntityRecord::from_markup(kind, &page.title, &markup)),
        None => Err(QueryError::NotFound(page.title)),
    }
}
