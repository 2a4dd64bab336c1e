use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::Settings;
use crate::error::{QueryError, QueryResult};
use crate::recruit::RecruitOperator;

pub const NS_MAIN: i32 = 0;
const IMAGE_BATCH_SIZE: usize = 50;
const RECRUIT_LIMIT: usize = 5000;

/// One fetched revision. `markup: None` means the page does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub title: String,
    pub markup: Option<String>,
}

impl RawPage {
    pub fn missing(title: &str) -> Self {
        Self {
            title: title.to_string(),
            markup: None,
        }
    }
}

/// Read-only view of the wiki. Implementors must be shareable across threads
/// because independent fetches of one query run concurrently.
pub trait WikiReadApi: Sync {
    fn fetch_page_markup(&self, title: &str) -> QueryResult<RawPage>;
    fn fetch_rendered_html(&self, title: &str) -> QueryResult<Option<String>>;
    fn search_titles(&self, query: &str, limit: usize) -> QueryResult<Vec<String>>;
    fn fetch_image_urls(&self, titles: &[String]) -> QueryResult<Vec<String>>;
    fn fetch_recruitable_operators(&self) -> QueryResult<Vec<RecruitOperator>>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            api_url: settings.api_url.clone(),
            user_agent: settings.user_agent.clone(),
            timeout_ms: settings.timeout_ms,
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    base_url: Url,
    user_agent: String,
    request_count: AtomicUsize,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.api_url)
            .with_context(|| format!("invalid wiki API URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            base_url,
            user_agent: config.user_agent,
            request_count: AtomicUsize::new(0),
        })
    }

    /// Single GET against the action API. The body is returned even when it
    /// carries an API `error` object; see [`Self::request_json_get`].
    fn request_payload(&self, context: &str, params: &[(&str, String)]) -> QueryResult<Value> {
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        self.request_count.fetch_add(1, Ordering::Relaxed);
        debug!(context, "calling MediaWiki API");
        let response = self
            .client
            .get(self.base_url.clone())
            .header("User-Agent", self.user_agent.clone())
            .query(&pairs)
            .send()
            .map_err(|error| QueryError::transport(context, error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::transport(
                context,
                format!("MediaWiki API request failed with HTTP {status}"),
            ));
        }

        response.json::<Value>().map_err(|error| {
            QueryError::transport(
                context,
                format!("failed to decode MediaWiki API JSON response: {error}"),
            )
        })
    }

    fn request_json_get(&self, context: &str, params: &[(&str, String)]) -> QueryResult<Value> {
        let payload = self.request_payload(context, params)?;
        if let Some((code, info)) = api_error(&payload) {
            return Err(QueryError::transport(
                context,
                format!("MediaWiki API error [{code}]: {info}"),
            ));
        }
        Ok(payload)
    }
}

impl WikiReadApi for MediaWikiClient {
    fn fetch_page_markup(&self, title: &str) -> QueryResult<RawPage> {
        let params = vec![
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
            ("redirects", "1".to_string()),
        ];
        let context = format!("fetching page {title}");
        let payload = self.request_json_get(&context, &params)?;
        parse_page_markup(title, payload, &context)
    }

    fn fetch_rendered_html(&self, title: &str) -> QueryResult<Option<String>> {
        let params = vec![
            ("action", "parse".to_string()),
            ("page", title.to_string()),
            ("prop", "text".to_string()),
            ("redirects", "1".to_string()),
        ];
        let context = format!("rendering page {title}");
        let payload = self.request_payload(&context, &params)?;
        parse_rendered_html(payload, &context)
    }

    fn search_titles(&self, query: &str, limit: usize) -> QueryResult<Vec<String>> {
        let params = vec![
            ("action", "query".to_string()),
            ("list", "search".to_string()),
            ("srsearch", query.to_string()),
            ("srnamespace", NS_MAIN.to_string()),
            ("srlimit", limit.to_string()),
        ];
        let context = format!("searching for {query}");
        let payload = self.request_json_get(&context, &params)?;
        let parsed: QueryResponse = decode(payload, &context)?;
        Ok(parsed
            .query
            .search
            .into_iter()
            .map(|hit| hit.title)
            .collect())
    }

    fn fetch_image_urls(&self, titles: &[String]) -> QueryResult<Vec<String>> {
        let mut urls = Vec::new();
        for batch in titles.chunks(IMAGE_BATCH_SIZE) {
            let params = vec![
                ("action", "query".to_string()),
                ("titles", batch.join("|")),
                ("prop", "imageinfo".to_string()),
                ("iiprop", "url".to_string()),
            ];
            let context = "fetching image info";
            let payload = self.request_json_get(context, &params)?;
            urls.extend(parse_image_urls(payload, context)?);
        }
        Ok(urls)
    }

    fn fetch_recruitable_operators(&self) -> QueryResult<Vec<RecruitOperator>> {
        let params = vec![
            ("action", "cargoquery".to_string()),
            ("tables", "chara,char_obtain".to_string()),
            ("limit", RECRUIT_LIMIT.to_string()),
            (
                "fields",
                "chara.profession,chara.position,chara.rarity,chara.tag,chara.cn".to_string(),
            ),
            (
                "where",
                "char_obtain.obtainMethod LIKE '%公开招募%'".to_string(),
            ),
            (
                "join_on",
                "chara._pageName=char_obtain._pageName".to_string(),
            ),
        ];
        let context = "querying recruitment pool";
        let payload = self.request_json_get(context, &params)?;
        let parsed: CargoResponse = decode(payload, context)?;
        Ok(parsed.cargoquery.into_iter().map(|row| row.title).collect())
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }
}

fn api_error(payload: &Value) -> Option<(&str, &str)> {
    let error = payload.get("error")?;
    let code = error
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    let info = error
        .get("info")
        .and_then(Value::as_str)
        .unwrap_or("unknown info");
    Some((code, info))
}

fn decode<T: DeserializeOwned>(payload: Value, context: &str) -> QueryResult<T> {
    serde_json::from_value(payload).map_err(|error| {
        QueryError::transport(context, format!("unexpected API response shape: {error}"))
    })
}

fn parse_page_markup(requested: &str, payload: Value, context: &str) -> QueryResult<RawPage> {
    let parsed: QueryResponse = decode(payload, context)?;
    let Some(page) = parsed.query.pages.into_iter().next() else {
        return Ok(RawPage::missing(requested));
    };
    if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
        return Ok(RawPage::missing(&page.title));
    }
    let markup = page
        .revisions
        .into_iter()
        .next()
        .and_then(|revision| revision.slots)
        .and_then(|slots| slots.main)
        .map(|slot| slot.content);
    Ok(RawPage {
        title: page.title,
        markup,
    })
}

fn parse_rendered_html(payload: Value, context: &str) -> QueryResult<Option<String>> {
    if let Some((code, info)) = api_error(&payload) {
        if code == "missingtitle" {
            return Ok(None);
        }
        return Err(QueryError::transport(
            context,
            format!("MediaWiki API error [{code}]: {info}"),
        ));
    }
    let parsed: ParseResponse = decode(payload, context)?;
    Ok(Some(parsed.parse.text))
}

fn parse_image_urls(payload: Value, context: &str) -> QueryResult<Vec<String>> {
    let parsed: QueryResponse = decode(payload, context)?;
    Ok(parsed
        .query
        .pages
        .into_iter()
        .filter_map(|page| page.imageinfo.into_iter().next().map(|info| info.url))
        .collect())
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
    #[serde(default)]
    search: Vec<SearchQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
    #[serde(default)]
    imageinfo: Vec<ImageInfoItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize)]
struct SearchQueryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ImageInfoItem {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    parse: ParsePayload,
}

#[derive(Debug, Deserialize)]
struct ParsePayload {
    text: String,
}

#[derive(Debug, Deserialize)]
struct CargoResponse {
    #[serde(default)]
    cargoquery: Vec<CargoRow>,
}

#[derive(Debug, Deserialize)]
struct CargoRow {
    title: RecruitOperator,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        CargoResponse, MediaWikiClient, MediaWikiClientConfig, WikiReadApi, decode,
        parse_image_urls, parse_page_markup, parse_rendered_html,
    };
    use crate::error::QueryError;

    #[test]
    fn page_markup_follows_redirected_title() {
        let payload = json!({
            "query": {
                "redirects": [{"from": "虫子", "to": "源石虫"}],
                "pages": [{
                    "pageid": 12,
                    "ns": 0,
                    "title": "源石虫",
                    "revisions": [{"slots": {"main": {"content": "{{敌人信息|名称=源石虫}}"}}}]
                }]
            }
        });
        let page = parse_page_markup("虫子", payload, "test").expect("parse");
        assert_eq!(page.title, "源石虫");
        assert_eq!(page.markup.as_deref(), Some("{{敌人信息|名称=源石虫}}"));
    }

    #[test]
    fn missing_page_has_no_markup() {
        let payload = json!({
            "query": {"pages": [{"ns": 0, "title": "不存在", "missing": true}]}
        });
        let page = parse_page_markup("不存在", payload, "test").expect("parse");
        assert_eq!(page.title, "不存在");
        assert!(page.markup.is_none());

        let empty = parse_page_markup("空", json!({"batchcomplete": true}), "test")
            .expect("parse");
        assert_eq!(empty.title, "空");
        assert!(empty.markup.is_none());
    }

    #[test]
    fn rendered_html_maps_missingtitle_to_none_and_other_errors_to_transport() {
        let html = parse_rendered_html(
            json!({"parse": {"title": "1-7", "text": "<table></table>"}}),
            "test",
        )
        .expect("html");
        assert_eq!(html.as_deref(), Some("<table></table>"));

        let missing = parse_rendered_html(
            json!({"error": {"code": "missingtitle", "info": "The page doesn't exist."}}),
            "test",
        )
        .expect("missing");
        assert!(missing.is_none());

        let error = parse_rendered_html(
            json!({"error": {"code": "ratelimited", "info": "slow down"}}),
            "test",
        )
        .expect_err("must fail");
        assert!(matches!(error, QueryError::Transport { .. }));
    }

    #[test]
    fn image_urls_skip_files_without_info() {
        let payload = json!({
            "query": {"pages": [
                {"title": "文件:头像 敌人 源石虫.png", "imageinfo": [{"url": "https://media.prts.wiki/a.png"}]},
                {"title": "文件:头像 敌人 无.png", "missing": true}
            ]}
        });
        let urls = parse_image_urls(payload, "test").expect("urls");
        assert_eq!(urls, vec!["https://media.prts.wiki/a.png"]);
    }

    #[test]
    fn cargo_rows_unwrap_title_objects() {
        let payload = json!({
            "cargoquery": [
                {"title": {"profession": "医疗", "position": "远程位", "rarity": "2", "tag": "治疗", "cn": "安赛尔"}}
            ]
        });
        let parsed: CargoResponse = decode(payload, "test").expect("decode");
        assert_eq!(parsed.cargoquery[0].title.name, "安赛尔");
    }

    #[test]
    fn client_rejects_invalid_api_url_without_requests() {
        let error = MediaWikiClient::new(MediaWikiClientConfig {
            api_url: "not a url".to_string(),
            user_agent: "test".to_string(),
            timeout_ms: 10,
        });
        assert!(error.is_err());

        let client = MediaWikiClient::new(MediaWikiClientConfig {
            api_url: "https://prts.wiki/api.php".to_string(),
            user_agent: "test".to_string(),
            timeout_ms: 10,
        })
        .expect("client");
        assert_eq!(client.request_count(), 0);
    }
}
