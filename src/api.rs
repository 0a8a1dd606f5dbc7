//! Media server API client
//!
//! `ItemSource` is the contract the paging engine consumes. `JellyfinClient`
//! implements it over HTTP; `CachingSource` memoizes the by-id lookups.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::models::Item;

/// Fields requested for library pages
const PAGE_FIELDS: &str = "PrimaryImageAspectRatio,Overview,Genres,CommunityRating,CriticRating,\
OfficialRating,PremiereDate,ProductionYear,RunTimeTicks,People,Studios,Taglines,Tags,ProviderIds,ImageBlurHashes";
/// Fields requested when re-hydrating list records by id
const LIST_FIELDS: &str = "PrimaryImageAspectRatio,ProductionYear,RunTimeTicks,ImageBlurHashes";
const DETAIL_FIELDS: &str = "PrimaryImageAspectRatio,Overview,Genres,CommunityRating,CriticRating,\
OfficialRating,PremiereDate,ProductionYear,RunTimeTicks,People,Studios,Taglines,Tags,ProviderIds,\
RemoteTrailers,LocalTrailerCount,ImageBlurHashes,ImageTags,BackdropImageTags";
const SEASON_FIELDS: &str = "PrimaryImageAspectRatio,ImageBlurHashes,ChildCount,RecursiveItemCount";
const EPISODE_FIELDS: &str = "PrimaryImageAspectRatio,RunTimeTicks,ImageBlurHashes";
const SORT_BY: &str = "SortName,ProductionYear";
const CHILD_LIMIT: &str = "2000";
const POSTER_QUALITY: &str = "90";
const MAX_IMAGE_BYTES: u64 = 8 * 1024 * 1024;

/// One page request against a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub collection_id: String,
    pub start_index: usize,
    pub limit: usize,
    pub search_term: String,
}

/// One page of results plus the server's total for the query
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    pub total: usize,
}

/// Remote source of library items
pub trait ItemSource: Send + Sync {
    fn fetch_page(&self, query: &PageQuery) -> Result<Page, ApiError>;

    fn fetch_items_by_ids(&self, ids: &[String]) -> Result<Vec<Item>, ApiError>;

    fn fetch_item_detail(&self, id: &str) -> Result<Item, ApiError>;

    /// Top-level libraries for the current user
    fn fetch_views(&self) -> Result<Vec<Item>, ApiError>;

    fn fetch_series_seasons(&self, series_id: &str) -> Result<Vec<Item>, ApiError>;

    fn fetch_season_episodes(&self, series_id: &str, season_id: &str) -> Result<Vec<Item>, ApiError>;

    fn fetch_box_set_children(&self, box_set_id: &str) -> Result<Vec<Item>, ApiError>;

    /// Encoded primary image bytes for a card
    fn fetch_primary_image(&self, id: &str, _max_height: u32) -> Result<Vec<u8>, ApiError> {
        Err(ApiError::NotConfigured(format!("no image endpoint for {}", id)))
    }

    /// Drop anything memoized; used by a manual refresh
    fn invalidate(&self) {}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsEnvelope {
    #[serde(default)]
    items: Option<Vec<Value>>,
    #[serde(default)]
    total_record_count: Option<u64>,
}

/// Decode items, rejecting any record that has no identifier
fn decode_items(raw: Vec<Value>) -> Result<Vec<Item>, ApiError> {
    raw.into_iter()
        .enumerate()
        .map(|(i, v)| {
            if v.get("Id").and_then(|id| id.as_str()).is_none() {
                return Err(ApiError::Malformed(format!("item {} has no Id", i)));
            }
            Ok(serde_json::from_value(v)?)
        })
        .collect()
}

/// Parse a paged `/Items` response; both `Items` and `TotalRecordCount` are required
pub fn parse_page(body: &str) -> Result<Page, ApiError> {
    let env: ItemsEnvelope = serde_json::from_str(body)?;
    let raw = env
        .items
        .ok_or_else(|| ApiError::Malformed("response has no Items".to_string()))?;
    let total = env
        .total_record_count
        .ok_or_else(|| ApiError::Malformed("response has no TotalRecordCount".to_string()))?;
    Ok(Page { items: decode_items(raw)?, total: total as usize })
}

/// Parse an `Items` list where no total is needed
pub fn parse_item_list(body: &str) -> Result<Vec<Item>, ApiError> {
    let env: ItemsEnvelope = serde_json::from_str(body)?;
    let raw = env
        .items
        .ok_or_else(|| ApiError::Malformed("response has no Items".to_string()))?;
    decode_items(raw)
}

/// Token and user resolved by the login handshake
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub access_token: String,
    pub user_id: String,
}

pub struct JellyfinClient {
    base_url: String,
    token: String,
    user_id: String,
    device_id: String,
    client_name: String,
    client_version: String,
    agent: ureq::Agent,
    /// Collection type per view id, filled by `fetch_views`
    view_types: Mutex<HashMap<String, String>>,
}

impl JellyfinClient {
    pub fn new(base_url: &str, token: &str, user_id: &str, device_id: &str) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .timeout_connect(Some(Duration::from_secs(10)))
            .http_status_as_error(false)
            .max_idle_connections(4)
            .max_idle_connections_per_host(4)
            .build()
            .new_agent();

        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            user_id: user_id.trim().to_string(),
            device_id: device_id.to_string(),
            client_name: "LibraryBrowser".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            agent,
            view_types: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = user_id.to_string();
        self
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = token.to_string();
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn authorization(&self) -> String {
        let mut value = format!(
            "MediaBrowser Client=\"{}\", Device=\"Desktop\", DeviceId=\"{}\", Version=\"{}\"",
            self.client_name, self.device_id, self.client_version
        );
        if !self.token.is_empty() {
            value.push_str(&format!(", Token=\"{}\"", self.token));
        }
        value
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<String, ApiError> {
        let url = self.url(path);
        let auth = self.authorization();
        let mut request = self
            .agent
            .get(&url)
            .header("Accept", "application/json")
            .header("X-Emby-Authorization", &auth)
            .header("Authorization", &auth);
        if !self.token.is_empty() {
            request = request.header("X-Emby-Token", &self.token);
        }
        for (k, v) in query {
            request = request.query(*k, *v);
        }

        log::debug!("GET {} {:?}", url, query);
        let mut response = request.call()?;
        let status = response.status();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(ApiError::Status { code: status.as_u16(), url, body });
        }
        Ok(body)
    }

    /// Encoded primary image of an item, scaled server-side to `max_height`
    pub fn fetch_primary_image(&self, id: &str, max_height: u32) -> Result<Vec<u8>, ApiError> {
        let url = self.url(&format!("/Items/{}/Images/Primary", id));
        let height = max_height.to_string();
        let mut request = self
            .agent
            .get(&url)
            .header("Accept", "image/*")
            .query("maxHeight", &height)
            .query("quality", POSTER_QUALITY);
        if !self.token.is_empty() {
            request = request.header("X-Emby-Token", &self.token);
        }

        log::debug!("GET {} (image)", url);
        let mut response = request.call()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status { code: status.as_u16(), url, body: String::new() });
        }
        response
            .body_mut()
            .with_config()
            .limit(MAX_IMAGE_BYTES)
            .read_to_vec()
            .map_err(|e| ApiError::Transport(e.to_string()))
    }

    fn user_path(&self, suffix: &str) -> Result<String, ApiError> {
        if self.user_id.is_empty() {
            return Err(ApiError::NotConfigured("no user id resolved".to_string()));
        }
        Ok(format!("/Users/{}{}", self.user_id, suffix))
    }

    /// Username/password handshake; returns the session token and user id
    pub fn authenticate_by_name(&self, username: &str, password: &str) -> Result<AuthSession, ApiError> {
        if username.is_empty() {
            return Err(ApiError::NotConfigured("no API key or username configured".to_string()));
        }
        let url = self.url("/Users/AuthenticateByName");
        let auth = self.authorization();
        let body = login_body(username, password)?;
        let mut response = self
            .agent
            .post(&url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("X-Emby-Authorization", &auth)
            .header("Authorization", &auth)
            .send(body)?;
        let status = response.status();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(ApiError::Status { code: status.as_u16(), url, body: text });
        }

        let data: Value = serde_json::from_str(&text)?;
        let token = data.get("AccessToken").and_then(|v| v.as_str());
        let user_id = data.pointer("/User/Id").and_then(|v| v.as_str());
        match (token, user_id) {
            (Some(t), Some(u)) => Ok(AuthSession { access_token: t.to_string(), user_id: u.to_string() }),
            _ => Err(ApiError::Malformed("login response missing token or user id".to_string())),
        }
    }

    /// Find the user to browse as: `/Users/Me`, else the first enabled user
    pub fn resolve_user_id(&self) -> Result<String, ApiError> {
        if let Ok(body) = self.get("/Users/Me", &[]) {
            if let Ok(me) = serde_json::from_str::<Value>(&body) {
                if let Some(id) = me.get("Id").and_then(|v| v.as_str()) {
                    return Ok(id.to_string());
                }
            }
        }

        let users: Vec<Value> = serde_json::from_str(&self.get("/Users", &[])?)?;
        let picked = users
            .iter()
            .find(|u| u.pointer("/Policy/IsDisabled").and_then(|v| v.as_bool()) == Some(false))
            .or_else(|| users.first());
        picked
            .and_then(|u| u.get("Id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ApiError::Malformed("user list did not contain an Id".to_string()))
    }

    fn is_box_set_view(&self, view_id: &str) -> bool {
        self.view_types
            .lock()
            .map(|types| types.get(view_id).map(|t| t.eq_ignore_ascii_case("boxsets")).unwrap_or(false))
            .unwrap_or(false)
    }

    fn page_request(&self, query: &PageQuery, parent: Option<&str>, include: &str) -> Result<Page, ApiError> {
        let start = query.start_index.to_string();
        let limit = query.limit.to_string();
        let term = query.search_term.trim();
        let mut params: Vec<(&str, &str)> = vec![
            ("Recursive", "true"),
            ("IncludeItemTypes", include),
            ("Fields", PAGE_FIELDS),
            ("SortBy", SORT_BY),
            ("SortOrder", "Ascending"),
            ("StartIndex", &start),
            ("Limit", &limit),
            ("EnableTotalRecordCount", "true"),
        ];
        if let Some(parent) = parent {
            params.push(("ParentId", parent));
        }
        if !term.is_empty() {
            params.push(("SearchTerm", term));
        }
        let body = self.get(&self.user_path("/Items")?, &params)?;
        parse_page(&body)
    }
}

/// JSON body of the username/password handshake
pub fn login_body(username: &str, password: &str) -> Result<String, ApiError> {
    Ok(serde_json::to_string(&serde_json::json!({ "Username": username, "Pw": password }))?)
}

impl ItemSource for JellyfinClient {
    fn fetch_page(&self, query: &PageQuery) -> Result<Page, ApiError> {
        let box_sets = self.is_box_set_view(&query.collection_id);
        let include = if box_sets { "BoxSet" } else { "Movie,Series,BoxSet" };
        let page = self.page_request(query, Some(query.collection_id.as_str()), include)?;

        // Some servers file box sets outside the collections view itself
        if box_sets && query.start_index == 0 && page.items.is_empty() {
            log::debug!("Box set view {} empty, querying box sets without parent", query.collection_id);
            return self.page_request(query, None, "BoxSet");
        }
        Ok(page)
    }

    fn fetch_items_by_ids(&self, ids: &[String]) -> Result<Vec<Item>, ApiError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.join(",");
        let body = self.get(&self.user_path("/Items")?, &[("Ids", joined.as_str()), ("Fields", LIST_FIELDS)])?;
        parse_item_list(&body)
    }

    fn fetch_item_detail(&self, id: &str) -> Result<Item, ApiError> {
        let body = self.get(&self.user_path(&format!("/Items/{}", id))?, &[("Fields", DETAIL_FIELDS)])?;
        let value: Value = serde_json::from_str(&body)?;
        if value.get("Id").and_then(|v| v.as_str()).is_none() {
            return Err(ApiError::Malformed(format!("item {} response has no Id", id)));
        }
        Ok(serde_json::from_value(value)?)
    }

    fn fetch_views(&self) -> Result<Vec<Item>, ApiError> {
        let body = self.get(&self.user_path("/Views")?, &[])?;
        let views = parse_item_list(&body)?;
        if let Ok(mut types) = self.view_types.lock() {
            for v in &views {
                if let Some(ct) = &v.collection_type {
                    types.insert(v.id.clone(), ct.clone());
                }
            }
        }
        Ok(views)
    }

    fn fetch_series_seasons(&self, series_id: &str) -> Result<Vec<Item>, ApiError> {
        let body = self.get(
            &format!("/Shows/{}/Seasons", series_id),
            &[("UserId", self.user_id.as_str()), ("Fields", SEASON_FIELDS)],
        )?;
        parse_item_list(&body)
    }

    fn fetch_season_episodes(&self, series_id: &str, season_id: &str) -> Result<Vec<Item>, ApiError> {
        let body = self.get(
            &format!("/Shows/{}/Episodes", series_id),
            &[
                ("UserId", self.user_id.as_str()),
                ("SeasonId", season_id),
                ("Fields", EPISODE_FIELDS),
                ("Limit", CHILD_LIMIT),
            ],
        )?;
        parse_item_list(&body)
    }

    fn fetch_box_set_children(&self, box_set_id: &str) -> Result<Vec<Item>, ApiError> {
        let body = self.get(
            &self.user_path("/Items")?,
            &[
                ("ParentId", box_set_id),
                ("Recursive", "true"),
                ("Fields", LIST_FIELDS),
                ("SortBy", SORT_BY),
                ("SortOrder", "Ascending"),
                ("Limit", CHILD_LIMIT),
            ],
        )?;
        let mut children = parse_item_list(&body)?;
        // Movies first, everything else after, each group in server order
        children.sort_by_key(|c| c.kind != crate::models::ItemKind::Movie);
        Ok(children)
    }
    fn fetch_primary_image(&self, id: &str, max_height: u32) -> Result<Vec<u8>, ApiError> {
        JellyfinClient::fetch_primary_image(self, id, max_height)
    }
}

/// Memoizes detail, view and child lookups by key. Pages are never cached.
pub struct CachingSource<S> {
    inner: S,
    details: Mutex<HashMap<String, Item>>,
    lists: Mutex<HashMap<String, Vec<Item>>>,
}

impl<S: ItemSource> CachingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            details: Mutex::new(HashMap::new()),
            lists: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn clear(&self) {
        if let Ok(mut d) = self.details.lock() {
            d.clear();
        }
        if let Ok(mut l) = self.lists.lock() {
            l.clear();
        }
    }

    fn cached_list<F>(&self, key: String, fetch: F) -> Result<Vec<Item>, ApiError>
    where
        F: FnOnce() -> Result<Vec<Item>, ApiError>,
    {
        if let Some(hit) = self.lists.lock().ok().and_then(|l| l.get(&key).cloned()) {
            return Ok(hit);
        }
        let items = fetch()?;
        if let Ok(mut l) = self.lists.lock() {
            l.insert(key, items.clone());
        }
        Ok(items)
    }
}

impl<S: ItemSource> ItemSource for CachingSource<S> {
    fn fetch_page(&self, query: &PageQuery) -> Result<Page, ApiError> {
        self.inner.fetch_page(query)
    }

    fn fetch_items_by_ids(&self, ids: &[String]) -> Result<Vec<Item>, ApiError> {
        self.inner.fetch_items_by_ids(ids)
    }

    fn fetch_item_detail(&self, id: &str) -> Result<Item, ApiError> {
        if let Some(hit) = self.details.lock().ok().and_then(|d| d.get(id).cloned()) {
            return Ok(hit);
        }
        let item = self.inner.fetch_item_detail(id)?;
        if let Ok(mut d) = self.details.lock() {
            d.insert(id.to_string(), item.clone());
        }
        Ok(item)
    }

    fn fetch_views(&self) -> Result<Vec<Item>, ApiError> {
        self.cached_list("views".to_string(), || self.inner.fetch_views())
    }

    fn fetch_series_seasons(&self, series_id: &str) -> Result<Vec<Item>, ApiError> {
        self.cached_list(format!("series:{}:seasons", series_id), || {
            self.inner.fetch_series_seasons(series_id)
        })
    }

    fn fetch_season_episodes(&self, series_id: &str, season_id: &str) -> Result<Vec<Item>, ApiError> {
        self.cached_list(format!("season:{}:episodes", season_id), || {
            self.inner.fetch_season_episodes(series_id, season_id)
        })
    }

    fn fetch_box_set_children(&self, box_set_id: &str) -> Result<Vec<Item>, ApiError> {
        self.cached_list(format!("boxset:{}:children", box_set_id), || {
            self.inner.fetch_box_set_children(box_set_id)
        })
    }

    fn fetch_primary_image(&self, id: &str, max_height: u32) -> Result<Vec<u8>, ApiError> {
        self.inner.fetch_primary_image(id, max_height)
    }

    fn invalidate(&self) {
        self.clear();
        self.inner.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemKind;
    use crate::testing::FakeSource;

    #[test]
    fn test_parse_page() {
        let body = r#"{"Items":[{"Id":"1","Name":"Alien","Type":"Movie"}],"TotalRecordCount":41}"#;
        let page = parse_page(body).unwrap();
        assert_eq!(page.total, 41);
        assert_eq!(page.items[0].kind, ItemKind::Movie);
    }

    #[test]
    fn test_parse_page_requires_total() {
        let body = r#"{"Items":[]}"#;
        assert!(matches!(parse_page(body), Err(ApiError::Malformed(_))));
    }

    #[test]
    fn test_parse_page_requires_items() {
        let body = r#"{"TotalRecordCount":3}"#;
        assert!(matches!(parse_page(body), Err(ApiError::Malformed(_))));
    }

    #[test]
    fn test_item_without_id_rejects_whole_page() {
        let body = r#"{"Items":[{"Id":"1","Name":"A"},{"Name":"B"}],"TotalRecordCount":2}"#;
        match parse_page(body) {
            Err(ApiError::Malformed(msg)) => assert!(msg.contains("item 1")),
            other => panic!("expected malformed error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json_is_decode_error() {
        assert!(matches!(parse_page("<html>"), Err(ApiError::Decode(_))));
    }

    #[test]
    fn test_authorization_header_carries_token() {
        let client = JellyfinClient::new("http://jf:8096/", "tok", "u1", "dev");
        let auth = client.authorization();
        assert!(auth.starts_with("MediaBrowser Client=\"LibraryBrowser\""));
        assert!(auth.contains("DeviceId=\"dev\""));
        assert!(auth.ends_with("Token=\"tok\""));
        assert_eq!(client.url("/Users"), "http://jf:8096/Users");
    }

    #[test]
    fn test_login_body_is_json_with_escaped_credentials() {
        let body = login_body("ana", "p\"w").unwrap();
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["Username"], "ana");
        assert_eq!(value["Pw"], "p\"w");
    }

    #[test]
    fn test_missing_user_id_is_not_configured() {
        let client = JellyfinClient::new("http://jf", "", "", "dev");
        assert!(matches!(client.user_path("/Items"), Err(ApiError::NotConfigured(_))));
    }

    #[test]
    fn test_caching_source_memoizes_details_and_lists() {
        let fake = FakeSource::with_items(5);
        let cached = CachingSource::new(fake);
        let a = cached.fetch_item_detail("item-2").unwrap();
        let b = cached.fetch_item_detail("item-2").unwrap();
        assert_eq!(a, b);
        cached.fetch_views().unwrap();
        cached.fetch_views().unwrap();
        assert_eq!(cached.inner().detail_calls(), 1);
        assert_eq!(cached.inner().view_calls(), 1);

        cached.clear();
        cached.fetch_item_detail("item-2").unwrap();
        assert_eq!(cached.inner().detail_calls(), 2);
    }
}
