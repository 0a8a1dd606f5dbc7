//! Data models for the library browser

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server item type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ItemKind {
    Movie,
    Series,
    BoxSet,
    Season,
    Episode,
    #[default]
    #[serde(other)]
    Other,
}

impl ItemKind {
    /// Kinds shown as cards in a top-level library grid
    pub fn is_browsable(&self) -> bool {
        matches!(self, ItemKind::Movie | ItemKind::Series | ItemKind::BoxSet)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::Movie => "Movie",
            ItemKind::Series => "Series",
            ItemKind::BoxSet => "BoxSet",
            ItemKind::Season => "Season",
            ItemKind::Episode => "Episode",
            ItemKind::Other => "Item",
        }
    }
}

/// Blur-hash placeholders keyed by image type, then by image tag
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageBlurHashes {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub primary: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub backdrop: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Person {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(rename = "Type", default)]
    pub person_type: Option<String>,
}

impl Person {
    pub fn is_actor(&self) -> bool {
        self.person_type.as_deref() == Some("Actor")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NamedRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserData {
    #[serde(default)]
    pub unplayed_item_count: Option<u32>,
}

/// A media entity as returned by the server. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "Type", default)]
    pub kind: ItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_time_ticks: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_blur_hashes: Option<ImageBlurHashes>,
    /// Flattened primary placeholder, present on compact records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_blur_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub people: Vec<Person>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub studios: Vec<NamedRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taglines: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub official_rating: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_rating: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premiere_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_number: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursive_item_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<UserData>,
    /// Only set on library views ("movies", "tvshows", "boxsets", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_type: Option<String>,
}

impl Item {
    /// Minimal record with only identity fields filled in
    pub fn new(id: &str, name: &str, kind: ItemKind) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            production_year: None,
            run_time_ticks: None,
            image_blur_hashes: None,
            primary_blur_hash: None,
            people: Vec::new(),
            studios: Vec::new(),
            genres: Vec::new(),
            tags: Vec::new(),
            taglines: Vec::new(),
            overview: None,
            official_rating: None,
            community_rating: None,
            premiere_date: None,
            parent_id: None,
            index_number: None,
            child_count: None,
            recursive_item_count: None,
            user_data: None,
            collection_type: None,
        }
    }

    /// First primary blur-hash, falling back to the flattened compact field
    pub fn primary_placeholder(&self) -> Option<&str> {
        match self.image_blur_hashes.as_ref() {
            Some(hashes) if !hashes.primary.is_empty() => {
                hashes.primary.values().next().map(|s| s.as_str())
            }
            _ => self.primary_blur_hash.as_deref(),
        }
    }

    pub fn backdrop_placeholder(&self) -> Option<&str> {
        self.image_blur_hashes
            .as_ref()
            .and_then(|h| h.backdrop.values().next())
            .map(|s| s.as_str())
    }

    /// Display name, with a stand-in for untitled items
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { "(untitled)" } else { &self.name }
    }

    /// "Movie • 1999 • 2h 16m"
    pub fn subtitle(&self) -> String {
        let mut out = self.kind.label().to_string();
        if let Some(year) = self.production_year {
            out.push_str(&format!(" • {}", year));
        }
        if let Some(ticks) = self.run_time_ticks {
            let runtime = format_runtime(ticks);
            if !runtime.is_empty() {
                out.push_str(" • ");
                out.push_str(&runtime);
            }
        }
        out
    }

    /// Badge shown on season posters
    pub fn season_badge_count(&self) -> Option<u32> {
        self.child_count
            .or(self.recursive_item_count)
            .or_else(|| self.user_data.as_ref().and_then(|u| u.unplayed_item_count))
    }
}

/// Reduced list record stored in durable view snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompactItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "Type", default)]
    pub kind: ItemKind,
    #[serde(default)]
    pub production_year: Option<i32>,
    #[serde(default)]
    pub run_time_ticks: Option<i64>,
    #[serde(default)]
    pub primary_blur_hash: Option<String>,
}

impl From<&Item> for CompactItem {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            kind: item.kind,
            production_year: item.production_year,
            run_time_ticks: item.run_time_ticks,
            primary_blur_hash: item.primary_placeholder().map(str::to_string),
        }
    }
}

impl From<CompactItem> for Item {
    fn from(c: CompactItem) -> Self {
        let mut item = Item::new(&c.id, &c.name, c.kind);
        item.production_year = c.production_year;
        item.run_time_ticks = c.run_time_ticks;
        item.primary_blur_hash = c.primary_blur_hash;
        item
    }
}

/// Runtime ticks (100ns) as "1h 42m" or "42m"
pub fn format_runtime(ticks: i64) -> String {
    if ticks <= 0 {
        return String::new();
    }
    let total_secs = ticks / 10_000_000;
    let hours = total_secs / 3600;
    let minutes = ((total_secs % 3600) as f64 / 60.0).round() as i64;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// Truncate to `max` chars, ending with an ellipsis when shortened
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max || max == 0 {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_formatting() {
        assert_eq!(format_runtime(0), "");
        assert_eq!(format_runtime(42 * 60 * 10_000_000), "42m");
        assert_eq!(format_runtime((3600 + 42 * 60) * 10_000_000), "1h 42m");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Short", 16), "Short");
        assert_eq!(truncate("The Lord of the Rings", 8), "The Lor…");
    }

    #[test]
    fn test_item_decodes_server_json() {
        let json = r#"{
            "Id": "abc",
            "Name": "The Matrix",
            "Type": "Movie",
            "ProductionYear": 1999,
            "RunTimeTicks": 81600000000,
            "ImageBlurHashes": { "Primary": { "tag1": "LEHV6nWB2yk8pyo0adR*.7kCMdnj" } },
            "Genres": ["Action"]
        }"#;
        let item: Item = serde_json::from_str(json).unwrap();
        assert_eq!(item.kind, ItemKind::Movie);
        assert_eq!(item.primary_placeholder(), Some("LEHV6nWB2yk8pyo0adR*.7kCMdnj"));
        assert_eq!(item.subtitle(), "Movie • 1999 • 2h 16m");
    }

    #[test]
    fn test_unknown_type_decodes_as_other() {
        let item: Item = serde_json::from_str(r#"{"Id":"f","Type":"Folder"}"#).unwrap();
        assert_eq!(item.kind, ItemKind::Other);
        assert!(!item.kind.is_browsable());
    }

    #[test]
    fn test_missing_id_is_an_error() {
        assert!(serde_json::from_str::<Item>(r#"{"Name":"No id"}"#).is_err());
    }

    #[test]
    fn test_compact_round_trip_keeps_list_fields() {
        let mut item = Item::new("1", "Alien", ItemKind::Movie);
        item.production_year = Some(1979);
        item.overview = Some("In space...".into());
        let compact = CompactItem::from(&item);
        let back = Item::from(compact.clone());
        assert_eq!(back.production_year, Some(1979));
        assert_eq!(back.overview, None);
        assert_eq!(CompactItem::from(&back), compact);
    }

    #[test]
    fn test_season_badge_fallbacks() {
        let mut season = Item::new("s", "Season 1", ItemKind::Season);
        assert_eq!(season.season_badge_count(), None);
        season.user_data = Some(UserData { unplayed_item_count: Some(3) });
        assert_eq!(season.season_badge_count(), Some(3));
        season.child_count = Some(10);
        assert_eq!(season.season_badge_count(), Some(10));
    }
}
