//! Hash-style routes and navigation history
//!
//! Routes round-trip through the same strings the web client used
//! (`#/view/<id>`, `#/item/<id>?seriesId=..`) so they can be logged, typed
//! into the address field and kept in history.

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Route {
    #[default]
    Home,
    View { view_id: String },
    Item {
        item_id: String,
        series_id: Option<String>,
        season_id: Option<String>,
        box_set_id: Option<String>,
    },
}

impl Route {
    pub fn view(view_id: &str) -> Self {
        Route::View { view_id: view_id.to_string() }
    }

    pub fn item(item_id: &str) -> Self {
        Route::Item { item_id: item_id.to_string(), series_id: None, season_id: None, box_set_id: None }
    }

    /// Season page, which needs the series to list episodes
    pub fn season(season_id: &str, series_id: &str) -> Self {
        Route::Item {
            item_id: season_id.to_string(),
            series_id: Some(series_id.to_string()),
            season_id: None,
            box_set_id: None,
        }
    }

    pub fn view_id(&self) -> Option<&str> {
        match self {
            Route::View { view_id } => Some(view_id.as_str()),
            _ => None,
        }
    }

    pub fn item_id(&self) -> Option<&str> {
        match self {
            Route::Item { item_id, .. } => Some(item_id.as_str()),
            _ => None,
        }
    }

    pub fn is_item(&self) -> bool {
        matches!(self, Route::Item { .. })
    }

    pub fn parse(hash: &str) -> Self {
        let h = hash.trim().trim_start_matches('#');
        let (path, query) = match h.split_once('?') {
            Some((p, q)) => (p, q),
            None => (h, ""),
        };
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();

        match parts.as_slice() {
            ["view", id, ..] => Route::View { view_id: decode(id) },
            ["item", id, ..] => {
                let param = |name: &str| {
                    query
                        .split('&')
                        .filter_map(|pair| pair.split_once('='))
                        .find(|(k, _)| *k == name)
                        .map(|(_, v)| decode(v))
                        .filter(|v| !v.is_empty())
                };
                Route::Item {
                    item_id: decode(id),
                    series_id: param("seriesId"),
                    season_id: param("seasonId"),
                    box_set_id: param("boxSetId"),
                }
            }
            _ => Route::Home,
        }
    }

    pub fn to_hash(&self) -> String {
        match self {
            Route::Home => "#/".to_string(),
            Route::View { view_id } => format!("#/view/{}", encode(view_id)),
            Route::Item { item_id, series_id, season_id, box_set_id } => {
                let params: Vec<String> = [("seriesId", series_id), ("seasonId", season_id), ("boxSetId", box_set_id)]
                    .iter()
                    .filter_map(|(k, v)| v.as_ref().map(|v| format!("{}={}", k, encode(v))))
                    .collect();
                if params.is_empty() {
                    format!("#/item/{}", encode(item_id))
                } else {
                    format!("#/item/{}?{}", encode(item_id), params.join("&"))
                }
            }
        }
    }
}

fn encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(b) = s.get(i + 1..i + 3).and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(if bytes[i] == b'+' { b' ' } else { bytes[i] });
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// What changed when the route changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: Route,
    pub to: Route,
    /// View whose state should be saved before leaving it
    pub leaving_view: Option<String>,
}

fn transition(from: Route, to: Route) -> Transition {
    let leaving_view = match (&from, &to) {
        (Route::View { view_id: a }, Route::View { view_id: b }) if a == b => None,
        (Route::View { view_id }, _) => Some(view_id.clone()),
        _ => None,
    };
    Transition { from, to, leaving_view }
}

#[derive(Debug, Default)]
pub struct History {
    back: Vec<Route>,
    current: Route,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &Route {
        &self.current
    }

    pub fn can_go_back(&self) -> bool {
        !self.back.is_empty()
    }

    pub fn push(&mut self, to: Route) -> Transition {
        let from = std::mem::replace(&mut self.current, to.clone());
        if from != to {
            self.back.push(from.clone());
        }
        transition(from, to)
    }

    /// Swap the current entry without adding history (first view on startup)
    pub fn replace(&mut self, to: Route) -> Transition {
        let from = std::mem::replace(&mut self.current, to.clone());
        transition(from, to)
    }

    pub fn back(&mut self) -> Option<Transition> {
        let to = self.back.pop()?;
        let from = std::mem::replace(&mut self.current, to.clone());
        Some(transition(from, to))
    }

    pub fn breadcrumbs(&self) -> Vec<Route> {
        let mut trail: Vec<Route> = self.back.iter().rev().take_while(|r| r.is_item()).cloned().collect();
        trail.reverse();
        trail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_routes() {
        assert_eq!(Route::parse(""), Route::Home);
        assert_eq!(Route::parse("#/"), Route::Home);
        assert_eq!(Route::parse("#/view/abc"), Route::view("abc"));
        assert_eq!(
            Route::parse("#/item/s1?seriesId=ser%201&x=y"),
            Route::Item {
                item_id: "s1".into(),
                series_id: Some("ser 1".into()),
                season_id: None,
                box_set_id: None
            }
        );
        assert_eq!(Route::parse("#/unknown/1"), Route::Home);
    }

    #[test]
    fn test_hash_round_trip() {
        let routes = [
            Route::Home,
            Route::view("f137a2dd21bbc1b99aa5c0f6bf02a805"),
            Route::season("s1", "ser:1"),
            Route::Item {
                item_id: "m".into(),
                series_id: None,
                season_id: None,
                box_set_id: Some("b".into()),
            },
        ];
        for r in routes {
            assert_eq!(Route::parse(&r.to_hash()), r);
        }
        assert_eq!(Route::season("s1", "x").to_hash(), "#/item/s1?seriesId=x");
    }

    #[test]
    fn test_leaving_a_view_requests_save() {
        let mut h = History::new();
        h.replace(Route::view("a"));
        let t = h.push(Route::item("m1"));
        assert_eq!(t.leaving_view.as_deref(), Some("a"));

        let t = h.push(Route::item("m2"));
        assert_eq!(t.leaving_view, None);

        let t = h.back().unwrap();
        assert_eq!(t.to, Route::item("m1"));
        let t = h.back().unwrap();
        assert_eq!(t.to, Route::view("a"));
        assert!(h.back().is_none());
    }

    #[test]
    fn test_same_view_is_not_a_departure() {
        let mut h = History::new();
        h.replace(Route::view("a"));
        assert_eq!(h.push(Route::view("a")).leaving_view, None);
        assert!(!h.can_go_back());
        assert_eq!(h.push(Route::view("b")).leaving_view.as_deref(), Some("a"));
    }

    #[test]
    fn test_breadcrumbs_follow_item_chain() {
        let mut h = History::new();
        h.replace(Route::view("a"));
        h.push(Route::item("series"));
        h.push(Route::season("s1", "series"));
        h.push(Route::item("ep1"));
        assert_eq!(h.breadcrumbs(), vec![Route::item("series"), Route::season("s1", "series")]);
    }
}
