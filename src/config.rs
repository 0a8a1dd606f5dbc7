//! Configuration management

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const APP_DIR: &str = "library_browser";

/// Card grid geometry used to derive columns and row height
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    #[serde(default = "default_min_card_width")]
    pub min_card_width: f32,
    /// Poster height divided by width (2:3 posters)
    #[serde(default = "default_card_aspect")]
    pub card_aspect: f32,
    /// Title/subtitle block under the poster
    #[serde(default = "default_footer_height")]
    pub footer_height: f32,
    #[serde(default = "default_gap")]
    pub gap: f32,
    #[serde(default = "default_overscan_rows")]
    pub overscan_rows: usize,
}

fn default_min_card_width() -> f32 { 160.0 }
fn default_card_aspect() -> f32 { 1.5 }
fn default_footer_height() -> f32 { 56.0 }
fn default_gap() -> f32 { 12.0 }
fn default_overscan_rows() -> usize { 2 }

impl Default for GridGeometry {
    fn default() -> Self {
        Self {
            min_card_width: default_min_card_width(),
            card_aspect: default_card_aspect(),
            footer_height: default_footer_height(),
            gap: default_gap(),
            overscan_rows: default_overscan_rows(),
        }
    }
}

/// Debounce, throttle and proximity tunables (milliseconds / pixels / rows)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    #[serde(default = "default_search_debounce")]
    pub search_debounce_ms: u64,
    #[serde(default = "default_scroll_persist_debounce")]
    pub scroll_persist_debounce_ms: u64,
    #[serde(default = "default_prefetch_min_interval")]
    pub prefetch_min_interval_ms: u64,
    #[serde(default = "default_prefetch_idle_timeout")]
    pub prefetch_idle_timeout_ms: u64,
    #[serde(default = "default_prefetch_fallback_delay")]
    pub prefetch_fallback_delay_ms: u64,
    /// Distance from the content bottom that counts as "near the end"
    #[serde(default = "default_prefetch_scroll_distance")]
    pub prefetch_scroll_distance: f32,
    #[serde(default = "default_prefetch_rows")]
    pub prefetch_rows: usize,
    /// Sentinel fires only this close to the bottom
    #[serde(default = "default_sentinel_margin")]
    pub sentinel_margin: f32,
    #[serde(default = "default_keyboard_near_end")]
    pub keyboard_near_end_items: usize,
    #[serde(default = "default_quick_jump_reset")]
    pub quick_jump_reset_ms: u64,
    #[serde(default = "default_quick_jump_overlay")]
    pub quick_jump_overlay_ms: u64,
    #[serde(default = "default_quick_jump_exec")]
    pub quick_jump_exec_ms: u64,
    #[serde(default = "default_quick_jump_max_len")]
    pub quick_jump_max_len: usize,
}

fn default_search_debounce() -> u64 { 300 }
fn default_scroll_persist_debounce() -> u64 { 200 }
fn default_prefetch_min_interval() -> u64 { 1200 }
fn default_prefetch_idle_timeout() -> u64 { 800 }
fn default_prefetch_fallback_delay() -> u64 { 250 }
fn default_prefetch_scroll_distance() -> f32 { 900.0 }
fn default_prefetch_rows() -> usize { 3 }
fn default_sentinel_margin() -> f32 { 600.0 }
fn default_keyboard_near_end() -> usize { 8 }
fn default_quick_jump_reset() -> u64 { 700 }
fn default_quick_jump_overlay() -> u64 { 650 }
fn default_quick_jump_exec() -> u64 { 90 }
fn default_quick_jump_max_len() -> usize { 32 }

impl Default for Timings {
    fn default() -> Self {
        Self {
            search_debounce_ms: default_search_debounce(),
            scroll_persist_debounce_ms: default_scroll_persist_debounce(),
            prefetch_min_interval_ms: default_prefetch_min_interval(),
            prefetch_idle_timeout_ms: default_prefetch_idle_timeout(),
            prefetch_fallback_delay_ms: default_prefetch_fallback_delay(),
            prefetch_scroll_distance: default_prefetch_scroll_distance(),
            prefetch_rows: default_prefetch_rows(),
            sentinel_margin: default_sentinel_margin(),
            keyboard_near_end_items: default_keyboard_near_end(),
            quick_jump_reset_ms: default_quick_jump_reset(),
            quick_jump_overlay_ms: default_quick_jump_overlay(),
            quick_jump_exec_ms: default_quick_jump_exec(),
            quick_jump_max_len: default_quick_jump_max_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server_url: String,
    /// Static API key; when set the username/password handshake is skipped
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Session token from the last successful handshake
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Soft cap on a compact durable snapshot before falling back to ids
    #[serde(default = "default_snapshot_budget")]
    pub snapshot_budget_chars: usize,
    /// Total characters the durable session store may hold
    #[serde(default = "default_session_quota")]
    pub session_quota_chars: usize,
    #[serde(default = "default_hydrate_batch")]
    pub hydrate_batch_size: usize,
    /// Keep durable view snapshots from the previous run
    #[serde(default)]
    pub restore_across_restarts: bool,
    #[serde(default = "default_true")]
    pub dark_mode: bool,
    #[serde(default)]
    pub grid: GridGeometry,
    #[serde(default)]
    pub timings: Timings,
}

fn default_page_size() -> usize { 20 }
fn default_snapshot_budget() -> usize { 4_000_000 }
fn default_session_quota() -> usize { 10_000_000 }
fn default_hydrate_batch() -> usize { 200 }
fn default_true() -> bool { true }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            api_key: String::new(),
            username: String::new(),
            password: String::new(),
            access_token: String::new(),
            user_id: String::new(),
            device_id: String::new(),
            page_size: default_page_size(),
            snapshot_budget_chars: default_snapshot_budget(),
            session_quota_chars: default_session_quota(),
            hydrate_batch_size: default_hydrate_batch(),
            restore_across_restarts: false,
            dark_mode: true,
            grid: GridGeometry::default(),
            timings: Timings::default(),
        }
    }
}

impl AppConfig {
    fn config_path() -> PathBuf {
        let mut path = app_dir(dirs::config_dir());
        path.push("config.json");
        path
    }

    pub fn load() -> Self {
        let path = Self::config_path();

        if path.exists() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => log::warn!("Ignoring unreadable config {}: {}", path.display(), e),
                }
            }
        }

        Self::default()
    }

    pub fn save(&self) {
        let path = Self::config_path();
        match serde_json::to_string_pretty(self) {
            Ok(content) => {
                if let Err(e) = fs::write(&path, content) {
                    log::warn!("Could not save config to {}: {}", path.display(), e);
                }
            }
            Err(e) => log::warn!("Could not serialize config: {}", e),
        }
    }

    /// Token sent with every request: the API key wins over a session token
    pub fn token(&self) -> &str {
        let key = self.api_key.trim();
        if key.is_empty() { self.access_token.trim() } else { key }
    }

    /// Generate and keep a device id the first time one is needed
    pub fn ensure_device_id(&mut self) -> &str {
        if self.device_id.is_empty() {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            self.device_id = format!("lb-{:x}-{:x}", nanos, std::process::id());
        }
        &self.device_id
    }
}

/// Directory where durable view snapshots live
pub fn session_store_dir() -> PathBuf {
    let mut path = app_dir(dirs::cache_dir());
    path.push("session");
    path
}

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    let mut path = base.unwrap_or_else(|| PathBuf::from("."));
    path.push(APP_DIR);
    fs::create_dir_all(&path).ok();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"server_url":"http://jf:8096","grid":{"gap":8.0}}"#).unwrap();
        assert_eq!(config.server_url, "http://jf:8096");
        assert_eq!(config.page_size, 20);
        assert_eq!(config.grid.gap, 8.0);
        assert_eq!(config.grid.min_card_width, 160.0);
        assert_eq!(config.timings.quick_jump_max_len, 32);
    }

    #[test]
    fn test_api_key_wins_over_session_token() {
        let mut config = AppConfig::default();
        config.access_token = "session".into();
        assert_eq!(config.token(), "session");
        config.api_key = " key ".into();
        assert_eq!(config.token(), "key");
    }

    #[test]
    fn test_device_id_is_stable() {
        let mut config = AppConfig::default();
        let first = config.ensure_device_id().to_string();
        assert!(!first.is_empty());
        assert_eq!(config.ensure_device_id(), first);
    }
}
