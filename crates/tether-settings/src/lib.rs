//! # tether-settings
//!
//! Layered configuration for the realtime client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)
//!
//! ```no_run
//! let settings = tether_settings::load_settings().unwrap_or_default();
//! println!("endpoint: {}", settings.connection.ws_url().unwrap());
//! ```

#![deny(unsafe_code)]

pub mod endpoint;
pub mod errors;
pub mod loader;
pub mod types;

pub use endpoint::ws_url;
pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_path_points_into_dot_tether() {
        let path = settings_path();
        assert!(path.ends_with(".tether/settings.json"));
    }

    #[test]
    fn full_round_trip_through_json() {
        let settings = TetherSettings::default();
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["connection"]["path"], "/ws");
        assert_eq!(json["retry"]["maxRetries"], 5);
        assert_eq!(json["features"]["notificationLimit"], 50);
        let back: TetherSettings = serde_json::from_value(json).unwrap();
        assert_eq!(back, settings);
    }
}
