//! Browser fingerprint profile
//!
//! A flat record the host objects (`navigator`, `screen`, `location`, the
//! root window) derive their values from. Generate a realistic one with
//! [`Profile::random`] or load a fixed one from JSON.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Chrome versions (recent, realistic)
const CHROME_VERSIONS: &[&str] = &[
    "120.0.0.0",
    "121.0.0.0",
    "122.0.0.0",
    "123.0.0.0",
    "124.0.0.0",
    "125.0.0.0",
    "126.0.0.0",
    "127.0.0.0",
    "128.0.0.0",
    "129.0.0.0",
    "130.0.0.0",
    "131.0.0.0",
];

/// macOS versions
const MACOS_VERSIONS: &[&str] = &[
    "10_15_7", "11_6_0", "12_6_0", "13_4_0", "14_2_0", "14_4_0",
];

/// Screen resolutions
const SCREEN_RESOLUTIONS: &[(u32, u32)] = &[
    (1920, 1080),
    (2560, 1440),
    (1440, 900),
    (1680, 1050),
    (2560, 1600),
    (3024, 1964), // MacBook Pro 14"
];

/// Browser chrome eats this much of the screen height
const CHROME_UI_HEIGHT: u32 = 137;

const TIMEZONES: &[&str] = &[
    "America/Los_Angeles",
    "America/New_York",
    "America/Chicago",
    "Europe/London",
    "Europe/Berlin",
];

fn pick<'a, T, R: Rng>(rng: &mut R, items: &'a [T]) -> &'a T {
    &items[rng.gen_range(0..items.len())]
}

/// Generate a random realistic user agent
pub fn random_user_agent() -> String {
    let mut rng = rand::thread_rng();
    let chrome_version = pick(&mut rng, CHROME_VERSIONS);

    // 70% Windows, 30% Mac
    if rng.gen_bool(0.7) {
        format!(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36",
            chrome_version
        )
    } else {
        format!(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X {}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36",
            pick(&mut rng, MACOS_VERSIONS),
            chrome_version
        )
    }
}

/// Fingerprint values for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    /// Primary language, e.g. `en-US`
    pub locale: String,
    pub languages: Vec<String>,
    pub hardware_concurrency: u32,
    /// In GiB, as `navigator.deviceMemory` reports it
    pub device_memory: u32,
    pub timezone: String,
    /// Page URL the document claims to be loaded from
    pub url: String,
    /// Public URL of the hosted script; stack frames are rewritten to it
    pub script_url: String,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
            viewport_width: 1920,
            viewport_height: 947,
            screen_width: 1920,
            screen_height: 1080,
            locale: "en-US".to_string(),
            languages: vec!["en-US".to_string(), "en".to_string()],
            hardware_concurrency: 8,
            device_memory: 8,
            timezone: "America/New_York".to_string(),
            url: "https://www.example.com/".to_string(),
            script_url: "https://www.example.com/static/app.js".to_string(),
        }
    }
}

impl Profile {
    /// Generate a random consistent profile. URLs keep their defaults.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();

        let (screen_width, screen_height) = *pick(&mut rng, SCREEN_RESOLUTIONS);
        let hardware_concurrency = *pick(&mut rng, &[4, 8, 10, 12, 16]);
        let device_memory = *pick(&mut rng, &[4, 8]);

        Self {
            user_agent: random_user_agent(),
            viewport_width: screen_width,
            viewport_height: screen_height.saturating_sub(CHROME_UI_HEIGHT),
            screen_width,
            screen_height,
            hardware_concurrency,
            device_memory,
            timezone: pick(&mut rng, TIMEZONES).to_string(),
            ..Self::default()
        }
    }

    /// Load a profile from a JSON file. Missing fields take defaults.
    pub fn load(path: &str) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let profile: Self = serde_json::from_str(&json)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Save the profile as JSON
    pub fn save(&self, path: &str) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_agent.is_empty() {
            return Err(Error::Config("user_agent must not be empty".into()));
        }
        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(Error::Config("viewport must be non-empty".into()));
        }
        if !self.url.contains("://") {
            return Err(Error::Config(format!("url '{}' is not absolute", self.url)));
        }
        Ok(())
    }

    /// `navigator.platform` as the user agent implies it
    pub fn platform(&self) -> &'static str {
        if self.user_agent.contains("Win") {
            "Win32"
        } else if self.user_agent.contains("Mac") {
            "MacIntel"
        } else {
            "Linux x86_64"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_user_agent_format() {
        for _ in 0..20 {
            let ua = random_user_agent();
            assert!(ua.starts_with("Mozilla/5.0"));
            assert!(ua.contains("Chrome/"));
            assert!(ua.contains("Safari/537.36"));
        }
    }

    #[test]
    fn test_random_profile_is_consistent() {
        let profile = Profile::random();
        assert!(profile.validate().is_ok());
        assert!(profile.viewport_height < profile.screen_height);
        assert!([4, 8, 10, 12, 16].contains(&profile.hardware_concurrency));
        assert!(["Win32", "MacIntel"].contains(&profile.platform()));
    }

    #[test]
    fn test_platform_from_user_agent() {
        let mut profile = Profile::default();
        assert_eq!(profile.platform(), "Win32");
        profile.user_agent = "Mozilla/5.0 (X11; Linux x86_64)".into();
        assert_eq!(profile.platform(), "Linux x86_64");
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let profile: Profile = serde_json::from_str(r#"{"locale": "zh-CN"}"#).unwrap();
        assert_eq!(profile.locale, "zh-CN");
        assert_eq!(profile.screen_width, 1920);
    }

    #[test]
    fn test_validate_rejects_relative_url() {
        let profile = Profile {
            url: "/index.html".into(),
            ..Profile::default()
        };
        assert!(matches!(profile.validate(), Err(Error::Config(_))));
    }
}
