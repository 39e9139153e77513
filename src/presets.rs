//! Behavioral presets for traffic mimicry
//!
//! A preset describes the observable envelope of a public service:
//! packet sizes, packet rate, upload/download ratio, session length,
//! and optional burst/idle patterns. The registry maps fronting
//! domains to presets and can be extended with custom profiles loaded
//! from YAML files on the server.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Category of a behavioral preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetKind {
    Social,
    Video,
    Messenger,
    Web,
}

/// Inclusive min-max range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range<T> {
    pub min: T,
    pub max: T,
}

impl<T> Range<T> {
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

/// Kind of a traffic pattern within a preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Burst,
    Constant,
    Idle,
}

/// A repeating behavior within a preset, e.g. the photo-upload bursts
/// of a social feed. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficPattern {
    #[serde(rename = "type")]
    pub kind: PatternKind,
    pub duration_secs: Range<u64>,
    pub interval_secs: Range<u64>,
}

/// A complete behavior profile for mimicking one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PresetKind,
    /// Packet size in bytes
    pub packet_size: Range<usize>,
    /// Packets per second
    pub packets_per_sec: Range<u32>,
    /// e.g. 0.3 for upload-light browsing, 1.0 for symmetric chat
    pub upload_download_ratio: f64,
    /// Seconds before a real user would move on
    pub session_duration_secs: Range<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<TrafficPattern>,
}

impl Preset {
    fn social() -> Self {
        Self {
            name: "social".to_string(),
            kind: PresetKind::Social,
            packet_size: Range::new(500, 1400),
            packets_per_sec: Range::new(1, 10),
            upload_download_ratio: 0.3,
            session_duration_secs: Range::new(60, 300),
            patterns: vec![TrafficPattern {
                kind: PatternKind::Burst,
                duration_secs: Range::new(5, 15),
                interval_secs: Range::new(30, 120),
            }],
        }
    }

    fn video() -> Self {
        Self {
            name: "video".to_string(),
            kind: PresetKind::Video,
            packet_size: Range::new(1000, 1450),
            packets_per_sec: Range::new(30, 100),
            upload_download_ratio: 0.05,
            session_duration_secs: Range::new(300, 1200),
            patterns: Vec::new(),
        }
    }

    fn messenger() -> Self {
        Self {
            name: "messenger".to_string(),
            kind: PresetKind::Messenger,
            packet_size: Range::new(50, 400),
            packets_per_sec: Range::new(0, 5),
            upload_download_ratio: 1.0,
            session_duration_secs: Range::new(600, 3600),
            patterns: Vec::new(),
        }
    }

    /// Generic browsing profile used for domains the registry does not
    /// recognize
    pub fn web_generic() -> Self {
        Self {
            name: "web_generic".to_string(),
            kind: PresetKind::Web,
            packet_size: Range::new(300, 1200),
            packets_per_sec: Range::new(1, 20),
            upload_download_ratio: 0.2,
            session_duration_secs: Range::new(60, 180),
            patterns: Vec::new(),
        }
    }

    fn builtin(name: &str) -> Option<Self> {
        match name {
            "social" => Some(Self::social()),
            "video" => Some(Self::video()),
            "messenger" => Some(Self::messenger()),
            "web_generic" => Some(Self::web_generic()),
            _ => None,
        }
    }
}

/// Maps fronting domains to behavioral presets.
///
/// Detection never fails: unknown domains fall back to the generic
/// web profile rather than an error.
#[derive(Debug, Default)]
pub struct PresetRegistry {
    /// domain -> preset name, loaded from a domains file
    domain_overrides: HashMap<String, String>,
    /// preset name -> custom preset, loaded from a presets directory
    custom: HashMap<String, Preset>,
}

impl PresetRegistry {
    /// Registry with only the built-in table
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the registry with custom presets (`<presets_dir>/*.yml`,
    /// one preset per file) and a YAML map of domain to preset name.
    /// Load failures are logged and skipped; the built-ins always
    /// remain available.
    pub fn load_custom(&mut self, domains_file: Option<&Path>, presets_dir: Option<&Path>) {
        if let Some(dir) = presets_dir {
            match std::fs::read_dir(dir) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        let path = entry.path();
                        let is_yaml = path
                            .extension()
                            .map(|e| e == "yml" || e == "yaml")
                            .unwrap_or(false);
                        if !is_yaml {
                            continue;
                        }
                        match std::fs::read_to_string(&path)
                            .map_err(anyhow::Error::from)
                            .and_then(|s| serde_yaml::from_str::<Preset>(&s).map_err(Into::into))
                        {
                            Ok(preset) => {
                                self.custom.insert(preset.name.clone(), preset);
                            }
                            Err(err) => {
                                warn!("skipping preset file {}: {err}", path.display());
                            }
                        }
                    }
                }
                Err(err) => warn!("cannot read presets dir {}: {err}", dir.display()),
            }
        }

        if let Some(path) = domains_file {
            match std::fs::read_to_string(path)
                .map_err(anyhow::Error::from)
                .and_then(|s| {
                    serde_yaml::from_str::<HashMap<String, String>>(&s).map_err(Into::into)
                }) {
                Ok(map) => self.domain_overrides.extend(map),
                Err(err) => warn!("cannot load domains file {}: {err}", path.display()),
            }
        }
    }

    /// Guess the best preset for a fronting domain
    pub fn detect(&self, domain: &str) -> Preset {
        if let Some(name) = self.domain_overrides.get(domain) {
            if let Some(preset) = self.custom.get(name) {
                return preset.clone();
            }
            if let Some(preset) = Preset::builtin(name) {
                return preset;
            }
            warn!("domains file maps {domain} to unknown preset {name}");
        }

        match domain {
            "vk.com" | "instagram.com" | "facebook.com" | "twitter.com" => Preset::social(),
            "rutube.ru" | "youtube.com" | "twitch.tv" => Preset::video(),
            "telegram.org" | "whatsapp.com" => Preset::messenger(),
            _ => Preset::web_generic(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_social_domains() {
        let registry = PresetRegistry::new();
        for domain in ["vk.com", "instagram.com", "facebook.com", "twitter.com"] {
            let preset = registry.detect(domain);
            assert_eq!(preset.kind, PresetKind::Social);
            assert_eq!(preset.name, "social");
        }
    }

    #[test]
    fn test_detect_video_domains() {
        let registry = PresetRegistry::new();
        for domain in ["rutube.ru", "youtube.com", "twitch.tv"] {
            assert_eq!(registry.detect(domain).kind, PresetKind::Video);
        }
    }

    #[test]
    fn test_detect_messenger_domains() {
        let registry = PresetRegistry::new();
        for domain in ["telegram.org", "whatsapp.com"] {
            assert_eq!(registry.detect(domain).kind, PresetKind::Messenger);
        }
    }

    #[test]
    fn test_unknown_domain_falls_back_to_web_generic() {
        let registry = PresetRegistry::new();
        let preset = registry.detect("example.invalid");
        assert_eq!(preset.name, "web_generic");
        assert_eq!(preset.kind, PresetKind::Web);
        assert_eq!(preset.packet_size, Range::new(300, 1200));
        assert_eq!(preset.packets_per_sec, Range::new(1, 20));
    }

    #[test]
    fn test_builtin_defaults_exact() {
        let registry = PresetRegistry::new();

        let social = registry.detect("vk.com");
        assert_eq!(social.packet_size, Range::new(500, 1400));
        assert_eq!(social.packets_per_sec, Range::new(1, 10));
        assert_eq!(social.upload_download_ratio, 0.3);
        assert_eq!(social.session_duration_secs, Range::new(60, 300));
        assert_eq!(social.patterns.len(), 1);
        assert_eq!(social.patterns[0].kind, PatternKind::Burst);
        assert_eq!(social.patterns[0].duration_secs, Range::new(5, 15));
        assert_eq!(social.patterns[0].interval_secs, Range::new(30, 120));

        let video = registry.detect("youtube.com");
        assert_eq!(video.packet_size, Range::new(1000, 1450));
        assert_eq!(video.packets_per_sec, Range::new(30, 100));
        assert_eq!(video.upload_download_ratio, 0.05);
        assert_eq!(video.session_duration_secs, Range::new(300, 1200));
        assert!(video.patterns.is_empty());

        let messenger = registry.detect("telegram.org");
        assert_eq!(messenger.packet_size, Range::new(50, 400));
        assert_eq!(messenger.packets_per_sec, Range::new(0, 5));
        assert_eq!(messenger.upload_download_ratio, 1.0);
        assert_eq!(messenger.session_duration_secs, Range::new(600, 3600));
    }

    #[test]
    fn test_preset_yaml_roundtrip() {
        let yaml = serde_yaml::to_string(&Preset::web_generic()).unwrap();
        let parsed: Preset = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, Preset::web_generic());
    }

    #[test]
    fn test_custom_presets_override_detection() {
        let dir = std::env::temp_dir().join(format!("mimic-presets-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let preset_yaml = "\
name: corp_cdn
type: video
packet_size: { min: 900, max: 1400 }
packets_per_sec: { min: 20, max: 60 }
upload_download_ratio: 0.1
session_duration_secs: { min: 120, max: 600 }
";
        std::fs::write(dir.join("corp_cdn.yml"), preset_yaml).unwrap();
        let domains_path = dir.join("domains.yml");
        std::fs::write(&domains_path, "cdn.example.com: corp_cdn\nvk.com: messenger\n").unwrap();

        let mut registry = PresetRegistry::new();
        registry.load_custom(Some(&domains_path), Some(&dir));

        let custom = registry.detect("cdn.example.com");
        assert_eq!(custom.name, "corp_cdn");
        assert_eq!(custom.packet_size, Range::new(900, 1400));

        // overrides may remap a domain onto a builtin
        assert_eq!(registry.detect("vk.com").kind, PresetKind::Messenger);

        // unrelated domains still use the builtin table
        assert_eq!(registry.detect("twitch.tv").kind, PresetKind::Video);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_custom_paths_are_not_fatal() {
        let mut registry = PresetRegistry::new();
        registry.load_custom(
            Some(Path::new("/nonexistent/domains.yml")),
            Some(Path::new("/nonexistent/presets")),
        );
        assert_eq!(registry.detect("vk.com").kind, PresetKind::Social);
    }
}
