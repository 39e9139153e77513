// Per-packet traffic decisions sampled from the active preset
//
// The generator does not try to match a service's statistics exactly;
// its job is to keep the observable cadence inside the configured
// envelope while the profile underneath it is hot-swapped on domain
// rotation.

use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::presets::Preset;

/// Samples `(delay, size)` decisions for the shaper loop.
///
/// The preset is replaceable at any time; readers always observe a
/// consistent profile. Swapping does not interrupt a sleep already in
/// flight on the old profile.
pub struct TrafficGenerator {
    preset: RwLock<Preset>,
    rng: Mutex<StdRng>,
}

impl TrafficGenerator {
    pub fn new(preset: Preset) -> Self {
        Self {
            preset: RwLock::new(preset),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generator for tests
    #[cfg(test)]
    pub fn with_seed(preset: Preset, seed: u64) -> Self {
        Self {
            preset: RwLock::new(preset),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Delay before the next packet, derived from a packets-per-second
    /// value sampled uniformly from the preset's range. Both bounds
    /// are clamped to at least 1 pps.
    pub fn next_packet_delay(&self) -> Duration {
        let (min_pps, max_pps) = {
            let preset = self.read_preset();
            (
                preset.packets_per_sec.min.max(1),
                preset.packets_per_sec.max.max(1),
            )
        };

        let pps = self.sample_u32(min_pps, max_pps);
        if pps == 0 {
            return Duration::from_secs(1);
        }
        Duration::from_secs(1) / pps
    }

    /// Size of the next packet payload, uniform over the preset's
    /// range. A degenerate range (`min >= max`) yields `min`.
    pub fn next_packet_size(&self) -> usize {
        let (min, max) = {
            let preset = self.read_preset();
            (preset.packet_size.min, preset.packet_size.max)
        };
        if min >= max {
            return min;
        }
        self.lock_rng().gen_range(min..=max)
    }

    /// Replace the active profile. Subsequent samples observe the new
    /// preset.
    pub fn set_preset(&self, preset: Preset) {
        *self
            .preset
            .write()
            .unwrap_or_else(|e| e.into_inner()) = preset;
    }

    /// Snapshot of the active profile
    pub fn preset(&self) -> Preset {
        self.read_preset().clone()
    }

    fn sample_u32(&self, min: u32, max: u32) -> u32 {
        if min >= max {
            return min;
        }
        self.lock_rng().gen_range(min..=max)
    }

    fn read_preset(&self) -> std::sync::RwLockReadGuard<'_, Preset> {
        self.preset.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::{PresetKind, PresetRegistry, Range};

    fn preset_with(packet_size: Range<usize>, pps: Range<u32>) -> Preset {
        Preset {
            name: "test".to_string(),
            kind: PresetKind::Web,
            packet_size,
            packets_per_sec: pps,
            upload_download_ratio: 0.5,
            session_duration_secs: Range::new(60, 120),
            patterns: Vec::new(),
        }
    }

    #[test]
    fn test_packet_sizes_stay_in_bounds() {
        let registry = PresetRegistry::new();
        for domain in ["vk.com", "youtube.com", "telegram.org", "example.invalid"] {
            let preset = registry.detect(domain);
            let (min, max) = (preset.packet_size.min, preset.packet_size.max);
            let gen = TrafficGenerator::with_seed(preset, 7);
            for _ in 0..1000 {
                let size = gen.next_packet_size();
                assert!(size >= min && size <= max, "{domain}: {size} outside [{min},{max}]");
            }
        }
    }

    #[test]
    fn test_packet_delays_stay_in_envelope() {
        // social: 1..10 pps => delay in [100ms, 1s]
        let gen = TrafficGenerator::with_seed(PresetRegistry::new().detect("vk.com"), 11);
        for _ in 0..1000 {
            let delay = gen.next_packet_delay();
            assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_secs(1));
        }
    }

    #[test]
    fn test_zero_pps_clamps_to_one_second() {
        let gen = TrafficGenerator::with_seed(preset_with(Range::new(100, 200), Range::new(0, 0)), 3);
        for _ in 0..100 {
            assert_eq!(gen.next_packet_delay(), Duration::from_secs(1));
        }
    }

    #[test]
    fn test_messenger_low_rate_clamped() {
        // messenger advertises 0..5 pps; the clamp makes it 1..5
        let gen = TrafficGenerator::with_seed(PresetRegistry::new().detect("telegram.org"), 5);
        for _ in 0..1000 {
            let delay = gen.next_packet_delay();
            assert!(delay >= Duration::from_millis(200) && delay <= Duration::from_secs(1));
        }
    }

    #[test]
    fn test_degenerate_size_range_returns_min() {
        let gen = TrafficGenerator::with_seed(preset_with(Range::new(800, 800), Range::new(1, 1)), 9);
        for _ in 0..10 {
            assert_eq!(gen.next_packet_size(), 800);
        }
    }

    #[test]
    fn test_set_preset_switches_envelope() {
        let gen = TrafficGenerator::with_seed(preset_with(Range::new(10, 20), Range::new(1, 2)), 21);
        let size = gen.next_packet_size();
        assert!((10..=20).contains(&size));

        gen.set_preset(preset_with(Range::new(5000, 6000), Range::new(1, 2)));
        for _ in 0..100 {
            let size = gen.next_packet_size();
            assert!((5000..=6000).contains(&size));
        }
        assert_eq!(gen.preset().packet_size, Range::new(5000, 6000));
    }
}
