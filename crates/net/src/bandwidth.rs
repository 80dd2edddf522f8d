use crate::ping::PingState;

/// Coarse estimate of how much data per tick a client's link can absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BandwidthRating(u8);

impl BandwidthRating {
    pub const MIN: Self = Self(10);
    pub const DEFAULT: Self = Self(40);
    pub const MAX: Self = Self(100);

    pub fn new(value: u8) -> Self {
        Self(value.clamp(Self::MIN.0, Self::MAX.0))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for BandwidthRating {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// (upper bound of average RTT in ms, rating). Must stay sorted by RTT with
// non-increasing ratings.
const RTT_CLASSES: [(u32, u8); 5] = [(50, 100), (100, 80), (200, 60), (350, 40), (600, 25)];

pub fn rating_for_rtt(average_rtt_ms: u32) -> BandwidthRating {
    RTT_CLASSES
        .iter()
        .find(|(limit, _)| average_rtt_ms <= *limit)
        .map(|&(_, rating)| BandwidthRating::new(rating))
        .unwrap_or(BandwidthRating::MIN)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BandwidthRater;

impl BandwidthRater {
    /// Re-rates from the valid samples in the ping window. Without any valid
    /// sample the current rating is kept.
    pub fn update(&self, current: BandwidthRating, ping: &PingState) -> BandwidthRating {
        match ping.average_ms() {
            Some(average) => rating_for_rtt(average),
            None => current,
        }
    }
}

/// How much state a single client may receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaBudget {
    pub interval_ticks: u32,
    pub max_entities: usize,
    pub max_removed: usize,
}

impl DeltaBudget {
    pub const MIN_ENTITIES: usize = 4;
    pub const MAX_ENTITIES: usize = 20;
    pub const MAX_REMOVED: usize = 64;

    pub fn for_rating(rating: BandwidthRating) -> Self {
        let span = (BandwidthRating::MAX.0 - BandwidthRating::MIN.0) as usize;
        let above_min = (rating.0 - BandwidthRating::MIN.0) as usize;
        let max_entities = Self::MIN_ENTITIES
            + above_min * (Self::MAX_ENTITIES - Self::MIN_ENTITIES) / span;

        let interval_ticks = match rating.0 {
            60.. => 1,
            25..=59 => 2,
            _ => 3,
        };

        Self {
            interval_ticks,
            max_entities,
            max_removed: Self::MAX_REMOVED,
        }
    }
}
