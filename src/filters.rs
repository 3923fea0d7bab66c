//! Audio filters and the per-player filter sink.
//!
//! Filters are accumulated locally in a [`FilterSink`] and pushed to the
//! node in a single `filters` op when [`Player::apply_filters`] is called,
//! so a burst of changes costs one network round trip instead of many.
//!
//! [`Player::apply_filters`]: crate::player::Player::apply_filters

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

/// Number of equalizer bands the protocol exposes.
pub const EQUALIZER_BANDS: usize = 15;

/// Identifies a filter slot inside a [`FilterSink`]. Adding a second
/// filter of the same kind replaces the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Volume,
    Equalizer,
    Timescale,
}

impl FilterKind {
    /// The key this filter occupies in the wire payload.
    pub fn key(self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Equalizer => "equalizer",
            Self::Timescale => "timescale",
        }
    }
}

/// An audio filter that can be applied to a player's output.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Volume(VolumeFilter),
    Equalizer(Equalizer),
    Timescale(Timescale),
}

impl Filter {
    pub fn kind(&self) -> FilterKind {
        match self {
            Self::Volume(_) => FilterKind::Volume,
            Self::Equalizer(_) => FilterKind::Equalizer,
            Self::Timescale(_) => FilterKind::Timescale,
        }
    }

    fn payload(&self) -> Value {
        match self {
            Self::Volume(f) => f.payload(),
            Self::Equalizer(f) => f.payload(),
            Self::Timescale(f) => f.payload(),
        }
    }
}

impl From<VolumeFilter> for Filter {
    fn from(value: VolumeFilter) -> Self {
        Self::Volume(value)
    }
}

impl From<Equalizer> for Filter {
    fn from(value: Equalizer) -> Self {
        Self::Equalizer(value)
    }
}

impl From<Timescale> for Filter {
    fn from(value: Timescale) -> Self {
        Self::Timescale(value)
    }
}

/// Scales the player's output volume.
///
/// This is separate from [`Player::set_volume`]: the two do not stack, and
/// the player-level volume is what [`Player::volume`] reports.
///
/// [`Player::set_volume`]: crate::player::Player::set_volume
/// [`Player::volume`]: crate::player::Player::volume
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeFilter {
    volume: f64,
}

impl VolumeFilter {
    /// Creates a volume filter. `1.0` is unchanged; the node accepts
    /// values between `0.0` and `5.0`.
    pub fn new(volume: f64) -> Result<Self> {
        if !(0.0..=5.0).contains(&volume) {
            return Err(Error::invalid(format!(
                "filter volume must be between 0.0 and 5.0, got {volume}"
            )));
        }
        Ok(Self { volume })
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    fn payload(&self) -> Value {
        json!(self.volume)
    }
}

impl Default for VolumeFilter {
    fn default() -> Self {
        Self { volume: 1.0 }
    }
}

/// A 15-band equalizer. Gains run from `-0.25` (band muted) to `+1.0`
/// (gain doubled); `0.0` leaves the band untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Equalizer {
    gains: [f64; EQUALIZER_BANDS],
    name: Option<&'static str>,
}

impl Equalizer {
    /// Builds an equalizer from exactly 15 band gains.
    pub fn new(gains: [f64; EQUALIZER_BANDS]) -> Result<Self> {
        Self::validate(&gains)?;
        Ok(Self { gains, name: None })
    }

    fn validate(gains: &[f64; EQUALIZER_BANDS]) -> Result<()> {
        for (band, gain) in gains.iter().enumerate() {
            if !(-0.25..=1.0).contains(gain) {
                return Err(Error::invalid(format!(
                    "equalizer gain for band {band} must be between -0.25 and 1.0, got {gain}"
                )));
            }
        }
        Ok(())
    }

    fn preset(name: &'static str, gains: [f64; EQUALIZER_BANDS]) -> Self {
        Self {
            gains,
            name: Some(name),
        }
    }

    /// All bands at `0.0`.
    pub fn flat() -> Self {
        Self::preset("flat", [0.0; EQUALIZER_BANDS])
    }

    /// Emphasis on punchy bass and mid-high tones.
    pub fn boost() -> Self {
        Self::preset(
            "boost",
            [
                -0.075, 0.125, 0.125, 0.1, 0.1, 0.05, 0.075, 0.0, 0.0, 0.0, 0.0, 0.0, 0.125, 0.15,
                0.05,
            ],
        )
    }

    /// Suitable for metal and rock.
    pub fn metal() -> Self {
        Self::preset(
            "metal",
            [
                0.0, 0.1, 0.1, 0.15, 0.13, 0.1, 0.0, 0.125, 0.175, 0.175, 0.125, 0.125, 0.1,
                0.075, 0.0,
            ],
        )
    }

    /// Suitable for piano or other high-tone music; cuts some bass.
    pub fn piano() -> Self {
        Self::preset(
            "piano",
            [
                -0.25, -0.25, -0.125, 0.0, 0.25, 0.25, 0.0, -0.25, -0.25, 0.0, 0.0, 0.5, 0.25,
                -0.025, 0.0,
            ],
        )
    }

    pub fn jazz() -> Self {
        Self::preset(
            "jazz",
            [
                -0.13, -0.11, 0.1, -0.1, 0.14, 0.2, -0.18, 0.0, 0.24, 0.22, 0.2, 0.0, 0.0, 0.0,
                0.0,
            ],
        )
    }

    pub fn pop() -> Self {
        Self::preset(
            "pop",
            [
                -0.02, -0.01, 0.08, 0.1, 0.15, 0.1, 0.03, -0.02, -0.035, -0.05, -0.05, -0.05,
                -0.05, -0.05, -0.05,
            ],
        )
    }

    /// The preset name, when this equalizer came from one.
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    pub fn gains(&self) -> &[f64; EQUALIZER_BANDS] {
        &self.gains
    }

    /// Gain of a single band. Errors when `band >= 15`.
    pub fn gain(&self, band: usize) -> Result<f64> {
        self.gains
            .get(band)
            .copied()
            .ok_or_else(|| Error::invalid(format!("band index {band} out of range (0..15)")))
    }

    /// Sets the gain of a single band. Custom gains discard the preset
    /// name.
    pub fn set_gain(&mut self, band: usize, gain: f64) -> Result<()> {
        if band >= EQUALIZER_BANDS {
            return Err(Error::invalid(format!(
                "band index {band} out of range (0..15)"
            )));
        }
        if !(-0.25..=1.0).contains(&gain) {
            return Err(Error::invalid(format!(
                "equalizer gain must be between -0.25 and 1.0, got {gain}"
            )));
        }
        self.gains[band] = gain;
        self.name = None;
        Ok(())
    }

    /// Resets all bands to `0.0`.
    pub fn reset(&mut self) {
        self.gains = [0.0; EQUALIZER_BANDS];
        self.name = None;
    }

    fn payload(&self) -> Value {
        Value::Array(
            self.gains
                .iter()
                .enumerate()
                .map(|(band, gain)| json!({ "band": band, "gain": gain }))
                .collect(),
        )
    }
}

impl Default for Equalizer {
    fn default() -> Self {
        Self::flat()
    }
}

/// A pitch adjustment for [`Timescale`], expressible in whichever unit is
/// handiest. Everything collapses to a plain multiplier on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pitch {
    /// Direct multiplier; `1.0` leaves the pitch unchanged.
    Multiplier(f64),
    /// Octaves relative to the original; `0.0` is unchanged.
    Octaves(f64),
    /// Semitones relative to the original; 12 semitones make an octave.
    Semitones(f64),
}

impl Pitch {
    pub fn as_multiplier(self) -> f64 {
        match self {
            Self::Multiplier(value) => value,
            Self::Octaves(value) => 2f64.powf(value),
            Self::Semitones(value) => 2f64.powf(value / 12.0),
        }
    }
}

/// Modifies the speed, pitch, and rate of the audio. All values are
/// multipliers defaulting to `1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timescale {
    speed: f64,
    pitch: f64,
    rate: f64,
}

impl Timescale {
    pub fn new(speed: f64, pitch: impl Into<Option<Pitch>>, rate: f64) -> Result<Self> {
        let mut timescale = Self::default();
        timescale.set_speed(speed)?;
        if let Some(pitch) = pitch.into() {
            timescale.set_pitch(pitch)?;
        }
        timescale.set_rate(rate)?;
        Ok(timescale)
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        if speed < 0.0 {
            return Err(Error::invalid("speed multiplier cannot be negative"));
        }
        self.speed = speed;
        Ok(())
    }

    pub fn set_pitch(&mut self, pitch: Pitch) -> Result<()> {
        let multiplier = pitch.as_multiplier();
        if multiplier < 0.0 {
            return Err(Error::invalid("pitch multiplier cannot be negative"));
        }
        self.pitch = multiplier;
        Ok(())
    }

    pub fn set_rate(&mut self, rate: f64) -> Result<()> {
        if rate < 0.0 {
            return Err(Error::invalid("rate multiplier cannot be negative"));
        }
        self.rate = rate;
        Ok(())
    }

    fn payload(&self) -> Value {
        json!({
            "speed": self.speed,
            "pitch": self.pitch,
            "rate": self.rate,
        })
    }
}

impl Default for Timescale {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 1.0,
            rate: 1.0,
        }
    }
}

/// The set of filters applied to one player.
///
/// Mutating the sink does nothing on its own; the accumulated state is
/// sent when the player applies it. The wire payload always carries the
/// default volume, equalizer and timescale values so that removed filters
/// are reset on the node rather than left dangling.
#[derive(Debug, Clone, Default)]
pub struct FilterSink {
    filters: HashMap<FilterKind, Filter>,
}

impl FilterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter, replacing any existing filter of the same kind.
    pub fn add(&mut self, filter: impl Into<Filter>) {
        let filter = filter.into();
        self.filters.insert(filter.kind(), filter);
    }

    /// Removes a filter by kind. Missing filters pass silently.
    pub fn remove(&mut self, kind: FilterKind) -> Option<Filter> {
        self.filters.remove(&kind)
    }

    /// Replaces the sink's contents with the given filters.
    pub fn overwrite(&mut self, filters: impl IntoIterator<Item = Filter>) {
        self.clear();
        for filter in filters {
            self.add(filter);
        }
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    pub fn get(&self, kind: FilterKind) -> Option<&Filter> {
        self.filters.get(&kind)
    }

    pub fn volume(&self) -> Option<&VolumeFilter> {
        match self.filters.get(&FilterKind::Volume) {
            Some(Filter::Volume(f)) => Some(f),
            _ => None,
        }
    }

    pub fn equalizer(&self) -> Option<&Equalizer> {
        match self.filters.get(&FilterKind::Equalizer) {
            Some(Filter::Equalizer(f)) => Some(f),
            _ => None,
        }
    }

    pub fn timescale(&self) -> Option<&Timescale> {
        match self.filters.get(&FilterKind::Timescale) {
            Some(Filter::Timescale(f)) => Some(f),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Builds the flattened body of a `filters` op.
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert(
            FilterKind::Volume.key().into(),
            Filter::from(VolumeFilter::default()).payload(),
        );
        payload.insert(
            FilterKind::Equalizer.key().into(),
            Filter::from(Equalizer::flat()).payload(),
        );
        payload.insert(
            FilterKind::Timescale.key().into(),
            Filter::from(Timescale::default()).payload(),
        );

        for filter in self.filters.values() {
            payload.insert(filter.kind().key().into(), filter.payload());
        }
        payload
    }
}
