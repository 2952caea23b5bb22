use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use super::*;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Neutral score applied when a body has no entry in the dignity table.
const NEUTRAL_DIGNITY: f64 = 50.0;

/// Base longitude at the reference epoch and mean daily motion, both in
/// degrees. The missing-record default of {0, 0} pins an unknown body to the
/// start of Aries instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BodyRecord {
    pub base_longitude: f64,
    pub daily_motion: f64,
}

const BODY_RECORDS: &[(CelestialBody, BodyRecord)] = &[
    (CelestialBody::Sun, BodyRecord { base_longitude: 280.5, daily_motion: 0.9856 }),
    (CelestialBody::Moon, BodyRecord { base_longitude: 125.1, daily_motion: 13.1764 }),
    (CelestialBody::Mercury, BodyRecord { base_longitude: 265.3, daily_motion: 1.3833 }),
    (CelestialBody::Venus, BodyRecord { base_longitude: 310.2, daily_motion: 1.2009 }),
    (CelestialBody::Mars, BodyRecord { base_longitude: 95.7, daily_motion: 0.5240 }),
    (CelestialBody::Jupiter, BodyRecord { base_longitude: 65.4, daily_motion: 0.0831 }),
    (CelestialBody::Saturn, BodyRecord { base_longitude: 335.1, daily_motion: 0.0334 }),
    (CelestialBody::Uranus, BodyRecord { base_longitude: 54.8, daily_motion: 0.0117 }),
    (CelestialBody::Neptune, BodyRecord { base_longitude: 357.2, daily_motion: 0.0060 }),
    (CelestialBody::Pluto, BodyRecord { base_longitude: 300.9, daily_motion: 0.0040 }),
    // The mean node travels backwards through the zodiac.
    (CelestialBody::NorthNode, BodyRecord { base_longitude: 15.6, daily_motion: -0.0529 }),
    (CelestialBody::Chiron, BodyRecord { base_longitude: 20.4, daily_motion: 0.0183 }),
];

/// Per-body dignity scores in element order Fire, Earth, Air, Water.
/// The two derived points are deliberately absent and take the neutral 50.
const DIGNITY_SCORES: &[(CelestialBody, [f64; 4])] = &[
    (CelestialBody::Sun, [80.0, 45.0, 60.0, 35.0]),
    (CelestialBody::Moon, [40.0, 55.0, 50.0, 85.0]),
    (CelestialBody::Mercury, [55.0, 60.0, 80.0, 45.0]),
    (CelestialBody::Venus, [45.0, 75.0, 65.0, 70.0]),
    (CelestialBody::Mars, [85.0, 50.0, 45.0, 55.0]),
    (CelestialBody::Jupiter, [75.0, 55.0, 70.0, 60.0]),
    (CelestialBody::Saturn, [35.0, 80.0, 60.0, 40.0]),
    (CelestialBody::Uranus, [60.0, 40.0, 85.0, 50.0]),
    (CelestialBody::Neptune, [45.0, 40.0, 55.0, 85.0]),
    (CelestialBody::Pluto, [70.0, 60.0, 45.0, 75.0]),
];

const ELEMENT_ORDER: [Element; 4] = [Element::Fire, Element::Earth, Element::Air, Element::Water];

/// Reduce any angle to [0, 360).
pub fn normalize_degrees(degrees: f64) -> f64 {
    degrees.rem_euclid(360.0)
}

/// Fractional days from `from` to `to`, including time of day. Negative when
/// `to` precedes `from`.
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MILLIS_PER_DAY
}

/// Format a degrees-in-sign value as `D°M'S"` with the sign name appended.
/// Minutes and seconds are truncated, never rounded, and no carry is
/// propagated back into the degrees.
pub fn format_sexagesimal(degrees_in_sign: f64, sign: ZodiacSign) -> String {
    let degrees = degrees_in_sign.floor();
    let minutes = ((degrees_in_sign - degrees) * 60.0).floor();
    let seconds = (((degrees_in_sign - degrees) * 60.0 - minutes) * 60.0).floor();
    format!(
        "{}°{:02}'{:02}\" {}",
        degrees as u32, minutes as u32, seconds as u32, sign
    )
}

/// Shortest angular distance between two longitudes on the circle.
pub fn angular_separation(a: f64, b: f64) -> f64 {
    let d = (a - b).abs().rem_euclid(360.0);
    d.min(360.0 - d)
}

/// Classify a separation into at most one aspect. Bands are evaluated in the
/// declared order.
pub fn classify_aspect(separation: f64) -> Option<Aspect> {
    Aspect::all().find(|aspect| (separation - aspect.angle()).abs() <= aspect.orb())
}

// ---------------------------
// ## Reference Tables
// ---------------------------

/// The process-wide fixed tables: reference epoch, base longitudes, daily
/// motions and dignity scores. Built once at startup and injected into both
/// the local engine and the gateway fallback so the two can never drift.
#[derive(Debug, Clone)]
pub struct ReferenceTables {
    reference_epoch: DateTime<Utc>,
    bodies: HashMap<CelestialBody, BodyRecord>,
    dignity: HashMap<(CelestialBody, Element), f64>,
}

impl ReferenceTables {
    pub fn new(
        reference_epoch: DateTime<Utc>,
        bodies: HashMap<CelestialBody, BodyRecord>,
        dignity: HashMap<(CelestialBody, Element), f64>,
    ) -> Self {
        ReferenceTables {
            reference_epoch,
            bodies,
            dignity,
        }
    }

    /// The stock tables: epoch 2025-01-01T00:00:00Z with the built-in motion
    /// and dignity constants.
    pub fn builtin() -> Self {
        let bodies = BODY_RECORDS.iter().copied().collect();
        let mut dignity = HashMap::new();
        for (body, scores) in DIGNITY_SCORES {
            for (element, score) in ELEMENT_ORDER.iter().zip(scores) {
                dignity.insert((*body, *element), *score);
            }
        }
        ReferenceTables::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            bodies,
            dignity,
        )
    }

    pub fn reference_epoch(&self) -> DateTime<Utc> {
        self.reference_epoch
    }

    /// Unknown bodies degrade to the neutral {0, 0} record rather than
    /// failing; the surrounding system relies on this not crashing.
    pub fn record(&self, body: CelestialBody) -> BodyRecord {
        self.bodies.get(&body).copied().unwrap_or_default()
    }

    pub fn dignity_score(&self, body: CelestialBody, element: Element) -> f64 {
        self.dignity
            .get(&(body, element))
            .copied()
            .unwrap_or(NEUTRAL_DIGNITY)
    }
}

impl Default for ReferenceTables {
    fn default() -> Self {
        ReferenceTables::builtin()
    }
}

// ---------------------------
// ## Local Engine
// ---------------------------

/// Pure, synchronous position calculator. All methods are total functions of
/// their inputs and the injected tables; nothing here performs I/O or
/// mutates state.
#[derive(Debug, Clone)]
pub struct LocalEphemerisEngine {
    tables: Arc<ReferenceTables>,
}

impl LocalEphemerisEngine {
    pub fn new(tables: Arc<ReferenceTables>) -> Self {
        LocalEphemerisEngine { tables }
    }

    pub fn tables(&self) -> &ReferenceTables {
        &self.tables
    }

    /// Linear extrapolation from the reference epoch:
    /// `normalize(base + motion × days)`. Valid for timestamps before the
    /// epoch as well (negative day difference).
    pub fn position_of(&self, body: CelestialBody, timestamp: DateTime<Utc>) -> f64 {
        let record = self.tables.record(body);
        let days = days_between(self.tables.reference_epoch, timestamp);
        normalize_degrees(record.base_longitude + record.daily_motion * days)
    }

    pub fn sign_of(&self, longitude: f64) -> ZodiacSign {
        ZodiacSign::from_longitude(longitude)
    }

    /// Full derived view of one body at a given longitude. Under the linear
    /// model the day-over-day longitude delta has the sign of the daily
    /// motion, so retrograde is simply a negative motion constant.
    pub fn describe(&self, body: CelestialBody, longitude: f64, retrograde: bool) -> PlanetPosition {
        let longitude = normalize_degrees(longitude);
        let degrees_in_sign = longitude % 30.0;
        let sign = ZodiacSign::from_longitude(longitude);
        PlanetPosition {
            body,
            longitude,
            degrees_in_sign,
            sign,
            formatted: format_sexagesimal(degrees_in_sign, sign),
            strength: self.strength_of(body, longitude),
            retrograde,
        }
    }

    /// Positions for all ten bodies plus the two derived points.
    pub fn all_positions(&self, timestamp: DateTime<Utc>) -> HashMap<CelestialBody, PlanetPosition> {
        CelestialBody::all()
            .map(|body| {
                let longitude = self.position_of(body, timestamp);
                let retrograde = self.tables.record(body).daily_motion < 0.0;
                (body, self.describe(body, longitude, retrograde))
            })
            .collect()
    }

    /// Stylized dignity score in [-200, 200]: the per-element base from the
    /// fixed table (neutral 50 when absent), plus +20 inside the critical
    /// degrees (< 5° or > 25° into the sign) or +10 in the middle band
    /// (strictly between 10° and 20°).
    pub fn strength_of(&self, body: CelestialBody, longitude: f64) -> f64 {
        let longitude = normalize_degrees(longitude);
        let degrees_in_sign = longitude % 30.0;
        let base = self
            .tables
            .dignity_score(body, ZodiacSign::from_longitude(longitude).element());
        let modifier = if degrees_in_sign < 5.0 || degrees_in_sign > 25.0 {
            20.0
        } else if degrees_in_sign > 10.0 && degrees_in_sign < 20.0 {
            10.0
        } else {
            0.0
        };
        (base + modifier).clamp(-200.0, 200.0)
    }

    /// Twelve equal cusps anchored at the ascendant, which this model fixes
    /// at 90° ahead of the sun. Cusp 4 marks the conventional IC by position
    /// only; there is no independent computation.
    pub fn houses_of(&self, timestamp: DateTime<Utc>) -> Vec<HouseCusp> {
        let ascendant =
            normalize_degrees(self.position_of(CelestialBody::Sun, timestamp) + 90.0);
        (0..12u8)
            .map(|i| {
                let longitude = normalize_degrees(ascendant + f64::from(i) * 30.0);
                HouseCusp {
                    house: i + 1,
                    longitude,
                    sign: ZodiacSign::from_longitude(longitude),
                    degrees_in_sign: longitude % 30.0,
                }
            })
            .collect()
    }

    /// Scan all distinct unordered pairs of the supplied positions and keep
    /// those whose shortest separation falls inside an orb band. Pairs are
    /// visited in the fixed body order so output order is stable.
    pub fn aspects_of(
        &self,
        positions: &HashMap<CelestialBody, PlanetPosition>,
    ) -> Vec<AspectInfo> {
        let bodies: Vec<CelestialBody> = CelestialBody::all()
            .filter(|body| positions.contains_key(body))
            .collect();

        let mut aspects = Vec::new();
        for (i, body_a) in bodies.iter().enumerate() {
            for body_b in bodies.iter().skip(i + 1) {
                let separation =
                    angular_separation(positions[body_a].longitude, positions[body_b].longitude);
                if let Some(aspect) = classify_aspect(separation) {
                    aspects.push(AspectInfo {
                        aspect,
                        body_a: *body_a,
                        body_b: *body_b,
                        exact_angle: separation,
                        color: aspect.color(),
                    });
                }
            }
        }
        aspects
    }

    /// Compose positions, houses and aspects into one chart. The observer
    /// location is carried through for the caller but does not influence the
    /// ascendant; that simplification is part of the model.
    pub fn snapshot(&self, timestamp: DateTime<Utc>, location: Location) -> ChartSnapshot {
        let planets = self.all_positions(timestamp);
        let houses = self.houses_of(timestamp);
        let aspects = self.aspects_of(&planets);
        ChartSnapshot {
            timestamp,
            location,
            planets,
            houses,
            aspects,
            source: PositionSource::Local,
        }
    }
}

impl Default for LocalEphemerisEngine {
    fn default() -> Self {
        LocalEphemerisEngine::new(Arc::new(ReferenceTables::builtin()))
    }
}
