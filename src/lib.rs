use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod ephemeris;
pub mod gateway;

pub use ephemeris::{format_sexagesimal, normalize_degrees, LocalEphemerisEngine, ReferenceTables};
pub use gateway::{GatewayConfig, RemoteEphemerisGateway};

// ---------------------------
// ## Enumerations
// ---------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CelestialBody {
    Sun,
    Moon,
    Mercury,
    Venus,
    Mars,
    Jupiter,
    Saturn,
    Uranus,
    Neptune,
    Pluto,
    NorthNode,
    Chiron,
}

impl CelestialBody {
    /// The ten primary bodies carried in the dignity tables.
    pub fn planets() -> impl Iterator<Item = CelestialBody> {
        [
            CelestialBody::Sun,
            CelestialBody::Moon,
            CelestialBody::Mercury,
            CelestialBody::Venus,
            CelestialBody::Mars,
            CelestialBody::Jupiter,
            CelestialBody::Saturn,
            CelestialBody::Uranus,
            CelestialBody::Neptune,
            CelestialBody::Pluto,
        ]
        .iter()
        .copied()
    }

    /// All twelve chart entries: the ten planets plus the two derived points.
    pub fn all() -> impl Iterator<Item = CelestialBody> {
        CelestialBody::planets().chain([CelestialBody::NorthNode, CelestialBody::Chiron])
    }

    /// The lunar node and Chiron are extrapolated like any other body but
    /// carry no entry in the dignity table.
    pub fn is_derived_point(&self) -> bool {
        matches!(self, CelestialBody::NorthNode | CelestialBody::Chiron)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CelestialBody::Sun => "☉",
            CelestialBody::Moon => "☽",
            CelestialBody::Mercury => "☿",
            CelestialBody::Venus => "♀",
            CelestialBody::Mars => "♂",
            CelestialBody::Jupiter => "♃",
            CelestialBody::Saturn => "♄",
            CelestialBody::Uranus => "♅",
            CelestialBody::Neptune => "♆",
            CelestialBody::Pluto => "♇",
            CelestialBody::NorthNode => "☊",
            CelestialBody::Chiron => "⚷",
        }
    }

    /// Case-insensitive lookup used when mapping remote payloads onto the
    /// model. Unrecognized names yield `None` and are skipped by the caller.
    pub fn from_name(name: &str) -> Option<CelestialBody> {
        match name.to_ascii_lowercase().as_str() {
            "sun" => Some(CelestialBody::Sun),
            "moon" => Some(CelestialBody::Moon),
            "mercury" => Some(CelestialBody::Mercury),
            "venus" => Some(CelestialBody::Venus),
            "mars" => Some(CelestialBody::Mars),
            "jupiter" => Some(CelestialBody::Jupiter),
            "saturn" => Some(CelestialBody::Saturn),
            "uranus" => Some(CelestialBody::Uranus),
            "neptune" => Some(CelestialBody::Neptune),
            "pluto" => Some(CelestialBody::Pluto),
            "north node" | "northnode" | "rahu" => Some(CelestialBody::NorthNode),
            "chiron" => Some(CelestialBody::Chiron),
            _ => None,
        }
    }
}

impl fmt::Display for CelestialBody {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CelestialBody::Sun => "Sun",
            CelestialBody::Moon => "Moon",
            CelestialBody::Mercury => "Mercury",
            CelestialBody::Venus => "Venus",
            CelestialBody::Mars => "Mars",
            CelestialBody::Jupiter => "Jupiter",
            CelestialBody::Saturn => "Saturn",
            CelestialBody::Uranus => "Uranus",
            CelestialBody::Neptune => "Neptune",
            CelestialBody::Pluto => "Pluto",
            CelestialBody::NorthNode => "North Node",
            CelestialBody::Chiron => "Chiron",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Element {
    Fire,
    Earth,
    Air,
    Water,
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Element::Fire => "Fire",
            Element::Earth => "Earth",
            Element::Air => "Air",
            Element::Water => "Water",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    Cardinal,
    Fixed,
    Mutable,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Quality::Cardinal => "Cardinal",
            Quality::Fixed => "Fixed",
            Quality::Mutable => "Mutable",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZodiacSign {
    Aries = 0,
    Taurus,
    Gemini,
    Cancer,
    Leo,
    Virgo,
    Libra,
    Scorpio,
    Sagittarius,
    Capricorn,
    Aquarius,
    Pisces,
}

impl ZodiacSign {
    pub fn from_longitude(longitude: f64) -> Self {
        let normalized_longitude = longitude.rem_euclid(360.0);
        let sign_index = (normalized_longitude / 30.0).floor() as usize;
        match sign_index {
            0 => ZodiacSign::Aries,
            1 => ZodiacSign::Taurus,
            2 => ZodiacSign::Gemini,
            3 => ZodiacSign::Cancer,
            4 => ZodiacSign::Leo,
            5 => ZodiacSign::Virgo,
            6 => ZodiacSign::Libra,
            7 => ZodiacSign::Scorpio,
            8 => ZodiacSign::Sagittarius,
            9 => ZodiacSign::Capricorn,
            10 => ZodiacSign::Aquarius,
            11 => ZodiacSign::Pisces,
            _ => ZodiacSign::Aries, // Fallback
        }
    }

    pub fn element(&self) -> Element {
        match self {
            ZodiacSign::Aries | ZodiacSign::Leo | ZodiacSign::Sagittarius => Element::Fire,
            ZodiacSign::Taurus | ZodiacSign::Virgo | ZodiacSign::Capricorn => Element::Earth,
            ZodiacSign::Gemini | ZodiacSign::Libra | ZodiacSign::Aquarius => Element::Air,
            ZodiacSign::Cancer | ZodiacSign::Scorpio | ZodiacSign::Pisces => Element::Water,
        }
    }

    pub fn quality(&self) -> Quality {
        match self {
            ZodiacSign::Aries | ZodiacSign::Cancer | ZodiacSign::Libra | ZodiacSign::Capricorn => {
                Quality::Cardinal
            }
            ZodiacSign::Taurus | ZodiacSign::Leo | ZodiacSign::Scorpio | ZodiacSign::Aquarius => {
                Quality::Fixed
            }
            ZodiacSign::Gemini
            | ZodiacSign::Virgo
            | ZodiacSign::Sagittarius
            | ZodiacSign::Pisces => Quality::Mutable,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ZodiacSign::Aries => "♈",
            ZodiacSign::Taurus => "♉",
            ZodiacSign::Gemini => "♊",
            ZodiacSign::Cancer => "♋",
            ZodiacSign::Leo => "♌",
            ZodiacSign::Virgo => "♍",
            ZodiacSign::Libra => "♎",
            ZodiacSign::Scorpio => "♏",
            ZodiacSign::Sagittarius => "♐",
            ZodiacSign::Capricorn => "♑",
            ZodiacSign::Aquarius => "♒",
            ZodiacSign::Pisces => "♓",
        }
    }
}

impl fmt::Display for ZodiacSign {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let sign_str = match self {
            ZodiacSign::Aries => "Aries",
            ZodiacSign::Taurus => "Taurus",
            ZodiacSign::Gemini => "Gemini",
            ZodiacSign::Cancer => "Cancer",
            ZodiacSign::Leo => "Leo",
            ZodiacSign::Virgo => "Virgo",
            ZodiacSign::Libra => "Libra",
            ZodiacSign::Scorpio => "Scorpio",
            ZodiacSign::Sagittarius => "Sagittarius",
            ZodiacSign::Capricorn => "Capricorn",
            ZodiacSign::Aquarius => "Aquarius",
            ZodiacSign::Pisces => "Pisces",
        };
        write!(f, "{}", sign_str)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aspect {
    Conjunction,
    Sextile,
    Square,
    Trine,
    Opposition,
}

impl Aspect {
    /// Classification order. The orb bands do not overlap, so order only
    /// matters if the orbs are ever widened.
    pub fn all() -> impl Iterator<Item = Aspect> {
        [
            Aspect::Conjunction,
            Aspect::Sextile,
            Aspect::Square,
            Aspect::Trine,
            Aspect::Opposition,
        ]
        .iter()
        .copied()
    }

    pub fn angle(&self) -> f64 {
        match self {
            Aspect::Conjunction => 0.0,
            Aspect::Sextile => 60.0,
            Aspect::Square => 90.0,
            Aspect::Trine => 120.0,
            Aspect::Opposition => 180.0,
        }
    }

    pub fn orb(&self) -> f64 {
        match self {
            Aspect::Sextile => 6.0,
            _ => 8.0,
        }
    }

    /// Color tag handed to rendering collaborators.
    pub fn color(&self) -> &'static str {
        match self {
            Aspect::Conjunction => "#e6b800",
            Aspect::Sextile => "#4da6ff",
            Aspect::Square => "#e60000",
            Aspect::Trine => "#33cc66",
            Aspect::Opposition => "#cc33ff",
        }
    }

    pub fn from_name(name: &str) -> Option<Aspect> {
        match name.to_ascii_lowercase().as_str() {
            "conjunction" => Some(Aspect::Conjunction),
            "sextile" => Some(Aspect::Sextile),
            "square" => Some(Aspect::Square),
            "trine" => Some(Aspect::Trine),
            "opposition" => Some(Aspect::Opposition),
            _ => None,
        }
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Aspect::Conjunction => "Conjunction",
            Aspect::Sextile => "Sextile",
            Aspect::Square => "Square",
            Aspect::Trine => "Trine",
            Aspect::Opposition => "Opposition",
        };
        write!(f, "{}", name)
    }
}

/// Which position source produced a snapshot. Fallback activation used to be
/// silent; callers can now observe it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSource {
    Live,
    Fallback,
    Local,
}

impl fmt::Display for PositionSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PositionSource::Live => "live",
            PositionSource::Fallback => "fallback",
            PositionSource::Local => "local",
        };
        write!(f, "{}", name)
    }
}

// ---------------------------
// ## Structures
// ---------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Location { latitude, longitude }
    }

    pub fn greenwich() -> Self { Location { latitude: 51.4779, longitude: 0.0 } }
    pub fn delhi() -> Self { Location { latitude: 28.6139, longitude: 77.2090 } }
    pub fn new_york() -> Self { Location { latitude: 40.7128, longitude: -74.0060 } }
    pub fn tokyo() -> Self { Location { latitude: 35.6762, longitude: 139.6503 } }
}

/// Derived view of one body at one instant. Recomputed on every query, never
/// stored by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanetPosition {
    pub body: CelestialBody,
    pub longitude: f64,
    pub degrees_in_sign: f64,
    pub sign: ZodiacSign,
    pub formatted: String,
    pub strength: f64,
    pub retrograde: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HouseCusp {
    pub house: u8,
    pub longitude: f64,
    pub sign: ZodiacSign,
    pub degrees_in_sign: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AspectInfo {
    pub aspect: Aspect,
    pub body_a: CelestialBody,
    pub body_b: CelestialBody,
    pub exact_angle: f64,
    pub color: &'static str,
}

/// One fully derived chart: positions, cusps and aspects for a single
/// timestamp and observer location. Read-only view for renderers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSnapshot {
    pub timestamp: DateTime<Utc>,
    pub location: Location,
    pub planets: HashMap<CelestialBody, PlanetPosition>,
    pub houses: Vec<HouseCusp>,
    pub aspects: Vec<AspectInfo>,
    pub source: PositionSource,
}
