//! Value types shared by the model entities.
//!
//! Gain, position, SMPTE-style time and the bounded name/label lists.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::utils::errors::ModelError;

/// Unit carried by a [`Gain`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GainUnit {
    #[default]
    Linear,
    Decibels,
}

/// A gain value with its unit. Unity is exactly 1.0 linear or 0.0 dB.
///
/// Comparison converts both sides to the linear domain first, so
/// `Gain::db(0.0) == Gain::linear(1.0)`.
#[derive(Debug, Clone, Copy)]
pub struct Gain {
    pub value: f64,
    pub unit: GainUnit,
}

impl Default for Gain {
    fn default() -> Self {
        Gain::UNITY
    }
}

impl Gain {
    pub const UNITY: Gain = Gain {
        value: 1.0,
        unit: GainUnit::Linear,
    };

    pub fn linear(value: f64) -> Self {
        Gain {
            value,
            unit: GainUnit::Linear,
        }
    }

    pub fn db(value: f64) -> Self {
        Gain {
            value,
            unit: GainUnit::Decibels,
        }
    }

    pub fn as_linear(self) -> f64 {
        match self.unit {
            GainUnit::Linear => self.value,
            GainUnit::Decibels => 10f64.powf(self.value / 20.0),
        }
    }

    pub fn as_db(self) -> f64 {
        match self.unit {
            GainUnit::Linear => 20.0 * self.value.log10(),
            GainUnit::Decibels => self.value,
        }
    }

    pub fn is_unity(self) -> bool {
        match self.unit {
            GainUnit::Linear => self.value == 1.0,
            GainUnit::Decibels => self.value == 0.0,
        }
    }
}

impl PartialEq for Gain {
    fn eq(&self, other: &Self) -> bool {
        self.as_linear() == other.as_linear()
    }
}

impl PartialOrd for Gain {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.as_linear().partial_cmp(&other.as_linear())
    }
}

/// A position in either cartesian or spherical form.
///
/// The two forms are never converted implicitly; whichever form the
/// producer chose is preserved through serialization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Position {
    Cartesian { x: f64, y: f64, z: f64 },
    Spherical { azimuth: f64, elevation: f64, distance: f64 },
}

impl Position {
    pub const ORIGIN: Position = Position::Cartesian {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn cartesian(x: f64, y: f64, z: f64) -> Self {
        Position::Cartesian { x, y, z }
    }

    pub fn is_cartesian(&self) -> bool {
        matches!(self, Position::Cartesian { .. })
    }

    /// Coordinate triple in declaration order (x,y,z or az,el,dist).
    pub fn coordinates(&self) -> [f64; 3] {
        match *self {
            Position::Cartesian { x, y, z } => [x, y, z],
            Position::Spherical {
                azimuth,
                elevation,
                distance,
            } => [azimuth, elevation, distance],
        }
    }
}

/// A time expressed as `hh:mm:ss` plus a sample offset at a named rate.
///
/// Textual form is `hh:mm:ss.<samples>S<rate>`, where the samples field
/// is five to nine digits and the rate field five to nine digits, e.g.
/// `00:03:45.01536S48000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdmTime {
    pub hours: u32,
    pub minutes: u8,
    pub seconds: u8,
    pub samples: u32,
    pub sample_rate: u32,
}

impl AdmTime {
    pub fn new(hours: u32, minutes: u8, seconds: u8, samples: u32, sample_rate: u32) -> Self {
        Self {
            hours,
            minutes,
            seconds,
            samples,
            sample_rate,
        }
    }
}

impl fmt::Display for AdmTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}.{:05}S{:05}",
            self.hours, self.minutes, self.seconds, self.samples, self.sample_rate
        )
    }
}

impl FromStr for AdmTime {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ModelError::InvalidArgument("malformed time string");

        let (hms, tail) = s.split_once('.').ok_or_else(bad)?;
        let (samples, rate) = tail.split_once('S').ok_or_else(bad)?;

        let mut parts = hms.split(':');
        let hours = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let minutes: u8 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let seconds: u8 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        if parts.next().is_some() || minutes > 59 || seconds > 59 {
            return Err(bad());
        }

        if !(5..=9).contains(&samples.len()) || !(5..=9).contains(&rate.len()) {
            return Err(bad());
        }

        Ok(AdmTime {
            hours,
            minutes,
            seconds,
            samples: samples.parse().map_err(|_| bad())?,
            sample_rate: rate.parse().map_err(|_| bad())?,
        })
    }
}

/// One name or label entry: text plus an optional BCP-47 language tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityName {
    pub text: String,
    pub language: Option<String>,
}

impl EntityName {
    pub fn new(text: impl Into<String>, language: Option<&str>) -> Self {
        Self {
            text: text.into(),
            language: language.map(str::to_string),
        }
    }
}

/// Bounded list of names and labels for one entity.
///
/// Labels (secondary names) may only follow a primary name, and
/// the total entry count never exceeds the entity's limit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NameSet {
    names: Vec<EntityName>,
    labels: Vec<EntityName>,
    max_names: usize,
    limit: usize,
}

impl NameSet {
    pub fn with_limits(max_names: usize, limit: usize) -> Self {
        Self {
            names: Vec::new(),
            labels: Vec::new(),
            max_names,
            limit,
        }
    }

    pub fn add_name(&mut self, name: EntityName) -> Result<(), ModelError> {
        if self.names.len() >= self.max_names || self.total() >= self.limit {
            return Err(ModelError::InvalidArgument("name limit reached"));
        }
        self.names.push(name);
        Ok(())
    }

    pub fn add_label(&mut self, label: EntityName) -> Result<(), ModelError> {
        if self.max_names > 0 && self.names.is_empty() {
            return Err(ModelError::LabelBeforeName);
        }
        if self.total() >= self.limit {
            return Err(ModelError::InvalidArgument("name limit reached"));
        }
        self.labels.push(label);
        Ok(())
    }

    pub fn total(&self) -> usize {
        self.names.len() + self.labels.len()
    }

    pub fn primary(&self) -> Option<&EntityName> {
        self.names.first()
    }

    pub fn names(&self) -> &[EntityName] {
        &self.names
    }

    pub fn labels(&self) -> &[EntityName] {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_unity_forms_are_equal() {
        assert_eq!(Gain::db(0.0), Gain::linear(1.0));
        assert!(Gain::db(-6.0) < Gain::linear(1.0));
        assert!(Gain::db(6.0) > Gain::UNITY);
    }

    #[test]
    fn gain_db_round_trip_within_one_ulp() {
        let mut x = -120.0f64;
        while x <= 40.0 {
            let rt = Gain::linear(Gain::db(x).as_linear()).as_db();
            let ulp = (x.abs().max(1.0)) * f64::EPSILON;
            assert!((rt - x).abs() <= ulp, "{x} -> {rt}");
            x += 0.37;
        }
    }

    #[test]
    fn time_text_round_trip() {
        let t = AdmTime::new(0, 3, 45, 1536, 48000);
        assert_eq!(t.to_string(), "00:03:45.01536S48000");
        assert_eq!("00:03:45.01536S48000".parse::<AdmTime>().unwrap(), t);

        let t = "01:59:00.048000S192000".parse::<AdmTime>().unwrap();
        assert_eq!(t.samples, 48_000);
        assert_eq!(t.sample_rate, 192_000);

        assert!("00:00:00.123S48000".parse::<AdmTime>().is_err()); // samples field too short
        assert!("00:61:00.00000S48000".parse::<AdmTime>().is_err());
    }

    #[test]
    fn labels_never_precede_names() {
        let mut names = NameSet::with_limits(1, 4);
        assert!(matches!(
            names.add_label(EntityName::new("Hörfilm", Some("de"))),
            Err(ModelError::LabelBeforeName)
        ));

        names.add_name(EntityName::new("Main", Some("eng"))).unwrap();
        names.add_label(EntityName::new("Principal", Some("spa"))).unwrap();
        assert_eq!(names.total(), 2);

        assert!(names.add_name(EntityName::new("Other", None)).is_err());
    }

    #[test]
    fn label_only_sets_permit_labels_without_names() {
        let mut names = NameSet::with_limits(0, 2);
        names.add_label(EntityName::new("alt", Some("eng"))).unwrap();
        assert!(names.add_name(EntityName::new("x", None)).is_err());
    }
}
