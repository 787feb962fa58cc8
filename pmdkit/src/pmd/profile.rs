//! Profile and level constraints for PMD models.
//!
//! A profile caps the number of things a model may hold. Profile 0 is
//! the uncapped default; profile 1 comes in three levels sized for
//! emission workflows.

use crate::utils::errors::PmdModelError;

/// Compile-time table maxima (profile 0).
pub const MAX_SIGNALS: usize = 255;
pub const MAX_AUDIO_ELEMENTS: usize = 4095;
pub const MAX_PRESENTATIONS: usize = 511;
pub const MAX_UPDATES: usize = 160;
pub const MAX_EAC3_ENCODING_PARAMETERS: usize = 15;
pub const MAX_ED2_TURNAROUNDS: usize = 15;
pub const MAX_PRESENTATION_ELEMENTS: usize = 63;
pub const MAX_PRESENTATION_NAMES: usize = 16;

/// Entity-count ceilings for one model instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConstraints {
    pub max_elements: usize,
    pub max_signals: usize,
    pub max_beds: usize,
    pub max_objects: usize,
    pub max_presentations: usize,
    pub max_updates: usize,
    pub max_eac3: usize,
    pub max_ed2_turnarounds: usize,
    pub max_headphone: usize,
    pub max_presentation_names: usize,
}

impl ModelConstraints {
    pub fn max() -> Self {
        Self {
            max_elements: MAX_AUDIO_ELEMENTS,
            max_signals: MAX_SIGNALS,
            max_beds: MAX_AUDIO_ELEMENTS,
            max_objects: MAX_AUDIO_ELEMENTS,
            max_presentations: MAX_PRESENTATIONS,
            max_updates: MAX_UPDATES,
            max_eac3: MAX_EAC3_ENCODING_PARAMETERS,
            max_ed2_turnarounds: MAX_ED2_TURNAROUNDS,
            max_headphone: MAX_AUDIO_ELEMENTS,
            max_presentation_names: MAX_PRESENTATIONS * MAX_PRESENTATION_NAMES,
        }
    }
}

impl Default for ModelConstraints {
    fn default() -> Self {
        Self::max()
    }
}

/// The active profile of a model: number, level and the constraint set
/// it implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmdProfile {
    pub number: u16,
    pub level: u16,
    pub constraints: ModelConstraints,
}

impl Default for PmdProfile {
    fn default() -> Self {
        Self {
            number: 0,
            level: 0,
            constraints: ModelConstraints::max(),
        }
    }
}

impl PmdProfile {
    pub fn with_constraints(constraints: ModelConstraints) -> Self {
        Self {
            number: 0,
            level: 0,
            constraints,
        }
    }

    /// Select a profile. `max` is the model's own configured ceiling; a
    /// profile whose caps exceed it fails and leaves `self` unchanged.
    pub fn set(
        &mut self,
        number: u16,
        level: u16,
        max: &ModelConstraints,
    ) -> Result<(), PmdModelError> {
        let candidate = match (number, level) {
            (0, 0) => PmdProfile::with_constraints(*max),
            (1, level @ 1..=3) => {
                let (elements, presentations) = match level {
                    1 => (10, 8),
                    2 => (20, 16),
                    _ => (50, 48),
                };
                let mut p = PmdProfile::with_constraints(*max);
                p.number = 1;
                p.level = level;
                p.constraints.max_elements = elements;
                p.constraints.max_beds = elements;
                p.constraints.max_objects = elements;
                p.constraints.max_signals = 16;
                p.constraints.max_presentations = presentations;
                p
            }
            _ => return Err(PmdModelError::UnknownProfile { number, level }),
        };

        let c = &candidate.constraints;
        if c.max_elements > max.max_elements
            || c.max_signals > max.max_signals
            || c.max_beds > max.max_beds
            || c.max_objects > max.max_objects
            || c.max_presentations > max.max_presentations
        {
            return Err(PmdModelError::ProfileTooLarge { number, level });
        }

        *self = candidate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_1_levels() {
        let max = ModelConstraints::max();
        let mut profile = PmdProfile::default();

        profile.set(1, 1, &max).unwrap();
        assert_eq!(profile.constraints.max_elements, 10);
        assert_eq!(profile.constraints.max_presentations, 8);
        assert_eq!(profile.constraints.max_signals, 16);

        profile.set(1, 3, &max).unwrap();
        assert_eq!(profile.constraints.max_elements, 50);
        assert_eq!(profile.constraints.max_presentations, 48);

        profile.set(0, 0, &max).unwrap();
        assert_eq!(profile.constraints.max_elements, MAX_AUDIO_ELEMENTS);
    }

    #[test]
    fn unknown_and_oversized_profiles_fail() {
        let max = ModelConstraints::max();
        let mut profile = PmdProfile::default();

        assert!(matches!(
            profile.set(2, 1, &max),
            Err(PmdModelError::UnknownProfile { .. })
        ));
        assert!(matches!(
            profile.set(1, 4, &max),
            Err(PmdModelError::UnknownProfile { .. })
        ));

        // A model configured smaller than the profile's caps rejects it.
        let mut small = ModelConstraints::max();
        small.max_elements = 8;
        let before = profile;
        assert!(matches!(
            profile.set(1, 2, &small),
            Err(PmdModelError::ProfileTooLarge { .. })
        ));
        assert_eq!(profile, before);
    }
}
