//! The PMD model: flat, profile-constrained tables.
//!
//! Audio signals are integers 1..=255. Beds, objects and presentations
//! share one element ID space. Tables are kept sorted by ID so that
//! table equality is insensitive to insertion order.

use std::collections::{BTreeMap, BTreeSet};

use crate::adm::types::Gain;
use crate::pmd::profile::{
    MAX_PRESENTATION_ELEMENTS, MAX_PRESENTATION_NAMES, ModelConstraints, PmdProfile,
};
use crate::pmd::types::{
    EncoderParams, HeadphoneElement, Iat, Loudness, ObjectClass, Speaker, SpeakerConfig,
    Turnaround, Update, check_language,
};
use crate::utils::errors::PmdModelError;

/// One channel of a bed: which speaker it feeds, from which signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BedSource {
    pub target: Speaker,
    pub signal: u8,
    pub gain: Gain,
}

/// A fixed-layout multichannel element.
#[derive(Debug, Clone, PartialEq)]
pub struct Bed {
    pub id: u16,
    pub config: SpeakerConfig,
    /// May embed conformance tags, e.g. `Main $[ME]`.
    pub name: String,
    pub sources: Vec<BedSource>,
}

impl Bed {
    /// A bed wired 1:1 onto consecutive signals starting at `first_signal`.
    pub fn direct(id: u16, config: SpeakerConfig, name: &str, first_signal: u8) -> Self {
        let sources = config
            .speakers()
            .iter()
            .enumerate()
            .map(|(i, &target)| BedSource {
                target,
                signal: first_signal + i as u8,
                gain: Gain::UNITY,
            })
            .collect();
        Bed {
            id,
            config,
            name: name.to_string(),
            sources,
        }
    }
}

/// A mono object element with dynamic position and gain.
#[derive(Debug, Clone, PartialEq)]
pub struct PmdObject {
    pub id: u16,
    pub class: ObjectClass,
    pub name: String,
    pub signal: u8,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub gain: Gain,
    pub size: f64,
    pub diverge: bool,
    pub dynamic_updates: bool,
}

impl PmdObject {
    pub fn at_origin(id: u16, name: &str, signal: u8) -> Self {
        PmdObject {
            id,
            class: ObjectClass::Generic,
            name: name.to_string(),
            signal,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            gain: Gain::UNITY,
            size: 0.0,
            diverge: false,
            dynamic_updates: true,
        }
    }
}

/// One presentation name in one language.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PresentationName {
    pub language: String,
    pub text: String,
}

/// A user-selectable mix of elements.
#[derive(Debug, Clone, PartialEq)]
pub struct PmdPresentation {
    pub id: u16,
    pub config: SpeakerConfig,
    /// Two- or three-letter presentation language.
    pub language: String,
    pub elements: Vec<u16>,
    pub names: Vec<PresentationName>,
}

/// The PMD model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PmdModel {
    pub title: String,
    signals: BTreeSet<u8>,
    signal_names: BTreeMap<u8, String>,
    beds: Vec<Bed>,
    objects: Vec<PmdObject>,
    presentations: Vec<PmdPresentation>,
    loudness: BTreeMap<u16, Loudness>,
    iat: Option<Iat>,
    eac3_params: Vec<EncoderParams>,
    turnarounds: Vec<Turnaround>,
    headphones: Vec<HeadphoneElement>,
    updates: Vec<Update>,
    profile: PmdProfile,
    /// The configured ceiling; profiles may only narrow within it.
    max_constraints: ModelConstraints,
}

impl PmdModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constraints(constraints: ModelConstraints) -> Self {
        Self {
            profile: PmdProfile::with_constraints(constraints),
            max_constraints: constraints,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
            && self.beds.is_empty()
            && self.objects.is_empty()
            && self.presentations.is_empty()
            && self.iat.is_none()
            && self.updates.is_empty()
    }

    /// Empty every table; the configured constraints survive, the
    /// selected profile reverts to 0.
    pub fn clear(&mut self) {
        let constraints = self.max_constraints;
        *self = Self::with_constraints(constraints);
    }

    /// Drop only the per-frame state (XYZ updates).
    pub fn clear_updates(&mut self) {
        self.updates.clear();
    }

    pub fn profile(&self) -> &PmdProfile {
        &self.profile
    }

    /// Select a profile. The caps must fit the model's configured
    /// maxima; contents added afterwards are checked against them.
    pub fn set_profile(&mut self, number: u16, level: u16) -> Result<(), PmdModelError> {
        let max = self.max_constraints;
        self.profile.set(number, level, &max)
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    pub fn add_signal(&mut self, signal: u16) -> Result<(), PmdModelError> {
        let signal = u8::try_from(signal)
            .ok()
            .filter(|s| *s > 0)
            .ok_or(PmdModelError::SignalOutOfRange(signal))?;
        if self.signals.contains(&signal) {
            return Err(PmdModelError::DuplicateSignal(signal));
        }
        if self.signals.len() >= self.profile.constraints.max_signals {
            return Err(PmdModelError::TooManySignals {
                max: self.profile.constraints.max_signals,
            });
        }
        self.signals.insert(signal);
        Ok(())
    }

    /// Add `count` consecutive signals starting at 1.
    pub fn add_signals(&mut self, count: u16) -> Result<(), PmdModelError> {
        for signal in 1..=count {
            self.add_signal(signal)?;
        }
        Ok(())
    }

    pub fn set_signal_name(&mut self, signal: u8, name: &str) -> Result<(), PmdModelError> {
        if !self.signals.contains(&signal) {
            return Err(PmdModelError::UnknownSignal(signal));
        }
        self.signal_names.insert(signal, name.to_string());
        Ok(())
    }

    pub fn signals(&self) -> impl Iterator<Item = u8> + '_ {
        self.signals.iter().copied()
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    pub fn signal_name(&self, signal: u8) -> Option<&str> {
        self.signal_names.get(&signal).map(String::as_str)
    }

    pub fn element_count(&self) -> usize {
        self.beds.len() + self.objects.len()
    }

    fn element_exists(&self, id: u16) -> bool {
        self.bed(id).is_some() || self.object(id).is_some()
    }

    fn check_element_addable(&self, id: u16) -> Result<(), PmdModelError> {
        if self.element_exists(id) {
            return Err(PmdModelError::DuplicateElement(id));
        }
        if self.element_count() >= self.profile.constraints.max_elements {
            return Err(PmdModelError::TooManyElements {
                max: self.profile.constraints.max_elements,
            });
        }
        Ok(())
    }

    pub fn add_bed(&mut self, bed: Bed) -> Result<(), PmdModelError> {
        self.check_element_addable(bed.id)?;
        if self.beds.len() >= self.profile.constraints.max_beds {
            return Err(PmdModelError::TooManyElements {
                max: self.profile.constraints.max_beds,
            });
        }
        for source in &bed.sources {
            if !self.signals.contains(&source.signal) {
                return Err(PmdModelError::UnknownSignal(source.signal));
            }
        }
        let at = self.beds.partition_point(|b| b.id < bed.id);
        self.beds.insert(at, bed);
        Ok(())
    }

    pub fn add_object(&mut self, object: PmdObject) -> Result<(), PmdModelError> {
        self.check_element_addable(object.id)?;
        if self.objects.len() >= self.profile.constraints.max_objects {
            return Err(PmdModelError::TooManyElements {
                max: self.profile.constraints.max_objects,
            });
        }
        if !self.signals.contains(&object.signal) {
            return Err(PmdModelError::UnknownSignal(object.signal));
        }
        let at = self.objects.partition_point(|o| o.id < object.id);
        self.objects.insert(at, object);
        Ok(())
    }

    pub fn add_presentation(&mut self, pres: PmdPresentation) -> Result<(), PmdModelError> {
        if self.presentation(pres.id).is_some() {
            return Err(PmdModelError::DuplicatePresentation(pres.id));
        }
        if self.presentations.len() >= self.profile.constraints.max_presentations {
            return Err(PmdModelError::TooManyPresentations {
                max: self.profile.constraints.max_presentations,
            });
        }
        if pres.elements.len() > MAX_PRESENTATION_ELEMENTS {
            return Err(PmdModelError::TooManyPresentationElements {
                max: MAX_PRESENTATION_ELEMENTS,
            });
        }
        if pres.names.len() > MAX_PRESENTATION_NAMES {
            return Err(PmdModelError::TooManyPresentationNames {
                max: MAX_PRESENTATION_NAMES,
            });
        }
        check_language(&pres.language)?;
        for name in &pres.names {
            check_language(&name.language)?;
        }
        for element in &pres.elements {
            if !self.element_exists(*element) {
                return Err(PmdModelError::UnknownElement(*element));
            }
        }
        let mut pres = pres;
        pres.names.sort();
        let at = self.presentations.partition_point(|p| p.id < pres.id);
        self.presentations.insert(at, pres);
        Ok(())
    }

    pub fn set_loudness(&mut self, presentation: u16, loudness: Loudness) -> Result<(), PmdModelError> {
        if self.presentation(presentation).is_none() {
            return Err(PmdModelError::UnknownPresentation(presentation));
        }
        self.loudness.insert(presentation, loudness);
        Ok(())
    }

    pub fn set_iat(&mut self, iat: Iat) {
        self.iat = Some(iat);
    }

    pub fn add_eac3_params(&mut self, params: EncoderParams) -> Result<(), PmdModelError> {
        if self.eac3_params.len() >= self.profile.constraints.max_eac3 {
            return Err(PmdModelError::TooManyElements {
                max: self.profile.constraints.max_eac3,
            });
        }
        let at = self.eac3_params.partition_point(|p| p.id < params.id);
        self.eac3_params.insert(at, params);
        Ok(())
    }

    pub fn add_turnaround(&mut self, turnaround: Turnaround) -> Result<(), PmdModelError> {
        if self.turnarounds.len() >= self.profile.constraints.max_ed2_turnarounds {
            return Err(PmdModelError::TooManyElements {
                max: self.profile.constraints.max_ed2_turnarounds,
            });
        }
        let at = self.turnarounds.partition_point(|t| t.id < turnaround.id);
        self.turnarounds.insert(at, turnaround);
        Ok(())
    }

    pub fn add_headphone(&mut self, hed: HeadphoneElement) -> Result<(), PmdModelError> {
        if !self.element_exists(hed.audio_element) {
            return Err(PmdModelError::UnknownElement(hed.audio_element));
        }
        if self.headphones.len() >= self.profile.constraints.max_headphone {
            return Err(PmdModelError::TooManyElements {
                max: self.profile.constraints.max_headphone,
            });
        }
        let at = self
            .headphones
            .partition_point(|h| h.audio_element < hed.audio_element);
        self.headphones.insert(at, hed);
        Ok(())
    }

    pub fn add_update(&mut self, update: Update) -> Result<(), PmdModelError> {
        if self.object(update.element).is_none() {
            return Err(PmdModelError::UnknownElement(update.element));
        }
        if self.updates.len() >= self.profile.constraints.max_updates {
            return Err(PmdModelError::TooManyUpdates {
                max: self.profile.constraints.max_updates,
            });
        }
        let key = (update.sample_offset, update.element);
        let at = self
            .updates
            .partition_point(|u| (u.sample_offset, u.element) < key);
        self.updates.insert(at, update);
        Ok(())
    }

    /// Rename an existing bed or object.
    pub fn set_element_name(&mut self, id: u16, name: &str) -> Result<(), PmdModelError> {
        if let Some(bed) = self.beds.iter_mut().find(|b| b.id == id) {
            bed.name = name.to_string();
            return Ok(());
        }
        if let Some(object) = self.objects.iter_mut().find(|o| o.id == id) {
            object.name = name.to_string();
            return Ok(());
        }
        Err(PmdModelError::UnknownElement(id))
    }

    /// Attach one more name to an existing presentation.
    pub fn add_presentation_name(
        &mut self,
        id: u16,
        language: &str,
        text: &str,
    ) -> Result<(), PmdModelError> {
        check_language(language)?;
        let pres = self
            .presentations
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(PmdModelError::UnknownPresentation(id))?;
        if pres.names.len() >= MAX_PRESENTATION_NAMES {
            return Err(PmdModelError::TooManyPresentationNames {
                max: MAX_PRESENTATION_NAMES,
            });
        }
        pres.names.push(PresentationName {
            language: language.to_string(),
            text: text.to_string(),
        });
        pres.names.sort();
        Ok(())
    }

    pub fn bed(&self, id: u16) -> Option<&Bed> {
        self.beds.iter().find(|b| b.id == id)
    }

    pub fn object(&self, id: u16) -> Option<&PmdObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    pub fn presentation(&self, id: u16) -> Option<&PmdPresentation> {
        self.presentations.iter().find(|p| p.id == id)
    }

    pub fn beds(&self) -> &[Bed] {
        &self.beds
    }

    pub fn objects(&self) -> &[PmdObject] {
        &self.objects
    }

    pub fn presentations(&self) -> &[PmdPresentation] {
        &self.presentations
    }

    pub fn loudness(&self) -> impl Iterator<Item = (u16, &Loudness)> {
        self.loudness.iter().map(|(id, l)| (*id, l))
    }

    pub fn presentation_loudness(&self, presentation: u16) -> Option<&Loudness> {
        self.loudness.get(&presentation)
    }

    pub fn iat(&self) -> Option<&Iat> {
        self.iat.as_ref()
    }

    pub fn eac3_params(&self) -> &[EncoderParams] {
        &self.eac3_params
    }

    pub fn turnarounds(&self) -> &[Turnaround] {
        &self.turnarounds
    }

    pub fn headphones(&self) -> &[HeadphoneElement] {
        &self.headphones
    }

    pub fn updates(&self) -> &[Update] {
        &self.updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_elements(count: u16) -> PmdModel {
        let mut model = PmdModel::new();
        model.add_signals(16).unwrap();
        for id in 1..=count {
            model
                .add_object(PmdObject::at_origin(id, &format!("Obj {id}"), 1))
                .unwrap();
        }
        model
    }

    #[test]
    fn signal_range_enforced() {
        let mut model = PmdModel::new();
        assert!(matches!(
            model.add_signal(0),
            Err(PmdModelError::SignalOutOfRange(0))
        ));
        assert!(matches!(
            model.add_signal(256),
            Err(PmdModelError::SignalOutOfRange(256))
        ));
        model.add_signal(255).unwrap();
        assert!(matches!(
            model.add_signal(255),
            Err(PmdModelError::DuplicateSignal(255))
        ));
    }

    #[test]
    fn profile_clamp_holds_at_twenty_elements() {
        let mut model = model_with_elements(20);
        model.set_profile(1, 2).unwrap();
        assert_eq!(model.element_count(), 20);

        let result = model.add_object(PmdObject::at_origin(21, "Obj 21", 1));
        assert!(matches!(result, Err(PmdModelError::TooManyElements { max: 20 })));
        assert_eq!(model.element_count(), 20);
    }

    #[test]
    fn presentation_references_must_exist() {
        let mut model = model_with_elements(2);
        let pres = PmdPresentation {
            id: 1,
            config: SpeakerConfig::Surround51,
            language: "eng".to_string(),
            elements: vec![1, 2, 3],
            names: vec![],
        };
        assert!(matches!(
            model.add_presentation(pres),
            Err(PmdModelError::UnknownElement(3))
        ));
    }

    #[test]
    fn tables_sort_by_id() {
        let mut model = PmdModel::new();
        model.add_signals(4).unwrap();
        model.add_object(PmdObject::at_origin(9, "c", 1)).unwrap();
        model.add_object(PmdObject::at_origin(3, "a", 2)).unwrap();
        model.add_object(PmdObject::at_origin(5, "b", 3)).unwrap();

        let ids: Vec<u16> = model.objects().iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![3, 5, 9]);
    }

    #[test]
    fn updates_only_for_known_objects() {
        let mut model = model_with_elements(1);
        let update = Update {
            sample_offset: 64,
            element: 1,
            x: 0.5,
            y: 0.0,
            z: 0.0,
        };
        model.add_update(update).unwrap();

        let bad = Update { element: 7, ..update };
        assert!(matches!(
            model.add_update(bad),
            Err(PmdModelError::UnknownElement(7))
        ));
    }

    #[test]
    fn clear_preserves_constraints() {
        let mut constraints = ModelConstraints::max();
        constraints.max_elements = 30;
        let mut model = PmdModel::with_constraints(constraints);
        model.add_signals(2).unwrap();
        model.add_object(PmdObject::at_origin(1, "x", 1)).unwrap();

        model.clear();
        assert!(model.is_empty());
        assert_eq!(model.profile().constraints.max_elements, 30);
        assert_eq!(model.profile().number, 0);
    }
}
