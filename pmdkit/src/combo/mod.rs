//! The combo container: one PMD model and one core model with lazy,
//! state-tracked conversion between them.
//!
//! At most one side is primary at a time. Reading the other side
//! converts on demand; the converted view regenerates whenever the
//! primary has changed, and mutating a converted side is an error
//! until the container is cleared.

use log::debug;

use crate::adm::model::CoreModel;
use crate::pmd::model::PmdModel;
use crate::utils::errors::ConvertError;

pub mod to_core;
pub mod to_pmd;

/// Conversion state of one side of the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionState {
    Empty,
    Primary,
    Converted,
    HasContent,
}

/// A paired PMD + core model.
#[derive(Debug, Default)]
pub struct ComboModel {
    pmd: PmdModel,
    core: CoreModel,
    pmd_state: Option<ConversionState>,
    core_state: Option<ConversionState>,
    /// False when the converted side is stale relative to the primary.
    pmd_current: bool,
    core_current: bool,
}

impl ComboModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing PMD model; its content is primary-eligible.
    pub fn with_pmd(pmd: PmdModel) -> Self {
        let has_content = !pmd.is_empty();
        Self {
            pmd,
            pmd_state: has_content.then_some(ConversionState::HasContent),
            ..Self::default()
        }
    }

    /// Wrap an existing core model; its content is primary-eligible.
    pub fn with_core(core: CoreModel) -> Self {
        let has_content = !core.is_empty();
        Self {
            core,
            core_state: has_content.then_some(ConversionState::HasContent),
            ..Self::default()
        }
    }

    pub fn pmd_state(&self) -> ConversionState {
        self.pmd_state.unwrap_or(ConversionState::Empty)
    }

    pub fn core_state(&self) -> ConversionState {
        self.core_state.unwrap_or(ConversionState::Empty)
    }

    /// Mutable access to the PMD side, making it primary. Fails if the
    /// PMD side is currently a conversion of the core side.
    pub fn writable_pmd(&mut self) -> Result<&mut PmdModel, ConvertError> {
        if self.pmd_state() == ConversionState::Converted {
            return Err(ConvertError::ConvertedSideReadOnly("PMD"));
        }
        self.pmd_state = Some(ConversionState::Primary);
        self.core_current = false;
        Ok(&mut self.pmd)
    }

    /// Mutable access to the core side, making it primary.
    pub fn writable_core(&mut self) -> Result<&mut CoreModel, ConvertError> {
        if self.core_state() == ConversionState::Converted {
            return Err(ConvertError::ConvertedSideReadOnly("core"));
        }
        self.core_state = Some(ConversionState::Primary);
        self.pmd_current = false;
        Ok(&mut self.core)
    }

    /// Read the PMD side, converting from the core side if necessary.
    pub fn ensure_readable_pmd(&mut self) -> Result<&PmdModel, ConvertError> {
        match self.pmd_state() {
            ConversionState::Primary | ConversionState::HasContent => Ok(&self.pmd),
            ConversionState::Converted if self.pmd_current => Ok(&self.pmd),
            _ => {
                if matches!(
                    self.core_state(),
                    ConversionState::Primary | ConversionState::HasContent
                ) {
                    debug!("converting core model to PMD");
                    to_pmd::convert_to_pmd_model(&self.core, &mut self.pmd, None)?;
                    self.pmd_state = Some(ConversionState::Converted);
                    self.pmd_current = true;
                }
                Ok(&self.pmd)
            }
        }
    }

    /// Read the core side, converting from the PMD side if necessary.
    pub fn ensure_readable_core(&mut self) -> Result<&CoreModel, ConvertError> {
        match self.core_state() {
            ConversionState::Primary | ConversionState::HasContent => Ok(&self.core),
            ConversionState::Converted if self.core_current => Ok(&self.core),
            _ => {
                if matches!(
                    self.pmd_state(),
                    ConversionState::Primary | ConversionState::HasContent
                ) {
                    debug!("converting PMD model to core");
                    to_core::convert_to_core_model(&self.pmd, &mut self.core)?;
                    self.core_state = Some(ConversionState::Converted);
                    self.core_current = true;
                }
                Ok(&self.core)
            }
        }
    }

    /// Direct read access, without conversion.
    pub fn pmd_model(&self) -> &PmdModel {
        &self.pmd
    }

    /// Direct read access, without conversion.
    pub fn core_model(&self) -> &CoreModel {
        &self.core
    }

    /// Empty both sides and reset the state machine.
    pub fn clear(&mut self) {
        self.pmd.clear();
        self.core.clear();
        self.pmd_state = None;
        self.core_state = None;
        self.pmd_current = false;
        self.core_current = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmd::model::{Bed, PmdObject, PmdPresentation};
    use crate::pmd::types::SpeakerConfig;

    fn small_pmd() -> PmdModel {
        let mut pmd = PmdModel::new();
        pmd.set_title("Round trip small");
        pmd.add_signals(16).unwrap();
        pmd.add_bed(Bed::direct(1, SpeakerConfig::Surround514, "Bed 1", 1))
            .unwrap();
        for i in 0..5u16 {
            pmd.add_object(PmdObject::at_origin(2 + i, &format!("Obj {}", i + 1), 11 + i as u8))
                .unwrap();
        }
        pmd.add_presentation(PmdPresentation {
            id: 1,
            config: SpeakerConfig::Surround514,
            language: "eng".to_string(),
            elements: vec![1, 2, 3, 4, 5, 6],
            names: vec![],
        })
        .unwrap();
        pmd
    }

    #[test]
    fn conversion_states_track_the_primary() {
        let mut combo = ComboModel::new();
        combo.writable_pmd().unwrap().add_signals(2).unwrap();
        assert_eq!(combo.pmd_state(), ConversionState::Primary);
        assert_eq!(combo.core_state(), ConversionState::Empty);

        combo.ensure_readable_core().unwrap();
        assert_eq!(combo.pmd_state(), ConversionState::Primary);
        assert_eq!(combo.core_state(), ConversionState::Converted);

        // The converted side is read-only until cleared.
        assert!(matches!(
            combo.writable_core(),
            Err(ConvertError::ConvertedSideReadOnly("core"))
        ));

        combo.clear();
        assert_eq!(combo.core_state(), ConversionState::Empty);
        combo.writable_core().unwrap();
        assert_eq!(combo.core_state(), ConversionState::Primary);
    }

    #[test]
    fn primary_writes_invalidate_the_conversion() {
        let mut combo = ComboModel::new();
        combo.writable_pmd().unwrap().add_signals(2).unwrap();
        combo.ensure_readable_core().unwrap();
        let sources_before = combo.core_model().sources().count();
        assert_eq!(sources_before, 2);

        combo.writable_pmd().unwrap().add_signal(3).unwrap();
        combo.ensure_readable_core().unwrap();
        assert_eq!(combo.core_model().sources().count(), 3);
    }

    #[test]
    fn round_trip_small_model() {
        let pmd = small_pmd();
        let mut combo = ComboModel::with_pmd(pmd.clone());

        combo.ensure_readable_core().unwrap();
        let core = combo.core_model();
        let mut back = PmdModel::new();
        to_pmd::convert_to_pmd_model(core, &mut back, Some("Round trip small")).unwrap();

        assert_eq!(back, pmd);
    }
}
