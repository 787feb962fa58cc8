//! PMD → core model conversion.
//!
//! Every PMD element number `n` maps onto the core primary sequence
//! `0x1000 + n`, which is what makes the conversion invertible.

use crate::adm::entity::{EntityBody, TargetGroupConfig};
use crate::adm::id::{AudioType, EntityId, EntityType};
use crate::adm::model::{CoreModel, PresentationRelation};
use crate::adm::types::{AdmTime, EntityName, Gain, Position};
use crate::pmd::model::PmdModel;
use crate::pmd::types::{ContentKind, UPDATE_TIME_GRANULE, Update};
use crate::utils::errors::ConvertError;

const ELEMENT_ID_BASE: u32 = 0x1000;
const SAMPLE_RATE: u32 = 48_000;

pub(crate) fn core_element_id(pmd_id: u16) -> EntityId {
    EntityId::generic(EntityType::Object, ELEMENT_ID_BASE + pmd_id as u32)
}

pub(crate) fn core_presentation_id(pmd_id: u16) -> EntityId {
    EntityId::generic(EntityType::Presentation, ELEMENT_ID_BASE + pmd_id as u32)
}

fn update_time(update: &Update) -> (AdmTime, AdmTime) {
    let offset = update.sample_offset - update.sample_offset % UPDATE_TIME_GRANULE;
    (
        AdmTime::new(0, 0, 0, offset as u32, SAMPLE_RATE),
        AdmTime::new(0, 0, 0, UPDATE_TIME_GRANULE as u32, SAMPLE_RATE),
    )
}

/// Rebuild `core` from `pmd`. The core model is cleared first.
pub fn convert_to_core_model(pmd: &PmdModel, core: &mut CoreModel) -> Result<(), ConvertError> {
    core.clear();

    // Signals become Sources in group 1, each with its own AudioTrack.
    let group = core.add_named_entity(
        EntityBody::SourceGroup { group: 1 },
        EntityId::NULL,
        Some(EntityName::new("Transport", None)),
    )?;

    let mut track_of_signal = [EntityId::NULL; 256];
    for signal in pmd.signals() {
        let source = core.add_source(1, signal as u16, EntityId::NULL)?;
        let track = core.add_entity(
            EntityBody::AudioTrack {
                sample_rate: Some(SAMPLE_RATE),
                bit_depth: Some(24),
            },
            EntityId::NULL,
        )?;
        if let Some(name) = pmd.signal_name(signal) {
            core.add_name(track, EntityName::new(name, None))?;
        }
        core.add_source_relation(group, source, track)?;
        track_of_signal[signal as usize] = track;
    }

    for bed in pmd.beds() {
        let element = core.add_named_entity(
            EntityBody::AudioElement {
                gain: Gain::UNITY,
                interaction: None,
            },
            core_element_id(bed.id),
            Some(EntityName::new(&bed.name, None)),
        )?;
        let pack = core.add_named_entity(
            EntityBody::TargetGroup {
                config: TargetGroupConfig::Speaker(bed.config),
            },
            EntityId::NULL,
            Some(EntityName::new(&bed.name, None)),
        )?;

        for source in &bed.sources {
            let target = core.add_named_entity(
                EntityBody::Target {
                    audio_type: AudioType::DirectSpeakers,
                    speaker_label: source.target.label().to_string(),
                },
                EntityId::NULL,
                Some(EntityName::new(source.target.label(), None)),
            )?;
            core.add_block_update(
                target,
                source.target.position(),
                source.gain,
                None,
                EntityId::NULL,
            )?;
            core.add_element_relation(element, pack, target, track_of_signal[source.signal as usize])?;
        }
    }

    for object in pmd.objects() {
        let element = core.add_named_entity(
            EntityBody::AudioElement {
                gain: object.gain,
                interaction: None,
            },
            core_element_id(object.id),
            Some(EntityName::new(&object.name, None)),
        )?;
        let pack = core.add_named_entity(
            EntityBody::TargetGroup {
                config: TargetGroupConfig::Object {
                    class: object.class,
                    is_dynamic: object.dynamic_updates,
                },
            },
            EntityId::NULL,
            Some(EntityName::new(&object.name, None)),
        )?;
        let target = core.add_named_entity(
            EntityBody::Target {
                audio_type: AudioType::Objects,
                speaker_label: String::new(),
            },
            EntityId::NULL,
            Some(EntityName::new(&object.name, None)),
        )?;

        core.add_block_update(
            target,
            Position::cartesian(object.x, object.y, object.z),
            Gain::UNITY,
            None,
            EntityId::NULL,
        )?;
        for update in pmd.updates().iter().filter(|u| u.element == object.id) {
            core.add_block_update(
                target,
                Position::cartesian(update.x, update.y, update.z),
                Gain::UNITY,
                Some(update_time(update)),
                EntityId::NULL,
            )?;
        }

        core.add_element_relation(element, pack, target, track_of_signal[object.signal as usize])?;
    }

    for pres in pmd.presentations() {
        let presentation = core.add_entity(
            EntityBody::Presentation {
                loudness: pmd.presentation_loudness(pres.id).copied(),
            },
            core_presentation_id(pres.id),
        )?;

        // The name matching the presentation language is primary,
        // everything else becomes a label.
        let primary = pres
            .names
            .iter()
            .position(|n| n.language == pres.language)
            .unwrap_or(0);
        for (i, name) in pres.names.iter().enumerate() {
            let entry = EntityName::new(&name.text, Some(&name.language));
            if i == primary {
                core.add_name(presentation, entry)?;
            } else {
                core.add_label(presentation, entry)?;
            }
        }

        for element_id in &pres.elements {
            let kind = match pmd.object(*element_id) {
                Some(object) => object.class.content_kind(),
                None => ContentKind::Mixed,
            };
            let element_name = pmd
                .object(*element_id)
                .map(|o| o.name.clone())
                .or_else(|| pmd.bed(*element_id).map(|b| b.name.clone()))
                .unwrap_or_default();

            let content = core.add_named_entity(
                EntityBody::Content {
                    kind,
                    language: Some(pres.language.clone()),
                    loudness: None,
                },
                EntityId::NULL,
                Some(EntityName::new(element_name, Some(&pres.language))),
            )?;

            core.add_presentation_relation(PresentationRelation {
                presentation,
                content,
                element_group: EntityId::NULL,
                element: core_element_id(*element_id),
                alt_value_set: EntityId::NULL,
                comp_ref: EntityId::NULL,
            })?;
        }
    }

    Ok(())
}
