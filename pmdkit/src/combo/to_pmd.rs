//! Core → PMD conversion, the inverse of [`super::to_core`].
//!
//! Fails on constructs PMD cannot carry: audio types other than
//! DirectSpeakers/Objects, spherical positions, element numbers
//! outside the PMD mapping range, table overflow.

use log::warn;

use crate::adm::entity::{EntityBody, TargetGroupConfig};
use crate::adm::id::{EntityId, EntityType};
use crate::adm::model::CoreModel;
use crate::adm::types::Position;
use crate::pmd::model::{Bed, BedSource, PmdModel, PmdObject, PmdPresentation, PresentationName};
use crate::pmd::types::{Speaker, SpeakerConfig};
use crate::utils::errors::ConvertError;

const ELEMENT_ID_BASE: u32 = 0x1000;

fn pmd_element_number(id: EntityId) -> Result<u16, ConvertError> {
    id.primary()
        .checked_sub(ELEMENT_ID_BASE)
        .and_then(|n| u16::try_from(n).ok())
        .filter(|n| *n > 0)
        .ok_or(ConvertError::ElementIdUnmappable(id))
}

fn cartesian(position: &Position) -> Result<(f64, f64, f64), ConvertError> {
    match *position {
        Position::Cartesian { x, y, z } => Ok((x, y, z)),
        Position::Spherical { .. } => Err(ConvertError::SphericalPosition),
    }
}

/// Rebuild `pmd` from `core`. The PMD model is cleared first; `title`
/// overrides the (otherwise empty) model title.
pub fn convert_to_pmd_model(
    core: &CoreModel,
    pmd: &mut PmdModel,
    title: Option<&str>,
) -> Result<(), ConvertError> {
    pmd.clear();
    if let Some(title) = title {
        pmd.set_title(title);
    }

    // Sources become signals; remember which track carries which signal.
    let mut signal_of_track: std::collections::BTreeMap<EntityId, u8> =
        std::collections::BTreeMap::new();
    for relation in core.source_relations() {
        let source = core
            .get(relation.source)
            .ok_or(ConvertError::MissingEntity(relation.source))?;
        let &EntityBody::Source { channel, .. } = &source.body else {
            return Err(ConvertError::MissingEntity(relation.source));
        };
        pmd.add_signal(channel)?;
        signal_of_track.insert(relation.track, channel as u8);

        if let Some(track) = core.get(relation.track) {
            if let Some(name) = track.names.primary() {
                pmd.set_signal_name(channel as u8, &name.text)?;
            }
        }
    }

    for element_id in core.audio_element_ids() {
        let element = core
            .get(element_id)
            .ok_or(ConvertError::MissingEntity(element_id))?;
        let &EntityBody::AudioElement { gain, .. } = &element.body else {
            continue;
        };
        let name = element
            .names
            .primary()
            .map(|n| n.text.clone())
            .unwrap_or_default();

        let rows: Vec<_> = core
            .element_relations()
            .filter(|r| r.element == element_id)
            .collect();
        let Some(first) = rows.first() else {
            return Err(ConvertError::UnwiredElement(element_id));
        };

        let pack = core
            .get(first.target_group)
            .ok_or(ConvertError::MissingEntity(first.target_group))?;
        let &EntityBody::TargetGroup { config } = &pack.body else {
            return Err(ConvertError::MissingEntity(first.target_group));
        };

        let number = pmd_element_number(element_id)?;
        match config {
            TargetGroupConfig::Speaker(config) => {
                let mut sources = Vec::with_capacity(rows.len());
                for row in &rows {
                    let target = core
                        .get(row.target)
                        .ok_or(ConvertError::MissingEntity(row.target))?;
                    let EntityBody::Target { speaker_label, .. } = &target.body else {
                        return Err(ConvertError::MissingEntity(row.target));
                    };
                    let speaker = Speaker::from_label(speaker_label).ok_or_else(|| {
                        ConvertError::UnsupportedSpeakerConfig(speaker_label.clone())
                    })?;

                    let gain = core
                        .children(row.target, EntityType::BlockUpdate)
                        .first()
                        .and_then(|update| match update.body {
                            EntityBody::BlockUpdate { gain, .. } => Some(gain),
                            _ => None,
                        })
                        .unwrap_or_default();

                    let signal = *signal_of_track
                        .get(&row.track)
                        .ok_or(ConvertError::MissingEntity(row.track))?;
                    sources.push(BedSource {
                        target: speaker,
                        signal,
                        gain,
                    });
                }

                pmd.add_bed(Bed {
                    id: number,
                    config,
                    name,
                    sources,
                })?;
            }
            TargetGroupConfig::Object { class, is_dynamic } => {
                let row = first;
                let signal = *signal_of_track
                    .get(&row.track)
                    .ok_or(ConvertError::MissingEntity(row.track))?;

                let updates = core.children(row.target, EntityType::BlockUpdate);
                let mut initial = None;
                let mut dynamic = Vec::new();
                for update in updates {
                    let EntityBody::BlockUpdate { position, time, .. } = &update.body else {
                        continue;
                    };
                    match time {
                        None if initial.is_none() => initial = Some(cartesian(position)?),
                        None => warn!("object {element_id} has several static block updates"),
                        Some((start, _)) => dynamic.push((start.samples, cartesian(position)?)),
                    }
                }
                let (x, y, z) = initial.unwrap_or((0.0, 0.0, 0.0));

                pmd.add_object(PmdObject {
                    id: number,
                    class,
                    name,
                    signal,
                    x,
                    y,
                    z,
                    gain,
                    size: 0.0,
                    diverge: false,
                    dynamic_updates: is_dynamic,
                })?;

                for (offset, (x, y, z)) in dynamic {
                    pmd.add_update(crate::pmd::types::Update {
                        sample_offset: offset as u16,
                        element: number,
                        x,
                        y,
                        z,
                    })?;
                }
            }
        }
    }

    for presentation_id in core.entity_ids(EntityType::Presentation) {
        let presentation = core
            .get(presentation_id)
            .ok_or(ConvertError::MissingEntity(presentation_id))?;
        let EntityBody::Presentation { loudness } = &presentation.body else {
            continue;
        };
        let number = pmd_element_number(presentation_id)?;

        let rows: Vec<_> = core
            .presentation_relations()
            .filter(|r| r.presentation == presentation_id)
            .collect();

        let mut elements = Vec::new();
        let mut language = None;
        let mut config = SpeakerConfig::Stereo;
        for row in &rows {
            if row.element.is_null() {
                continue;
            }
            elements.push(pmd_element_number(row.element)?);

            if language.is_none() {
                if let Some(content) = core.get(row.content) {
                    if let EntityBody::Content {
                        language: Some(lang),
                        ..
                    } = &content.body
                    {
                        language = Some(lang.clone());
                    }
                }
            }

            // The widest referenced bed determines the presentation config.
            for relation in core.element_relations().filter(|r| r.element == row.element) {
                if let Some(EntityBody::TargetGroup {
                    config: TargetGroupConfig::Speaker(bed_config),
                }) = core.get(relation.target_group).map(|e| &e.body)
                {
                    if bed_config.channel_count() > config.channel_count() {
                        config = *bed_config;
                    }
                }
            }
        }

        let mut names = Vec::new();
        for entry in presentation.names.names().iter().chain(presentation.names.labels()) {
            names.push(PresentationName {
                language: entry.language.clone().unwrap_or_else(|| "und".to_string()),
                text: entry.text.clone(),
            });
        }

        pmd.add_presentation(PmdPresentation {
            id: number,
            config,
            language: language.unwrap_or_else(|| "und".to_string()),
            elements,
            names,
        })?;

        if let Some(loudness) = loudness {
            pmd.set_loudness(number, *loudness)?;
        }
    }

    Ok(())
}
