//! KLV burst reader.
//!
//! Payloads are staged first and applied to the model in dependency
//! order (signals before beds, beds before presentations, ...), so the
//! decoder does not care in which order a writer emitted them.

use std::io::Cursor;

use bitstream_io::{BigEndian, BitRead, BitReader};
use log::{debug, warn};

use crate::klv::{PayloadTag, UL_DOLBY_PRIVATE, UL_SMPTE_2109, read_ber_length};
use crate::pmd::model::{Bed, BedSource, PmdModel, PmdObject, PmdPresentation};
use crate::pmd::types::{
    EncoderParams, HeadphoneElement, Iat, Loudness, LoudnessPractice, ObjectClass, Speaker,
    SpeakerConfig, Turnaround, UPDATE_TIME_GRANULE, Update,
};
use crate::utils::crc::{CRC_KLV_BURST_ALG, Crc16};
use crate::utils::errors::KlvError;
use crate::adm::types::Gain;

const CRC: Crc16 = Crc16::new(&CRC_KLV_BURST_ALG);

type BodyReader<'a> = BitReader<Cursor<&'a [u8]>, BigEndian>;

fn reader_for(body: &[u8]) -> BodyReader<'_> {
    BitReader::endian(Cursor::new(body), BigEndian)
}

fn read_f32(reader: &mut BodyReader<'_>) -> Result<f64, KlvError> {
    Ok(f32::from_bits(reader.read_var::<u32>(32)?) as f64)
}

fn read_string(reader: &mut BodyReader<'_>) -> Result<String, KlvError> {
    let len = reader.read_var::<u8>(8)? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_bytes(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| KlvError::MalformedPayload {
        tag: PayloadTag::ElementNames as u8,
        reason: "name is not valid UTF-8",
    })
}

fn read_language(reader: &mut BodyReader<'_>) -> Result<String, KlvError> {
    let mut bytes = [0u8; 3];
    reader.read_bytes(&mut bytes)?;
    let len = bytes.iter().position(|b| *b == 0).unwrap_or(3);
    String::from_utf8(bytes[..len].to_vec()).map_err(|_| KlvError::MalformedPayload {
        tag: PayloadTag::Presentations as u8,
        reason: "language is not valid UTF-8",
    })
}

/// Everything one burst carried, staged before application.
#[derive(Debug, Default)]
struct Staging {
    signals: Vec<(u8, String)>,
    beds: Vec<Bed>,
    objects: Vec<PmdObject>,
    presentations: Vec<PmdPresentation>,
    loudness: Vec<(u16, Loudness)>,
    iat: Option<Iat>,
    encoder_params: Vec<EncoderParams>,
    turnarounds: Vec<Turnaround>,
    headphones: Vec<HeadphoneElement>,
    updates: Vec<Update>,
    element_names: Vec<(u16, String)>,
    presentation_names: Vec<(u16, String, String)>,
}

fn stage_signal_table(body: &[u8], staging: &mut Staging) -> Result<(), KlvError> {
    let mut reader = reader_for(body);
    let count = reader.read_var::<u8>(8)?;
    for _ in 0..count {
        let signal = reader.read_var::<u8>(8)?;
        let name = read_string(&mut reader)?;
        staging.signals.push((signal, name));
    }
    Ok(())
}

fn stage_beds(body: &[u8], staging: &mut Staging) -> Result<(), KlvError> {
    let mut reader = reader_for(body);
    let count = reader.read_var::<u16>(16)?;
    for _ in 0..count {
        let id = reader.read_var::<u16>(12)?;
        let config_code = reader.read_var::<u8>(4)?;
        let config = SpeakerConfig::from_code(config_code)
            .ok_or(KlvError::UnknownSpeakerConfig(config_code))?;
        let source_count = reader.read_var::<u8>(5)?;
        let mut sources = Vec::with_capacity(source_count as usize);
        for _ in 0..source_count {
            let speaker_code = reader.read_var::<u8>(5)?;
            let target = Speaker::from_code(speaker_code).ok_or(KlvError::MalformedPayload {
                tag: PayloadTag::AudioBeds as u8,
                reason: "unknown speaker code",
            })?;
            let signal = reader.read_var::<u8>(8)?;
            let gain = Gain::linear(read_f32(&mut reader)?);
            sources.push(BedSource { target, signal, gain });
        }
        staging.beds.push(Bed {
            id,
            config,
            name: String::new(),
            sources,
        });
    }
    Ok(())
}

fn stage_objects(body: &[u8], staging: &mut Staging) -> Result<(), KlvError> {
    let mut reader = reader_for(body);
    let count = reader.read_var::<u16>(16)?;
    for _ in 0..count {
        let id = reader.read_var::<u16>(12)?;
        let class_code = reader.read_var::<u8>(4)?;
        let class =
            ObjectClass::from_code(class_code).ok_or(KlvError::UnknownObjectClass(class_code))?;
        let signal = reader.read_var::<u8>(8)?;
        let dynamic_updates = reader.read_bit()?;
        let diverge = reader.read_bit()?;
        let x = read_f32(&mut reader)?;
        let y = read_f32(&mut reader)?;
        let z = read_f32(&mut reader)?;
        let gain = Gain::linear(read_f32(&mut reader)?);
        let size = read_f32(&mut reader)?;
        staging.objects.push(PmdObject {
            id,
            class,
            name: String::new(),
            signal,
            x,
            y,
            z,
            gain,
            size,
            diverge,
            dynamic_updates,
        });
    }
    Ok(())
}

fn stage_presentations(body: &[u8], staging: &mut Staging) -> Result<(), KlvError> {
    let mut reader = reader_for(body);
    let count = reader.read_var::<u16>(16)?;
    for _ in 0..count {
        let id = reader.read_var::<u16>(12)?;
        let config_code = reader.read_var::<u8>(4)?;
        let config = SpeakerConfig::from_code(config_code)
            .ok_or(KlvError::UnknownSpeakerConfig(config_code))?;
        let language = read_language(&mut reader)?;
        let element_count = reader.read_var::<u8>(6)?;
        let mut elements = Vec::with_capacity(element_count as usize);
        for _ in 0..element_count {
            elements.push(reader.read_var::<u16>(12)?);
        }
        staging.presentations.push(PmdPresentation {
            id,
            config,
            language,
            elements,
            names: Vec::new(),
        });
    }
    Ok(())
}

fn stage_loudness(body: &[u8], staging: &mut Staging) -> Result<(), KlvError> {
    let mut reader = reader_for(body);
    let count = reader.read_var::<u16>(16)?;
    for _ in 0..count {
        let presentation = reader.read_var::<u16>(12)?;
        let practice_code = reader.read_var::<u8>(4)?;
        let practice =
            LoudnessPractice::from_code(practice_code).ok_or(KlvError::MalformedPayload {
                tag: PayloadTag::Loudness as u8,
                reason: "unknown loudness practice",
            })?;
        let has_speech = reader.read_bit()?;
        let has_range = reader.read_bit()?;
        let integrated = read_f32(&mut reader)?;
        let speech_gated = has_speech.then(|| read_f32(&mut reader)).transpose()?;
        let range = has_range.then(|| read_f32(&mut reader)).transpose()?;
        staging.loudness.push((
            presentation,
            Loudness {
                practice,
                integrated,
                speech_gated,
                range,
            },
        ));
    }
    Ok(())
}

fn stage_iat(body: &[u8], staging: &mut Staging) -> Result<(), KlvError> {
    let mut reader = reader_for(body);
    let has_content = reader.read_bit()?;
    let has_offset = reader.read_bit()?;
    let has_validity = reader.read_bit()?;

    let content_id = if has_content {
        let mut bytes = [0u8; 16];
        reader.read_bytes(&mut bytes)?;
        Some(uuid::Uuid::from_bytes(bytes))
    } else {
        None
    };
    let timestamp = reader.read_var::<u64>(40)?;
    let offset = has_offset.then(|| reader.read_var::<u16>(16)).transpose()?;
    let validity_duration = has_validity.then(|| reader.read_var::<u32>(32)).transpose()?;

    staging.iat = Some(Iat {
        content_id,
        timestamp,
        offset,
        validity_duration,
    });
    Ok(())
}

fn stage_encoder_params(body: &[u8], staging: &mut Staging) -> Result<(), KlvError> {
    let mut reader = reader_for(body);
    let count = reader.read_var::<u8>(8)?;
    for _ in 0..count {
        let id = reader.read_var::<u16>(12)?;
        let has_dynrng = reader.read_bit()?;
        let has_compr = reader.read_bit()?;
        let has_hmix = reader.read_bit()?;
        let surround_90 = reader.read_bit()?;
        let dynrng_prof = has_dynrng.then(|| reader.read_var::<u8>(8)).transpose()?;
        let compr_prof = has_compr.then(|| reader.read_var::<u8>(8)).transpose()?;
        let hmix_level = has_hmix.then(|| reader.read_var::<u8>(8)).transpose()?;
        let pres_count = reader.read_var::<u8>(6)?;
        let mut presentations = Vec::with_capacity(pres_count as usize);
        for _ in 0..pres_count {
            presentations.push(reader.read_var::<u16>(12)?);
        }
        staging.encoder_params.push(EncoderParams {
            id,
            dynrng_prof,
            compr_prof,
            surround_90,
            hmix_level,
            presentations,
        });
    }
    Ok(())
}

fn stage_turnarounds(body: &[u8], staging: &mut Staging) -> Result<(), KlvError> {
    let mut reader = reader_for(body);
    let count = reader.read_var::<u8>(8)?;
    for _ in 0..count {
        let id = reader.read_var::<u16>(12)?;
        let interval = reader.read_var::<u16>(16)?;
        let pres_count = reader.read_var::<u8>(6)?;
        let mut presentations = Vec::with_capacity(pres_count as usize);
        for _ in 0..pres_count {
            presentations.push(reader.read_var::<u16>(12)?);
        }
        staging.turnarounds.push(Turnaround {
            id,
            interval,
            presentations,
        });
    }
    Ok(())
}

fn stage_headphones(body: &[u8], staging: &mut Staging) -> Result<(), KlvError> {
    let mut reader = reader_for(body);
    let count = reader.read_var::<u16>(16)?;
    for _ in 0..count {
        staging.headphones.push(HeadphoneElement {
            audio_element: reader.read_var::<u16>(12)?,
            head_tracking_enabled: reader.read_bit()?,
            render_mode: reader.read_var::<u8>(7)?,
            channel_mask: reader.read_var::<u16>(16)?,
        });
    }
    Ok(())
}

fn stage_updates(body: &[u8], staging: &mut Staging) -> Result<(), KlvError> {
    let mut reader = reader_for(body);
    let count = reader.read_var::<u8>(8)?;
    for _ in 0..count {
        let granules = reader.read_var::<u16>(12)?;
        let element = reader.read_var::<u16>(12)?;
        let x = read_f32(&mut reader)?;
        let y = read_f32(&mut reader)?;
        let z = read_f32(&mut reader)?;
        staging.updates.push(Update {
            sample_offset: granules * UPDATE_TIME_GRANULE,
            element,
            x,
            y,
            z,
        });
    }
    Ok(())
}

fn stage_element_names(body: &[u8], staging: &mut Staging) -> Result<(), KlvError> {
    let mut reader = reader_for(body);
    let count = reader.read_var::<u16>(16)?;
    for _ in 0..count {
        let id = reader.read_var::<u16>(12)?;
        let name = read_string(&mut reader)?;
        staging.element_names.push((id, name));
    }
    Ok(())
}

fn stage_presentation_names(body: &[u8], staging: &mut Staging) -> Result<(), KlvError> {
    let mut reader = reader_for(body);
    let count = reader.read_var::<u16>(16)?;
    for _ in 0..count {
        let id = reader.read_var::<u16>(12)?;
        let language = read_language(&mut reader)?;
        let text = read_string(&mut reader)?;
        staging.presentation_names.push((id, language, text));
    }
    Ok(())
}

fn apply(staging: Staging, model: &mut PmdModel) -> Result<(), KlvError> {
    for (signal, name) in &staging.signals {
        if !model.signals().any(|s| s == *signal) {
            model.add_signal(*signal as u16)?;
        }
        if !name.is_empty() {
            model.set_signal_name(*signal, name)?;
        }
    }

    // Signals referenced by elements but missing from the signal
    // table still become part of the model.
    let referenced: Vec<u8> = staging
        .beds
        .iter()
        .flat_map(|b| b.sources.iter().map(|s| s.signal))
        .chain(staging.objects.iter().map(|o| o.signal))
        .collect();
    for signal in referenced {
        if !model.signals().any(|s| s == signal) {
            model.add_signal(signal as u16)?;
        }
    }

    for bed in staging.beds {
        if model.bed(bed.id).is_none() {
            model.add_bed(bed)?;
        }
    }
    for object in staging.objects {
        if model.object(object.id).is_none() {
            model.add_object(object)?;
        }
    }
    for presentation in staging.presentations {
        if model.presentation(presentation.id).is_none() {
            model.add_presentation(presentation)?;
        }
    }
    for (presentation, loudness) in staging.loudness {
        model.set_loudness(presentation, loudness)?;
    }
    if let Some(iat) = staging.iat {
        model.set_iat(iat);
    }
    for params in staging.encoder_params {
        model.add_eac3_params(params)?;
    }
    for turnaround in staging.turnarounds {
        model.add_turnaround(turnaround)?;
    }
    for headphone in staging.headphones {
        model.add_headphone(headphone)?;
    }
    for update in staging.updates {
        model.add_update(update)?;
    }
    for (id, name) in staging.element_names {
        if id == 0 {
            model.set_title(&name);
        } else if let Err(error) = model.set_element_name(id, &name) {
            warn!("dropping name for unknown element {id}: {error}");
        }
    }
    for (id, language, text) in staging.presentation_names {
        if let Err(error) = model.add_presentation_name(id, &language, &text) {
            warn!("dropping name for unknown presentation {id}: {error}");
        }
    }

    Ok(())
}

/// Decode one KLV burst into `model`. Returns the number of payloads
/// applied. The model accumulates: bursts from the same frame build on
/// each other.
pub fn read_burst(bytes: &[u8], model: &mut PmdModel) -> Result<usize, KlvError> {
    if bytes.len() < 17 {
        return Err(KlvError::Truncated {
            needed: 17,
            available: bytes.len(),
        });
    }
    let (key, rest) = bytes.split_at(16);
    if key != UL_DOLBY_PRIVATE && key != UL_SMPTE_2109 {
        return Err(KlvError::BadUniversalKey);
    }

    let (total, consumed) = read_ber_length(rest)?;
    let header = 16 + consumed;
    let body = rest
        .get(consumed..consumed + total)
        .ok_or(KlvError::Truncated {
            needed: header + total,
            available: bytes.len(),
        })?;

    let mut staging = Staging::default();
    let mut offset = 0usize;
    let mut payloads = 0usize;
    while offset < body.len() {
        let tag = body[offset];
        let (len, consumed) = read_ber_length(&body[offset + 1..])?;
        let body_start = offset + 1 + consumed;
        let payload = body
            .get(body_start..body_start + len)
            .ok_or(KlvError::PayloadOverrun { tag })?;

        match PayloadTag::from_tag(tag) {
            Some(PayloadTag::Crc) => {
                if len != 2 {
                    return Err(KlvError::MalformedPayload {
                        tag,
                        reason: "CRC payload must be two bytes",
                    });
                }
                let read = u16::from_be_bytes([payload[0], payload[1]]);
                let calculated = CRC.checksum(&bytes[..header + body_start]);
                if read != calculated {
                    return Err(KlvError::CrcMismatch { calculated, read });
                }
            }
            Some(PayloadTag::SignalTable) => stage_signal_table(payload, &mut staging)?,
            Some(PayloadTag::AudioBeds) => stage_beds(payload, &mut staging)?,
            Some(PayloadTag::AudioObjects) => stage_objects(payload, &mut staging)?,
            Some(PayloadTag::Presentations) => stage_presentations(payload, &mut staging)?,
            Some(PayloadTag::Loudness) => stage_loudness(payload, &mut staging)?,
            Some(PayloadTag::Iat) => stage_iat(payload, &mut staging)?,
            Some(PayloadTag::EncoderParams) => stage_encoder_params(payload, &mut staging)?,
            Some(PayloadTag::Turnaround) => stage_turnarounds(payload, &mut staging)?,
            Some(PayloadTag::Headphone) => stage_headphones(payload, &mut staging)?,
            Some(PayloadTag::Updates) => stage_updates(payload, &mut staging)?,
            Some(PayloadTag::ElementNames) => stage_element_names(payload, &mut staging)?,
            Some(PayloadTag::PresentationNames) => stage_presentation_names(payload, &mut staging)?,
            None => debug!("skipping unknown KLV payload tag {tag}"),
        }

        payloads += 1;
        offset = body_start + len;
    }

    apply(staging, model)?;
    Ok(payloads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::klv::UlChoice;
    use crate::klv::writer::{PayloadSelection, plan_frame, write_burst};
    use crate::pmd::model::PresentationName;

    fn fixture_model() -> PmdModel {
        let mut model = PmdModel::new();
        model.set_title("KLV fixture");
        model.add_signals(16).unwrap();
        model
            .add_bed(Bed::direct(1, SpeakerConfig::Surround514, "Bed 1", 1))
            .unwrap();
        for i in 0..5u16 {
            model
                .add_object(PmdObject::at_origin(2 + i, &format!("Obj {}", i + 1), 11 + i as u8))
                .unwrap();
        }
        model
            .add_presentation(PmdPresentation {
                id: 1,
                config: SpeakerConfig::Surround514,
                language: "eng".to_string(),
                elements: vec![1, 2, 3, 4, 5, 6],
                names: vec![PresentationName {
                    language: "eng".to_string(),
                    text: "English".to_string(),
                }],
            })
            .unwrap();
        model
            .set_loudness(
                1,
                Loudness {
                    practice: LoudnessPractice::EbuR128,
                    integrated: -23.0,
                    speech_gated: Some(-22.0),
                    range: None,
                },
            )
            .unwrap();
        model
            .add_update(Update {
                sample_offset: 64,
                element: 2,
                x: 0.25,
                y: -0.5,
                z: 0.0,
            })
            .unwrap();
        model
    }

    fn full_selection() -> PayloadSelection {
        PayloadSelection {
            structure: true,
            update_window: Some((0, u16::MAX)),
            element_names: true,
            presentation_names: true,
        }
    }

    #[test]
    fn burst_round_trip() {
        let model = fixture_model();

        for ul in [UlChoice::DolbyPrivate, UlChoice::Smpte2109] {
            let burst = write_burst(&model, ul, &full_selection()).unwrap();
            let mut decoded = PmdModel::new();
            read_burst(&burst, &mut decoded).unwrap();
            assert_eq!(decoded, model);
        }
    }

    #[test]
    fn crc_corruption_detected() {
        let model = fixture_model();
        let mut burst = write_burst(&model, UlChoice::DolbyPrivate, &full_selection()).unwrap();
        let flip = burst.len() / 2;
        burst[flip] ^= 0x10;

        let mut decoded = PmdModel::new();
        let result = read_burst(&burst, &mut decoded);
        assert!(result.is_err());
    }

    #[test]
    fn bad_universal_key_rejected() {
        let mut burst =
            write_burst(&fixture_model(), UlChoice::DolbyPrivate, &full_selection()).unwrap();
        burst[3] ^= 0xFF;
        let mut decoded = PmdModel::new();
        assert!(matches!(
            read_burst(&burst, &mut decoded),
            Err(KlvError::BadUniversalKey)
        ));
    }

    #[test]
    fn frame_plan_splits_updates_by_block() {
        let mut model = fixture_model();
        model
            .add_update(Update {
                sample_offset: 320,
                element: 3,
                x: 0.0,
                y: 0.0,
                z: 1.0,
            })
            .unwrap();

        let capacities = vec![600, 780, 780, 780];
        let plan = plan_frame(&model, UlChoice::DolbyPrivate, &capacities, 768).unwrap();
        assert_eq!(plan.bursts.len(), 4);
        assert!(!plan.bursts[0].is_empty());
        assert!(!plan.bursts[2].is_empty()); // update at sample 320
        assert!(plan.bursts[3].is_empty());

        // Accumulating all bursts reproduces the model.
        let mut decoded = PmdModel::new();
        for burst in plan.bursts.iter().filter(|b| !b.is_empty()) {
            read_burst(burst, &mut decoded).unwrap();
        }
        assert_eq!(decoded, model);
    }

    #[test]
    fn tight_frame_elides_names() {
        let mut model = fixture_model();
        model.set_title(&"x".repeat(200));

        // Structure fits, the long name payload does not.
        let structure_only = write_burst(
            &model,
            UlChoice::DolbyPrivate,
            &PayloadSelection {
                structure: true,
                update_window: Some((0, u16::MAX)),
                ..Default::default()
            },
        )
        .unwrap();
        let capacities = vec![structure_only.len() + 8];
        let plan = plan_frame(&model, UlChoice::DolbyPrivate, &capacities, 768).unwrap();
        assert!(plan.names_elided);
    }
}
