//! KLV burst writer and per-frame payload planner.

use std::io::Write;

use bitstream_io::{BigEndian, BitWrite, BitWriter};
use log::debug;

use crate::klv::{PayloadTag, UlChoice, write_ber_length};
use crate::pmd::model::PmdModel;
use crate::pmd::types::UPDATE_TIME_GRANULE;
use crate::utils::crc::{CRC_KLV_BURST_ALG, Crc16};
use crate::utils::errors::KlvError;

const CRC: Crc16 = Crc16::new(&CRC_KLV_BURST_ALG);

/// Which payloads one burst carries.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadSelection {
    /// Beds, objects, presentations, loudness, IAT, EEP, ETD, HED and
    /// the signal table.
    pub structure: bool,
    /// XYZ updates whose sample offset falls in `[start, end)`.
    pub update_window: Option<(u16, u16)>,
    pub element_names: bool,
    pub presentation_names: bool,
}

impl PayloadSelection {
    pub fn is_empty(&self, model: &PmdModel) -> bool {
        !self.structure
            && !self.element_names
            && !self.presentation_names
            && !self
                .update_window
                .is_some_and(|(start, end)| {
                    model
                        .updates()
                        .iter()
                        .any(|u| u.sample_offset >= start && u.sample_offset < end)
                })
    }
}

type BodyWriter = BitWriter<Vec<u8>, BigEndian>;

fn finish_body(mut writer: BodyWriter) -> Result<Vec<u8>, KlvError> {
    writer.byte_align()?;
    Ok(writer.into_writer())
}

fn write_f32(writer: &mut BodyWriter, value: f64) -> Result<(), KlvError> {
    writer.write_var::<u32>(32, (value as f32).to_bits())?;
    Ok(())
}

fn write_string(writer: &mut BodyWriter, text: &str) -> Result<(), KlvError> {
    let bytes = text.as_bytes();
    let len = bytes.len().min(255);
    writer.write_var::<u8>(8, len as u8)?;
    writer.write_bytes(&bytes[..len])?;
    Ok(())
}

fn write_language(writer: &mut BodyWriter, language: &str) -> Result<(), KlvError> {
    let mut bytes = [0u8; 3];
    for (slot, byte) in bytes.iter_mut().zip(language.bytes()) {
        *slot = byte;
    }
    writer.write_bytes(&bytes)?;
    Ok(())
}

fn body_signal_table(model: &PmdModel) -> Result<Vec<u8>, KlvError> {
    let mut writer = BodyWriter::endian(Vec::new(), BigEndian);
    writer.write_var::<u8>(8, model.signal_count() as u8)?;
    for signal in model.signals() {
        writer.write_var::<u8>(8, signal)?;
        write_string(&mut writer, model.signal_name(signal).unwrap_or(""))?;
    }
    finish_body(writer)
}

fn body_beds(model: &PmdModel) -> Result<Vec<u8>, KlvError> {
    let mut writer = BodyWriter::endian(Vec::new(), BigEndian);
    writer.write_var::<u16>(16, model.beds().len() as u16)?;
    for bed in model.beds() {
        writer.write_var::<u16>(12, bed.id)?;
        writer.write_var::<u8>(4, bed.config as u8)?;
        writer.write_var::<u8>(5, bed.sources.len() as u8)?;
        for source in &bed.sources {
            writer.write_var::<u8>(5, source.target as u8)?;
            writer.write_var::<u8>(8, source.signal)?;
            write_f32(&mut writer, source.gain.as_linear())?;
        }
    }
    finish_body(writer)
}

fn body_objects(model: &PmdModel) -> Result<Vec<u8>, KlvError> {
    let mut writer = BodyWriter::endian(Vec::new(), BigEndian);
    writer.write_var::<u16>(16, model.objects().len() as u16)?;
    for object in model.objects() {
        writer.write_var::<u16>(12, object.id)?;
        writer.write_var::<u8>(4, object.class as u8)?;
        writer.write_var::<u8>(8, object.signal)?;
        writer.write_bit(object.dynamic_updates)?;
        writer.write_bit(object.diverge)?;
        write_f32(&mut writer, object.x)?;
        write_f32(&mut writer, object.y)?;
        write_f32(&mut writer, object.z)?;
        write_f32(&mut writer, object.gain.as_linear())?;
        write_f32(&mut writer, object.size)?;
    }
    finish_body(writer)
}

fn body_presentations(model: &PmdModel) -> Result<Vec<u8>, KlvError> {
    let mut writer = BodyWriter::endian(Vec::new(), BigEndian);
    writer.write_var::<u16>(16, model.presentations().len() as u16)?;
    for pres in model.presentations() {
        writer.write_var::<u16>(12, pres.id)?;
        writer.write_var::<u8>(4, pres.config as u8)?;
        write_language(&mut writer, &pres.language)?;
        writer.write_var::<u8>(6, pres.elements.len() as u8)?;
        for element in &pres.elements {
            writer.write_var::<u16>(12, *element)?;
        }
    }
    finish_body(writer)
}

fn body_loudness(model: &PmdModel) -> Result<Vec<u8>, KlvError> {
    let mut writer = BodyWriter::endian(Vec::new(), BigEndian);
    writer.write_var::<u16>(16, model.loudness().count() as u16)?;
    for (presentation, loudness) in model.loudness() {
        writer.write_var::<u16>(12, presentation)?;
        writer.write_var::<u8>(4, loudness.practice as u8)?;
        writer.write_bit(loudness.speech_gated.is_some())?;
        writer.write_bit(loudness.range.is_some())?;
        write_f32(&mut writer, loudness.integrated)?;
        if let Some(speech) = loudness.speech_gated {
            write_f32(&mut writer, speech)?;
        }
        if let Some(range) = loudness.range {
            write_f32(&mut writer, range)?;
        }
    }
    finish_body(writer)
}

fn body_iat(model: &PmdModel) -> Result<Option<Vec<u8>>, KlvError> {
    let Some(iat) = model.iat() else {
        return Ok(None);
    };

    let mut writer = BodyWriter::endian(Vec::new(), BigEndian);
    writer.write_bit(iat.content_id.is_some())?;
    writer.write_bit(iat.offset.is_some())?;
    writer.write_bit(iat.validity_duration.is_some())?;
    if let Some(content_id) = iat.content_id {
        writer.write_bytes(content_id.as_bytes())?;
    }
    writer.write_var::<u64>(40, iat.timestamp & 0x7_FFFF_FFFF)?;
    if let Some(offset) = iat.offset {
        writer.write_var::<u16>(16, offset)?;
    }
    if let Some(validity) = iat.validity_duration {
        writer.write_var::<u32>(32, validity)?;
    }
    finish_body(writer).map(Some)
}

fn body_encoder_params(model: &PmdModel) -> Result<Vec<u8>, KlvError> {
    let mut writer = BodyWriter::endian(Vec::new(), BigEndian);
    writer.write_var::<u8>(8, model.eac3_params().len() as u8)?;
    for params in model.eac3_params() {
        writer.write_var::<u16>(12, params.id)?;
        writer.write_bit(params.dynrng_prof.is_some())?;
        writer.write_bit(params.compr_prof.is_some())?;
        writer.write_bit(params.hmix_level.is_some())?;
        writer.write_bit(params.surround_90)?;
        if let Some(dynrng) = params.dynrng_prof {
            writer.write_var::<u8>(8, dynrng)?;
        }
        if let Some(compr) = params.compr_prof {
            writer.write_var::<u8>(8, compr)?;
        }
        if let Some(hmix) = params.hmix_level {
            writer.write_var::<u8>(8, hmix)?;
        }
        writer.write_var::<u8>(6, params.presentations.len() as u8)?;
        for pres in &params.presentations {
            writer.write_var::<u16>(12, *pres)?;
        }
    }
    finish_body(writer)
}

fn body_turnarounds(model: &PmdModel) -> Result<Vec<u8>, KlvError> {
    let mut writer = BodyWriter::endian(Vec::new(), BigEndian);
    writer.write_var::<u8>(8, model.turnarounds().len() as u8)?;
    for turnaround in model.turnarounds() {
        writer.write_var::<u16>(12, turnaround.id)?;
        writer.write_var::<u16>(16, turnaround.interval)?;
        writer.write_var::<u8>(6, turnaround.presentations.len() as u8)?;
        for pres in &turnaround.presentations {
            writer.write_var::<u16>(12, *pres)?;
        }
    }
    finish_body(writer)
}

fn body_headphones(model: &PmdModel) -> Result<Vec<u8>, KlvError> {
    let mut writer = BodyWriter::endian(Vec::new(), BigEndian);
    writer.write_var::<u16>(16, model.headphones().len() as u16)?;
    for hed in model.headphones() {
        writer.write_var::<u16>(12, hed.audio_element)?;
        writer.write_bit(hed.head_tracking_enabled)?;
        writer.write_var::<u8>(7, hed.render_mode)?;
        writer.write_var::<u16>(16, hed.channel_mask)?;
    }
    finish_body(writer)
}

fn body_updates(model: &PmdModel, window: (u16, u16)) -> Result<Option<Vec<u8>>, KlvError> {
    let updates: Vec<_> = model
        .updates()
        .iter()
        .filter(|u| u.sample_offset >= window.0 && u.sample_offset < window.1)
        .collect();
    if updates.is_empty() {
        return Ok(None);
    }

    let mut writer = BodyWriter::endian(Vec::new(), BigEndian);
    writer.write_var::<u8>(8, updates.len() as u8)?;
    for update in updates {
        writer.write_var::<u16>(12, update.sample_offset / UPDATE_TIME_GRANULE)?;
        writer.write_var::<u16>(12, update.element)?;
        write_f32(&mut writer, update.x)?;
        write_f32(&mut writer, update.y)?;
        write_f32(&mut writer, update.z)?;
    }
    finish_body(writer).map(Some)
}

fn body_element_names(model: &PmdModel) -> Result<Option<Vec<u8>>, KlvError> {
    let mut entries: Vec<(u16, &str)> = Vec::new();
    if !model.title.is_empty() {
        entries.push((0, model.title.as_str()));
    }
    for bed in model.beds() {
        if !bed.name.is_empty() {
            entries.push((bed.id, &bed.name));
        }
    }
    for object in model.objects() {
        if !object.name.is_empty() {
            entries.push((object.id, &object.name));
        }
    }
    if entries.is_empty() {
        return Ok(None);
    }

    let mut writer = BodyWriter::endian(Vec::new(), BigEndian);
    writer.write_var::<u16>(16, entries.len() as u16)?;
    for (id, name) in entries {
        writer.write_var::<u16>(12, id)?;
        write_string(&mut writer, name)?;
    }
    finish_body(writer).map(Some)
}

fn body_presentation_names(model: &PmdModel) -> Result<Option<Vec<u8>>, KlvError> {
    let count: usize = model.presentations().iter().map(|p| p.names.len()).sum();
    if count == 0 {
        return Ok(None);
    }

    let mut writer = BodyWriter::endian(Vec::new(), BigEndian);
    writer.write_var::<u16>(16, count as u16)?;
    for pres in model.presentations() {
        for name in &pres.names {
            writer.write_var::<u16>(12, pres.id)?;
            write_language(&mut writer, &name.language)?;
            write_string(&mut writer, &name.text)?;
        }
    }
    finish_body(writer).map(Some)
}

fn push_payload(out: &mut Vec<u8>, tag: PayloadTag, body: &[u8]) {
    out.push(tag as u8);
    write_ber_length(out, body.len());
    out.extend_from_slice(body);
}

/// Serialize one burst: universal key, BER length, selected payloads
/// and the closing CRC.
pub fn write_burst(
    model: &PmdModel,
    ul: UlChoice,
    selection: &PayloadSelection,
) -> Result<Vec<u8>, KlvError> {
    let mut payloads = Vec::new();

    if selection.structure {
        push_payload(&mut payloads, PayloadTag::SignalTable, &body_signal_table(model)?);
        push_payload(&mut payloads, PayloadTag::AudioBeds, &body_beds(model)?);
        push_payload(&mut payloads, PayloadTag::AudioObjects, &body_objects(model)?);
        push_payload(&mut payloads, PayloadTag::Presentations, &body_presentations(model)?);
        push_payload(&mut payloads, PayloadTag::Loudness, &body_loudness(model)?);
        if let Some(body) = body_iat(model)? {
            push_payload(&mut payloads, PayloadTag::Iat, &body);
        }
        if !model.eac3_params().is_empty() {
            push_payload(&mut payloads, PayloadTag::EncoderParams, &body_encoder_params(model)?);
        }
        if !model.turnarounds().is_empty() {
            push_payload(&mut payloads, PayloadTag::Turnaround, &body_turnarounds(model)?);
        }
        if !model.headphones().is_empty() {
            push_payload(&mut payloads, PayloadTag::Headphone, &body_headphones(model)?);
        }
    }

    if let Some(window) = selection.update_window {
        if let Some(body) = body_updates(model, window)? {
            push_payload(&mut payloads, PayloadTag::Updates, &body);
        }
    }

    if selection.element_names {
        if let Some(body) = body_element_names(model)? {
            push_payload(&mut payloads, PayloadTag::ElementNames, &body);
        }
    }
    if selection.presentation_names {
        if let Some(body) = body_presentation_names(model)? {
            push_payload(&mut payloads, PayloadTag::PresentationNames, &body);
        }
    }

    // Closing CRC payload: tag, length 2, then the checksum of every
    // byte written so far including that header.
    let mut burst = Vec::with_capacity(16 + 5 + payloads.len() + 4);
    burst.write_all(ul.key())?;
    write_ber_length(&mut burst, payloads.len() + 4);
    burst.extend_from_slice(&payloads);
    burst.push(PayloadTag::Crc as u8);
    burst.push(2);
    let crc = CRC.checksum(&burst);
    burst.extend_from_slice(&crc.to_be_bytes());

    Ok(burst)
}

/// One video frame's worth of bursts, one entry per 160-sample block.
/// Empty entries mean "no burst in this block".
#[derive(Debug, Clone, Default)]
pub struct FramePlan {
    pub bursts: Vec<Vec<u8>>,
    /// Name payloads did not fit anywhere and were dropped.
    pub names_elided: bool,
}

/// Sample window covered by block `index` of a frame.
fn block_window(index: usize, blocks: usize, frame_samples: u16) -> (u16, u16) {
    let start = if index == 0 { 0 } else { (index * 160) as u16 };
    let end = if index + 1 == blocks {
        frame_samples
    } else {
        ((index + 1) * 160) as u16
    };
    (start, end)
}

/// Distribute the model over a frame's blocks. `capacities` holds the
/// payload byte capacity of each block; `frame_samples` is the frame
/// length used to window XYZ updates.
pub fn plan_frame(
    model: &PmdModel,
    ul: UlChoice,
    capacities: &[usize],
    frame_samples: u16,
) -> Result<FramePlan, KlvError> {
    let blocks = capacities.len();
    let mut selections: Vec<PayloadSelection> = (0..blocks)
        .map(|i| PayloadSelection {
            structure: i == 0,
            update_window: Some(block_window(i, blocks, frame_samples)),
            element_names: false,
            presentation_names: false,
        })
        .collect();

    // Structure and updates are mandatory; verify they fit at all.
    for (i, selection) in selections.iter().enumerate() {
        let burst = write_burst(model, ul, selection)?;
        if !selection.is_empty(model) && burst.len() > capacities[i] {
            return Err(KlvError::Truncated {
                needed: burst.len(),
                available: capacities[i],
            });
        }
    }

    // Names are best-effort: place each name payload in the first
    // block with room, or drop it.
    let mut names_elided = false;
    let picks: [fn(&mut PayloadSelection); 2] = [
        |s| s.element_names = true,
        |s| s.presentation_names = true,
    ];
    for pick in picks {
        let mut placed = false;
        for i in 0..blocks {
            let mut candidate = selections[i];
            pick(&mut candidate);
            let burst = write_burst(model, ul, &candidate)?;
            if burst.len() <= capacities[i] {
                selections[i] = candidate;
                placed = true;
                break;
            }
        }
        if !placed {
            names_elided = true;
            debug!("name payloads elided: no block has room");
        }
    }

    let mut bursts = Vec::with_capacity(blocks);
    for (i, selection) in selections.iter().enumerate() {
        if selection.is_empty(model) {
            bursts.push(Vec::new());
        } else {
            let burst = write_burst(model, ul, selection)?;
            debug_assert!(burst.len() <= capacities[i]);
            bursts.push(burst);
        }
    }

    Ok(FramePlan { bursts, names_elided })
}
