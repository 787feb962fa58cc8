//! Canonical S-ADM XML writer and permissive reader.
//!
//! The writer emits elements and attributes in one fixed order so that
//! a write → read → write cycle is byte-identical. The reader accepts
//! any element order the dialect permits.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use uuid::Uuid;

use crate::adm::entity::{EntityBody, ModelEntity, TargetGroupConfig};
use crate::adm::id::{AudioType, EntityId, EntityType};
use crate::adm::model::{CoreModel, PresentationRelation};
use crate::adm::types::{AdmTime, EntityName, Gain, Position};
use crate::pmd::types::{ContentKind, Loudness, LoudnessPractice, ObjectClass, SpeakerConfig};
use crate::utils::errors::SadmError;

const FRAME_VERSION: &str = "ITU-R_BS.2125-0";
const ADM_VERSION: &str = "ITU-R_BS.2076-2";

fn xml_err(error: quick_xml::Error) -> SadmError {
    SadmError::Parse(error.to_string())
}

fn io_err(error: std::io::Error) -> SadmError {
    SadmError::Parse(error.to_string())
}

// ---------------------------------------------------------------- writing

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), SadmError> {
        let mut elem = BytesStart::new(name);
        for (key, value) in attrs {
            elem.push_attribute((*key, *value));
        }
        self.writer.write_event(Event::Start(elem)).map_err(io_err)
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), SadmError> {
        let mut elem = BytesStart::new(name);
        for (key, value) in attrs {
            elem.push_attribute((*key, *value));
        }
        self.writer.write_event(Event::Empty(elem)).map_err(io_err)
    }

    fn end(&mut self, name: &str) -> Result<(), SadmError> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(io_err)
    }

    fn leaf(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<(), SadmError> {
        self.start(name, attrs)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(io_err)?;
        self.end(name)
    }
}

fn fmt_float(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn audio_type_attrs(audio_type: AudioType) -> (&'static str, &'static str) {
    match audio_type {
        AudioType::DirectSpeakers => ("0001", "DirectSpeakers"),
        AudioType::Matrix => ("0002", "Matrix"),
        AudioType::Objects => ("0003", "Objects"),
        AudioType::Hoa => ("0004", "HOA"),
        AudioType::Binaural => ("0005", "Binaural"),
        AudioType::None => ("0000", "Undefined"),
    }
}

fn practice_method(practice: LoudnessPractice) -> &'static str {
    match practice {
        LoudnessPractice::NotIndicated => "",
        LoudnessPractice::AtscA85 => "ATSC A/85",
        LoudnessPractice::EbuR128 => "EBU R128",
        LoudnessPractice::AribTrB32 => "ARIB TR-B32",
        LoudnessPractice::FreeTvOp59 => "FreeTV OP-59",
        LoudnessPractice::Manual => "Manual",
        LoudnessPractice::ConsumerLeveller => "Consumer Leveller",
    }
}

fn method_practice(method: &str) -> LoudnessPractice {
    match method {
        "ATSC A/85" => LoudnessPractice::AtscA85,
        "EBU R128" => LoudnessPractice::EbuR128,
        "ARIB TR-B32" => LoudnessPractice::AribTrB32,
        "FreeTV OP-59" => LoudnessPractice::FreeTvOp59,
        "Manual" => LoudnessPractice::Manual,
        "Consumer Leveller" => LoudnessPractice::ConsumerLeveller,
        _ => LoudnessPractice::NotIndicated,
    }
}

fn write_loudness(out: &mut XmlOut, loudness: &Loudness) -> Result<(), SadmError> {
    let method = practice_method(loudness.practice);
    if method.is_empty() {
        out.start("loudnessMetadata", &[])?;
    } else {
        out.start("loudnessMetadata", &[("loudnessMethod", method)])?;
    }
    out.leaf("integratedLoudness", &[], &fmt_float(loudness.integrated))?;
    if let Some(speech) = loudness.speech_gated {
        out.leaf("dialogueLoudness", &[], &fmt_float(speech))?;
    }
    if let Some(range) = loudness.range {
        out.leaf("loudnessRange", &[], &fmt_float(range))?;
    }
    out.end("loudnessMetadata")
}

/// `<dialogue>` carries the content kind: the element text selects the
/// family, the attribute the sub-kind.
fn write_content_kind(out: &mut XmlOut, kind: ContentKind) -> Result<(), SadmError> {
    let code = kind as u8;
    let (family, attr, sub) = match code {
        0..=9 => ("0", "nonDialogueContentKind", code),
        10..=19 => ("1", "dialogueContentKind", code - 10),
        _ => ("2", "mixedContentKind", code - 20),
    };
    out.leaf("dialogue", &[(attr, &sub.to_string())], family)
}

fn read_content_kind(node: &XmlNode) -> ContentKind {
    let family: u8 = node.text.trim().parse().unwrap_or(2);
    let sub = |name: &str| {
        node.attr(name)
            .and_then(|v| v.parse::<u8>().ok())
            .unwrap_or(0)
    };
    let code = match family {
        0 => sub("nonDialogueContentKind"),
        1 => 10 + sub("dialogueContentKind"),
        _ => 20 + sub("mixedContentKind"),
    };
    ContentKind::from_code(code).unwrap_or_default()
}

fn primary_name(entity: &ModelEntity) -> &str {
    entity.names.primary().map(|n| n.text.as_str()).unwrap_or("")
}

/// Serialize the model as a canonical S-ADM frame.
pub fn write_xml(core: &CoreModel) -> Result<Vec<u8>, SadmError> {
    let mut out = XmlOut::new();
    out.writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(io_err)?;

    out.start("frame", &[("version", FRAME_VERSION)])?;
    out.start("frameHeader", &[])?;

    // Frame format, synthesized when the model does not carry one.
    let frame_format = core
        .entity_ids(EntityType::FrameFormat)
        .next()
        .and_then(|id| core.get(id));
    let (ff_id, ff_type, ff_start, ff_duration, ff_flow);
    match frame_format.map(|e| (&e.body, e.id)) {
        Some((
            EntityBody::FrameFormat {
                frame_type,
                start,
                duration,
                flow_id,
            },
            id,
        )) => {
            ff_id = id.to_string();
            ff_type = frame_type.clone();
            ff_start = start.to_string();
            ff_duration = duration.to_string();
            ff_flow = flow_id.to_string();
        }
        _ => {
            ff_id = EntityId::generic(EntityType::FrameFormat, 1).to_string();
            ff_type = "full".to_string();
            ff_start = AdmTime::new(0, 0, 0, 0, 48_000).to_string();
            ff_duration = AdmTime::new(0, 0, 0, 1920, 48_000).to_string();
            ff_flow = Uuid::nil().to_string();
        }
    }
    out.empty(
        "frameFormat",
        &[
            ("frameFormatID", &ff_id),
            ("type", &ff_type),
            ("start", &ff_start),
            ("duration", &ff_duration),
            ("flowID", &ff_flow),
        ],
    )?;

    // Transport: sources sorted by channel, each with its track refs.
    let sources: Vec<_> = {
        let mut sources: Vec<_> = core.sources().collect();
        sources.sort_by_key(|(group, channel, _)| (*group, *channel));
        sources
    };
    let group_entity = core
        .entity_ids(EntityType::SourceGroup)
        .next()
        .and_then(|id| core.get(id));
    let tp_id = group_entity
        .map(|e| e.id.to_string())
        .unwrap_or_else(|| EntityId::generic(EntityType::SourceGroup, 1).to_string());
    let tp_name = group_entity.map(primary_name).unwrap_or("Transport").to_string();
    let num = sources.len().to_string();
    out.start(
        "transportTrackFormat",
        &[
            ("transportID", &tp_id),
            ("transportName", &tp_name),
            ("numIDs", &num),
            ("numTracks", &num),
        ],
    )?;
    for (_, channel, source_id) in &sources {
        let channel = channel.to_string();
        out.start("audioTrack", &[("trackID", &channel)])?;
        for relation in core.source_relations().filter(|r| r.source == *source_id) {
            out.leaf("audioTrackUIDRef", &[], &relation.track.to_string())?;
        }
        out.end("audioTrack")?;
    }
    out.end("transportTrackFormat")?;
    out.end("frameHeader")?;

    out.start("audioFormatExtended", &[("version", ADM_VERSION)])?;

    // audioProgramme
    for id in core.entity_ids(EntityType::Presentation) {
        let Some(entity) = core.get(id) else { continue };
        let EntityBody::Presentation { loudness } = &entity.body else {
            continue;
        };

        let id_text = id.to_string();
        let language = entity
            .names
            .primary()
            .and_then(|n| n.language.clone())
            .unwrap_or_default();
        out.start(
            "audioProgramme",
            &[
                ("audioProgrammeID", &id_text),
                ("audioProgrammeName", primary_name(entity)),
                ("audioProgrammeLanguage", &language),
            ],
        )?;
        for label in entity.names.labels() {
            let lang = label.language.clone().unwrap_or_default();
            out.leaf("audioProgrammeLabel", &[("language", &lang)], &label.text)?;
        }
        for row in core.presentation_relations().filter(|r| r.presentation == id) {
            if !row.content.is_null() {
                out.leaf("audioContentIDRef", &[], &row.content.to_string())?;
            }
        }
        for row in core.presentation_relations().filter(|r| r.presentation == id) {
            if !row.alt_value_set.is_null() {
                out.leaf("alternativeValueSetIDRef", &[], &row.alt_value_set.to_string())?;
            }
        }
        if let Some(loudness) = loudness {
            write_loudness(&mut out, loudness)?;
        }
        out.end("audioProgramme")?;
    }

    // audioContent
    for id in core.entity_ids(EntityType::Content) {
        let Some(entity) = core.get(id) else { continue };
        let EntityBody::Content {
            kind,
            language,
            loudness,
        } = &entity.body
        else {
            continue;
        };

        let id_text = id.to_string();
        let language = language.clone().unwrap_or_default();
        out.start(
            "audioContent",
            &[
                ("audioContentID", &id_text),
                ("audioContentName", primary_name(entity)),
                ("audioContentLanguage", &language),
            ],
        )?;
        for row in core.presentation_relations().filter(|r| r.content == id) {
            if !row.element.is_null() {
                out.leaf("audioObjectIDRef", &[], &row.element.to_string())?;
            }
        }
        write_content_kind(&mut out, *kind)?;
        if let Some(loudness) = loudness {
            write_loudness(&mut out, loudness)?;
        }
        out.end("audioContent")?;
    }

    // audioObject (AudioElements only; ElementGroups have no PMD peer)
    for id in core.audio_element_ids() {
        let Some(entity) = core.get(id) else { continue };
        let EntityBody::AudioElement { gain, .. } = &entity.body else {
            continue;
        };

        let id_text = id.to_string();
        out.start(
            "audioObject",
            &[("audioObjectID", &id_text), ("audioObjectName", primary_name(entity))],
        )?;
        for label in entity.names.labels() {
            let lang = label.language.clone().unwrap_or_default();
            out.leaf("audioObjectLabel", &[("language", &lang)], &label.text)?;
        }
        out.leaf("gain", &[("gainUnit", "linear")], &fmt_float(gain.as_linear()))?;

        let mut packs: Vec<EntityId> = Vec::new();
        let mut tracks: Vec<EntityId> = Vec::new();
        for relation in core.element_relations().filter(|r| r.element == id) {
            if !packs.contains(&relation.target_group) {
                packs.push(relation.target_group);
            }
            tracks.push(relation.track);
        }
        for pack in packs {
            out.leaf("audioPackFormatIDRef", &[], &pack.to_string())?;
        }
        for track in tracks {
            out.leaf("audioTrackUIDRef", &[], &track.to_string())?;
        }

        // Complementary group: emitted on the leader object.
        for comp_id in core.entity_ids(EntityType::ComplementaryRef) {
            let Some(comp) = core.get(comp_id) else { continue };
            let EntityBody::ComplementaryRef { referenced, leader } = &comp.body else {
                continue;
            };
            if *leader != id {
                continue;
            }
            if *referenced == *leader {
                for label in comp.names.labels() {
                    let lang = label.language.clone().unwrap_or_default();
                    out.leaf(
                        "audioComplementaryObjectGroupLabel",
                        &[("language", &lang)],
                        &label.text,
                    )?;
                }
            } else {
                out.leaf("audioComplementaryObjectIDRef", &[], &referenced.to_string())?;
            }
        }

        for avs in core.children(id, EntityType::AltValueSet) {
            let EntityBody::AltValueSet {
                position_offset,
                gain,
            } = &avs.body
            else {
                continue;
            };
            let avs_id = avs.id.to_string();
            out.start("alternativeValueSet", &[("alternativeValueSetID", &avs_id)])?;
            if let Some(offset) = position_offset {
                let [x, y, z] = offset.coordinates();
                out.leaf("positionOffset", &[("coordinate", "X")], &fmt_float(x))?;
                out.leaf("positionOffset", &[("coordinate", "Y")], &fmt_float(y))?;
                out.leaf("positionOffset", &[("coordinate", "Z")], &fmt_float(z))?;
            }
            if let Some(gain) = gain {
                out.leaf("gain", &[("gainUnit", "linear")], &fmt_float(gain.as_linear()))?;
            }
            for label in avs.names.labels() {
                let lang = label.language.clone().unwrap_or_default();
                out.leaf("audioObjectLabel", &[("language", &lang)], &label.text)?;
            }
            out.end("alternativeValueSet")?;
        }

        out.end("audioObject")?;
    }

    // audioPackFormat
    for id in core.entity_ids(EntityType::TargetGroup) {
        let Some(entity) = core.get(id) else { continue };
        let EntityBody::TargetGroup { config } = &entity.body else {
            continue;
        };
        let audio_type = match config {
            TargetGroupConfig::Speaker(_) => AudioType::DirectSpeakers,
            TargetGroupConfig::Object { .. } => AudioType::Objects,
        };
        let (type_label, type_definition) = audio_type_attrs(audio_type);

        let id_text = id.to_string();
        out.start(
            "audioPackFormat",
            &[
                ("audioPackFormatID", &id_text),
                ("audioPackFormatName", primary_name(entity)),
                ("typeLabel", type_label),
                ("typeDefinition", type_definition),
            ],
        )?;
        let mut channels: Vec<EntityId> = Vec::new();
        for relation in core.element_relations().filter(|r| r.target_group == id) {
            if !channels.contains(&relation.target) {
                channels.push(relation.target);
            }
        }
        for channel in channels {
            out.leaf("audioChannelFormatIDRef", &[], &channel.to_string())?;
        }
        out.end("audioPackFormat")?;
    }

    // audioChannelFormat
    for id in core.entity_ids(EntityType::Target) {
        let Some(entity) = core.get(id) else { continue };
        let EntityBody::Target {
            audio_type,
            speaker_label,
        } = &entity.body
        else {
            continue;
        };
        let (type_label, type_definition) = audio_type_attrs(*audio_type);

        let id_text = id.to_string();
        out.start(
            "audioChannelFormat",
            &[
                ("audioChannelFormatID", &id_text),
                ("audioChannelFormatName", primary_name(entity)),
                ("typeLabel", type_label),
                ("typeDefinition", type_definition),
            ],
        )?;
        for update in core.children(id, EntityType::BlockUpdate) {
            write_block_format_with_label(&mut out, update, speaker_label)?;
        }
        out.end("audioChannelFormat")?;
    }

    // audioTrackUID
    for id in core.entity_ids(EntityType::AudioTrack) {
        let Some(entity) = core.get(id) else { continue };
        let EntityBody::AudioTrack {
            sample_rate,
            bit_depth,
        } = &entity.body
        else {
            continue;
        };
        let id_text = id.to_string();
        let rate = sample_rate.unwrap_or(48_000).to_string();
        let depth = bit_depth.unwrap_or(24).to_string();
        out.empty(
            "audioTrackUID",
            &[("UID", &id_text), ("sampleRate", &rate), ("bitDepth", &depth)],
        )?;
    }

    out.end("audioFormatExtended")?;
    out.end("frame")?;

    let mut bytes = out.writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_block_format_with_label(
    out: &mut XmlOut,
    update: &ModelEntity,
    speaker_label: &str,
) -> Result<(), SadmError> {
    let EntityBody::BlockUpdate { position, gain, time } = &update.body else {
        return Ok(());
    };

    let id = update.id.to_string();
    let mut attrs: Vec<(&str, String)> = vec![("audioBlockFormatID", id)];
    if let Some((start, duration)) = time {
        attrs.push(("rtime", start.to_string()));
        attrs.push(("duration", duration.to_string()));
    }
    let attrs: Vec<(&str, &str)> = attrs.iter().map(|(k, v)| (*k, v.as_str())).collect();
    out.start("audioBlockFormat", &attrs)?;

    if !speaker_label.is_empty() {
        out.leaf("speakerLabel", &[], speaker_label)?;
    }
    let [a, b, c] = position.coordinates();
    if position.is_cartesian() {
        out.leaf("cartesian", &[], "1")?;
        out.leaf("position", &[("coordinate", "X")], &fmt_float(a))?;
        out.leaf("position", &[("coordinate", "Y")], &fmt_float(b))?;
        out.leaf("position", &[("coordinate", "Z")], &fmt_float(c))?;
    } else {
        out.leaf("position", &[("coordinate", "azimuth")], &fmt_float(a))?;
        out.leaf("position", &[("coordinate", "elevation")], &fmt_float(b))?;
        out.leaf("position", &[("coordinate", "distance")], &fmt_float(c))?;
    }
    out.leaf("gain", &[("gainUnit", "linear")], &fmt_float(gain.as_linear()))?;
    out.end("audioBlockFormat")
}

// ---------------------------------------------------------------- reading

/// A small DOM; the dialect is shallow enough that building a tree is
/// simpler and more robust than a streaming interpretation.
#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<XmlNode>,
    text: String,
}

impl XmlNode {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn parse_tree(bytes: &[u8]) -> Result<XmlNode, SadmError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = vec![XmlNode::default()];
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(start) => {
                stack.push(node_from_start(&start)?);
            }
            Event::Empty(start) => {
                let node = node_from_start(&start)?;
                stack.last_mut().expect("stack never empties").children.push(node);
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(xml_err)?;
                stack.last_mut().expect("stack never empties").text.push_str(&text);
            }
            Event::End(_) => {
                let node = stack.pop().expect("stack never empties");
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Err(SadmError::Parse("unbalanced element".to_string())),
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if stack.len() != 1 {
        return Err(SadmError::Parse("unclosed element".to_string()));
    }
    stack
        .pop()
        .and_then(|root| root.children.into_iter().find(|c| c.name == "frame"))
        .ok_or(SadmError::MissingElement("frame"))
}

fn node_from_start(start: &BytesStart<'_>) -> Result<XmlNode, SadmError> {
    let mut node = XmlNode {
        name: String::from_utf8_lossy(start.name().as_ref()).to_string(),
        ..Default::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|e| SadmError::Parse(e.to_string()))?;
        node.attrs.push((
            String::from_utf8_lossy(attr.key.as_ref()).to_string(),
            attr.unescape_value().map_err(xml_err)?.to_string(),
        ));
    }
    Ok(node)
}

fn parse_id(text: &str) -> Result<EntityId, SadmError> {
    text.parse().map_err(|_| SadmError::BadAttribute {
        attr: "ID",
        value: text.to_string(),
    })
}

fn parse_float(node: &XmlNode) -> f64 {
    node.text.trim().parse().unwrap_or(0.0)
}

fn node_position(node: &XmlNode, element: &str) -> Option<Position> {
    let coord = |name: &str| {
        node.children_named(element)
            .find(|p| p.attr("coordinate") == Some(name))
            .map(parse_float)
    };
    if let (Some(x), Some(y), Some(z)) = (coord("X"), coord("Y"), coord("Z")) {
        return Some(Position::Cartesian { x, y, z });
    }
    if let (Some(azimuth), Some(elevation)) = (coord("azimuth"), coord("elevation")) {
        return Some(Position::Spherical {
            azimuth,
            elevation,
            distance: coord("distance").unwrap_or(1.0),
        });
    }
    None
}

fn node_gain(node: &XmlNode) -> Option<Gain> {
    let gain = node.child("gain")?;
    let value = parse_float(gain);
    match gain.attr("gainUnit") {
        Some("dB") => Some(Gain::db(value)),
        _ => Some(Gain::linear(value)),
    }
}

fn node_loudness(node: &XmlNode) -> Option<Loudness> {
    let loudness = node.child("loudnessMetadata")?;
    Some(Loudness {
        practice: method_practice(loudness.attr("loudnessMethod").unwrap_or("")),
        integrated: loudness.child("integratedLoudness").map(parse_float).unwrap_or(0.0),
        speech_gated: loudness.child("dialogueLoudness").map(parse_float),
        range: loudness.child("loudnessRange").map(parse_float),
    })
}

fn node_labels(node: &XmlNode, element: &str) -> Vec<EntityName> {
    node.children_named(element)
        .map(|label| EntityName::new(label.text.trim(), label.attr("language").filter(|l| !l.is_empty())))
        .collect()
}

fn infer_speaker_config(channels: usize) -> Option<SpeakerConfig> {
    match channels {
        2 => Some(SpeakerConfig::Stereo),
        3 => Some(SpeakerConfig::Surround30),
        6 => Some(SpeakerConfig::Surround51),
        8 => Some(SpeakerConfig::Surround512),
        10 => Some(SpeakerConfig::Surround514),
        12 => Some(SpeakerConfig::Surround714),
        16 => Some(SpeakerConfig::Surround916),
        _ => None,
    }
}

/// Parse an S-ADM frame into `core`. The model is cleared first; a
/// parse error leaves it cleared.
pub fn read_xml(bytes: &[u8], core: &mut CoreModel) -> Result<(), SadmError> {
    core.clear();
    let result = read_xml_inner(bytes, core);
    if result.is_err() {
        core.clear();
    }
    result
}

fn read_xml_inner(bytes: &[u8], core: &mut CoreModel) -> Result<(), SadmError> {
    let frame = parse_tree(bytes)?;
    let header = frame.child("frameHeader").ok_or(SadmError::MissingElement("frameHeader"))?;
    let extended = frame
        .child("audioFormatExtended")
        .ok_or(SadmError::MissingElement("audioFormatExtended"))?;

    // frameFormat
    let ff = header.child("frameFormat").ok_or(SadmError::MissingElement("frameFormat"))?;
    let ff_id = parse_id(ff.attr("frameFormatID").unwrap_or(""))?;
    let start: AdmTime = ff
        .attr("start")
        .unwrap_or("00:00:00.00000S48000")
        .parse()
        .map_err(|_| SadmError::BadAttribute {
            attr: "start",
            value: ff.attr("start").unwrap_or("").to_string(),
        })?;
    let duration: AdmTime = ff
        .attr("duration")
        .unwrap_or("00:00:00.01920S48000")
        .parse()
        .map_err(|_| SadmError::BadAttribute {
            attr: "duration",
            value: ff.attr("duration").unwrap_or("").to_string(),
        })?;
    let flow_id = ff
        .attr("flowID")
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or(Uuid::nil());
    core.add_entity(
        EntityBody::FrameFormat {
            frame_type: ff.attr("type").unwrap_or("full").to_string(),
            start,
            duration,
            flow_id,
        },
        ff_id,
    )?;

    // audioTrackUID before the transport that references them.
    for track in extended.children_named("audioTrackUID") {
        let id = parse_id(track.attr("UID").unwrap_or(""))?;
        core.add_entity(
            EntityBody::AudioTrack {
                sample_rate: track.attr("sampleRate").and_then(|v| v.parse().ok()),
                bit_depth: track.attr("bitDepth").and_then(|v| v.parse().ok()),
            },
            id,
        )?;
    }

    // Transport: source group, sources, source relations.
    if let Some(transport) = header.child("transportTrackFormat") {
        let group_id = parse_id(transport.attr("transportID").unwrap_or("TP_0001"))?;
        let group_number = group_id.primary().max(1) as u16;
        core.add_named_entity(
            EntityBody::SourceGroup { group: group_number },
            group_id,
            transport
                .attr("transportName")
                .filter(|name| !name.is_empty())
                .map(|name| EntityName::new(name, None)),
        )?;
        for track in transport.children_named("audioTrack") {
            let channel: u16 = track
                .attr("trackID")
                .and_then(|v| v.parse().ok())
                .ok_or(SadmError::BadAttribute {
                    attr: "trackID",
                    value: track.attr("trackID").unwrap_or("").to_string(),
                })?;
            let source = core.add_source(group_number, channel, EntityId::NULL)?;
            for track_ref in track.children_named("audioTrackUIDRef") {
                let track_id = parse_id(track_ref.text.trim())?;
                core.add_source_relation(group_id, source, track_id)?;
            }
        }
    }

    // audioChannelFormat + blocks.
    for channel in extended.children_named("audioChannelFormat") {
        let id = parse_id(channel.attr("audioChannelFormatID").unwrap_or(""))?;
        let audio_type = id.audio_type().unwrap_or(AudioType::DirectSpeakers);
        let speaker_label = channel
            .children_named("audioBlockFormat")
            .find_map(|b| b.child("speakerLabel"))
            .map(|l| l.text.trim().to_string())
            .unwrap_or_default();
        core.add_named_entity(
            EntityBody::Target {
                audio_type,
                speaker_label,
            },
            id,
            channel
                .attr("audioChannelFormatName")
                .filter(|name| !name.is_empty())
                .map(|name| EntityName::new(name, None)),
        )?;

        for block in channel.children_named("audioBlockFormat") {
            let block_id = parse_id(block.attr("audioBlockFormatID").unwrap_or(""))?;
            let time = match (block.attr("rtime"), block.attr("duration")) {
                (Some(rtime), Some(duration)) => Some((
                    rtime.parse().map_err(|_| SadmError::BadAttribute {
                        attr: "rtime",
                        value: rtime.to_string(),
                    })?,
                    duration.parse().map_err(|_| SadmError::BadAttribute {
                        attr: "duration",
                        value: duration.to_string(),
                    })?,
                )),
                _ => None,
            };
            core.add_block_update(
                EntityId::NULL,
                node_position(block, "position").unwrap_or(Position::ORIGIN),
                node_gain(block).unwrap_or_default(),
                time,
                block_id,
            )?;
        }
    }

    // audioPackFormat: channel membership recorded for wiring later.
    let mut pack_channels: Vec<(EntityId, Vec<EntityId>)> = Vec::new();
    for pack in extended.children_named("audioPackFormat") {
        let id = parse_id(pack.attr("audioPackFormatID").unwrap_or(""))?;
        let channels: Vec<EntityId> = pack
            .children_named("audioChannelFormatIDRef")
            .map(|r| parse_id(r.text.trim()))
            .collect::<Result<_, _>>()?;

        let config = match id.audio_type() {
            Some(AudioType::Objects) => TargetGroupConfig::Object {
                class: ObjectClass::Generic,
                is_dynamic: true,
            },
            _ => TargetGroupConfig::Speaker(
                infer_speaker_config(channels.len())
                    .ok_or(SadmError::BadAttribute {
                        attr: "audioPackFormatID",
                        value: format!("{} channels", channels.len()),
                    })?,
            ),
        };
        core.add_named_entity(
            EntityBody::TargetGroup { config },
            id,
            pack.attr("audioPackFormatName")
                .filter(|name| !name.is_empty())
                .map(|name| EntityName::new(name, None)),
        )?;
        pack_channels.push((id, channels));
    }

    // audioObject: elements, labels, value sets, complementary refs,
    // element relations.
    let mut comp_sequence = 1u32;
    for object in extended.children_named("audioObject") {
        let id = parse_id(object.attr("audioObjectID").unwrap_or(""))?;
        core.add_named_entity(
            EntityBody::AudioElement {
                gain: node_gain(object).unwrap_or_default(),
                interaction: None,
            },
            id,
            object
                .attr("audioObjectName")
                .filter(|name| !name.is_empty())
                .map(|name| EntityName::new(name, None)),
        )?;
        for label in node_labels(object, "audioObjectLabel") {
            core.add_label(id, label)?;
        }

        for avs in object.children_named("alternativeValueSet") {
            let avs_id = parse_id(avs.attr("alternativeValueSetID").unwrap_or(""))?;
            let labels = node_labels(avs, "audioObjectLabel");
            core.add_alt_value_set(
                EntityId::NULL,
                node_position(avs, "positionOffset"),
                node_gain(avs),
                &labels,
                avs_id,
            )?;
        }

        let packs: Vec<EntityId> = object
            .children_named("audioPackFormatIDRef")
            .map(|r| parse_id(r.text.trim()))
            .collect::<Result<_, _>>()?;
        let tracks: Vec<EntityId> = object
            .children_named("audioTrackUIDRef")
            .map(|r| parse_id(r.text.trim()))
            .collect::<Result<_, _>>()?;
        for pack in packs {
            let channels = pack_channels
                .iter()
                .find(|(id, _)| *id == pack)
                .map(|(_, channels)| channels.clone())
                .unwrap_or_default();
            for (channel, track) in channels.iter().zip(tracks.iter()) {
                core.add_element_relation(id, pack, *channel, *track)?;
            }
        }
    }

    // Complementary groups need every object present first.
    for object in extended.children_named("audioObject") {
        let leader = parse_id(object.attr("audioObjectID").unwrap_or(""))?;
        let group_labels = node_labels(object, "audioComplementaryObjectGroupLabel");
        let members: Vec<EntityId> = object
            .children_named("audioComplementaryObjectIDRef")
            .map(|r| parse_id(r.text.trim()))
            .collect::<Result<_, _>>()?;
        if group_labels.is_empty() && members.is_empty() {
            continue;
        }
        core.add_complementary_element(leader, leader, comp_sequence, Some(&group_labels))?;
        comp_sequence += 1;
        for member in members {
            core.add_complementary_element(member, leader, comp_sequence, None)?;
            comp_sequence += 1;
        }
    }

    // audioContent
    let mut content_elements: Vec<(EntityId, Vec<EntityId>)> = Vec::new();
    for content in extended.children_named("audioContent") {
        let id = parse_id(content.attr("audioContentID").unwrap_or(""))?;
        let kind = content
            .child("dialogue")
            .map(read_content_kind)
            .unwrap_or_default();
        core.add_named_entity(
            EntityBody::Content {
                kind,
                language: content
                    .attr("audioContentLanguage")
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
                loudness: node_loudness(content),
            },
            id,
            content
                .attr("audioContentName")
                .filter(|name| !name.is_empty())
                .map(|name| {
                    EntityName::new(
                        name,
                        content.attr("audioContentLanguage").filter(|l| !l.is_empty()),
                    )
                }),
        )?;
        let elements: Vec<EntityId> = content
            .children_named("audioObjectIDRef")
            .map(|r| parse_id(r.text.trim()))
            .collect::<Result<_, _>>()?;
        content_elements.push((id, elements));
    }

    // audioProgramme + presentation relations.
    for programme in extended.children_named("audioProgramme") {
        let id = parse_id(programme.attr("audioProgrammeID").unwrap_or(""))?;
        core.add_entity(
            EntityBody::Presentation {
                loudness: node_loudness(programme),
            },
            id,
        )?;
        if let Some(name) = programme.attr("audioProgrammeName").filter(|n| !n.is_empty()) {
            core.add_name(
                id,
                EntityName::new(
                    name,
                    programme.attr("audioProgrammeLanguage").filter(|l| !l.is_empty()),
                ),
            )?;
        }
        for label in node_labels(programme, "audioProgrammeLabel") {
            core.add_label(id, label)?;
        }

        let avs_refs: Vec<EntityId> = programme
            .children_named("alternativeValueSetIDRef")
            .map(|r| parse_id(r.text.trim()))
            .collect::<Result<_, _>>()?;

        for content_ref in programme.children_named("audioContentIDRef") {
            let content_id = parse_id(content_ref.text.trim())?;
            let elements = content_elements
                .iter()
                .find(|(id, _)| *id == content_id)
                .map(|(_, elements)| elements.clone())
                .unwrap_or_default();
            for element in elements {
                let alt_value_set = avs_refs
                    .iter()
                    .find(|avs| avs.parent_id().ok() == Some(element))
                    .copied()
                    .unwrap_or(EntityId::NULL);
                core.add_presentation_relation(PresentationRelation {
                    presentation: id,
                    content: content_id,
                    element_group: EntityId::NULL,
                    element,
                    alt_value_set,
                    comp_ref: EntityId::NULL,
                })?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combo::to_core::convert_to_core_model;
    use crate::pmd::model::{Bed, PmdModel, PmdPresentation};

    fn stereo_core() -> CoreModel {
        let mut pmd = PmdModel::new();
        pmd.add_signals(2).unwrap();
        pmd.add_bed(Bed::direct(1, SpeakerConfig::Stereo, "Stereo_Bed", 1))
            .unwrap();
        pmd.add_presentation(PmdPresentation {
            id: 1,
            config: SpeakerConfig::Stereo,
            language: "eng".to_string(),
            elements: vec![1],
            names: vec![crate::pmd::model::PresentationName {
                language: "eng".to_string(),
                text: "English".to_string(),
            }],
        })
        .unwrap();

        let mut core = CoreModel::new();
        convert_to_core_model(&pmd, &mut core).unwrap();
        core
    }

    #[test]
    fn canonical_order_and_ids() {
        let xml = write_xml(&stereo_core()).unwrap();
        let text = String::from_utf8(xml).unwrap();

        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        for needle in [
            "<frame version=\"ITU-R_BS.2125-0\">",
            "<audioFormatExtended version=\"ITU-R_BS.2076-2\">",
            "audioProgrammeID=\"APR_1001\"",
            "audioProgrammeName=\"English\"",
            "audioObjectID=\"AO_1001\"",
            "audioPackFormatID=\"AP_00011001\"",
            "<speakerLabel>L</speakerLabel>",
        ] {
            assert!(text.contains(needle), "missing {needle} in:\n{text}");
        }

        // Canonical section order inside audioFormatExtended.
        let programme = text.find("<audioProgramme ").unwrap();
        let content = text.find("<audioContent ").unwrap();
        let object = text.find("<audioObject ").unwrap();
        let pack = text.find("<audioPackFormat ").unwrap();
        let channel = text.find("<audioChannelFormat ").unwrap();
        let track_uid = text.find("<audioTrackUID ").unwrap();
        assert!(programme < content && content < object && object < pack);
        assert!(pack < channel && channel < track_uid);
    }

    #[test]
    fn write_read_write_is_stable() {
        let xml = write_xml(&stereo_core()).unwrap();

        let mut reread = CoreModel::new();
        read_xml(&xml, &mut reread).unwrap();
        let xml2 = write_xml(&reread).unwrap();

        assert_eq!(
            String::from_utf8(xml).unwrap(),
            String::from_utf8(xml2).unwrap()
        );
    }

    #[test]
    fn reader_accepts_reordered_elements() {
        let xml = String::from_utf8(write_xml(&stereo_core()).unwrap()).unwrap();

        // Move the audioTrackUID section ahead of the programmes.
        let uid_start = xml.find("  <audioTrackUID ").unwrap();
        let uid_end = xml.rfind("/>\n  </audioFormatExtended>").unwrap() + 3;
        let uids: String = xml[uid_start..uid_end].to_string();
        let reordered = xml.replacen(&uids, "", 1).replacen(
            "<audioFormatExtended version=\"ITU-R_BS.2076-2\">\n",
            &format!("<audioFormatExtended version=\"ITU-R_BS.2076-2\">\n{uids}"),
            1,
        );

        let mut model = CoreModel::new();
        read_xml(reordered.as_bytes(), &mut model).unwrap();
        assert_eq!(model.count_entities(EntityType::AudioTrack), 2);
        assert_eq!(model.count_entities(EntityType::Presentation), 1);
    }

    #[test]
    fn parse_error_leaves_model_empty() {
        let mut model = CoreModel::new();
        let _ = read_xml(b"<frame><frameHeader>", &mut model);
        assert!(model.is_empty());

        assert!(read_xml(b"<notaframe/>", &mut model).is_err());
        assert!(model.is_empty());
    }
}
