//! PMD vocabulary: speaker configurations, element classes, loudness and
//! the flat auxiliary records (IAT, EEP, ETD, HED, XYZ updates).

use uuid::Uuid;

use crate::adm::types::Position;
use crate::utils::errors::PmdModelError;

/// Fixed bed channel layouts expressible in PMD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SpeakerConfig {
    Stereo = 0,
    Surround30 = 1,
    Surround51 = 2,
    Surround512 = 3,
    Surround514 = 4,
    Surround714 = 5,
    Surround916 = 6,
    Portable = 7,
}

impl SpeakerConfig {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SpeakerConfig::Stereo),
            1 => Some(SpeakerConfig::Surround30),
            2 => Some(SpeakerConfig::Surround51),
            3 => Some(SpeakerConfig::Surround512),
            4 => Some(SpeakerConfig::Surround514),
            5 => Some(SpeakerConfig::Surround714),
            6 => Some(SpeakerConfig::Surround916),
            7 => Some(SpeakerConfig::Portable),
            _ => None,
        }
    }

    pub fn channel_count(self) -> usize {
        self.speakers().len()
    }

    /// Canonical channel order for this configuration.
    pub fn speakers(self) -> &'static [Speaker] {
        use Speaker::*;
        match self {
            SpeakerConfig::Stereo | SpeakerConfig::Portable => &[L, R],
            SpeakerConfig::Surround30 => &[L, R, C],
            SpeakerConfig::Surround51 => &[L, R, C, Lfe, Ls, Rs],
            SpeakerConfig::Surround512 => &[L, R, C, Lfe, Ls, Rs, Ltm, Rtm],
            SpeakerConfig::Surround514 => &[L, R, C, Lfe, Ls, Rs, Ltf, Rtf, Ltr, Rtr],
            SpeakerConfig::Surround714 => {
                &[L, R, C, Lfe, Ls, Rs, Lrs, Rrs, Ltf, Rtf, Ltr, Rtr]
            }
            SpeakerConfig::Surround916 => &[
                L, R, C, Lfe, Ls, Rs, Lrs, Rrs, Lw, Rw, Ltf, Rtf, Ltm, Rtm, Ltr, Rtr,
            ],
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SpeakerConfig::Stereo => "2.0",
            SpeakerConfig::Surround30 => "3.0",
            SpeakerConfig::Surround51 => "5.1",
            SpeakerConfig::Surround512 => "5.1.2",
            SpeakerConfig::Surround514 => "5.1.4",
            SpeakerConfig::Surround714 => "7.1.4",
            SpeakerConfig::Surround916 => "9.1.6",
            SpeakerConfig::Portable => "Portable",
        }
    }
}

/// One speaker of a bed configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    L,
    R,
    C,
    Lfe,
    Ls,
    Rs,
    Lrs,
    Rrs,
    Lw,
    Rw,
    Ltf,
    Rtf,
    Ltm,
    Rtm,
    Ltr,
    Rtr,
}

impl Speaker {
    pub fn label(self) -> &'static str {
        match self {
            Speaker::L => "L",
            Speaker::R => "R",
            Speaker::C => "C",
            Speaker::Lfe => "LFE",
            Speaker::Ls => "Ls",
            Speaker::Rs => "Rs",
            Speaker::Lrs => "Lrs",
            Speaker::Rrs => "Rrs",
            Speaker::Lw => "Lw",
            Speaker::Rw => "Rw",
            Speaker::Ltf => "Ltf",
            Speaker::Rtf => "Rtf",
            Speaker::Ltm => "Ltm",
            Speaker::Rtm => "Rtm",
            Speaker::Ltr => "Ltr",
            Speaker::Rtr => "Rtr",
        }
    }

    pub const ALL: [Speaker; 16] = {
        use Speaker::*;
        [
            L, R, C, Lfe, Ls, Rs, Lrs, Rrs, Lw, Rw, Ltf, Rtf, Ltm, Rtm, Ltr, Rtr,
        ]
    };

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.label() == label)
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Canonical cartesian position of this speaker in the listening cube.
    pub fn position(self) -> Position {
        let (x, y, z) = match self {
            Speaker::L => (-1.0, 1.0, 0.0),
            Speaker::R => (1.0, 1.0, 0.0),
            Speaker::C => (0.0, 1.0, 0.0),
            Speaker::Lfe => (-1.0, 1.0, -1.0),
            Speaker::Ls => (-1.0, 0.0, 0.0),
            Speaker::Rs => (1.0, 0.0, 0.0),
            Speaker::Lrs => (-1.0, -1.0, 0.0),
            Speaker::Rrs => (1.0, -1.0, 0.0),
            Speaker::Lw => (-1.0, 0.5, 0.0),
            Speaker::Rw => (1.0, 0.5, 0.0),
            Speaker::Ltf => (-1.0, 1.0, 1.0),
            Speaker::Rtf => (1.0, 1.0, 1.0),
            Speaker::Ltm => (-1.0, 0.0, 1.0),
            Speaker::Rtm => (1.0, 0.0, 1.0),
            Speaker::Ltr => (-1.0, -1.0, 1.0),
            Speaker::Rtr => (1.0, -1.0, 1.0),
        };
        Position::Cartesian { x, y, z }
    }
}

/// Classification of a PMD object element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ObjectClass {
    Dialogue = 0,
    Vds = 1,
    Voiceover = 2,
    #[default]
    Generic = 3,
    SpokenSubtitle = 4,
    EmergencyAlert = 5,
    EmergencyInfo = 6,
}

impl ObjectClass {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ObjectClass::Dialogue),
            1 => Some(ObjectClass::Vds),
            2 => Some(ObjectClass::Voiceover),
            3 => Some(ObjectClass::Generic),
            4 => Some(ObjectClass::SpokenSubtitle),
            5 => Some(ObjectClass::EmergencyAlert),
            6 => Some(ObjectClass::EmergencyInfo),
            _ => None,
        }
    }

    /// The BS.2076 content kind a presentation derives for this class.
    pub fn content_kind(self) -> ContentKind {
        match self {
            ObjectClass::Dialogue => ContentKind::Dialogue,
            ObjectClass::Vds => ContentKind::AudioDescription,
            ObjectClass::Voiceover => ContentKind::Voiceover,
            ObjectClass::Generic => ContentKind::Mixed,
            ObjectClass::SpokenSubtitle => ContentKind::SpokenSubtitle,
            ObjectClass::EmergencyAlert | ObjectClass::EmergencyInfo => ContentKind::Emergency,
        }
    }
}

/// Content kind enum for ContentGroups, combining the BS.2076
/// dialogue / non-dialogue / mixed sub-tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ContentKind {
    NonDialogue = 0,
    Music = 1,
    Effect = 2,
    Dialogue = 10,
    Voiceover = 11,
    SpokenSubtitle = 12,
    AudioDescription = 13,
    Commentary = 14,
    Emergency = 15,
    #[default]
    Mixed = 20,
}

impl ContentKind {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ContentKind::NonDialogue),
            1 => Some(ContentKind::Music),
            2 => Some(ContentKind::Effect),
            10 => Some(ContentKind::Dialogue),
            11 => Some(ContentKind::Voiceover),
            12 => Some(ContentKind::SpokenSubtitle),
            13 => Some(ContentKind::AudioDescription),
            14 => Some(ContentKind::Commentary),
            15 => Some(ContentKind::Emergency),
            20 => Some(ContentKind::Mixed),
            _ => None,
        }
    }

    /// Inverse of [`ObjectClass::content_kind`], best-effort.
    pub fn object_class(self) -> ObjectClass {
        match self {
            ContentKind::Dialogue => ObjectClass::Dialogue,
            ContentKind::AudioDescription => ObjectClass::Vds,
            ContentKind::Voiceover => ObjectClass::Voiceover,
            ContentKind::SpokenSubtitle => ObjectClass::SpokenSubtitle,
            ContentKind::Emergency => ObjectClass::EmergencyAlert,
            _ => ObjectClass::Generic,
        }
    }
}

/// Loudness measurement practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum LoudnessPractice {
    #[default]
    NotIndicated = 0,
    AtscA85 = 1,
    EbuR128 = 2,
    AribTrB32 = 3,
    FreeTvOp59 = 4,
    Manual = 5,
    ConsumerLeveller = 6,
}

impl LoudnessPractice {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(LoudnessPractice::NotIndicated),
            1 => Some(LoudnessPractice::AtscA85),
            2 => Some(LoudnessPractice::EbuR128),
            3 => Some(LoudnessPractice::AribTrB32),
            4 => Some(LoudnessPractice::FreeTvOp59),
            5 => Some(LoudnessPractice::Manual),
            6 => Some(LoudnessPractice::ConsumerLeveller),
            _ => None,
        }
    }
}

/// Presentation loudness record (PLD).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Loudness {
    pub practice: LoudnessPractice,
    /// Integrated loudness, LKFS.
    pub integrated: f64,
    /// Speech-gated loudness, LKFS.
    pub speech_gated: Option<f64>,
    /// Loudness range, LU.
    pub range: Option<f64>,
}

/// Identity and timing record (IAT). At most one per frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Iat {
    pub content_id: Option<Uuid>,
    /// 35-bit timestamp in 1/240000 s units.
    pub timestamp: u64,
    pub offset: Option<u16>,
    pub validity_duration: Option<u32>,
}

/// EAC3 encoder parameter block (EEP).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncoderParams {
    pub id: u16,
    pub dynrng_prof: Option<u8>,
    pub compr_prof: Option<u8>,
    pub surround_90: bool,
    pub hmix_level: Option<u8>,
    /// Presentations encoded with these parameters.
    pub presentations: Vec<u16>,
}

/// ED2 turnaround descriptor (ETD).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Turnaround {
    pub id: u16,
    /// Frame interval between turnarounds.
    pub interval: u16,
    pub presentations: Vec<u16>,
}

/// Headphone element descriptor (HED).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeadphoneElement {
    pub audio_element: u16,
    pub head_tracking_enabled: bool,
    pub render_mode: u8,
    pub channel_mask: u16,
}

/// Time-tagged position delta for a dynamic object (XYZ), valid only
/// within the current video frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Update {
    /// Offset from frame start, in samples; quantized to 32 on the wire.
    pub sample_offset: u16,
    pub element: u16,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Granularity of XYZ update times on the wire.
pub const UPDATE_TIME_GRANULE: u16 = 32;

/// Bed conformance tags that may be embedded in a bed name, e.g.
/// `Main $[ME] $[CM]`. They are carried verbatim inside the name and
/// survive conversion round trips; this helper extracts them.
pub fn bed_conformance_tags(name: &str) -> Vec<&str> {
    const KNOWN: [&str; 6] = ["$[ME]", "$[CM]", "$[BM]", "$[ML]", "$[D]", "$[C]"];
    KNOWN
        .into_iter()
        .filter(|tag| name.contains(tag))
        .collect()
}

/// Check a PMD language field: two or three lowercase ASCII letters.
pub fn check_language(lang: &str) -> Result<(), PmdModelError> {
    if !(2..=3).contains(&lang.len()) || !lang.bytes().all(|b| b.is_ascii_lowercase()) {
        return Err(PmdModelError::InvalidLanguage(lang.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_counts() {
        assert_eq!(SpeakerConfig::Stereo.channel_count(), 2);
        assert_eq!(SpeakerConfig::Surround51.channel_count(), 6);
        assert_eq!(SpeakerConfig::Surround514.channel_count(), 10);
        assert_eq!(SpeakerConfig::Surround714.channel_count(), 12);
        assert_eq!(SpeakerConfig::Surround916.channel_count(), 16);
    }

    #[test]
    fn speaker_label_round_trip() {
        for config in [
            SpeakerConfig::Stereo,
            SpeakerConfig::Surround51,
            SpeakerConfig::Surround916,
        ] {
            for &speaker in config.speakers() {
                assert_eq!(Speaker::from_label(speaker.label()), Some(speaker));
            }
        }
    }

    #[test]
    fn conformance_tags_extracted() {
        let tags = bed_conformance_tags("Bed 1 $[ME] $[CM]");
        assert_eq!(tags, vec!["$[ME]", "$[CM]"]);
        assert!(bed_conformance_tags("Plain bed").is_empty());
    }

    #[test]
    fn language_check() {
        assert!(check_language("eng").is_ok());
        assert!(check_language("de").is_ok());
        assert!(check_language("ENG").is_err());
        assert!(check_language("x").is_err());
    }
}
