//! Typed 64-bit entity identifiers.
//!
//! ## Layout
//!
//! | Bits | Field |
//! |------|-------|
//! | 56..63 | entity type tag |
//! | 40..55 | audio-type sub-tag (channel and block formats) |
//! | 16..39 | primary sequence number |
//! | 0..15  | secondary sequence number (subordinate entities) |
//!
//! The all-zero value is the reserved null ID. Textual forms follow the
//! BS.2076 ID conventions (`AO_1001`, `AC_00031001`, `AB_00031001_00000002`,
//! `AVS_1001_0001`, ...).

use std::fmt;
use std::str::FromStr;

use crate::utils::errors::IdError;

/// Entity type tag values (bits 56..63 of an [`EntityId`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EntityType {
    FrameFormat = 0x01,
    SourceGroup = 0x02,
    Source = 0x03,
    AudioTrack = 0x04,
    TargetGroup = 0x05,
    StreamFormat = 0x06,
    TrackFormat = 0x07,
    Target = 0x08,
    BlockUpdate = 0x09,
    Object = 0x0A,
    AltValueSet = 0x0B,
    Content = 0x0C,
    Presentation = 0x0D,
    ComplementaryRef = 0x0E,
    Flow = 0x0F,
    ProfileList = 0x10,
}

impl EntityType {
    pub const ALL: [EntityType; 16] = [
        EntityType::FrameFormat,
        EntityType::SourceGroup,
        EntityType::Source,
        EntityType::AudioTrack,
        EntityType::TargetGroup,
        EntityType::StreamFormat,
        EntityType::TrackFormat,
        EntityType::Target,
        EntityType::BlockUpdate,
        EntityType::Object,
        EntityType::AltValueSet,
        EntityType::Content,
        EntityType::Presentation,
        EntityType::ComplementaryRef,
        EntityType::Flow,
        EntityType::ProfileList,
    ];

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as u8 == tag)
    }

    /// ID string prefix, without the trailing underscore.
    pub fn prefix(self) -> &'static str {
        match self {
            EntityType::FrameFormat => "FF",
            EntityType::SourceGroup => "TP",
            EntityType::Source => "SRC",
            EntityType::AudioTrack => "ATU",
            EntityType::TargetGroup => "AP",
            EntityType::StreamFormat => "AS",
            EntityType::TrackFormat => "AT",
            EntityType::Target => "AC",
            EntityType::BlockUpdate => "AB",
            EntityType::Object => "AO",
            EntityType::AltValueSet => "AVS",
            EntityType::Content => "ACO",
            EntityType::Presentation => "APR",
            EntityType::ComplementaryRef => "ACR",
            EntityType::Flow => "FLW",
            EntityType::ProfileList => "PRL",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityType::FrameFormat => "FrameFormat",
            EntityType::SourceGroup => "SourceGroup",
            EntityType::Source => "Source",
            EntityType::AudioTrack => "AudioTrack",
            EntityType::TargetGroup => "TargetGroup",
            EntityType::StreamFormat => "StreamFormat",
            EntityType::TrackFormat => "TrackFormat",
            EntityType::Target => "Target",
            EntityType::BlockUpdate => "BlockUpdate",
            EntityType::Object => "AudioElement",
            EntityType::AltValueSet => "AlternativeValueSet",
            EntityType::Content => "ContentGroup",
            EntityType::Presentation => "Presentation",
            EntityType::ComplementaryRef => "ComplementaryRef",
            EntityType::Flow => "Flow",
            EntityType::ProfileList => "ProfileList",
        }
    }

    /// Whether the textual form embeds the 4-hex-digit audio type.
    fn has_audio_type_field(self) -> bool {
        matches!(
            self,
            EntityType::TargetGroup
                | EntityType::StreamFormat
                | EntityType::TrackFormat
                | EntityType::Target
                | EntityType::BlockUpdate
        )
    }

    /// First primary sequence number handed out for this type.
    pub fn first_sequence(self) -> u32 {
        match self {
            EntityType::Object
            | EntityType::Content
            | EntityType::Presentation
            | EntityType::TargetGroup
            | EntityType::StreamFormat
            | EntityType::TrackFormat
            | EntityType::Target => 0x1001,
            _ => 1,
        }
    }
}

/// BS.2076 `typeDefinition` values (bits 40..55 of an [`EntityId`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum AudioType {
    #[default]
    None = 0,
    DirectSpeakers = 1,
    Matrix = 2,
    Objects = 3,
    Hoa = 4,
    Binaural = 5,
}

impl AudioType {
    pub fn from_value(value: u16) -> Option<Self> {
        match value {
            0 => Some(AudioType::None),
            1 => Some(AudioType::DirectSpeakers),
            2 => Some(AudioType::Matrix),
            3 => Some(AudioType::Objects),
            4 => Some(AudioType::Hoa),
            5 => Some(AudioType::Binaural),
            _ => None,
        }
    }
}

const TYPE_SHIFT: u32 = 56;
const AUDIO_TYPE_SHIFT: u32 = 40;
const PRIMARY_SHIFT: u32 = 16;

const AUDIO_TYPE_MASK: u64 = 0xFFFF;
const PRIMARY_MASK: u64 = 0xFF_FFFF;
const SECONDARY_MASK: u64 = 0xFFFF;

/// A typed 64-bit entity identifier. The all-zero value is the null ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntityId(pub u64);

impl EntityId {
    pub const NULL: EntityId = EntityId(0);

    pub fn new(t: EntityType, audio_type: AudioType, primary: u32, secondary: u16) -> Self {
        EntityId(
            ((t as u64) << TYPE_SHIFT)
                | ((audio_type as u64) << AUDIO_TYPE_SHIFT)
                | ((primary as u64 & PRIMARY_MASK) << PRIMARY_SHIFT)
                | secondary as u64,
        )
    }

    /// Place `n` into the primary sequence field with everything else zero.
    pub fn generic(t: EntityType, n: u32) -> Self {
        Self::new(t, AudioType::None, n, 0)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn entity_type(self) -> Option<EntityType> {
        EntityType::from_tag((self.0 >> TYPE_SHIFT) as u8)
    }

    pub fn audio_type(self) -> Option<AudioType> {
        AudioType::from_value(((self.0 >> AUDIO_TYPE_SHIFT) & AUDIO_TYPE_MASK) as u16)
    }

    pub fn primary(self) -> u32 {
        ((self.0 >> PRIMARY_SHIFT) & PRIMARY_MASK) as u32
    }

    pub fn secondary(self) -> u16 {
        (self.0 & SECONDARY_MASK) as u16
    }

    pub fn with_secondary(self, secondary: u16) -> Self {
        EntityId((self.0 & !SECONDARY_MASK) | secondary as u64)
    }

    /// Recover the parent ID of a subordinate entity by zeroing the
    /// secondary sequence and swapping the type tag.
    pub fn parent_id(self) -> Result<EntityId, IdError> {
        let base = self.0 & !SECONDARY_MASK;
        match self.entity_type() {
            Some(EntityType::BlockUpdate) => Ok(EntityId(
                (base & !(0xFFu64 << TYPE_SHIFT)) | ((EntityType::Target as u64) << TYPE_SHIFT),
            )),
            Some(EntityType::AltValueSet) => Ok(EntityId(
                (base & !(0xFFu64 << TYPE_SHIFT))
                    & !(AUDIO_TYPE_MASK << AUDIO_TYPE_SHIFT)
                    | ((EntityType::Object as u64) << TYPE_SHIFT),
            )),
            _ => Err(IdError::NoParent(self)),
        }
    }

    /// Derive the ID of a subordinate entity under `self`.
    pub fn child_id(self, t: EntityType, secondary: u16) -> Self {
        let audio_type = self.audio_type().unwrap_or_default();
        Self::new(t, audio_type, self.primary(), secondary)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return Ok(());
        }
        let Some(t) = self.entity_type() else {
            return write!(f, "BAD_{:016X}", self.0);
        };

        let prefix = t.prefix();
        let audio_type = ((self.0 >> AUDIO_TYPE_SHIFT) & AUDIO_TYPE_MASK) as u16;
        match t {
            EntityType::FrameFormat => write!(f, "{}_{:011X}", prefix, self.primary()),
            EntityType::SourceGroup
            | EntityType::Object
            | EntityType::Content
            | EntityType::Presentation
            | EntityType::ComplementaryRef
            | EntityType::ProfileList => write!(f, "{}_{:04X}", prefix, self.primary()),
            EntityType::Source | EntityType::AudioTrack | EntityType::Flow => {
                write!(f, "{}_{:08X}", prefix, self.primary())
            }
            EntityType::TargetGroup
            | EntityType::StreamFormat
            | EntityType::TrackFormat
            | EntityType::Target => {
                write!(f, "{}_{:04X}{:04X}", prefix, audio_type, self.primary())
            }
            EntityType::BlockUpdate => write!(
                f,
                "{}_{:04X}{:04X}_{:08X}",
                prefix,
                audio_type,
                self.primary(),
                self.secondary()
            ),
            EntityType::AltValueSet => {
                write!(f, "{}_{:04X}_{:04X}", prefix, self.primary(), self.secondary())
            }
        }
    }
}

fn parse_hex(digits: &str, what: &str) -> Result<u64, IdError> {
    if digits.is_empty() || digits.len() > 16 {
        return Err(IdError::Malformed(what.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| IdError::Malformed(what.to_string()))
}

impl FromStr for EntityId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "NULL" {
            return Ok(EntityId::NULL);
        }

        let (prefix, rest) = s.split_once('_').ok_or_else(|| IdError::Malformed(s.to_string()))?;
        let t = EntityType::ALL
            .iter()
            .copied()
            .find(|t| t.prefix() == prefix)
            .ok_or_else(|| IdError::UnknownPrefix(s.to_string()))?;

        let (audio_type, primary, secondary) = if t.has_audio_type_field() {
            let (head, secondary) = match rest.split_once('_') {
                Some((head, tail)) if t == EntityType::BlockUpdate => (head, parse_hex(tail, s)?),
                None if t != EntityType::BlockUpdate => (rest, 0),
                _ => return Err(IdError::Malformed(s.to_string())),
            };
            if head.len() < 5 {
                return Err(IdError::Malformed(s.to_string()));
            }
            let (at, seq) = head.split_at(4);
            let audio_type = AudioType::from_value(parse_hex(at, s)? as u16)
                .ok_or_else(|| IdError::Malformed(s.to_string()))?;
            (audio_type, parse_hex(seq, s)?, secondary)
        } else if t == EntityType::AltValueSet {
            let (head, tail) = rest.split_once('_').ok_or_else(|| IdError::Malformed(s.to_string()))?;
            (AudioType::None, parse_hex(head, s)?, parse_hex(tail, s)?)
        } else {
            (AudioType::None, parse_hex(rest, s)?, 0)
        };

        if primary > PRIMARY_MASK || secondary > SECONDARY_MASK {
            return Err(IdError::Malformed(s.to_string()));
        }

        Ok(EntityId::new(t, audio_type, primary as u32, secondary as u16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trip_every_type() {
        let cases = [
            EntityId::new(EntityType::FrameFormat, AudioType::None, 1, 0),
            EntityId::new(EntityType::SourceGroup, AudioType::None, 1, 0),
            EntityId::new(EntityType::Source, AudioType::None, 7, 0),
            EntityId::new(EntityType::AudioTrack, AudioType::None, 0x12, 0),
            EntityId::new(EntityType::TargetGroup, AudioType::DirectSpeakers, 0x1001, 0),
            EntityId::new(EntityType::StreamFormat, AudioType::Objects, 0x1002, 0),
            EntityId::new(EntityType::TrackFormat, AudioType::DirectSpeakers, 0x1003, 0),
            EntityId::new(EntityType::Target, AudioType::Objects, 0x1001, 0),
            EntityId::new(EntityType::BlockUpdate, AudioType::Objects, 0x1001, 2),
            EntityId::new(EntityType::Object, AudioType::None, 0x1001, 0),
            EntityId::new(EntityType::AltValueSet, AudioType::None, 0x1001, 1),
            EntityId::new(EntityType::Content, AudioType::None, 0x1003, 0),
            EntityId::new(EntityType::Presentation, AudioType::None, 0x1001, 0),
            EntityId::new(EntityType::ComplementaryRef, AudioType::None, 3, 0),
            EntityId::new(EntityType::Flow, AudioType::None, 99, 0),
            EntityId::new(EntityType::ProfileList, AudioType::None, 1, 0),
        ];

        for id in cases {
            let text = id.to_string();
            assert_eq!(text.parse::<EntityId>().unwrap(), id, "{text}");
        }
    }

    #[test]
    fn reference_forms() {
        assert_eq!(
            "AO_1001".parse::<EntityId>().unwrap(),
            EntityId::new(EntityType::Object, AudioType::None, 0x1001, 0)
        );
        assert_eq!(
            "AC_00031001".parse::<EntityId>().unwrap(),
            EntityId::new(EntityType::Target, AudioType::Objects, 0x1001, 0)
        );
        assert_eq!(
            "AB_00031001_00000002".parse::<EntityId>().unwrap(),
            EntityId::new(EntityType::BlockUpdate, AudioType::Objects, 0x1001, 2)
        );
        assert_eq!(
            "AVS_1001_0001".parse::<EntityId>().unwrap(),
            EntityId::new(EntityType::AltValueSet, AudioType::None, 0x1001, 1)
        );
        assert_eq!(
            EntityId::new(EntityType::Presentation, AudioType::None, 0x1001, 0).to_string(),
            "APR_1001"
        );
        assert_eq!(
            EntityId::new(EntityType::FrameFormat, AudioType::None, 1, 0).to_string(),
            "FF_00000000001"
        );
    }

    #[test]
    fn null_forms() {
        assert_eq!(EntityId::NULL.to_string(), "");
        assert_eq!("".parse::<EntityId>().unwrap(), EntityId::NULL);
        assert_eq!("NULL".parse::<EntityId>().unwrap(), EntityId::NULL);
    }

    #[test]
    fn unknown_prefix_rejected() {
        assert!(matches!(
            "AXQ_1001".parse::<EntityId>(),
            Err(IdError::UnknownPrefix(_))
        ));
    }

    #[test]
    fn parent_of_child() {
        let target = EntityId::new(EntityType::Target, AudioType::DirectSpeakers, 0x1001, 0);
        let update = target.child_id(EntityType::BlockUpdate, 3);
        assert_eq!(update.parent_id().unwrap(), target);

        let object = EntityId::new(EntityType::Object, AudioType::None, 0x1001, 0);
        let avs = object.child_id(EntityType::AltValueSet, 1);
        assert_eq!(avs.parent_id().unwrap(), object);

        assert!(object.parent_id().is_err());
    }
}
