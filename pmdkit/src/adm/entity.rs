//! Model entities: a shared header (ID + names) and one tagged-union
//! body per entity kind. Relationships between entities are expressed
//! through typed IDs, never through references.

use uuid::Uuid;

use crate::adm::id::{AudioType, EntityId, EntityType};
use crate::adm::types::{AdmTime, Gain, NameSet, Position};
use crate::pmd::types::{ContentKind, Loudness, ObjectClass, SpeakerConfig};

/// Pack format content: a bed carries a speaker configuration, an
/// object carries a class. Exactly one of the two, by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetGroupConfig {
    Speaker(SpeakerConfig),
    Object { class: ObjectClass, is_dynamic: bool },
}

/// Audio object interaction ranges.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ObjectInteraction {
    pub on_off: bool,
    /// (min, max) gain the consumer may apply.
    pub gain_range: Option<(Gain, Gain)>,
    /// (min, max) per coordinate, in declaration order.
    pub position_ranges: Option<[(f64, f64); 3]>,
}

/// A profile declaration from a profile list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDescriptor {
    pub name: String,
    pub version: String,
    pub level: u16,
    pub value: String,
}

/// Entity-kind-specific content.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityBody {
    Source {
        group: u16,
        channel: u16,
    },
    SourceGroup {
        group: u16,
    },
    AudioTrack {
        sample_rate: Option<u32>,
        bit_depth: Option<u8>,
    },
    Target {
        audio_type: AudioType,
        speaker_label: String,
    },
    TargetGroup {
        config: TargetGroupConfig,
    },
    BlockUpdate {
        position: Position,
        gain: Gain,
        time: Option<(AdmTime, AdmTime)>,
    },
    AltValueSet {
        position_offset: Option<Position>,
        gain: Option<Gain>,
    },
    AudioElement {
        gain: Gain,
        interaction: Option<ObjectInteraction>,
    },
    ElementGroup {
        gain: Gain,
    },
    ComplementaryRef {
        referenced: EntityId,
        leader: EntityId,
    },
    Content {
        kind: ContentKind,
        language: Option<String>,
        loudness: Option<Loudness>,
    },
    Presentation {
        loudness: Option<Loudness>,
    },
    FrameFormat {
        frame_type: String,
        start: AdmTime,
        duration: AdmTime,
        flow_id: Uuid,
    },
    Profile(ProfileDescriptor),
}

impl EntityBody {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityBody::Source { .. } => EntityType::Source,
            EntityBody::SourceGroup { .. } => EntityType::SourceGroup,
            EntityBody::AudioTrack { .. } => EntityType::AudioTrack,
            EntityBody::Target { .. } => EntityType::Target,
            EntityBody::TargetGroup { .. } => EntityType::TargetGroup,
            EntityBody::BlockUpdate { .. } => EntityType::BlockUpdate,
            EntityBody::AltValueSet { .. } => EntityType::AltValueSet,
            EntityBody::AudioElement { .. } | EntityBody::ElementGroup { .. } => EntityType::Object,
            EntityBody::ComplementaryRef { .. } => EntityType::ComplementaryRef,
            EntityBody::Content { .. } => EntityType::Content,
            EntityBody::Presentation { .. } => EntityType::Presentation,
            EntityBody::FrameFormat { .. } => EntityType::FrameFormat,
            EntityBody::Profile(_) => EntityType::ProfileList,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            EntityBody::ElementGroup { .. } => "ElementGroup",
            other => other.entity_type().name(),
        }
    }
}

/// Name/label limits for one entity kind: (max primary names, total cap).
pub fn name_limits(t: EntityType) -> (usize, usize) {
    match t {
        EntityType::Presentation | EntityType::Content | EntityType::Object => (1, 17),
        // Value sets and complementary leaders carry labels only.
        EntityType::AltValueSet | EntityType::ComplementaryRef => (0, 16),
        EntityType::Source | EntityType::BlockUpdate => (0, 0),
        _ => (1, 1),
    }
}

/// One entity in the store: ID, names and the kind-specific body.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEntity {
    pub id: EntityId,
    pub names: NameSet,
    pub body: EntityBody,
}

impl ModelEntity {
    pub fn new(id: EntityId, body: EntityBody) -> Self {
        let (max_names, limit) = name_limits(body.entity_type());
        Self {
            id,
            names: NameSet::with_limits(max_names, limit),
            body,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.body.entity_type()
    }
}
