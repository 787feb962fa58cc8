//! The entity-relation store for a complete audio scene.
//!
//! Entities are keyed by [`EntityId`] in ordered maps, and the three
//! relation tables are ordered sets, so every lookup and every
//! first-column range walk is O(log N). Iteration order is the ID order
//! and is stable as long as no mutating call interleaves.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use log::debug;

use crate::adm::entity::{EntityBody, ModelEntity, ProfileDescriptor};
use crate::adm::id::{EntityId, EntityType};
use crate::adm::types::{EntityName, Gain, Position};
use crate::utils::errors::ModelError;

/// One row of the source relation: signal wiring from a transport
/// group through a source to an audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceRelation {
    pub group: EntityId,
    pub source: EntityId,
    pub track: EntityId,
}

/// One row of the element relation: the audio signal chain from an
/// audio track up to an audio element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ElementRelation {
    pub element: EntityId,
    pub target_group: EntityId,
    pub target: EntityId,
    pub track: EntityId,
}

/// One row of the presentation relation. Every column but
/// `presentation` may be the null ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PresentationRelation {
    pub presentation: EntityId,
    pub content: EntityId,
    pub element_group: EntityId,
    pub element: EntityId,
    pub alt_value_set: EntityId,
    pub comp_ref: EntityId,
}

/// Profiles this library knows how to conform to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecognizedProfile {
    SadmEmissionProfile,
}

struct SupportedProfile {
    profile: RecognizedProfile,
    name: &'static str,
    version: &'static str,
    level: u16,
    value: &'static str,
}

const SUPPORTED_PROFILES: [SupportedProfile; 1] = [SupportedProfile {
    profile: RecognizedProfile::SadmEmissionProfile,
    name: "AdvSS Emission S-ADM Profile",
    version: "1.0.0",
    level: 1,
    value: "ITU-R BS.[ADM-NGA-Emission]-0",
}];

fn parse_version(s: &str) -> Option<Vec<u32>> {
    s.split('.').map(|p| p.parse().ok()).collect()
}

/// A descriptor matches a table entry if name, level and value are
/// equal (names and values case-insensitively) and its version has the
/// same major component and is not older.
fn recognize_profile(desc: &ProfileDescriptor) -> Option<RecognizedProfile> {
    let version = parse_version(&desc.version)?;

    SUPPORTED_PROFILES
        .iter()
        .find(|sp| {
            sp.name.eq_ignore_ascii_case(&desc.name)
                && sp.level == desc.level
                && sp.value.eq_ignore_ascii_case(&desc.value)
                && parse_version(sp.version).is_some_and(|table| {
                    version.first() == table.first() && version >= table
                })
        })
        .map(|sp| sp.profile)
}

/// Audio type embedded in freshly allocated IDs for the formats that
/// carry one in their textual form.
fn inherent_audio_type(body: &EntityBody) -> crate::adm::id::AudioType {
    use crate::adm::id::AudioType;
    match body {
        EntityBody::Target { audio_type, .. } => *audio_type,
        EntityBody::TargetGroup { config } => match config {
            crate::adm::entity::TargetGroupConfig::Speaker(_) => AudioType::DirectSpeakers,
            crate::adm::entity::TargetGroupConfig::Object { .. } => AudioType::Objects,
        },
        _ => AudioType::None,
    }
}

/// Bundled view of one audio element and everything reachable from it.
/// The caller sizes the buffer; the fill fails rather than reallocating.
#[derive(Debug, Clone, Default)]
pub struct AudioElementData {
    pub audio_element: Option<ModelEntity>,
    pub target_group: Option<ModelEntity>,
    pub targets: Vec<ModelEntity>,
    pub audio_tracks: Vec<ModelEntity>,
    pub source_group: Option<ModelEntity>,
    pub sources: Vec<ModelEntity>,
    pub block_updates: Vec<ModelEntity>,
    pub alt_value_sets: Vec<ModelEntity>,
    channel_capacity: usize,
}

impl AudioElementData {
    pub fn with_channel_capacity(channel_capacity: usize) -> Self {
        Self {
            channel_capacity,
            ..Default::default()
        }
    }

    pub fn channel_count(&self) -> usize {
        self.targets.len()
    }

    fn clear(&mut self) {
        let capacity = self.channel_capacity;
        *self = Self::with_channel_capacity(capacity);
    }
}

/// Bundled view of one presentation and the entities its relation
/// rows reference.
#[derive(Debug, Clone, Default)]
pub struct PresentationData {
    pub presentation: Option<ModelEntity>,
    pub content_groups: Vec<Option<ModelEntity>>,
    pub element_groups: Vec<Option<ModelEntity>>,
    pub audio_elements: Vec<ModelEntity>,
    pub alt_value_sets: Vec<Option<ModelEntity>>,
    pub comp_refs: Vec<Option<ModelEntity>>,
    element_capacity: usize,
}

impl PresentationData {
    pub fn with_element_capacity(element_capacity: usize) -> Self {
        Self {
            element_capacity,
            ..Default::default()
        }
    }

    pub fn element_count(&self) -> usize {
        self.audio_elements.len()
    }

    fn clear(&mut self) {
        let capacity = self.element_capacity;
        *self = Self::with_element_capacity(capacity);
    }
}

const SEQUENCE_SLOTS: usize = 0x11;

/// The core model store.
#[derive(Debug, Default)]
pub struct CoreModel {
    entities: BTreeMap<EntityId, ModelEntity>,
    source_relations: BTreeSet<SourceRelation>,
    element_relations: BTreeSet<ElementRelation>,
    presentation_relations: BTreeSet<PresentationRelation>,
    /// Next primary sequence per entity type tag; 0 = untouched.
    sequences: [u32; SEQUENCE_SLOTS],
    /// Next secondary sequence per parent-derived child base ID.
    child_sequences: BTreeMap<EntityId, u16>,
    profiles: BTreeSet<RecognizedProfile>,
}

impl CoreModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.source_relations.is_empty()
            && self.element_relations.is_empty()
            && self.presentation_relations.is_empty()
    }

    /// Empty the store and rewind every sequence counter.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn next_sequence(&mut self, t: EntityType) -> Result<u32, ModelError> {
        let slot = &mut self.sequences[t as usize];
        if *slot == 0 {
            *slot = t.first_sequence();
        }
        let n = *slot;
        if n > 0xFF_FFFF {
            return Err(ModelError::SequenceExhausted(t.name()));
        }
        *slot = n + 1;
        Ok(n)
    }

    fn note_explicit_sequence(&mut self, t: EntityType, primary: u32) {
        let slot = &mut self.sequences[t as usize];
        if *slot == 0 {
            *slot = t.first_sequence();
        }
        if primary >= *slot {
            *slot = primary + 1;
        }
    }

    fn next_child_sequence(&mut self, child_base: EntityId) -> Result<u16, ModelError> {
        let slot = self.child_sequences.entry(child_base).or_insert(1);
        let n = *slot;
        if n == u16::MAX {
            return Err(ModelError::SequenceExhausted("subordinate"));
        }
        *slot = n + 1;
        Ok(n)
    }

    fn note_explicit_child_sequence(&mut self, child_base: EntityId, secondary: u16) {
        let slot = self.child_sequences.entry(child_base).or_insert(1);
        if secondary >= *slot {
            *slot = secondary.saturating_add(1);
        }
    }

    fn insert(&mut self, entity: ModelEntity) -> Result<EntityId, ModelError> {
        let id = entity.id;
        if self.entities.contains_key(&id) {
            return Err(ModelError::DuplicateId(id));
        }
        self.entities.insert(id, entity);
        Ok(id)
    }

    pub fn get(&self, id: EntityId) -> Option<&ModelEntity> {
        self.entities.get(&id)
    }

    fn expect(&self, id: EntityId, t: EntityType) -> Result<&ModelEntity, ModelError> {
        let entity = self.entities.get(&id).ok_or(ModelError::NotFound(id))?;
        if entity.entity_type() != t {
            return Err(ModelError::WrongEntityType {
                id,
                expected: t.name(),
                actual: entity.entity_type().name(),
            });
        }
        Ok(entity)
    }

    /// Add an entity. A null ID in `id` allocates a fresh one within
    /// the type's sequence space; the final ID is returned either way.
    pub fn add_entity(&mut self, body: EntityBody, id: EntityId) -> Result<EntityId, ModelError> {
        let t = body.entity_type();
        let id = if id.is_null() {
            if matches!(t, EntityType::BlockUpdate | EntityType::AltValueSet) {
                return Err(ModelError::InvalidArgument(
                    "subordinate entities need a parent or a full ID",
                ));
            }
            EntityId::new(t, inherent_audio_type(&body), self.next_sequence(t)?, 0)
        } else {
            if id.entity_type() != Some(t) {
                return Err(ModelError::InvalidArgument("ID type does not match entity"));
            }
            if self.entities.contains_key(&id) {
                return Err(ModelError::DuplicateId(id));
            }
            self.note_explicit_sequence(t, id.primary());
            id
        };

        self.insert(ModelEntity::new(id, body))
    }

    /// Add an entity that carries a primary name.
    pub fn add_named_entity(
        &mut self,
        body: EntityBody,
        id: EntityId,
        name: Option<EntityName>,
    ) -> Result<EntityId, ModelError> {
        let id = self.add_entity(body, id)?;
        if let Some(name) = name {
            self.add_name(id, name)?;
        }
        Ok(id)
    }

    pub fn add_name(&mut self, id: EntityId, name: EntityName) -> Result<(), ModelError> {
        let entity = self.entities.get_mut(&id).ok_or(ModelError::NotFound(id))?;
        entity.names.add_name(name)
    }

    pub fn add_label(&mut self, id: EntityId, label: EntityName) -> Result<(), ModelError> {
        let entity = self.entities.get_mut(&id).ok_or(ModelError::NotFound(id))?;
        entity.names.add_label(label)
    }

    /// Add one Source. Group and channel must both be positive.
    pub fn add_source(
        &mut self,
        group: u16,
        channel: u16,
        id: EntityId,
    ) -> Result<EntityId, ModelError> {
        if group == 0 || channel == 0 {
            return Err(ModelError::InvalidArgument("group and channel must be > 0"));
        }
        self.add_entity(EntityBody::Source { group, channel }, id)
    }

    /// Bulk Source creation over consecutive channels. Each slot of
    /// `ids` may be caller-supplied or null-to-allocate; the final IDs
    /// are written back and must be distinct.
    pub fn add_sources_group(
        &mut self,
        group: u16,
        start_channel: u16,
        ids: &mut [EntityId],
    ) -> Result<(), ModelError> {
        if group == 0 || start_channel == 0 {
            return Err(ModelError::InvalidArgument("group and channel must be > 0"));
        }
        for (i, slot) in ids.iter_mut().enumerate() {
            let channel = start_channel + i as u16;
            *slot = self.add_source(group, channel, *slot)?;
        }
        Ok(())
    }

    /// Add a block update beneath an existing Target. Exactly one of
    /// `parent_id` and `id` must be non-null.
    pub fn add_block_update(
        &mut self,
        parent_id: EntityId,
        position: Position,
        gain: Gain,
        time: Option<(crate::adm::types::AdmTime, crate::adm::types::AdmTime)>,
        id: EntityId,
    ) -> Result<EntityId, ModelError> {
        let id = self.subordinate_id(parent_id, id, EntityType::BlockUpdate, EntityType::Target)?;
        self.insert(ModelEntity::new(
            id,
            EntityBody::BlockUpdate { position, gain, time },
        ))
    }

    /// Add an alternative value set beneath an existing AudioElement.
    /// Value sets carry labels only, never a primary name.
    pub fn add_alt_value_set(
        &mut self,
        parent_id: EntityId,
        position_offset: Option<Position>,
        gain: Option<Gain>,
        labels: &[EntityName],
        id: EntityId,
    ) -> Result<EntityId, ModelError> {
        let id = self.subordinate_id(parent_id, id, EntityType::AltValueSet, EntityType::Object)?;
        let mut entity = ModelEntity::new(
            id,
            EntityBody::AltValueSet {
                position_offset,
                gain,
            },
        );
        for label in labels {
            entity.names.add_label(label.clone())?;
        }
        self.insert(entity)
    }

    fn subordinate_id(
        &mut self,
        parent_id: EntityId,
        id: EntityId,
        child_type: EntityType,
        parent_type: EntityType,
    ) -> Result<EntityId, ModelError> {
        match (parent_id.is_null(), id.is_null()) {
            (false, true) => {
                self.expect(parent_id, parent_type)?;
                let base = parent_id.child_id(child_type, 0);
                let secondary = self.next_child_sequence(base)?;
                Ok(base.with_secondary(secondary))
            }
            (true, false) => {
                if id.entity_type() != Some(child_type) {
                    return Err(ModelError::InvalidArgument("ID type does not match entity"));
                }
                let parent = id.parent_id()?;
                self.expect(parent, parent_type)?;
                if self.entities.contains_key(&id) {
                    return Err(ModelError::DuplicateId(id));
                }
                self.note_explicit_child_sequence(id.with_secondary(0), id.secondary());
                Ok(id)
            }
            _ => Err(ModelError::InvalidArgument(
                "exactly one of parent_id and id must be non-null",
            )),
        }
    }

    /// Add a complementary object reference. Labels are permitted only
    /// on the leader entry (referenced == leader).
    pub fn add_complementary_element(
        &mut self,
        referenced: EntityId,
        leader: EntityId,
        sequence: u32,
        labels: Option<&[EntityName]>,
    ) -> Result<EntityId, ModelError> {
        self.expect(referenced, EntityType::Object)?;
        self.expect(leader, EntityType::Object)?;

        let is_leader = referenced == leader;
        if labels.is_some_and(|l| !l.is_empty()) && !is_leader {
            return Err(ModelError::ComplementaryLabelsNotLeader);
        }

        let id = EntityId::generic(EntityType::ComplementaryRef, sequence);
        if self.entities.contains_key(&id) {
            return Err(ModelError::DuplicateId(id));
        }
        self.note_explicit_sequence(EntityType::ComplementaryRef, sequence);
        let mut entity = ModelEntity::new(id, EntityBody::ComplementaryRef { referenced, leader });
        if let Some(labels) = labels {
            for label in labels {
                entity.names.add_label(label.clone())?;
            }
        }
        self.insert(entity)
    }

    pub fn add_source_relation(
        &mut self,
        group: EntityId,
        source: EntityId,
        track: EntityId,
    ) -> Result<(), ModelError> {
        self.expect(group, EntityType::SourceGroup)?;
        self.expect(source, EntityType::Source)?;
        self.expect(track, EntityType::AudioTrack)?;

        if !self.source_relations.insert(SourceRelation { group, source, track }) {
            return Err(ModelError::DuplicateRelation);
        }
        Ok(())
    }

    pub fn add_element_relation(
        &mut self,
        element: EntityId,
        target_group: EntityId,
        target: EntityId,
        track: EntityId,
    ) -> Result<(), ModelError> {
        self.expect(element, EntityType::Object)?;
        self.expect(target_group, EntityType::TargetGroup)?;
        self.expect(target, EntityType::Target)?;
        self.expect(track, EntityType::AudioTrack)?;

        let relation = ElementRelation {
            element,
            target_group,
            target,
            track,
        };
        if !self.element_relations.insert(relation) {
            return Err(ModelError::DuplicateRelation);
        }
        Ok(())
    }

    pub fn add_presentation_relation(
        &mut self,
        relation: PresentationRelation,
    ) -> Result<(), ModelError> {
        self.expect(relation.presentation, EntityType::Presentation)?;
        if !relation.content.is_null() {
            self.expect(relation.content, EntityType::Content)?;
        }
        if !relation.element_group.is_null() {
            self.expect(relation.element_group, EntityType::Object)?;
        }
        if !relation.element.is_null() {
            self.expect(relation.element, EntityType::Object)?;
        }
        if !relation.comp_ref.is_null() {
            self.expect(relation.comp_ref, EntityType::ComplementaryRef)?;
        }
        if !relation.alt_value_set.is_null() {
            self.expect(relation.alt_value_set, EntityType::AltValueSet)?;
            let parent = relation.alt_value_set.parent_id()?;
            if parent != relation.element {
                return Err(ModelError::AltValueSetMismatch {
                    avs: relation.alt_value_set,
                    element: relation.element,
                });
            }
        }

        if !self.presentation_relations.insert(relation) {
            return Err(ModelError::DuplicateRelation);
        }
        Ok(())
    }

    pub fn count_entities(&self, t: EntityType) -> usize {
        self.entity_ids(t).count()
    }

    /// All entity IDs of one type, in ID order.
    pub fn entity_ids(&self, t: EntityType) -> impl Iterator<Item = EntityId> + '_ {
        let lo = EntityId((t as u64) << 56);
        let hi = EntityId(((t as u64) << 56) | 0x00FF_FFFF_FFFF_FFFF);
        self.entities.range(lo..=hi).map(|(id, _)| *id)
    }

    /// AudioElement IDs only, skipping ElementGroups that share the tag.
    pub fn audio_element_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entity_ids(EntityType::Object).filter(|id| {
            matches!(
                self.entities.get(id).map(|e| &e.body),
                Some(EntityBody::AudioElement { .. })
            )
        })
    }

    /// Iterate Sources as (group, channel, id).
    pub fn sources(&self) -> impl Iterator<Item = (u16, u16, EntityId)> + '_ {
        self.entity_ids(EntityType::Source).filter_map(|id| {
            match self.entities.get(&id).map(|e| &e.body) {
                Some(&EntityBody::Source { group, channel }) => Some((group, channel, id)),
                _ => None,
            }
        })
    }

    pub fn source_relations(&self) -> impl Iterator<Item = &SourceRelation> {
        self.source_relations.iter()
    }

    pub fn element_relations(&self) -> impl Iterator<Item = &ElementRelation> {
        self.element_relations.iter()
    }

    pub fn presentation_relations(&self) -> impl Iterator<Item = &PresentationRelation> {
        self.presentation_relations.iter()
    }

    fn element_relation_rows(&self, element: EntityId) -> impl Iterator<Item = &ElementRelation> {
        let lo = ElementRelation {
            element,
            target_group: EntityId(0),
            target: EntityId(0),
            track: EntityId(0),
        };
        let hi = ElementRelation {
            element,
            target_group: EntityId(u64::MAX),
            target: EntityId(u64::MAX),
            track: EntityId(u64::MAX),
        };
        self.element_relations
            .range((Bound::Included(lo), Bound::Included(hi)))
    }

    fn presentation_relation_rows(
        &self,
        presentation: EntityId,
    ) -> impl Iterator<Item = &PresentationRelation> {
        let lo = PresentationRelation {
            presentation,
            content: EntityId(0),
            element_group: EntityId(0),
            element: EntityId(0),
            alt_value_set: EntityId(0),
            comp_ref: EntityId(0),
        };
        let hi = PresentationRelation {
            presentation,
            content: EntityId(u64::MAX),
            element_group: EntityId(u64::MAX),
            element: EntityId(u64::MAX),
            alt_value_set: EntityId(u64::MAX),
            comp_ref: EntityId(u64::MAX),
        };
        self.presentation_relations
            .range((Bound::Included(lo), Bound::Included(hi)))
    }

    /// Child entities of `parent` of the given subordinate type, in
    /// secondary-sequence order.
    pub fn children(&self, parent: EntityId, child_type: EntityType) -> Vec<&ModelEntity> {
        let base = parent.child_id(child_type, 0);
        let lo = base.with_secondary(1);
        let hi = base.with_secondary(u16::MAX);
        self.entities.range(lo..=hi).map(|(_, e)| e).collect()
    }

    /// Assemble an AudioElement with its pack, channels, tracks,
    /// sources, block updates and value sets into `data`.
    pub fn element_data(
        &self,
        element_id: EntityId,
        data: &mut AudioElementData,
    ) -> Result<(), ModelError> {
        data.clear();
        data.audio_element = Some(self.expect(element_id, EntityType::Object)?.clone());

        for row in self.element_relation_rows(element_id) {
            if data.targets.len() >= data.channel_capacity {
                return Err(ModelError::Capacity {
                    needed: data.targets.len() + 1,
                    capacity: data.channel_capacity,
                });
            }

            let target_group = self.expect(row.target_group, EntityType::TargetGroup)?;
            if data.target_group.is_none() {
                data.target_group = Some(target_group.clone());
            }

            data.targets.push(self.expect(row.target, EntityType::Target)?.clone());
            data.audio_tracks
                .push(self.expect(row.track, EntityType::AudioTrack)?.clone());

            for update in self.children(row.target, EntityType::BlockUpdate) {
                data.block_updates.push(update.clone());
            }

            let source_row = self
                .source_relations
                .iter()
                .find(|s| s.track == row.track)
                .copied();
            if let Some(source_row) = source_row {
                if data.source_group.is_none() {
                    data.source_group =
                        Some(self.expect(source_row.group, EntityType::SourceGroup)?.clone());
                }
                data.sources
                    .push(self.expect(source_row.source, EntityType::Source)?.clone());
            }
        }

        for avs in self.children(element_id, EntityType::AltValueSet) {
            data.alt_value_sets.push(avs.clone());
        }

        Ok(())
    }

    /// Assemble a Presentation with the entities its relation rows
    /// reference into `data`.
    pub fn presentation_data(
        &self,
        presentation_id: EntityId,
        data: &mut PresentationData,
    ) -> Result<(), ModelError> {
        data.clear();
        data.presentation = Some(self.expect(presentation_id, EntityType::Presentation)?.clone());

        for row in self.presentation_relation_rows(presentation_id) {
            if row.element.is_null() {
                continue;
            }
            if data.audio_elements.len() >= data.element_capacity {
                return Err(ModelError::Capacity {
                    needed: data.audio_elements.len() + 1,
                    capacity: data.element_capacity,
                });
            }

            data.audio_elements
                .push(self.expect(row.element, EntityType::Object)?.clone());
            data.content_groups.push(match row.content.is_null() {
                true => None,
                false => Some(self.expect(row.content, EntityType::Content)?.clone()),
            });
            data.element_groups.push(match row.element_group.is_null() {
                true => None,
                false => Some(self.expect(row.element_group, EntityType::Object)?.clone()),
            });
            data.alt_value_sets.push(match row.alt_value_set.is_null() {
                true => None,
                false => Some(self.expect(row.alt_value_set, EntityType::AltValueSet)?.clone()),
            });
            data.comp_refs.push(match row.comp_ref.is_null() {
                true => None,
                false => Some(self.expect(row.comp_ref, EntityType::ComplementaryRef)?.clone()),
            });
        }

        Ok(())
    }

    /// Ingest a profile descriptor. Unrecognized profiles are stored
    /// but leave the conformance set untouched.
    pub fn add_profile(&mut self, desc: ProfileDescriptor) -> Result<EntityId, ModelError> {
        let recognized = recognize_profile(&desc);
        let id = self.add_entity(EntityBody::Profile(desc), EntityId::NULL)?;
        match recognized {
            Some(profile) => {
                self.profiles.insert(profile);
            }
            None => debug!("profile descriptor not recognized, conformance set unchanged"),
        }
        Ok(id)
    }

    pub fn has_profile(&self, profile: RecognizedProfile) -> bool {
        self.profiles.contains(&profile)
    }

    /// The FrameFormat's flow UUID in hyphenated 36-character form.
    pub fn flow_id(&self) -> Option<String> {
        self.entity_ids(EntityType::FrameFormat).next().and_then(|id| {
            match self.entities.get(&id).map(|e| &e.body) {
                Some(EntityBody::FrameFormat { flow_id, .. }) => Some(flow_id.to_string()),
                _ => None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adm::id::AudioType;
    use crate::adm::types::AdmTime;
    use crate::pmd::types::SpeakerConfig;
    use uuid::Uuid;

    fn stereo_model() -> (CoreModel, EntityId, EntityId) {
        let mut model = CoreModel::new();

        let group = model
            .add_named_entity(
                EntityBody::SourceGroup { group: 1 },
                EntityId::NULL,
                Some(EntityName::new("Transport", None)),
            )
            .unwrap();

        let mut source_ids = [EntityId::NULL; 2];
        model.add_sources_group(1, 1, &mut source_ids).unwrap();

        let mut tracks = Vec::new();
        for _ in 0..2 {
            tracks.push(
                model
                    .add_entity(
                        EntityBody::AudioTrack {
                            sample_rate: Some(48_000),
                            bit_depth: Some(24),
                        },
                        EntityId::NULL,
                    )
                    .unwrap(),
            );
        }

        let pack = model
            .add_named_entity(
                EntityBody::TargetGroup {
                    config: crate::adm::entity::TargetGroupConfig::Speaker(SpeakerConfig::Stereo),
                },
                EntityId::NULL,
                Some(EntityName::new("Stereo_Bed", None)),
            )
            .unwrap();

        let mut targets = Vec::new();
        for (label, x) in [("L", -1.0), ("R", 1.0)] {
            let target = model
                .add_named_entity(
                    EntityBody::Target {
                        audio_type: AudioType::DirectSpeakers,
                        speaker_label: label.to_string(),
                    },
                    EntityId::NULL,
                    Some(EntityName::new(label, None)),
                )
                .unwrap();
            model
                .add_block_update(
                    target,
                    Position::cartesian(x, 1.0, 0.0),
                    Gain::UNITY,
                    None,
                    EntityId::NULL,
                )
                .unwrap();
            targets.push(target);
        }

        let element = model
            .add_named_entity(
                EntityBody::AudioElement {
                    gain: Gain::db(0.0),
                    interaction: None,
                },
                EntityId::NULL,
                Some(EntityName::new("Stereo_Bed", None)),
            )
            .unwrap();

        for i in 0..2 {
            model
                .add_source_relation(group, source_ids[i], tracks[i])
                .unwrap();
            model
                .add_element_relation(element, pack, targets[i], tracks[i])
                .unwrap();
        }

        let content = model
            .add_named_entity(
                EntityBody::Content {
                    kind: crate::pmd::types::ContentKind::Mixed,
                    language: Some("eng".to_string()),
                    loudness: None,
                },
                EntityId::NULL,
                Some(EntityName::new("Main", Some("eng"))),
            )
            .unwrap();

        let presentation = model
            .add_named_entity(
                EntityBody::Presentation { loudness: None },
                EntityId::NULL,
                Some(EntityName::new("English", Some("eng"))),
            )
            .unwrap();

        model
            .add_presentation_relation(PresentationRelation {
                presentation,
                content,
                element_group: EntityId::NULL,
                element,
                alt_value_set: EntityId::NULL,
                comp_ref: EntityId::NULL,
            })
            .unwrap();

        (model, element, presentation)
    }

    #[test]
    fn allocation_bases() {
        let (model, element, presentation) = stereo_model();
        assert_eq!(element.to_string(), "AO_1001");
        assert_eq!(presentation.to_string(), "APR_1001");
        assert_eq!(model.count_entities(EntityType::Source), 2);
        assert_eq!(model.count_entities(EntityType::Target), 2);
        assert_eq!(model.count_entities(EntityType::BlockUpdate), 2);
    }

    #[test]
    fn duplicate_id_leaves_store_unchanged() {
        let (mut model, element, _) = stereo_model();
        let before = model.count_entities(EntityType::Object);

        let result = model.add_entity(
            EntityBody::AudioElement {
                gain: Gain::UNITY,
                interaction: None,
            },
            element,
        );
        assert!(matches!(result, Err(ModelError::DuplicateId(_))));
        assert_eq!(model.count_entities(EntityType::Object), before);
    }

    #[test]
    fn duplicate_relation_rejected() {
        let (mut model, _, presentation) = stereo_model();
        let row = *model.presentation_relation_rows(presentation).next().unwrap();
        assert!(matches!(
            model.add_presentation_relation(row),
            Err(ModelError::DuplicateRelation)
        ));
    }

    #[test]
    fn relation_columns_must_exist_and_match() {
        let (mut model, element, _) = stereo_model();
        let phantom = EntityId::generic(EntityType::AudioTrack, 0x4242);
        let pack = model.entity_ids(EntityType::TargetGroup).next().unwrap();
        let target = model.entity_ids(EntityType::Target).next().unwrap();

        assert!(matches!(
            model.add_element_relation(element, pack, target, phantom),
            Err(ModelError::NotFound(_))
        ));
        assert!(matches!(
            model.add_element_relation(element, pack, element, target),
            Err(ModelError::WrongEntityType { .. })
        ));
    }

    #[test]
    fn alt_value_set_must_match_element_in_relation() {
        let (mut model, element, presentation) = stereo_model();

        let other = model
            .add_entity(
                EntityBody::AudioElement {
                    gain: Gain::UNITY,
                    interaction: None,
                },
                EntityId::NULL,
            )
            .unwrap();
        let avs = model
            .add_alt_value_set(other, None, Some(Gain::db(-3.0)), &[], EntityId::NULL)
            .unwrap();

        let content = model.entity_ids(EntityType::Content).next().unwrap();
        let result = model.add_presentation_relation(PresentationRelation {
            presentation,
            content,
            element_group: EntityId::NULL,
            element,
            alt_value_set: avs,
            comp_ref: EntityId::NULL,
        });
        assert!(matches!(result, Err(ModelError::AltValueSetMismatch { .. })));
    }

    #[test]
    fn complementary_labels_only_on_leader() {
        let (mut model, element, _) = stereo_model();
        let other = model
            .add_entity(
                EntityBody::AudioElement {
                    gain: Gain::UNITY,
                    interaction: None,
                },
                EntityId::NULL,
            )
            .unwrap();

        let labels = [EntityName::new("Languages", Some("eng"))];
        assert!(matches!(
            model.add_complementary_element(other, element, 1, Some(&labels)),
            Err(ModelError::ComplementaryLabelsNotLeader)
        ));

        // Leader entry (referenced == leader) accepts labels.
        model
            .add_complementary_element(element, element, 1, Some(&labels))
            .unwrap();
        model.add_complementary_element(other, element, 2, None).unwrap();
    }

    #[test]
    fn element_data_walks_the_chain() {
        let (model, element, _) = stereo_model();
        let mut data = AudioElementData::with_channel_capacity(2);
        model.element_data(element, &mut data).unwrap();

        assert_eq!(data.channel_count(), 2);
        assert_eq!(data.sources.len(), 2);
        assert_eq!(data.block_updates.len(), 2);
        assert!(data.target_group.is_some());
        assert!(data.source_group.is_some());

        let mut small = AudioElementData::with_channel_capacity(1);
        assert!(matches!(
            model.element_data(element, &mut small),
            Err(ModelError::Capacity { .. })
        ));
    }

    #[test]
    fn presentation_data_walks_the_rows() {
        let (model, _, presentation) = stereo_model();
        let mut data = PresentationData::with_element_capacity(4);
        model.presentation_data(presentation, &mut data).unwrap();

        assert_eq!(data.element_count(), 1);
        assert_eq!(data.content_groups.len(), 1);
    }

    #[test]
    fn clear_resets_counts_and_counters() {
        let (mut model, _, _) = stereo_model();
        model.clear();

        assert!(model.is_empty());
        for t in EntityType::ALL {
            assert_eq!(model.count_entities(t), 0);
        }

        // Counters rewound: the next element is AO_1001 again.
        let element = model
            .add_entity(
                EntityBody::AudioElement {
                    gain: Gain::UNITY,
                    interaction: None,
                },
                EntityId::NULL,
            )
            .unwrap();
        assert_eq!(element.to_string(), "AO_1001");
    }

    #[test]
    fn profile_recognition() {
        let mut model = CoreModel::new();
        assert!(!model.has_profile(RecognizedProfile::SadmEmissionProfile));

        // Older major version: stored, not recognized.
        model
            .add_profile(ProfileDescriptor {
                name: "AdvSS Emission S-ADM Profile".to_string(),
                version: "0.9.0".to_string(),
                level: 1,
                value: "ITU-R BS.[ADM-NGA-Emission]-0".to_string(),
            })
            .unwrap();
        assert!(!model.has_profile(RecognizedProfile::SadmEmissionProfile));

        model
            .add_profile(ProfileDescriptor {
                name: "advss emission s-adm profile".to_string(),
                version: "1.2.0".to_string(),
                level: 1,
                value: "itu-r bs.[adm-nga-emission]-0".to_string(),
            })
            .unwrap();
        assert!(model.has_profile(RecognizedProfile::SadmEmissionProfile));
    }

    #[test]
    fn flow_id_renders_hyphenated() {
        let mut model = CoreModel::new();
        let flow = Uuid::parse_str("12345678-abcd-ef01-2345-6789abcdef01").unwrap();
        model
            .add_entity(
                EntityBody::FrameFormat {
                    frame_type: "full".to_string(),
                    start: AdmTime::new(0, 0, 0, 0, 48_000),
                    duration: AdmTime::new(0, 0, 0, 1920, 48_000),
                    flow_id: flow,
                },
                EntityId::NULL,
            )
            .unwrap();

        let text = model.flow_id().unwrap();
        assert_eq!(text.len(), 36);
        assert_eq!(text, "12345678-abcd-ef01-2345-6789abcdef01");
    }
}
