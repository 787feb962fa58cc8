use crate::adm::id::EntityId;

#[derive(thiserror::Error, Debug)]
pub enum IdError {
    #[error("Unknown entity ID prefix in {0:?}")]
    UnknownPrefix(String),

    #[error("Malformed entity ID string {0:?}")]
    Malformed(String),

    #[error("Entity ID {0} has no parent type")]
    NoParent(EntityId),

    #[error("The null entity ID is not valid here")]
    NullId,
}

#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("Entity {0} already exists in the model")]
    DuplicateId(EntityId),

    #[error("Relation tuple already exists in the model")]
    DuplicateRelation,

    #[error("Entity {0} not found in the model")]
    NotFound(EntityId),

    #[error("Entity {id} is a {actual}, expected {expected}")]
    WrongEntityType {
        id: EntityId,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Sequence space exhausted for entity type {0}")]
    SequenceExhausted(&'static str),

    #[error("Buffer capacity {capacity} too small, {needed} required")]
    Capacity { needed: usize, capacity: usize },

    #[error("Name limit {limit} reached for entity {id}")]
    NameLimit { id: EntityId, limit: usize },

    #[error("A label may not be added before a primary name")]
    LabelBeforeName,

    #[error("AlternativeValueSet {avs} does not belong to audio element {element}")]
    AltValueSetMismatch { avs: EntityId, element: EntityId },

    #[error("Labels are only permitted on a complementary leader")]
    ComplementaryLabelsNotLeader,

    #[error(transparent)]
    Id(#[from] IdError),
}

#[derive(thiserror::Error, Debug)]
pub enum PmdModelError {
    #[error("Audio signal must be in 1..=255, got {0}")]
    SignalOutOfRange(u16),

    #[error("Audio signal {0} is already present")]
    DuplicateSignal(u8),

    #[error("Element ID {0} is already present")]
    DuplicateElement(u16),

    #[error("Presentation ID {0} is already present")]
    DuplicatePresentation(u16),

    #[error("Element {0} not found")]
    UnknownElement(u16),

    #[error("Presentation {0} not found")]
    UnknownPresentation(u16),

    #[error("Audio signal {0} not found")]
    UnknownSignal(u8),

    #[error("Too many audio elements: limit is {max}")]
    TooManyElements { max: usize },

    #[error("Too many audio signals: limit is {max}")]
    TooManySignals { max: usize },

    #[error("Too many presentations: limit is {max}")]
    TooManyPresentations { max: usize },

    #[error("Too many updates in one video frame: limit is {max}")]
    TooManyUpdates { max: usize },

    #[error("A presentation may name at most {max} elements")]
    TooManyPresentationElements { max: usize },

    #[error("A presentation may carry at most {max} names")]
    TooManyPresentationNames { max: usize },

    #[error("Unknown profile ({number}, {level})")]
    UnknownProfile { number: u16, level: u16 },

    #[error("Profile ({number}, {level}) exceeds the model's configured maxima")]
    ProfileTooLarge { number: u16, level: u16 },

    #[error("Language code must be 2 or 3 lowercase letters, got {0:?}")]
    InvalidLanguage(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ConvertError {
    #[error("Speaker configuration {0} is not expressible in PMD")]
    UnsupportedSpeakerConfig(String),

    #[error("Audio type {0} is not expressible in PMD")]
    UnsupportedAudioType(String),

    #[error("Model is read-only: the {0} side is a conversion of the primary side")]
    ConvertedSideReadOnly(&'static str),

    #[error("Entity {0} referenced by a relation is missing")]
    MissingEntity(EntityId),

    #[error("Audio element {0} has no element relation")]
    UnwiredElement(EntityId),

    #[error("PMD positions are cartesian; a spherical block update cannot be converted")]
    SphericalPosition,

    #[error("Entity {0} has no representable PMD element number")]
    ElementIdUnmappable(EntityId),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Pmd(#[from] PmdModelError),
}

#[derive(thiserror::Error, Debug)]
pub enum KlvError {
    #[error("Universal key is neither Dolby private nor SMPTE 2109")]
    BadUniversalKey,

    #[error("Burst truncated: {needed} bytes required, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid BER length encoding")]
    BadBerLength,

    #[error("Burst CRC mismatch. Calculated {calculated:#06X}, Read {read:#06X}")]
    CrcMismatch { calculated: u16, read: u16 },

    #[error("Payload tag {tag} body exceeds burst bounds")]
    PayloadOverrun { tag: u8 },

    #[error("Unknown speaker configuration code {0}")]
    UnknownSpeakerConfig(u8),

    #[error("Unknown object class code {0}")]
    UnknownObjectClass(u8),

    #[error("Payload body for tag {tag} is malformed: {reason}")]
    MalformedPayload { tag: u8, reason: &'static str },

    #[error(transparent)]
    Pmd(#[from] PmdModelError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum SadmError {
    #[error("S-ADM XML size {size} exceeds maximum {max}")]
    XmlTooLarge { size: usize, max: usize },

    #[error("gzip inflate failed: {0}")]
    Decompress(String),

    #[error("S-ADM XML parse error: {0}")]
    Parse(String),

    #[error("Required element <{0}> is missing")]
    MissingElement(&'static str),

    #[error("Bad value {value:?} for attribute {attr:?}")]
    BadAttribute { attr: &'static str, value: String },

    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(thiserror::Error, Debug)]
pub enum PcmError {
    #[error("PCM block must contain whole sample sets ({0} channels)")]
    RaggedBlock(usize),

    #[error("Metadata channel index {index} out of range for {channels} channels")]
    BadChannelIndex { index: usize, channels: usize },

    #[error("Frame at this rate holds {capacity} payload bytes, model needs {needed}")]
    FrameOverflow { needed: usize, capacity: usize },

    #[error(transparent)]
    Klv(#[from] KlvError),

    #[error(transparent)]
    Sadm(#[from] SadmError),

    #[error(transparent)]
    Convert(#[from] ConvertError),
}

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("Blob descriptor is invalid: {0}")]
    BadDescriptor(&'static str),

    #[error("Bit depth must be 24 or 32, got {0}")]
    UnsupportedBitDepth(u8),

    #[error("Blob holds {samples} samples, at least {min} required")]
    BlobTooShort { samples: usize, min: usize },

    #[error("No SMPTE 337m sync pair found in any channel")]
    SyncNotFound,

    #[error("Pa spacing {spacing} does not match any supported frame rate")]
    UnknownFrameRate { spacing: usize },

    #[error(transparent)]
    Pcm(#[from] PcmError),

    #[error(transparent)]
    Convert(#[from] ConvertError),
}
