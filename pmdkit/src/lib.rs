//! Professional audio metadata for broadcast and contribution workflows.
//!
//! ## Technical Overview
//!
//! Two descriptions of one audio scene coexist: a compact, packetized
//! representation designed to ride inside 48 kHz PCM ("PMD"), and a
//! richer, BS.2076-compatible entity-relation model ("Serial ADM").
//! This crate converts between the two, serializes each to and from
//! bytes, and multiplexes the metadata into (or out of) a pair of PCM
//! channels using SMPTE 337m framing synchronized to a video frame rate.
//!
//! ### Carriage
//!
//! Metadata bursts use 20-bit SMPTE 337m words in the upper bits of the
//! PCM samples, one burst per 160-sample block, with a 32-sample
//! guardband after every video sync. KLV bursts carry PMD; gzip XML
//! bursts carry Serial ADM.
//!
//! ## Quick Start
//!
//! Steps for a PCM round trip:
//!
//! 1. Build a [`pmd::model::PmdModel`] (or a [`adm::model::CoreModel`])
//!    and wrap it into a [`combo::ComboModel`]
//! 2. Write it into PCM with [`pcm::augment::PcmAugmentor`]
//! 3. Read it back with [`pcm::extract::PcmExtractor`], or locate a
//!    frame in an arbitrary blob with [`pcm::capture::FrameCaptor`]
//!
//! ```rust,no_run
//! use pmdkit::combo::ComboModel;
//! use pmdkit::pcm::augment::PcmAugmentor;
//! use pmdkit::pcm::vsync::FrameRate;
//!
//! let mut combo = ComboModel::new();
//! combo.writable_pmd()?.add_signals(2)?;
//!
//! let mut augmentor = PcmAugmentor::builder(FrameRate::Fps2500)
//!     .channels(2)
//!     .pair(true)
//!     .build()?;
//!
//! let mut pcm = vec![0u32; 1920 * 2];
//! augmentor.augment(&mut combo, &mut pcm, Some(0))?;
//! # Ok::<(), anyhow::Error>(())
//! ```

/// The core (Serial ADM) entity-relation model.
///
/// - **Entity IDs** ([`adm::id`]): typed 64-bit identifiers
/// - **Value types** ([`adm::types`]): gain, position, time, names
/// - **Entities** ([`adm::entity`]): tagged-union entity bodies
/// - **Store** ([`adm::model`]): relations, bundled views, profiles
pub mod adm;

/// The compact PMD model.
///
/// - **Vocabulary** ([`pmd::types`]): speaker configs, classes, records
/// - **Profiles** ([`pmd::profile`]): entity-count constraint sets
/// - **Tables** ([`pmd::model`]): signals, beds, objects, presentations
pub mod pmd;

/// The two-sided container and the PMD ⇄ core conversions.
pub mod combo;

/// KLV payload codec (SMPTE 336 key-length-value for PMD).
pub mod klv;

/// Serial ADM payload codec (canonical XML, optionally gzip).
pub mod sadm;

/// PCM carriage: SMPTE 337m framing, video sync, augment/extract,
/// frame capture.
pub mod pcm;

/// Supporting infrastructure.
///
/// - **CRC Validation** ([`utils::crc`])
/// - **Error Handling** ([`utils::errors`])
pub mod utils;
