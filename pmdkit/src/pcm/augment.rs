//! PCM augmentor: drives the 337m framer over PCM blocks, writing the
//! active model into the carrier channel(s) once per video frame.

use log::debug;

use crate::combo::ComboModel;
use crate::klv::UlChoice;
use crate::klv::writer::plan_frame;
use crate::pcm::smpte337m::{BLOCK_SIZE, GUARDBAND, NextBlock, PayloadSource, Smpte337m};
use crate::pcm::vsync::FrameRate;
use crate::sadm;
use crate::utils::errors::PcmError;

const PREAMBLE_WORDS: usize = 4;
const SADM_EXTRA_WORDS: usize = 4;
const WORD_BITS: usize = 20;

/// Result of a trial serialization of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryFrame {
    /// Everything fits.
    Green,
    /// Fits, but some name payloads were elided.
    Yellow,
    /// Insufficient room for the model at this frame rate.
    Red,
    /// The model could not be serialized at all.
    Error,
}

/// Queue of a frame's bursts, fed to the framer block by block.
#[derive(Debug, Default)]
struct BlockQueue {
    bursts: Vec<Vec<u8>>,
    block_samples: Vec<usize>,
    index: usize,
}

impl PayloadSource for BlockQueue {
    fn next_block(&mut self, payload: &mut Vec<u8>) -> Option<NextBlock> {
        let burst = self.bursts.get(self.index)?;
        let block = NextBlock {
            bits: burst.len() * 8,
            block_samples: self.block_samples[self.index],
        };
        payload.extend_from_slice(burst);
        self.index += 1;
        Some(block)
    }
}

/// Builder for a [`PcmAugmentor`].
#[derive(Debug, Clone)]
pub struct PcmAugmentorBuilder {
    rate: FrameRate,
    ul: UlChoice,
    channels: usize,
    start: usize,
    pair: bool,
    mark_empty: bool,
    sadm: bool,
}

impl PcmAugmentorBuilder {
    pub fn ul(mut self, ul: UlChoice) -> Self {
        self.ul = ul;
        self
    }

    pub fn channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    pub fn start_channel(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    pub fn pair(mut self, pair: bool) -> Self {
        self.pair = pair;
        self
    }

    pub fn mark_empty_blocks(mut self, mark: bool) -> Self {
        self.mark_empty = mark;
        self
    }

    pub fn sadm(mut self, sadm: bool) -> Self {
        self.sadm = sadm;
        self
    }

    pub fn build(self) -> Result<PcmAugmentor, PcmError> {
        let width = if self.pair { 2 } else { 1 };
        if self.start + width > self.channels {
            return Err(PcmError::BadChannelIndex {
                index: self.start,
                channels: self.channels,
            });
        }
        let framer = Smpte337m::new(self.channels, self.start, self.pair, self.mark_empty, self.sadm);
        Ok(PcmAugmentor {
            rate: self.rate,
            ul: self.ul,
            channels: self.channels,
            pair: self.pair,
            sadm: self.sadm,
            framer,
            queue: BlockQueue::default(),
            new_frame: None,
        })
    }
}

/// Writes metadata frames into PCM. Other channels pass through.
pub struct PcmAugmentor {
    rate: FrameRate,
    ul: UlChoice,
    channels: usize,
    pair: bool,
    sadm: bool,
    framer: Smpte337m,
    queue: BlockQueue,
    new_frame: Option<Box<dyn FnMut() + Send>>,
}

impl std::fmt::Debug for PcmAugmentor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmAugmentor")
            .field("rate", &self.rate)
            .field("channels", &self.channels)
            .field("pair", &self.pair)
            .field("sadm", &self.sadm)
            .finish()
    }
}

impl PcmAugmentor {
    pub fn builder(rate: FrameRate) -> PcmAugmentorBuilder {
        PcmAugmentorBuilder {
            rate,
            ul: UlChoice::default(),
            channels: 2,
            start: 0,
            pair: true,
            mark_empty: false,
            sadm: false,
        }
    }

    /// Callback invoked when a video frame boundary is crossed, before
    /// the model is serialized for the new frame.
    pub fn on_new_frame(&mut self, callback: Box<dyn FnMut() + Send>) {
        self.new_frame = Some(callback);
    }

    fn bits_per_set(&self) -> usize {
        if self.pair { 2 * WORD_BITS } else { WORD_BITS }
    }

    /// Number of PMD blocks in a frame at this rate.
    fn blocks_per_frame(&self) -> usize {
        (self.rate.min_frame_size() - GUARDBAND) / BLOCK_SIZE
    }

    /// Payload byte capacity of PMD block `index`.
    fn block_capacity(&self, index: usize) -> usize {
        let sets = if index == 0 { BLOCK_SIZE - GUARDBAND } else { BLOCK_SIZE };
        let preamble_sets = PREAMBLE_WORDS * WORD_BITS / self.bits_per_set();
        (sets - preamble_sets) * self.bits_per_set() / 8
    }

    /// Payload byte capacity of a whole-frame S-ADM burst.
    fn sadm_capacity(&self) -> usize {
        let sets = self.rate.min_frame_size() - GUARDBAND;
        let overhead_sets =
            (PREAMBLE_WORDS + SADM_EXTRA_WORDS) * WORD_BITS / self.bits_per_set();
        (sets - overhead_sets) * self.bits_per_set() / 8
    }

    fn serialize_frame(&mut self, combo: &mut ComboModel) -> Result<(BlockQueue, bool), PcmError> {
        if self.sadm {
            let core = combo.ensure_readable_core()?;
            let payload = sadm::encode(core, self.sadm_capacity())?;
            Ok((
                BlockQueue {
                    bursts: vec![payload],
                    block_samples: vec![self.rate.min_frame_size() - GUARDBAND],
                    index: 0,
                },
                false,
            ))
        } else {
            let pmd = combo.ensure_readable_pmd()?;
            let blocks = self.blocks_per_frame();
            let capacities: Vec<usize> = (0..blocks).map(|i| self.block_capacity(i)).collect();
            let plan = plan_frame(pmd, self.ul, &capacities, self.rate.min_frame_size() as u16)?;
            Ok((
                BlockQueue {
                    block_samples: plan
                        .bursts
                        .iter()
                        .enumerate()
                        .map(|(i, _)| if i == 0 { BLOCK_SIZE - GUARDBAND } else { BLOCK_SIZE })
                        .collect(),
                    bursts: plan.bursts,
                    index: 0,
                },
                plan.names_elided,
            ))
        }
    }

    /// Write metadata into one PCM block. `vsync` is the sample offset
    /// of a video sync within this block, or `None`.
    pub fn augment(
        &mut self,
        combo: &mut ComboModel,
        pcm: &mut [u32],
        vsync: Option<usize>,
    ) -> Result<(), PcmError> {
        if !pcm.len().is_multiple_of(self.channels) {
            return Err(PcmError::RaggedBlock(self.channels));
        }

        if let Some(offset) = vsync {
            if let Some(callback) = self.new_frame.as_mut() {
                callback();
            }
            let (queue, names_elided) = self.serialize_frame(combo)?;
            if names_elided {
                debug!("frame serialized with name payloads elided");
            }
            self.queue = queue;
            self.framer.restart_frame(offset, &mut self.queue);
        }

        self.framer.wrap(&mut self.queue, pcm);
        Ok(())
    }

    /// Run the full frame serialization without touching PCM.
    pub fn try_frame(&mut self, combo: &mut ComboModel) -> TryFrame {
        match self.serialize_frame(combo) {
            Ok((_, false)) => TryFrame::Green,
            Ok((_, true)) => TryFrame::Yellow,
            Err(PcmError::Klv(crate::utils::errors::KlvError::Truncated { .. })) => TryFrame::Red,
            Err(PcmError::Sadm(crate::utils::errors::SadmError::XmlTooLarge { .. })) => {
                TryFrame::Red
            }
            Err(_) => TryFrame::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmd::model::{Bed, PmdPresentation};
    use crate::pmd::types::SpeakerConfig;

    fn minimal_combo() -> ComboModel {
        let mut combo = ComboModel::new();
        let pmd = combo.writable_pmd().unwrap();
        pmd.add_signals(2).unwrap();
        pmd.add_bed(Bed::direct(1, SpeakerConfig::Stereo, "Bed", 1)).unwrap();
        pmd.add_presentation(PmdPresentation {
            id: 1,
            config: SpeakerConfig::Stereo,
            language: "eng".to_string(),
            elements: vec![1],
            names: vec![],
        })
        .unwrap();
        combo
    }

    #[test]
    fn try_frame_colors() {
        let mut combo = minimal_combo();

        let mut augmentor = PcmAugmentor::builder(FrameRate::Fps2500).build().unwrap();
        assert_eq!(augmentor.try_frame(&mut combo), TryFrame::Green);

        // Sixteen long presentation names cannot be placed anywhere in
        // a 120 fps frame: the name payload is elided.
        let mut combo = minimal_combo();
        {
            let pmd = combo.writable_pmd().unwrap();
            for i in 0..16u8 {
                let language = format!("a{}", (b'a' + i) as char);
                pmd.add_presentation_name(1, &language, &"x".repeat(200)).unwrap();
            }
        }
        let mut tiny = PcmAugmentor::builder(FrameRate::Fps12000).build().unwrap();
        assert_eq!(tiny.try_frame(&mut combo), TryFrame::Yellow);
    }

    #[test]
    fn block_capacities() {
        let augmentor = PcmAugmentor::builder(FrameRate::Fps2500).build().unwrap();
        assert_eq!(augmentor.blocks_per_frame(), 11);
        // First block: 128 sets minus 2 preamble sets, 5 bytes per set.
        assert_eq!(augmentor.block_capacity(0), 126 * 5);
        assert_eq!(augmentor.block_capacity(1), 158 * 5);
    }

    #[test]
    fn channel_bounds_checked() {
        assert!(
            PcmAugmentor::builder(FrameRate::Fps2500)
                .channels(2)
                .start_channel(1)
                .pair(true)
                .build()
                .is_err()
        );
    }
}
