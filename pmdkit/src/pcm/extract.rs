//! PCM extractor: drives the 337m reader over PCM blocks and feeds
//! completed bursts to the payload decoders.

use log::warn;

use crate::combo::ComboModel;
use crate::klv::reader::read_burst;
use crate::pcm::smpte337m::{GUARDBAND, PayloadSink, Smpte337m};
use crate::pcm::vsync::FrameRate;
use crate::sadm;
use crate::utils::errors::PcmError;

/// Collects bursts during one `unwrap` pass; they are decoded after
/// the framer releases the PCM slice.
#[derive(Debug, Default)]
struct BurstBin {
    bursts: Vec<(Vec<u8>, bool)>,
}

impl PayloadSink for BurstBin {
    fn burst(&mut self, payload: &[u8], sadm: bool) {
        self.bursts.push((payload.to_vec(), sadm));
    }
}

/// Reads metadata frames back out of PCM.
#[derive(Debug)]
pub struct PcmExtractor {
    channels: usize,
    rate: FrameRate,
    framer: Smpte337m,
    frames_started: usize,
    bursts_decoded: usize,
}

impl PcmExtractor {
    pub fn new(
        rate: FrameRate,
        channels: usize,
        start: usize,
        pair: bool,
    ) -> Result<Self, PcmError> {
        let width = if pair { 2 } else { 1 };
        if start + width > channels {
            return Err(PcmError::BadChannelIndex {
                index: start,
                channels,
            });
        }

        let mut framer = Smpte337m::new(channels, start, pair, false, false);
        framer.set_read_capacity(sadm::MAX_XML_SIZE);
        framer.set_framelen(rate.min_frame_size() - GUARDBAND);
        Ok(Self {
            channels,
            rate,
            framer,
            frames_started: 0,
            bursts_decoded: 0,
        })
    }

    pub fn frames_started(&self) -> usize {
        self.frames_started
    }

    pub fn bursts_decoded(&self) -> usize {
        self.bursts_decoded
    }

    /// Scan one PCM block. `vsync` is the sample offset of a video
    /// sync within this block, or `None`. A vsync restarts the frame:
    /// the model is cleared and rebuilt from the bursts that follow.
    pub fn extract(
        &mut self,
        combo: &mut ComboModel,
        pcm: &[u32],
        vsync: Option<usize>,
    ) -> Result<(), PcmError> {
        if !pcm.len().is_multiple_of(self.channels) {
            return Err(PcmError::RaggedBlock(self.channels));
        }

        if let Some(offset) = vsync {
            combo.clear();
            self.framer.restart_scan(offset);
            self.framer
                .set_framelen(self.rate.min_frame_size() - GUARDBAND);
            self.frames_started += 1;
        }

        let mut bin = BurstBin::default();
        self.framer.unwrap(&mut bin, pcm);

        let mut first_error = None;
        for (payload, is_sadm) in bin.bursts {
            let result = if is_sadm {
                combo
                    .writable_core()
                    .map_err(PcmError::from)
                    .and_then(|core| sadm::decode(&payload, core).map_err(PcmError::from))
            } else {
                combo
                    .writable_pmd()
                    .map_err(PcmError::from)
                    .and_then(|pmd| read_burst(&payload, pmd).map(|_| ()).map_err(PcmError::from))
            };
            match result {
                Ok(()) => self.bursts_decoded += 1,
                Err(error) => {
                    warn!("burst dropped: {error}");
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::augment::PcmAugmentor;
    use crate::pcm::smpte337m::{PA, PB};
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
    fn augment_extract_25fps_pair() {
        let mut combo = minimal_combo();
        let mut augmentor = PcmAugmentor::builder(FrameRate::Fps2500)
            .channels(2)
            .pair(true)
            .build()
            .unwrap();

        let mut pcm = vec![0u32; 1920 * 2];
        augmentor.augment(&mut combo, &mut pcm, Some(0)).unwrap();

        // Guardband first, then the sync pair on both channels.
        for sample in &pcm[..32 * 2] {
            assert_eq!(*sample, 0);
        }
        assert_eq!(pcm[32 * 2], PA);
        assert_eq!(pcm[32 * 2 + 1], PB);

        let mut out = ComboModel::new();
        let mut extractor = PcmExtractor::new(FrameRate::Fps2500, 2, 0, true).unwrap();
        extractor.extract(&mut out, &pcm, Some(0)).unwrap();

        assert!(extractor.bursts_decoded() >= 1);
        assert_eq!(out.pmd_model(), combo.pmd_model());
    }

    #[test]
    fn round_trip_every_frame_rate_single_channel() {
        for rate in FrameRate::ALL {
            let mut combo = minimal_combo();
            let mut augmentor = PcmAugmentor::builder(rate)
                .channels(1)
                .pair(false)
                .build()
                .unwrap();

            let frame = rate.min_frame_size();
            let mut pcm = vec![0u32; frame];
            augmentor.augment(&mut combo, &mut pcm, Some(0)).unwrap();

            let mut out = ComboModel::new();
            let mut extractor = PcmExtractor::new(rate, 1, 0, false).unwrap();
            extractor.extract(&mut out, &pcm, Some(0)).unwrap();

            assert_eq!(
                out.pmd_model(),
                combo.pmd_model(),
                "rate {}",
                rate.display_name()
            );
        }
    }

    #[test]
    fn sadm_round_trip_through_pcm() {
        let mut combo = minimal_combo();
        let mut augmentor = PcmAugmentor::builder(FrameRate::Fps2500)
            .channels(2)
            .pair(true)
            .sadm(true)
            .build()
            .unwrap();

        let mut pcm = vec![0u32; 1920 * 2];
        augmentor.augment(&mut combo, &mut pcm, Some(0)).unwrap();

        let mut out = ComboModel::new();
        let mut extractor = PcmExtractor::new(FrameRate::Fps2500, 2, 0, true).unwrap();
        extractor.extract(&mut out, &pcm, Some(0)).unwrap();

        // The S-ADM leg lands in the core model; convert back to PMD
        // and compare scene content.
        let decoded = out.ensure_readable_pmd().unwrap();
        assert_eq!(decoded.beds(), combo.pmd_model().beds());
        assert_eq!(decoded.presentations(), combo.pmd_model().presentations());
    }

    #[test]
    fn blockwise_extraction_matches_whole_frame() {
        let mut combo = minimal_combo();
        let mut augmentor = PcmAugmentor::builder(FrameRate::Fps2500)
            .channels(2)
            .pair(true)
            .build()
            .unwrap();

        let mut pcm = vec![0u32; 1920 * 2];
        augmentor.augment(&mut combo, &mut pcm, Some(0)).unwrap();

        let mut out = ComboModel::new();
        let mut extractor = PcmExtractor::new(FrameRate::Fps2500, 2, 0, true).unwrap();
        for (i, chunk) in pcm.chunks(256 * 2).enumerate() {
            let vsync = if i == 0 { Some(0) } else { None };
            extractor.extract(&mut out, chunk, vsync).unwrap();
        }
        assert_eq!(out.pmd_model(), combo.pmd_model());
    }
}
