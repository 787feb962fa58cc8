//! Frame captor: finds the metadata channel(s) in an arbitrary PCM
//! blob, identifies the frame rate from the Pa spacing, and extracts
//! one complete metadata frame.

use log::debug;

use crate::combo::ComboModel;
use crate::pcm::extract::PcmExtractor;
use crate::pcm::vsync::FrameRate;
use crate::pmd::model::PmdModel;
use crate::utils::errors::CaptureError;

/// Pa/Pb sync words at the three carried bit depths.
const PA_16: u32 = 0xF872_0000;
const PA_20: u32 = 0x6F87_2000;
const PA_24: u32 = 0x96F8_7200;
const PB_16: u32 = 0x4E1F_0000;
const PB_20: u32 = 0x54E1_F000;
const PB_24: u32 = 0xA54E_1F00;

const MAX_FRAME_BUFFER_SAMPLES: usize = 5000;
const PA_BLOCK_SPACING: usize = 160;
const GUARD_BAND: usize = 32;
/// Pa-to-Pa distance between the first two blocks of a video frame.
const SECOND_BLOCK_SPACING: usize = PA_BLOCK_SPACING - GUARD_BAND;

/// Shape of a raw PCM blob handed to the captor.
#[derive(Debug, Clone, Copy)]
pub struct BlobDescriptor {
    pub number_of_samples: usize,
    pub number_of_channels: usize,
    /// 24 or 32.
    pub bit_depth: u8,
    pub big_endian: bool,
}

/// Decoded metadata captured from one frame. Owned by the caller.
#[derive(Debug, Clone)]
pub struct MetadataSet {
    pub num_frames: usize,
    pub frame_rate: FrameRate,
    pub metadata_channel: usize,
    pub is_pair: bool,
    pub pmd: PmdModel,
}

/// Read one sample in wave (little-endian) byte order into the
/// canonical 24-bits-in-the-top form.
pub fn read_sample_le(bit_depth: u8, bytes: &[u8]) -> u32 {
    match bit_depth {
        24 => (bytes[0] as u32) << 8 | (bytes[1] as u32) << 16 | (bytes[2] as u32) << 24,
        _ => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

/// Read one sample in network (big-endian) byte order. A 32-bit
/// big-endian sample is assumed to carry 24 bits of audio (e.g. an
/// AM824 subframe).
pub fn read_sample_be(bit_depth: u8, bytes: &[u8]) -> u32 {
    let bytes = match bit_depth {
        24 => &bytes[..3],
        _ => &bytes[1..4],
    };
    (bytes[0] as u32) << 24 | (bytes[1] as u32) << 16 | (bytes[2] as u32) << 8
}

fn is_pa(value: u32) -> bool {
    value == PA_16 || value == PA_20 || value == PA_24
}

fn matching_pb(pa: u32) -> u32 {
    match pa {
        PA_16 => PB_16,
        PA_24 => PB_24,
        _ => PB_20,
    }
}

/// Locates and decodes one metadata frame per call.
#[derive(Debug)]
pub struct FrameCaptor {
    data: Vec<u32>,
    channel_count: usize,
    sample_count: usize,
    pa_locations: Vec<usize>,
    is_pair: bool,
    metadata_channel: usize,
    frame_start: usize,
    frame_end: usize,
    frame_rate: Option<FrameRate>,
}

impl Default for FrameCaptor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCaptor {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(MAX_FRAME_BUFFER_SAMPLES * 2),
            channel_count: 0,
            sample_count: 0,
            pa_locations: Vec::new(),
            is_pair: false,
            metadata_channel: 0,
            frame_start: 0,
            frame_end: 0,
            frame_rate: None,
        }
    }

    fn check_descriptor(descriptor: &BlobDescriptor, blob: &[u8]) -> Result<(), CaptureError> {
        let min = FrameRate::Fps12000.min_frame_size();
        if descriptor.number_of_channels == 0 {
            return Err(CaptureError::BadDescriptor("no channels"));
        }
        if !matches!(descriptor.bit_depth, 24 | 32) {
            return Err(CaptureError::UnsupportedBitDepth(descriptor.bit_depth));
        }
        if descriptor.number_of_samples < min {
            return Err(CaptureError::BlobTooShort {
                samples: descriptor.number_of_samples,
                min,
            });
        }
        let needed = descriptor.number_of_samples
            * descriptor.number_of_channels
            * (descriptor.bit_depth as usize / 8);
        if blob.len() < needed {
            return Err(CaptureError::BadDescriptor("blob shorter than described"));
        }
        Ok(())
    }

    /// Normalize `channel_count` channels starting at `first_channel`
    /// into the canonical sample buffer.
    fn convert_channels(
        &mut self,
        descriptor: &BlobDescriptor,
        blob: &[u8],
        first_channel: usize,
    ) -> Result<(), CaptureError> {
        let sample_size = descriptor.bit_depth as usize / 8;
        let src_stride = descriptor.number_of_channels * sample_size;
        let sample_count = descriptor.number_of_samples.min(MAX_FRAME_BUFFER_SAMPLES);

        self.data.clear();
        self.data.resize(sample_count * self.channel_count, 0);
        for channel in 0..self.channel_count {
            let mut src = (first_channel + channel) * sample_size;
            for sample in 0..sample_count {
                let bytes = &blob[src..src + sample_size];
                self.data[sample * self.channel_count + channel] = if descriptor.big_endian {
                    read_sample_be(descriptor.bit_depth, bytes)
                } else {
                    read_sample_le(descriptor.bit_depth, bytes)
                };
                src += src_stride;
            }
        }
        self.sample_count = sample_count;
        Ok(())
    }

    /// Record every Pa+Pb candidate in the converted buffer.
    fn scan_for_pa(&mut self) {
        self.pa_locations.clear();
        let stride = self.channel_count;
        if self.sample_count < 2 {
            return;
        }

        for sample in 0..self.sample_count - 2 {
            let v0 = self.data[sample * stride];
            let v1 = self.data[sample * stride + 1];
            let v2 = self.data[(sample + 1) * stride];

            if is_pa(v0) && v1 == matching_pb(v0) {
                self.pa_locations.push(sample);
                self.is_pair = stride > 1;
            } else if is_pa(v0) && v2 == matching_pb(v0) {
                self.pa_locations.push(sample);
                self.is_pair = false;
            }
        }
    }

    fn find_metadata_channel(
        &mut self,
        descriptor: &BlobDescriptor,
        blob: &[u8],
    ) -> Result<(), CaptureError> {
        let last_channel = descriptor.number_of_channels - 1;

        self.channel_count = 2;
        let mut channel = 0;
        while channel < last_channel {
            self.convert_channels(descriptor, blob, channel)?;
            self.scan_for_pa();
            if !self.pa_locations.is_empty() {
                self.metadata_channel = channel;
                return Ok(());
            }
            channel += 2;
        }

        // Finally the last channel on its own.
        self.channel_count = 1;
        self.convert_channels(descriptor, blob, last_channel)?;
        self.scan_for_pa();
        if !self.pa_locations.is_empty() {
            self.metadata_channel = last_channel;
            return Ok(());
        }

        Err(CaptureError::SyncNotFound)
    }

    /// Frame length to frame rate. The 800- and 400-sample spacings
    /// are ambiguous between the drop-frame and integer rates; the
    /// integer rate wins.
    fn frame_rate_of(frame_length: usize) -> Option<FrameRate> {
        match frame_length {
            2001 | 2002 => Some(FrameRate::Fps2398),
            2000 => Some(FrameRate::Fps2400),
            1920 => Some(FrameRate::Fps2500),
            1601 | 1602 => Some(FrameRate::Fps2997),
            1600 => Some(FrameRate::Fps3000),
            960 => Some(FrameRate::Fps5000),
            800 => Some(FrameRate::Fps6000),
            480 => Some(FrameRate::Fps10000),
            400 => Some(FrameRate::Fps12000),
            _ => None,
        }
    }

    fn find_frame(&mut self) -> Result<(), CaptureError> {
        // A full guardband must precede every usable Pa.
        let pa: Vec<usize> = self
            .pa_locations
            .iter()
            .copied()
            .filter(|p| *p >= GUARD_BAND)
            .collect();
        if pa.is_empty() {
            return Err(CaptureError::SyncNotFound);
        }

        // Current PMD marks a video frame with two blocks a unique
        // 128 samples apart. Older PMD and S-ADM space Pa at the
        // video frame rate itself.
        if pa.len() >= 3 {
            let last = pa.len() - 1;
            let start = (0..last - 1).find(|&i| pa[i + 1] - pa[i] == SECOND_BLOCK_SPACING);
            if let Some(i) = start {
                let frame_start = pa[i] - GUARD_BAND;
                let end = (i + 1..last)
                    .find(|&j| pa[j + 1] - pa[j] > PA_BLOCK_SPACING)
                    .map(|j| pa[j + 1]);
                if let Some(end_pa) = end {
                    let frame_end = end_pa - GUARD_BAND;
                    if let Some(rate) = Self::frame_rate_of(frame_end - frame_start) {
                        self.frame_start = frame_start;
                        self.frame_end = frame_end;
                        self.frame_rate = Some(rate);
                        return Ok(());
                    }
                }
            }
        }

        // Fallback: two Pa positions determine the frame size.
        if pa.len() >= 2 {
            let frame_start = pa[0] - GUARD_BAND;
            let frame_end = pa[1] - GUARD_BAND;
            if let Some(rate) = Self::frame_rate_of(frame_end - frame_start) {
                self.frame_start = frame_start;
                self.frame_end = frame_end;
                self.frame_rate = Some(rate);
                return Ok(());
            }
            return Err(CaptureError::UnknownFrameRate {
                spacing: frame_end - frame_start,
            });
        }

        Err(CaptureError::SyncNotFound)
    }

    /// Scan `blob` and decode one complete metadata frame.
    pub fn capture(
        &mut self,
        descriptor: &BlobDescriptor,
        blob: &[u8],
    ) -> Result<MetadataSet, CaptureError> {
        Self::check_descriptor(descriptor, blob)?;
        self.pa_locations.clear();
        self.frame_rate = None;

        self.find_metadata_channel(descriptor, blob)?;
        self.find_frame()?;
        let rate = self.frame_rate.expect("set by find_frame");
        debug!(
            "captured frame: channel {}, pair {}, rate {}, samples {}..{}",
            self.metadata_channel,
            self.is_pair,
            rate.display_name(),
            self.frame_start,
            self.frame_end
        );

        let mut combo = ComboModel::new();
        let mut extractor = PcmExtractor::new(rate, self.channel_count, 0, self.is_pair)?;
        let frame = &self.data[self.frame_start * self.channel_count
            ..self.frame_end.min(self.sample_count) * self.channel_count];
        extractor.extract(&mut combo, frame, Some(0))?;

        let pmd = combo.ensure_readable_pmd()?.clone();
        Ok(MetadataSet {
            num_frames: 1,
            frame_rate: rate,
            metadata_channel: self.metadata_channel,
            is_pair: self.is_pair,
            pmd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::augment::PcmAugmentor;
    use crate::pcm::vsync::VsyncTimer;
    use crate::pmd::model::{Bed, PmdPresentation};
    use crate::pmd::types::SpeakerConfig;

    fn scene() -> ComboModel {
        let mut combo = ComboModel::new();
        let pmd = combo.writable_pmd().unwrap();
        pmd.add_signals(2).unwrap();
        pmd.add_bed(Bed::direct(1, SpeakerConfig::Stereo, "Capture bed", 1))
            .unwrap();
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

    /// Generate `samples` of single-channel metadata carrier at `rate`.
    fn carrier(combo: &mut ComboModel, rate: FrameRate, samples: usize) -> Vec<u32> {
        let mut augmentor = PcmAugmentor::builder(rate)
            .channels(1)
            .pair(false)
            .mark_empty_blocks(true)
            .build()
            .unwrap();

        let mut pcm = vec![0u32; samples];
        let mut timer = VsyncTimer::new(rate, 0);
        let mut offset = 0;
        while offset < samples {
            let n = 256.min(samples - offset);
            let vsync = timer.add_samples(n);
            augmentor
                .augment(combo, &mut pcm[offset..offset + n], vsync)
                .unwrap();
            offset += n;
        }
        pcm
    }

    fn blob_24le(channels: usize, metadata_channel: usize, carrier: &[u32]) -> Vec<u8> {
        let mut blob = vec![0u8; carrier.len() * channels * 3];
        for (sample, value) in carrier.iter().enumerate() {
            let base = (sample * channels + metadata_channel) * 3;
            blob[base] = (value >> 8) as u8;
            blob[base + 1] = (value >> 16) as u8;
            blob[base + 2] = (value >> 24) as u8;
        }
        blob
    }

    #[test]
    fn sample_normalization_round_trips() {
        let value = 0x6F87_2000u32;
        let le = [(value >> 8) as u8, (value >> 16) as u8, (value >> 24) as u8];
        assert_eq!(read_sample_le(24, &le), value);

        let be = [(value >> 24) as u8, (value >> 16) as u8, (value >> 8) as u8];
        assert_eq!(read_sample_be(24, &be), value);

        let be32 = [0, (value >> 24) as u8, (value >> 16) as u8, (value >> 8) as u8];
        assert_eq!(read_sample_be(32, &be32), value);
    }

    #[test]
    fn capture_sixteen_channel_blob() {
        let mut combo = scene();
        let carrier = carrier(&mut combo, FrameRate::Fps3000, 5000);
        let blob = blob_24le(16, 15, &carrier);

        let descriptor = BlobDescriptor {
            number_of_samples: 5000,
            number_of_channels: 16,
            bit_depth: 24,
            big_endian: false,
        };

        let mut captor = FrameCaptor::new();
        let set = captor.capture(&descriptor, &blob).unwrap();

        assert!(set.num_frames >= 1);
        assert_eq!(set.frame_rate, FrameRate::Fps3000);
        assert_eq!(set.metadata_channel, 15);
        assert!(!set.is_pair);
        assert_eq!(set.pmd.beds(), combo.pmd_model().beds());
        assert_eq!(set.pmd.presentations(), combo.pmd_model().presentations());
    }

    #[test]
    fn capture_pair_blob() {
        let mut combo = scene();
        let mut augmentor = PcmAugmentor::builder(FrameRate::Fps2500)
            .channels(2)
            .pair(true)
            .mark_empty_blocks(true)
            .build()
            .unwrap();

        let samples = 4000;
        let mut pcm = vec![0u32; samples * 2];
        let mut timer = VsyncTimer::new(FrameRate::Fps2500, 0);
        let mut offset = 0;
        while offset < samples {
            let n = 256.min(samples - offset);
            let vsync = timer.add_samples(n);
            augmentor
                .augment(&mut combo, &mut pcm[offset * 2..(offset + n) * 2], vsync)
                .unwrap();
            offset += n;
        }

        let mut blob = vec![0u8; samples * 2 * 3];
        for (i, value) in pcm.iter().enumerate() {
            blob[i * 3] = (value >> 8) as u8;
            blob[i * 3 + 1] = (value >> 16) as u8;
            blob[i * 3 + 2] = (value >> 24) as u8;
        }

        let descriptor = BlobDescriptor {
            number_of_samples: samples,
            number_of_channels: 2,
            bit_depth: 24,
            big_endian: false,
        };

        let mut captor = FrameCaptor::new();
        let set = captor.capture(&descriptor, &blob).unwrap();
        assert_eq!(set.frame_rate, FrameRate::Fps2500);
        assert!(set.is_pair);
        assert_eq!(set.pmd.beds(), combo.pmd_model().beds());
    }

    #[test]
    fn silence_reports_no_sync() {
        let descriptor = BlobDescriptor {
            number_of_samples: 1000,
            number_of_channels: 2,
            bit_depth: 24,
            big_endian: false,
        };
        let blob = vec![0u8; 1000 * 2 * 3];
        let mut captor = FrameCaptor::new();
        assert!(matches!(
            captor.capture(&descriptor, &blob),
            Err(CaptureError::SyncNotFound)
        ));
    }

    #[test]
    fn bad_descriptors_rejected() {
        let blob = vec![0u8; 4000 * 3];
        let mut captor = FrameCaptor::new();

        let mut descriptor = BlobDescriptor {
            number_of_samples: 4000,
            number_of_channels: 1,
            bit_depth: 20,
            big_endian: false,
        };
        assert!(matches!(
            captor.capture(&descriptor, &blob),
            Err(CaptureError::UnsupportedBitDepth(20))
        ));

        descriptor.bit_depth = 24;
        descriptor.number_of_samples = 300;
        assert!(matches!(
            captor.capture(&descriptor, &blob),
            Err(CaptureError::BlobTooShort { .. })
        ));
    }
}
