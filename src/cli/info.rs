use std::fs;

use anyhow::{Context, Result};
use serde::Serialize;

use pmdkit::pcm::capture::{BlobDescriptor, FrameCaptor};
use pmdkit::pmd::model::PmdModel;

use super::command::{CaptureArgs, InfoArgs};
use super::convert;

#[derive(Debug, Serialize)]
struct BedReport {
    id: u16,
    config: String,
    name: String,
    channels: usize,
}

#[derive(Debug, Serialize)]
struct ObjectReport {
    id: u16,
    class: String,
    name: String,
    signal: u8,
    position: [f64; 3],
}

#[derive(Debug, Serialize)]
struct PresentationReport {
    id: u16,
    config: String,
    language: String,
    elements: Vec<u16>,
    names: usize,
}

#[derive(Debug, Serialize)]
struct ModelReport {
    title: String,
    signals: usize,
    beds: Vec<BedReport>,
    objects: Vec<ObjectReport>,
    presentations: Vec<PresentationReport>,
    loudness_records: usize,
    has_iat: bool,
    profile: String,
}

impl ModelReport {
    fn of(pmd: &PmdModel) -> Self {
        Self {
            title: pmd.title.clone(),
            signals: pmd.signal_count(),
            beds: pmd
                .beds()
                .iter()
                .map(|bed| BedReport {
                    id: bed.id,
                    config: bed.config.display_name().to_string(),
                    name: bed.name.clone(),
                    channels: bed.sources.len(),
                })
                .collect(),
            objects: pmd
                .objects()
                .iter()
                .map(|object| ObjectReport {
                    id: object.id,
                    class: format!("{:?}", object.class),
                    name: object.name.clone(),
                    signal: object.signal,
                    position: [object.x, object.y, object.z],
                })
                .collect(),
            presentations: pmd
                .presentations()
                .iter()
                .map(|pres| PresentationReport {
                    id: pres.id,
                    config: pres.config.display_name().to_string(),
                    language: pres.language.clone(),
                    elements: pres.elements.clone(),
                    names: pres.names.len(),
                })
                .collect(),
            loudness_records: pmd.loudness().count(),
            has_iat: pmd.iat().is_some(),
            profile: {
                let profile = pmd.profile();
                format!("({}, {})", profile.number, profile.level)
            },
        }
    }
}

pub fn cmd_info(args: &InfoArgs) -> Result<()> {
    let (pmd, _core) = convert::load(&args.input, None)?;

    let report = ModelReport::of(&pmd);
    println!("{}", serde_yaml_ng::to_string(&report)?);
    Ok(())
}

pub fn cmd_capture(args: &CaptureArgs) -> Result<()> {
    let blob = fs::read(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
    let bytes_per_sample = args.channels * (args.bit_depth as usize / 8);
    let samples = blob.len() / bytes_per_sample.max(1);

    let descriptor = BlobDescriptor {
        number_of_samples: samples,
        number_of_channels: args.channels,
        bit_depth: args.bit_depth,
        big_endian: args.big_endian,
    };

    let mut captor = FrameCaptor::new();
    let set = captor.capture(&descriptor, &blob)?;

    #[derive(Debug, Serialize)]
    struct CaptureReport {
        frame_rate: String,
        metadata_channel: usize,
        is_pair: bool,
        num_frames: usize,
        model: ModelReport,
    }

    let report = CaptureReport {
        frame_rate: set.frame_rate.display_name().to_string(),
        metadata_channel: set.metadata_channel,
        is_pair: set.is_pair,
        num_frames: set.num_frames,
        model: ModelReport::of(&set.pmd),
    };
    println!("{}", serde_yaml_ng::to_string(&report)?);
    Ok(())
}
