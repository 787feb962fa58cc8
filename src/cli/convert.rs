use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use log::info;

use pmdkit::adm::model::CoreModel;
use pmdkit::combo::{to_core, to_pmd};
use pmdkit::klv::reader::read_burst;
use pmdkit::klv::writer::{PayloadSelection, write_burst};
use pmdkit::pmd::model::PmdModel;
use pmdkit::sadm;

use super::command::ConvertArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Xml,
    Klv,
}

fn file_kind(path: &Path) -> Result<FileKind> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("xml") => Ok(FileKind::Xml),
        Some("klv") => Ok(FileKind::Klv),
        Some("wav") => bail!(
            "{}: .wav carriage is not handled here; extract the PCM and use `capture`",
            path.display()
        ),
        _ => bail!("{}: unrecognized file suffix", path.display()),
    }
}

/// Everything a conversion needs: both model forms, populated from
/// whichever side the input provided.
pub(super) fn load(path: &Path, title: Option<&str>) -> Result<(PmdModel, CoreModel)> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut pmd = PmdModel::new();
    let mut core = CoreModel::new();

    match file_kind(path)? {
        FileKind::Xml => {
            sadm::decode(&bytes, &mut core)
                .with_context(|| format!("parsing {}", path.display()))?;
            to_pmd::convert_to_pmd_model(&core, &mut pmd, title)?;
        }
        FileKind::Klv => {
            read_burst(&bytes, &mut pmd)
                .with_context(|| format!("parsing {}", path.display()))?;
            to_core::convert_to_core_model(&pmd, &mut core)?;
        }
    }

    Ok((pmd, core))
}

pub fn cmd_convert(args: &ConvertArgs) -> Result<()> {
    let (pmd, core) = load(&args.input, args.title.as_deref())?;

    let output = match file_kind(&args.output)? {
        FileKind::Xml => sadm::xml::write_xml(&core)?,
        FileKind::Klv => write_burst(
            &pmd,
            args.ul.to_choice(),
            &PayloadSelection {
                structure: true,
                update_window: Some((0, u16::MAX)),
                element_names: true,
                presentation_names: true,
            },
        )?,
    };

    fs::write(&args.output, &output).with_context(|| format!("writing {}", args.output.display()))?;
    info!(
        "wrote {} ({} bytes)",
        args.output.display(),
        output.len()
    );
    Ok(())
}
