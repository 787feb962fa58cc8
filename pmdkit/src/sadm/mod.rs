//! Serial ADM bitstream codec.
//!
//! The payload is a UTF-8 XML document, optionally gzip-compressed.
//! Compression is signalled by the gzip magic (`1F 8B`) at the first
//! byte; the decoder accepts both forms, the encoder compresses when
//! the plain document exceeds the payload budget.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::debug;

use crate::adm::model::CoreModel;
use crate::utils::errors::SadmError;

pub mod xml;

/// Upper bound on the XML document size, compressed or not.
pub const MAX_XML_SIZE: usize = 65_536;

const GZIP_ID1: u8 = 0x1F;
const GZIP_ID2: u8 = 0x8B;

pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == GZIP_ID1 && bytes[1] == GZIP_ID2
}

pub fn compress(xml: &[u8]) -> Result<Vec<u8>, SadmError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(xml)
        .and_then(|_| encoder.finish())
        .map_err(|e| SadmError::Decompress(e.to_string()))
}

pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, SadmError> {
    let mut xml = Vec::new();
    GzDecoder::new(bytes)
        .take(MAX_XML_SIZE as u64 + 1)
        .read_to_end(&mut xml)
        .map_err(|e| SadmError::Decompress(e.to_string()))?;
    if xml.len() > MAX_XML_SIZE {
        return Err(SadmError::XmlTooLarge {
            size: xml.len(),
            max: MAX_XML_SIZE,
        });
    }
    Ok(xml)
}

/// Serialize `core` for carriage. Plain XML when it fits in `budget`
/// bytes, gzip otherwise.
pub fn encode(core: &CoreModel, budget: usize) -> Result<Vec<u8>, SadmError> {
    let plain = xml::write_xml(core)?;
    if plain.len() > MAX_XML_SIZE {
        return Err(SadmError::XmlTooLarge {
            size: plain.len(),
            max: MAX_XML_SIZE,
        });
    }
    if plain.len() <= budget {
        return Ok(plain);
    }

    let compressed = compress(&plain)?;
    debug!(
        "S-ADM XML compressed {} -> {} bytes",
        plain.len(),
        compressed.len()
    );
    if compressed.len() > budget {
        return Err(SadmError::XmlTooLarge {
            size: compressed.len(),
            max: budget,
        });
    }
    Ok(compressed)
}

/// Parse a carried payload into `core`, sniffing for gzip. A failure
/// on either leg leaves the model empty.
pub fn decode(bytes: &[u8], core: &mut CoreModel) -> Result<(), SadmError> {
    if is_compressed(bytes) {
        let xml = match decompress(bytes) {
            Ok(xml) => xml,
            Err(error) => {
                core.clear();
                return Err(error);
            }
        };
        xml::read_xml(&xml, core)
    } else {
        if bytes.len() > MAX_XML_SIZE {
            core.clear();
            return Err(SadmError::XmlTooLarge {
                size: bytes.len(),
                max: MAX_XML_SIZE,
            });
        }
        xml::read_xml(bytes, core)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adm::id::EntityType;
    use crate::combo::to_core::convert_to_core_model;
    use crate::pmd::model::{Bed, PmdModel, PmdPresentation};
    use crate::pmd::types::SpeakerConfig;

    fn test_core() -> CoreModel {
        let mut pmd = PmdModel::new();
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

        let mut core = CoreModel::new();
        convert_to_core_model(&pmd, &mut core).unwrap();
        core
    }

    #[test]
    fn gzip_round_trip() {
        let xml = xml::write_xml(&test_core()).unwrap();
        assert!(xml.len() <= 16 * 1024);

        let compressed = compress(&xml).unwrap();
        assert!(is_compressed(&compressed));
        assert_eq!(decompress(&compressed).unwrap(), xml);
    }

    #[test]
    fn encode_switches_on_budget() {
        let core = test_core();
        let plain = xml::write_xml(&core).unwrap();

        let generous = encode(&core, plain.len()).unwrap();
        assert!(!is_compressed(&generous));

        let tight = encode(&core, plain.len() - 1).unwrap();
        assert!(is_compressed(&tight));
    }

    #[test]
    fn decode_accepts_both_forms() {
        let core = test_core();
        let plain = xml::write_xml(&core).unwrap();
        let compressed = compress(&plain).unwrap();

        for payload in [plain, compressed] {
            let mut decoded = CoreModel::new();
            decode(&payload, &mut decoded).unwrap();
            assert_eq!(decoded.count_entities(EntityType::Presentation), 1);
            assert_eq!(decoded.count_entities(EntityType::Target), 2);
        }
    }

    #[test]
    fn corrupt_gzip_leaves_model_empty() {
        let core = test_core();
        let mut compressed = compress(&xml::write_xml(&core).unwrap()).unwrap();
        let len = compressed.len();
        compressed[len / 2] ^= 0xFF;
        compressed.truncate(len - 4);

        let mut decoded = CoreModel::new();
        assert!(decode(&compressed, &mut decoded).is_err());
        assert!(decoded.is_empty());
    }
}
