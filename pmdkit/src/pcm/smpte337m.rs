//! SMPTE 337m framing state machine.
//!
//! Metadata bursts ride in 20-bit words packed into the upper bits of
//! 24-bit PCM samples, on a single channel or a channel pair. Each
//! burst opens with the Pa/Pb sync pair, a Pc stream descriptor and a
//! Pd databit count; S-ADM bursts add Pe/Pf and the assemble/format
//! info words. The same phase machine drives both directions: `wrap`
//! writes bursts into PCM, `unwrap` scans them back out.
//!
//! Corruption never aborts the reader: a Pb that does not follow Pa, a
//! Pc that is neither PMD nor S-ADM, or a Pd that cannot fit in the
//! remaining block all drop the machine back to Pa scanning.

/// IEC 958 preamble a (sync word 1), 20-bit alignment.
pub const PA: u32 = 0x6F87_2000;
/// IEC 958 preamble b (sync word 2), 20-bit alignment.
pub const PB: u32 = 0x54E1_F000;
/// SMPTE preamble C data_mode and data_type mask.
pub const PC_MASK: u32 = 0x007F_0000;
/// Preamble C for KLV-wrapped PMD (stream 0, 20-bit, KLV).
pub const PC_PMD: u32 = 0x003B_0000;
/// KLV key_flag, indicating the presence of a Universal Key.
pub const PC_KEY_FLAG: u32 = 0x0100_0000;
/// Preamble C of a NULL databurst.
pub const PC_NULL: u32 = 0x0000_0000;

const SADM_PC_FF: u32 = 1 << 26;
const SADM_PC_AI: u32 = 1 << 25;
const SADM_PC_CMF: u32 = 1 << 24;
const SADM_PC_DT: u32 = 0x1F << 16;

/// Preamble C for S-ADM: DSN=0, MCF=0 (single chunk), format and
/// assemble info present, metadata-changed set, data type 31.
pub const PC_SADM: u32 = SADM_PC_FF | SADM_PC_AI | SADM_PC_CMF | SADM_PC_DT;

/// S-ADM Pe word.
pub const PE_SADM: u32 = 0x0000_1000;
/// S-ADM Pf word.
pub const PF_SADM: u32 = 0;
/// S-ADM assemble_info: in-timeline flag, track numbers and track ID
/// all zero.
pub const SADM_ASSEMBLE_INFO: u32 = 0;
/// S-ADM format_info: format type 1 (gzip, RFC 1952).
pub const SADM_FORMAT_INFO: u32 = 1 << 16;

/// Zeroed samples following every video sync point.
pub const GUARDBAND: usize = 32;
/// Samples between successive PMD bursts on the carrier channel.
pub const BLOCK_SIZE: usize = 160;

const PREAMBLE_SAMPLES: usize = 4;
const WORD_BITS: usize = 20;
const PAIR_BITS: usize = 2 * WORD_BITS;
/// Pe, Pf, assemble_info and format_info, all counted in Pd for S-ADM.
const SADM_EXTRA_WORDS: usize = 4;

const NO_VSYNC: usize = usize::MAX;

fn round_up(size: usize, rounding: usize) -> usize {
    size.div_ceil(rounding) * rounding
}

/// Supplies payload bursts to the wrap side, one per block boundary.
pub trait PayloadSource {
    /// Fill `payload` with the next burst of the current video frame
    /// and return its bit length and block length, or `None` when the
    /// frame has no further bursts.
    fn next_block(&mut self, payload: &mut Vec<u8>) -> Option<NextBlock>;
}

/// One burst handed out by a [`PayloadSource`].
#[derive(Debug, Clone, Copy)]
pub struct NextBlock {
    /// Payload length in bits; 0 marks an empty block.
    pub bits: usize,
    /// Length of this block in samples on the carrier channel.
    pub block_samples: usize,
}

/// Receives completed bursts from the unwrap side.
pub trait PayloadSink {
    fn burst(&mut self, payload: &[u8], sadm: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Vsync,
    Guardband,
    PreambleA,
    PreambleB,
    PreambleC,
    PreambleD,
    PreambleE,
    PreambleF,
    SadmAi,
    SadmFf,
    Data,
    Padding,
}

/// The framing state machine. One instance drives one direction.
#[derive(Debug)]
pub struct Smpte337m {
    phase: Phase,
    pair: bool,
    /// Channels per interleaved sample set.
    stride: usize,
    /// First carrier channel index.
    start: usize,
    isodd: bool,
    databits: usize,
    padding: usize,
    vsync_offset: usize,
    /// Current block length in sample sets on the carrier.
    framelen: usize,
    mark_empty: bool,
    sadm: bool,
    sadm_ai: bool,
    sadm_ff: bool,
    /// Pa position (in sample sets) seen by the last `unwrap` call.
    pa_found: Option<usize>,
    data: Vec<u8>,
    data_pos: usize,
    /// Read side: maximum acceptable burst size in bits.
    capacity_bits: usize,
}

impl Smpte337m {
    pub fn new(stride: usize, start: usize, pair: bool, mark_empty: bool, sadm: bool) -> Self {
        Self {
            phase: Phase::Vsync,
            pair,
            stride,
            start,
            isodd: false,
            databits: 0,
            padding: 0,
            vsync_offset: NO_VSYNC,
            framelen: BLOCK_SIZE,
            mark_empty,
            sadm,
            sadm_ai: false,
            sadm_ff: false,
            pa_found: None,
            data: Vec::new(),
            data_pos: 0,
            capacity_bits: 0,
        }
    }

    /// Configure the read side's burst capacity (and buffer).
    pub fn set_read_capacity(&mut self, bytes: usize) {
        self.capacity_bits = bytes * 8;
        self.data = vec![0; bytes + 4];
    }

    /// Read side: the frame length used to bound S-ADM bursts.
    pub fn set_framelen(&mut self, framelen: usize) {
        self.framelen = framelen;
    }

    pub fn pa_found(&self) -> Option<usize> {
        self.pa_found
    }

    /// Restart at a video sync `offset` sample sets into the next
    /// window and preload the first burst of the frame.
    pub fn restart_frame(&mut self, offset: usize, source: &mut dyn PayloadSource) {
        self.phase = Phase::Vsync;
        self.vsync_offset = offset;
        self.padding = 0;
        self.isodd = false;
        self.fetch_next(source);
    }

    /// Read side restart: skip to `offset` and scan from there.
    pub fn restart_scan(&mut self, offset: usize) {
        self.phase = Phase::Vsync;
        self.vsync_offset = offset;
        self.padding = 0;
        self.isodd = false;
        self.data_pos = 0;
    }

    fn fetch_next(&mut self, source: &mut dyn PayloadSource) -> bool {
        self.data.clear();
        self.data_pos = 0;
        match source.next_block(&mut self.data) {
            Some(block) => {
                self.databits = block.bits;
                self.framelen = block.block_samples;
                true
            }
            None => {
                self.databits = 0;
                false
            }
        }
    }

    #[inline]
    fn preamble_sets(&self) -> usize {
        if self.pair {
            PREAMBLE_SAMPLES / 2
        } else {
            PREAMBLE_SAMPLES
        }
    }

    #[inline]
    fn bits_per_set(&self) -> usize {
        if self.pair { PAIR_BITS } else { WORD_BITS }
    }

    #[inline]
    fn sample(&self, pcm: &[u32], set: usize, channel: usize) -> u32 {
        pcm[set * self.stride + self.start + channel]
    }

    #[inline]
    fn put(&self, pcm: &mut [u32], set: usize, channel: usize, value: u32) {
        pcm[set * self.stride + self.start + channel] = value;
    }

    #[inline]
    fn zero_set(&self, pcm: &mut [u32], set: usize) {
        self.put(pcm, set, 0, 0);
        if self.pair {
            self.put(pcm, set, 1, 0);
        }
    }

    // ------------------------------------------------------- writing

    /// Drive the write machine across one PCM block. Channels other
    /// than the carrier pass through untouched.
    pub fn wrap(&mut self, source: &mut dyn PayloadSource, pcm: &mut [u32]) {
        let sets = pcm.len() / self.stride;
        let mut i = 0;

        while i < sets {
            match self.phase {
                Phase::Vsync => {
                    while i < sets && self.vsync_offset > 0 {
                        self.zero_set(pcm, i);
                        i += 1;
                        self.vsync_offset -= 1;
                    }
                    if self.vsync_offset == 0 {
                        self.padding = GUARDBAND;
                        self.phase = Phase::Guardband;
                    }
                }
                Phase::Guardband => {
                    while i < sets && self.padding > 0 {
                        self.zero_set(pcm, i);
                        i += 1;
                        self.padding -= 1;
                    }
                    if self.padding == 0 {
                        self.phase = Phase::PreambleA;
                    }
                }
                Phase::Padding => {
                    while i < sets && self.padding > 0 {
                        self.zero_set(pcm, i);
                        i += 1;
                        self.padding -= 1;
                        self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                    }
                    if self.padding == 0 {
                        self.phase = if self.fetch_next(source) {
                            Phase::PreambleA
                        } else {
                            Phase::Vsync
                        };
                        self.isodd = false;
                    }
                }
                Phase::PreambleA => {
                    let marked = self.databits > 0 || self.mark_empty;
                    self.put(pcm, i, 0, if marked { PA } else { 0 });
                    if self.pair {
                        self.put(pcm, i, 1, if marked { PB } else { 0 });
                        self.phase = Phase::PreambleC;
                    } else {
                        self.phase = Phase::PreambleB;
                    }
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::PreambleB => {
                    let marked = self.databits > 0 || self.mark_empty;
                    self.put(pcm, i, 0, if marked { PB } else { 0 });
                    self.phase = Phase::PreambleC;
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::PreambleC => {
                    let pc = if self.databits > 0 {
                        if self.sadm {
                            PC_SADM | PC_KEY_FLAG
                        } else {
                            PC_PMD | PC_KEY_FLAG
                        }
                    } else if self.mark_empty {
                        PC_NULL
                    } else {
                        0
                    };
                    self.put(pcm, i, 0, pc);
                    if self.pair {
                        self.write_pd(pcm, i, 1);
                    } else {
                        self.phase = Phase::PreambleD;
                    }
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::PreambleD => {
                    self.write_pd(pcm, i, 0);
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::PreambleE => {
                    self.put(pcm, i, 0, PE_SADM);
                    if self.pair {
                        self.put(pcm, i, 1, PF_SADM);
                        self.phase = Phase::SadmAi;
                    } else {
                        self.phase = Phase::PreambleF;
                    }
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::PreambleF => {
                    self.put(pcm, i, 0, PF_SADM);
                    self.phase = Phase::SadmAi;
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::SadmAi => {
                    self.put(pcm, i, 0, SADM_ASSEMBLE_INFO);
                    if self.pair {
                        self.put(pcm, i, 1, SADM_FORMAT_INFO);
                        self.phase = Phase::Data;
                    } else {
                        self.phase = Phase::SadmFf;
                    }
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::SadmFf => {
                    self.put(pcm, i, 0, SADM_FORMAT_INFO);
                    self.phase = Phase::Data;
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::Data => {
                    i = self.write_data(pcm, i, sets);
                }
            }
        }
    }

    /// Pd carries the databit count. For S-ADM it also covers the
    /// Pe/Pf and assemble/format words that follow.
    fn write_pd(&mut self, pcm: &mut [u32], set: usize, channel: usize) {
        if self.databits > 0 {
            if self.sadm {
                self.phase = Phase::PreambleE;
                self.databits += SADM_EXTRA_WORDS * WORD_BITS;
            } else {
                self.phase = Phase::Data;
            }
            self.put(pcm, set, channel, (self.databits as u32) << 12);
            self.databits = round_up(self.databits, self.bits_per_set());
            let extra_sets = if self.sadm { SADM_EXTRA_WORDS * WORD_BITS / self.bits_per_set() } else { 0 };
            let data_sets = self.databits / self.bits_per_set() - extra_sets;
            // Pe..format_info sets are consumed by their own phases.
            self.databits -= extra_sets * self.bits_per_set();
            self.padding = self
                .framelen
                .saturating_sub(self.preamble_sets() + extra_sets + data_sets);
        } else {
            self.put(pcm, set, channel, 0);
            self.phase = Phase::Padding;
            self.padding = self.framelen.saturating_sub(self.preamble_sets());
        }
    }

    fn write_data(&mut self, pcm: &mut [u32], mut i: usize, sets: usize) -> usize {
        debug_assert!(self.databits % WORD_BITS == 0);

        while self.databits >= WORD_BITS && i < sets {
            let p = self.data_pos;
            // The source buffer may end mid-word; missing bytes are zero.
            let b0 = *self.data.get(p).unwrap_or(&0) as u32;
            let b1 = *self.data.get(p + 1).unwrap_or(&0) as u32;
            let b2 = *self.data.get(p + 2).unwrap_or(&0) as u32;
            let (value, channel) = if !self.isodd {
                self.data_pos += 2;
                ((b0 << 24) | (b1 << 16) | ((b2 & 0xF0) << 8), 0)
            } else {
                self.data_pos += 3;
                (((b0 & 0x0F) << 28) | (b1 << 20) | (b2 << 12), 1)
            };

            if self.pair {
                self.put(pcm, i, channel, value);
                if channel == 1 {
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
            } else {
                self.put(pcm, i, 0, value);
                i += 1;
                self.vsync_offset = self.vsync_offset.wrapping_sub(1);
            }

            self.databits -= WORD_BITS;
            self.isodd = !self.isodd;
        }

        if self.databits == 0 {
            // Rounding to the pair width keeps the word count even, so
            // a pair burst always ends on a set boundary here.
            self.phase = Phase::Padding;
        }
        i
    }

    // ------------------------------------------------------- reading

    /// Drive the read machine across one PCM block, handing completed
    /// bursts to `sink`.
    pub fn unwrap(&mut self, sink: &mut dyn PayloadSink, pcm: &[u32]) {
        let sets = pcm.len() / self.stride;
        let mut i = 0;
        self.pa_found = None;

        while i < sets {
            match self.phase {
                Phase::Vsync => {
                    let skip = self.vsync_offset.min(sets - i);
                    i += skip;
                    self.vsync_offset -= skip;
                    if self.vsync_offset == 0 {
                        self.phase = Phase::PreambleA;
                    }
                }
                Phase::Padding => {
                    let skip = self.padding.min(sets - i);
                    i += skip;
                    self.padding -= skip;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(skip);
                    if self.padding == 0 {
                        self.phase = Phase::PreambleA;
                    }
                }
                Phase::PreambleA | Phase::Guardband => {
                    if self.sample(pcm, i, 0) == PA {
                        if self.pair {
                            if self.sample(pcm, i, 1) == PB {
                                self.pa_found = Some(i);
                                self.phase = Phase::PreambleC;
                            }
                        } else {
                            self.phase = Phase::PreambleB;
                        }
                    }
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::PreambleB => {
                    if self.sample(pcm, i, 0) == PB {
                        self.pa_found = Some(i.saturating_sub(1));
                        self.phase = Phase::PreambleC;
                    } else {
                        self.phase = Phase::PreambleA;
                    }
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::PreambleC => {
                    let pc = self.sample(pcm, i, 0);
                    if pc & PC_MASK == PC_PMD {
                        self.sadm = false;
                    } else if pc & PC_MASK == PC_SADM & PC_MASK {
                        self.sadm = true;
                        self.sadm_ai = pc & SADM_PC_AI != 0;
                        self.sadm_ff = pc & SADM_PC_FF != 0;
                    } else {
                        // Not a burst after all (a NULL burst or stray
                        // sync); rescan from this very sample.
                        self.phase = Phase::PreambleA;
                        continue;
                    }

                    if self.pair {
                        self.read_pd(pcm, i, 1);
                    } else {
                        self.phase = Phase::PreambleD;
                    }
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::PreambleD => {
                    self.read_pd(pcm, i, 0);
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::PreambleE => {
                    if self.sample(pcm, i, 0) == PE_SADM {
                        self.databits = self.databits.saturating_sub(WORD_BITS);
                        if self.pair {
                            self.databits = self.databits.saturating_sub(WORD_BITS);
                            self.phase = Phase::SadmAi;
                        } else {
                            self.phase = Phase::PreambleF;
                        }
                    } else {
                        self.phase = Phase::PreambleA;
                    }
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::PreambleF => {
                    if self.sample(pcm, i, 0) == PF_SADM {
                        self.databits = self.databits.saturating_sub(WORD_BITS);
                        self.phase = if self.sadm_ai {
                            Phase::SadmAi
                        } else if self.sadm_ff {
                            Phase::SadmFf
                        } else {
                            Phase::Data
                        };
                    } else {
                        self.phase = Phase::PreambleA;
                    }
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::SadmAi => {
                    self.databits = self.databits.saturating_sub(WORD_BITS);
                    if self.pair {
                        self.databits = self.databits.saturating_sub(WORD_BITS);
                        self.phase = Phase::Data;
                    } else {
                        self.phase = Phase::SadmFf;
                    }
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::SadmFf => {
                    self.databits = self.databits.saturating_sub(WORD_BITS);
                    self.phase = Phase::Data;
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
                Phase::Data => {
                    i = self.read_data(sink, pcm, i, sets);
                }
            }
        }
    }

    fn read_pd(&mut self, pcm: &[u32], set: usize, channel: usize) {
        let mut declared = (self.sample(pcm, set, channel) >> 12) as usize;
        let slack = if self.sadm { SADM_EXTRA_WORDS * WORD_BITS } else { 0 };
        if declared > self.capacity_bits + slack {
            // Too large for our buffer, ignore the burst.
            declared = 0;
        }

        let bits_per_set = self.bits_per_set();
        if self.sadm {
            self.phase = Phase::PreambleE;
            self.databits = round_up(declared, WORD_BITS);
        } else {
            self.phase = Phase::Data;
            self.databits = round_up(declared, bits_per_set);
            self.framelen = BLOCK_SIZE;
        }

        let data_sets = round_up(declared, bits_per_set) / bits_per_set;
        let reqsamples = self.preamble_sets() + data_sets;
        if self.framelen < reqsamples {
            // Corrupt declaration; wait for the next Pa.
            self.phase = Phase::PreambleA;
            return;
        }

        // The first block of a video frame is shortened by the
        // guardband. We may not know where in the frame we are, so if
        // the burst would fit in the shorter spacing, assume it: in
        // the worst case the machine just waits an extra 32 samples in
        // the Pa phase.
        if self.framelen - GUARDBAND > reqsamples {
            self.framelen -= GUARDBAND;
        }
        self.padding = self.framelen - reqsamples;

        if declared == 0 {
            self.phase = Phase::Padding;
        }
    }

    fn read_data(
        &mut self,
        sink: &mut dyn PayloadSink,
        pcm: &[u32],
        mut i: usize,
        sets: usize,
    ) -> usize {
        while self.databits >= WORD_BITS && i < sets {
            let (sample, channel) = if self.pair {
                (self.sample(pcm, i, if self.isodd { 1 } else { 0 }), self.isodd as usize)
            } else {
                (self.sample(pcm, i, 0), 0)
            };

            let p = self.data_pos;
            if p + 3 <= self.data.len() {
                if !self.isodd {
                    self.data[p] = (sample >> 24) as u8;
                    self.data[p + 1] = (sample >> 16) as u8;
                    self.data[p + 2] = ((sample >> 8) & 0xF0) as u8;
                    self.data_pos += 2;
                } else {
                    self.data[p] |= ((sample >> 28) & 0x0F) as u8;
                    self.data[p + 1] = (sample >> 20) as u8;
                    self.data[p + 2] = (sample >> 12) as u8;
                    self.data_pos += 3;
                }
            }

            if self.pair {
                if channel == 1 {
                    i += 1;
                    self.vsync_offset = self.vsync_offset.wrapping_sub(1);
                }
            } else {
                i += 1;
                self.vsync_offset = self.vsync_offset.wrapping_sub(1);
            }

            self.databits -= WORD_BITS;
            self.isodd = !self.isodd;
        }

        if self.databits == 0 {
            if self.pair && self.isodd {
                // Skip the unused second slot of the final set.
                i += 1;
                self.vsync_offset = self.vsync_offset.wrapping_sub(1);
            }
            let bytes = self.data_pos;
            sink.burst(&self.data[..bytes], self.sadm);
            self.data_pos = 0;
            self.isodd = false;
            self.phase = Phase::Padding;
        }
        i
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneBurst {
        payload: Vec<u8>,
        block_samples: usize,
        served: bool,
    }

    impl PayloadSource for OneBurst {
        fn next_block(&mut self, payload: &mut Vec<u8>) -> Option<NextBlock> {
            if self.served {
                return None;
            }
            self.served = true;
            payload.extend_from_slice(&self.payload);
            Some(NextBlock {
                bits: self.payload.len() * 8,
                block_samples: self.block_samples,
            })
        }
    }

    #[derive(Default)]
    struct Collect {
        bursts: Vec<(Vec<u8>, bool)>,
    }

    impl PayloadSink for Collect {
        fn burst(&mut self, payload: &[u8], sadm: bool) {
            self.bursts.push((payload.to_vec(), sadm));
        }
    }

    fn wrap_one(payload: &[u8], pair: bool, stride: usize) -> Vec<u32> {
        let mut framer = Smpte337m::new(stride, 0, pair, false, false);
        let mut source = OneBurst {
            payload: payload.to_vec(),
            block_samples: BLOCK_SIZE - GUARDBAND,
            served: false,
        };
        let mut pcm = vec![0u32; 1920 * stride];
        framer.restart_frame(0, &mut source);
        framer.wrap(&mut source, &mut pcm);
        pcm
    }

    #[test]
    fn guardband_then_preambles_pair() {
        let payload: Vec<u8> = (0u8..60).collect();
        let pcm = wrap_one(&payload, true, 2);

        for sample in &pcm[..GUARDBAND * 2] {
            assert_eq!(*sample, 0);
        }
        assert_eq!(pcm[GUARDBAND * 2], PA);
        assert_eq!(pcm[GUARDBAND * 2 + 1], PB);
        assert_eq!(pcm[GUARDBAND * 2 + 2], PC_PMD | PC_KEY_FLAG);
        assert_eq!(pcm[GUARDBAND * 2 + 3] >> 12, (payload.len() * 8) as u32);
    }

    #[test]
    fn wrap_unwrap_round_trip_pair_and_single() {
        for (pair, stride) in [(true, 2), (false, 1), (true, 8)] {
            let payload: Vec<u8> = (0u8..=254).map(|b| b.wrapping_mul(37)).collect();
            let pcm = wrap_one(&payload, pair, stride);

            let mut reader = Smpte337m::new(stride, 0, pair, false, false);
            reader.set_read_capacity(1024);
            reader.restart_scan(0);
            let mut sink = Collect::default();
            reader.unwrap(&mut sink, &pcm);

            assert_eq!(sink.bursts.len(), 1, "pair={pair} stride={stride}");
            let (bytes, sadm) = &sink.bursts[0];
            assert!(!sadm);
            assert_eq!(&bytes[..payload.len()], &payload[..]);
        }
    }

    #[test]
    fn pc_classification() {
        // An S-ADM Pc with extra header bits set still classifies by
        // the data-type mask; a PMD Pc expects the data body directly.
        let sadm_pc = 0x5F1F_0000 | 0x0100_0000;
        assert_eq!(sadm_pc & PC_MASK, PC_SADM & PC_MASK);
        assert!(sadm_pc & SADM_PC_FF != 0);
        assert!(sadm_pc & SADM_PC_AI != 0);
        assert!(sadm_pc & SADM_PC_CMF != 0);

        let pmd_pc = 0x003B_0000 | 0x0100_0000;
        assert_eq!(pmd_pc & PC_MASK, PC_PMD);
        assert_ne!(pmd_pc & PC_MASK, PC_SADM & PC_MASK);

        let mut reader = Smpte337m::new(2, 0, true, false, false);
        reader.set_read_capacity(64);
        reader.restart_scan(0);

        let mut pcm = vec![0u32; 16 * 2];
        pcm[0] = PA;
        pcm[1] = PB;
        pcm[2] = sadm_pc;
        pcm[3] = (24 * 8 + 80) << 12;
        pcm[4] = PE_SADM;
        pcm[5] = PF_SADM;
        let mut sink = Collect::default();
        reader.unwrap(&mut sink, &pcm);
        // Pe/Pf and the assemble/format words were consumed and the
        // (all-zero) body was delivered as an S-ADM burst.
        assert_eq!(sink.bursts.len(), 1);
        assert!(sink.bursts[0].1);
        assert!(reader.sadm);
    }

    #[test]
    fn null_burst_is_no_burst() {
        let mut writer = Smpte337m::new(2, 0, true, true, false);
        struct Empty;
        impl PayloadSource for Empty {
            fn next_block(&mut self, _payload: &mut Vec<u8>) -> Option<NextBlock> {
                Some(NextBlock {
                    bits: 0,
                    block_samples: BLOCK_SIZE - GUARDBAND,
                })
            }
        }
        let mut source = Empty;
        let mut pcm = vec![0u32; 320 * 2];
        writer.restart_frame(0, &mut source);
        writer.wrap(&mut source, &mut pcm);

        assert_eq!(pcm[GUARDBAND * 2], PA);
        assert_eq!(pcm[GUARDBAND * 2 + 2], PC_NULL);

        let mut reader = Smpte337m::new(2, 0, true, false, false);
        reader.set_read_capacity(64);
        reader.restart_scan(0);
        let mut sink = Collect::default();
        reader.unwrap(&mut sink, &pcm);
        assert!(sink.bursts.is_empty());
    }

    #[test]
    fn oversized_pd_drops_to_pa_scan() {
        let payload: Vec<u8> = (0u8..40).collect();
        let mut pcm = wrap_one(&payload, true, 2);
        // Declare more databits than fit in a block.
        pcm[GUARDBAND * 2 + 3] = (200_000u32) << 12;

        let mut reader = Smpte337m::new(2, 0, true, false, false);
        reader.set_read_capacity(100_000);
        reader.restart_scan(0);
        let mut sink = Collect::default();
        reader.unwrap(&mut sink, &pcm);
        assert!(sink.bursts.is_empty());
    }
}
