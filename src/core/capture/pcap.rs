//! pcap / pcapng input and minimal pcap output.

use std::io::{self, Cursor, Write};

use pcap_parser::pcapng::Block;
use pcap_parser::{create_reader, LegacyPcapBlock, Linktype, PcapBlockOwned, PcapError, PcapHeader, ToVec};
use tracing::debug;

use super::frame::LINKTYPE_IEEE802_11;
use crate::error::CaptureError;

const READ_BUFFER: usize = 65536;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub sec: u32,
    pub usec: u32,
}

impl Timestamp {
    fn from_micros(micros: u64) -> Self {
        Self {
            sec: (micros / 1_000_000) as u32,
            usec: (micros % 1_000_000) as u32,
        }
    }
}

/// One packet handed out by [`read_packets`].
#[derive(Debug, Clone, Copy)]
pub struct RawPacket<'a> {
    pub linktype: i32,
    pub ts: Timestamp,
    pub data: &'a [u8],
}

/// Walk every packet of a pcap or pcapng capture.
///
/// Returns whether the input ended in a truncated block.
pub fn read_packets<F>(bytes: &[u8], mut on_packet: F) -> Result<bool, CaptureError>
where
    F: FnMut(RawPacket<'_>),
{
    let mut reader = create_reader(READ_BUFFER, Cursor::new(bytes))
        .map_err(|e| CaptureError::Format(format!("not a pcap or pcapng file: {:?}", e)))?;

    let mut legacy_linktype = LINKTYPE_IEEE802_11;
    let mut interfaces: Vec<i32> = Vec::new();
    let mut stalled = false;
    let mut blocks = 0u64;

    loop {
        match reader.next() {
            Ok((offset, block)) => {
                stalled = false;
                blocks += 1;
                match block {
                    PcapBlockOwned::LegacyHeader(header) => legacy_linktype = header.network.0,
                    PcapBlockOwned::Legacy(packet) => on_packet(RawPacket {
                        linktype: legacy_linktype,
                        ts: Timestamp {
                            sec: packet.ts_sec,
                            usec: packet.ts_usec,
                        },
                        data: packet.data,
                    }),
                    PcapBlockOwned::NG(Block::SectionHeader(_)) => interfaces.clear(),
                    PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                        interfaces.push(idb.linktype.0)
                    }
                    PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                        let caplen = (epb.caplen as usize).min(epb.data.len());
                        match interfaces.get(epb.if_id as usize) {
                            Some(&linktype) => on_packet(RawPacket {
                                linktype,
                                ts: Timestamp::from_micros(
                                    ((epb.ts_high as u64) << 32) | epb.ts_low as u64,
                                ),
                                data: &epb.data[..caplen],
                            }),
                            None => debug!(if_id = epb.if_id, "packet for unknown interface"),
                        }
                    }
                    PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                        if let Some(&linktype) = interfaces.first() {
                            let len = (spb.origlen as usize).min(spb.data.len());
                            on_packet(RawPacket {
                                linktype,
                                ts: Timestamp::default(),
                                data: &spb.data[..len],
                            });
                        }
                    }
                    PcapBlockOwned::NG(_) => {}
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => return Ok(false),
            Err(PcapError::Incomplete(_)) => {
                if stalled {
                    return Ok(true);
                }
                stalled = true;
                reader
                    .refill()
                    .map_err(|e| CaptureError::Format(format!("read failed: {:?}", e)))?;
            }
            // a damaged tail keeps everything read before it
            Err(e) if blocks > 0 => {
                debug!(error = ?e, "capture ends in an unreadable block");
                return Ok(true);
            }
            Err(e) => return Err(CaptureError::Format(format!("{:?}", e))),
        }
    }
}

/// Writes a legacy pcap holding raw 802.11 frames.
pub struct PcapWriter<W: Write> {
    out: W,
}

fn serialize<T: ToVec>(mut item: T) -> io::Result<Vec<u8>> {
    item.to_vec()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("pcap serialization failed: {:?}", e)))
}

impl<W: Write> PcapWriter<W> {
    pub fn new(mut out: W) -> io::Result<Self> {
        let header = PcapHeader {
            magic_number: 0xa1b2_c3d4,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: 65535,
            network: Linktype(super::frame::LINKTYPE_IEEE802_11),
        };
        out.write_all(&serialize(header)?)?;
        Ok(Self { out })
    }

    pub fn write(&mut self, ts: Timestamp, frame: &[u8]) -> io::Result<()> {
        let len = frame.len() as u32;
        let block = LegacyPcapBlock {
            ts_sec: ts.sec,
            ts_usec: ts.usec,
            caplen: len,
            origlen: len,
            data: frame,
        };
        self.out.write_all(&serialize(block)?)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(frames: &[&[u8]]) -> Vec<u8> {
        let mut w = PcapWriter::new(Vec::new()).unwrap();
        for (i, f) in frames.iter().enumerate() {
            w.write(Timestamp { sec: i as u32, usec: 0 }, f).unwrap();
        }
        w.into_inner()
    }

    #[test]
    fn test_writer_output_is_readable() {
        let bytes = capture(&[b"first frame", b"second"]);
        let mut seen = Vec::new();
        let truncated = read_packets(&bytes, |p| seen.push((p.linktype, p.ts.sec, p.data.to_vec()))).unwrap();
        assert!(!truncated);
        assert_eq!(
            seen,
            vec![
                (105, 0, b"first frame".to_vec()),
                (105, 1, b"second".to_vec())
            ]
        );
    }

    #[test]
    fn test_writer_emits_classic_header() {
        let bytes = capture(&[b"frame"]);
        assert_eq!(&bytes[..4], &0xa1b2_c3d4u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &(LINKTYPE_IEEE802_11 as u32).to_le_bytes());
        // 24-byte file header, 16-byte record header, payload
        assert_eq!(bytes.len(), 24 + 16 + 5);
        assert_eq!(&bytes[32..36], &5u32.to_le_bytes());
    }

    #[test]
    fn test_truncated_capture() {
        let bytes = capture(&[b"first frame", b"second frame"]);
        let cut = &bytes[..bytes.len() - 4];
        let mut count = 0;
        let truncated = read_packets(cut, |_| count += 1).unwrap();
        assert!(truncated);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_garbage_rejected() {
        let err = read_packets(b"definitely not a capture file", |_| {}).unwrap_err();
        assert!(matches!(err, CaptureError::Format(_)));
    }
}
