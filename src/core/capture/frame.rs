//! Link-layer and 802.11 frame decoding.
//!
//! Everything here works on borrowed packet bytes and returns `None` or an
//! [`Anomaly`] instead of failing; the state machine decides what to count.

use crate::handshake::{MIC_LEN, MIC_OFFSET};
use crate::model::{Essid, MacAddr, MAX_ESSID_LEN};

pub const LINKTYPE_IEEE802_11: i32 = 105;
pub const LINKTYPE_PRISM: i32 = 119;
pub const LINKTYPE_RADIOTAP: i32 = 127;
pub const LINKTYPE_PPI: i32 = 192;

/// LLC/SNAP header announcing an 802.1X (EAPOL) payload.
const LLC_EAPOL: [u8; 8] = [0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8E];

/// Shortest EAPOL-Key frame: header, descriptor body, key data length.
const EAPOL_KEY_MIN: usize = 99;

const KEY_INFO_PAIRWISE: u16 = 0x0008;
const KEY_INFO_INSTALL: u16 = 0x0040;
const KEY_INFO_ACK: u16 = 0x0080;
const KEY_INFO_MIC: u16 = 0x0100;
const KEY_INFO_SECURE: u16 = 0x0200;

/// Why a packet was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// Shorter than its own headers claim
    Truncated,
    /// Headers present but inconsistent
    Malformed,
}

/// Strip the capture's link-layer header, leaving the 802.11 frame.
///
/// Returns `Ok(None)` for link types this parser does not understand.
pub fn strip_link_layer(linktype: i32, data: &[u8]) -> Result<Option<&[u8]>, Anomaly> {
    match linktype {
        LINKTYPE_IEEE802_11 => Ok(Some(data)),
        LINKTYPE_RADIOTAP => strip_radiotap(data).map(Some),
        LINKTYPE_PRISM => {
            let len = read_u32_le(data, 4).ok_or(Anomaly::Truncated)? as usize;
            data.get(len..).map(Some).ok_or(Anomaly::Truncated)
        }
        LINKTYPE_PPI => {
            let len = read_u16_le(data, 2).ok_or(Anomaly::Truncated)? as usize;
            let dlt = read_u32_le(data, 4).ok_or(Anomaly::Truncated)?;
            if dlt as i32 != LINKTYPE_IEEE802_11 {
                return Ok(None);
            }
            data.get(len..).map(Some).ok_or(Anomaly::Truncated)
        }
        _ => Ok(None),
    }
}

fn strip_radiotap(data: &[u8]) -> Result<&[u8], Anomaly> {
    if data.len() < 8 {
        return Err(Anomaly::Truncated);
    }
    if data[0] != 0 {
        return Err(Anomaly::Malformed);
    }
    let len = read_u16_le(data, 2).ok_or(Anomaly::Truncated)? as usize;
    if len < 8 || data.len() < len {
        return Err(Anomaly::Truncated);
    }

    // Walk the present bitmaps to find the Flags field, which tells whether
    // the frame carries a trailing FCS.
    let present = read_u32_le(data, 4).ok_or(Anomaly::Truncated)?;
    let mut offset = 8;
    let mut word = present;
    while word & 0x8000_0000 != 0 {
        word = read_u32_le(data, offset).ok_or(Anomaly::Truncated)?;
        offset += 4;
    }
    let mut has_fcs = false;
    if present & 0x1 != 0 {
        // TSFT: 8 bytes, 8-byte aligned
        offset = offset.next_multiple_of(8) + 8;
    }
    if present & 0x2 != 0 {
        let flags = *data.get(offset).ok_or(Anomaly::Truncated)?;
        has_fcs = flags & 0x10 != 0;
    }

    let frame = &data[len..];
    if has_fcs {
        let end = frame.len().checked_sub(4).ok_or(Anomaly::Truncated)?;
        Ok(&frame[..end])
    } else {
        Ok(frame)
    }
}

fn read_u16_le(data: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes(data.get(at..at + 2)?.try_into().ok()?))
}

fn read_u32_le(data: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(data.get(at..at + 4)?.try_into().ok()?))
}

fn mac_at(data: &[u8], at: usize) -> Option<MacAddr> {
    let bytes: [u8; 6] = data.get(at..at + 6)?.try_into().ok()?;
    Some(MacAddr(bytes))
}

/// What one 802.11 frame contributes to handshake reconstruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dot11 {
    /// Beacon, probe response or (re)association request naming an ESSID
    Essid { bssid: MacAddr, essid: Essid },
    /// EAPOL-Key frame between an AP and a station
    Key {
        ap: MacAddr,
        station: MacAddr,
        key: EapolKey,
    },
}

/// Position of an EAPOL-Key frame in the 4-way handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Message {
    M1 = 1,
    M2 = 2,
    M3 = 3,
    M4 = 4,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapolKey {
    pub message: Message,
    pub key_version: u8,
    pub replay_counter: u64,
    pub nonce: [u8; 32],
    pub mic: [u8; MIC_LEN],
    /// The EAPOL frame exactly as sent, trimmed to its declared length
    pub frame: Vec<u8>,
}

impl EapolKey {
    pub fn has_nonce(&self) -> bool {
        self.nonce.iter().any(|&b| b != 0)
    }
}

/// Decode one 802.11 frame. `Ok(None)` means nothing of interest.
pub fn parse_dot11(frame: &[u8]) -> Result<Option<Dot11>, Anomaly> {
    if frame.len() < 24 {
        return Err(Anomaly::Truncated);
    }
    let fc0 = frame[0];
    let fc1 = frame[1];
    let frame_type = (fc0 >> 2) & 0x3;
    let subtype = fc0 >> 4;

    match frame_type {
        0 => Ok(parse_management(frame, subtype)),
        2 => parse_data(frame, subtype, fc1),
        _ => Ok(None),
    }
}

fn parse_management(frame: &[u8], subtype: u8) -> Option<Dot11> {
    // Offset of the tagged parameters for each management subtype
    let ies_at = match subtype {
        // association request: capability + listen interval
        0 => 28,
        // reassociation request: capability + listen interval + current AP
        2 => 34,
        // probe response and beacon: timestamp + interval + capability
        5 | 8 => 36,
        _ => return None,
    };
    let bssid = mac_at(frame, 16)?;
    let essid = find_ssid(frame.get(ies_at..)?)?;
    Some(Dot11::Essid { bssid, essid })
}

/// The SSID element, unless hidden (empty or all zero bytes).
fn find_ssid(mut ies: &[u8]) -> Option<Essid> {
    while ies.len() >= 2 {
        let (id, len) = (ies[0], ies[1] as usize);
        let body = ies.get(2..2 + len)?;
        if id == 0 {
            if len == 0 || len > MAX_ESSID_LEN || body.iter().all(|&b| b == 0) {
                return None;
            }
            return Essid::new(body.to_vec()).ok();
        }
        ies = &ies[2 + len..];
    }
    None
}

fn parse_data(frame: &[u8], subtype: u8, flags: u8) -> Result<Option<Dot11>, Anomaly> {
    // Null-function frames carry nothing
    if subtype & 0x4 != 0 {
        return Ok(None);
    }
    // Protected payloads cannot be EAPOL-Key in the clear
    if flags & 0x40 != 0 {
        return Ok(None);
    }

    let to_ds = flags & 0x01 != 0;
    let from_ds = flags & 0x02 != 0;
    let (Some(a1), Some(a2), Some(a3)) = (mac_at(frame, 4), mac_at(frame, 10), mac_at(frame, 16))
    else {
        return Err(Anomaly::Truncated);
    };

    let (ap, station) = match (to_ds, from_ds) {
        (true, false) => (a1, a2),
        (false, true) => (a2, a1),
        (false, false) => {
            if a3 == a1 {
                (a1, a2)
            } else {
                (a2, a1)
            }
        }
        // WDS links between APs are not handshakes with stations
        (true, true) => return Ok(None),
    };

    let mut header_len = 24;
    if to_ds && from_ds {
        header_len += 6;
    }
    if subtype & 0x8 != 0 {
        header_len += 2;
    }

    let Some(llc) = frame.get(header_len..header_len + LLC_EAPOL.len()) else {
        return Ok(None);
    };
    if llc != LLC_EAPOL {
        return Ok(None);
    }

    let eapol = &frame[header_len + LLC_EAPOL.len()..];
    Ok(parse_eapol_key(eapol)?.map(|key| Dot11::Key { ap, station, key }))
}

/// Decode an EAPOL-Key frame of the pairwise handshake.
pub fn parse_eapol_key(eapol: &[u8]) -> Result<Option<EapolKey>, Anomaly> {
    if eapol.len() < 4 {
        return Err(Anomaly::Truncated);
    }
    // Packet type 3 is EAPOL-Key; others (start, logoff, EAP) are skipped
    if eapol[1] != 3 {
        return Ok(None);
    }
    let body_len = u16::from_be_bytes([eapol[2], eapol[3]]) as usize;
    let total = 4 + body_len;
    if total < EAPOL_KEY_MIN {
        return Err(Anomaly::Malformed);
    }
    let Some(frame) = eapol.get(..total) else {
        return Err(Anomaly::Truncated);
    };

    let key_info = u16::from_be_bytes([frame[5], frame[6]]);
    if key_info & KEY_INFO_PAIRWISE == 0 {
        // group key handshake
        return Ok(None);
    }
    let key_version = (key_info & 0x07) as u8;
    if !(1..=3).contains(&key_version) {
        return Err(Anomaly::Malformed);
    }

    let ack = key_info & KEY_INFO_ACK != 0;
    let mic = key_info & KEY_INFO_MIC != 0;
    let install = key_info & KEY_INFO_INSTALL != 0;
    let secure = key_info & KEY_INFO_SECURE != 0;
    let key_data_len = u16::from_be_bytes([frame[97], frame[98]]) as usize;

    let message = match (ack, mic) {
        (true, false) => Message::M1,
        (true, true) if install => Message::M3,
        (true, true) => return Err(Anomaly::Malformed),
        // M2 carries the station's RSN/WPA element; M4 carries nothing
        (false, true) if !secure && key_data_len > 0 => Message::M2,
        (false, true) => Message::M4,
        (false, false) => return Err(Anomaly::Malformed),
    };

    let replay_counter = u64::from_be_bytes(frame[9..17].try_into().map_err(|_| Anomaly::Malformed)?);
    let nonce: [u8; 32] = frame[17..49].try_into().map_err(|_| Anomaly::Malformed)?;
    let mic_bytes: [u8; MIC_LEN] = frame[MIC_OFFSET..MIC_OFFSET + MIC_LEN]
        .try_into()
        .map_err(|_| Anomaly::Malformed)?;

    Ok(Some(EapolKey {
        message,
        key_version,
        replay_counter,
        nonce,
        mic: mic_bytes,
        frame: frame.to_vec(),
    }))
}
