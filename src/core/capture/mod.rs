/*!
 * Capture parsing and handshake reconstruction
 *
 * Every (AP, station) pair runs a small state machine:
 *
 * ```text
 * NoData --(EAPOL-Key with nonce)--> HalfHandshake --(matching frame)--> Complete
 * ```
 *
 * A frame completes the handshake only when it pairs with a stored frame
 * of the same exchange:
 * - M1 + M2 with equal replay counters
 * - M2 + M3 where M3's counter is M2's plus one (and M3's ANonce matches
 *   any M1 seen for that exchange)
 * - M3 + M4 with equal counters and a non-zero SNonce in M4
 *
 * Once complete the handshake never changes. ESSIDs are learned from
 * beacons, probe responses and association requests, in any order
 * relative to the EAPOL frames.
 */

mod frame;
mod pcap;

pub use frame::{
    Anomaly, LINKTYPE_IEEE802_11, LINKTYPE_PPI, LINKTYPE_PRISM, LINKTYPE_RADIOTAP,
};
pub use pcap::{PcapWriter, Timestamp};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CaptureError, Result};
use crate::handshake::{zero_mic, Handshake, Pairing};
use crate::model::{Essid, MacAddr};
use frame::{Dot11, EapolKey, Message};

/// Frames remembered per message type while waiting for a partner.
const MAX_PENDING: usize = 8;

/// (AP MAC, station MAC)
pub type StationKey = (MacAddr, MacAddr);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeState {
    NoData,
    HalfHandshake,
    Complete,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandshakeState::NoData => "no data",
            HandshakeState::HalfHandshake => "half handshake",
            HandshakeState::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Packet counters of one parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub packets: u64,
    pub eapol_frames: u64,
    pub unsupported_link: u64,
    pub truncated: u64,
    pub malformed: u64,
}

impl CaptureStats {
    pub fn anomalies(&self) -> u64 {
        self.truncated + self.malformed
    }

    fn count(&mut self, anomaly: Anomaly) {
        match anomaly {
            Anomaly::Truncated => self.truncated += 1,
            Anomaly::Malformed => self.malformed += 1,
        }
    }
}

/// A frame kept for pairing, with what `strip_capture` needs to re-emit it.
#[derive(Debug, Clone)]
struct SeenKey {
    key: EapolKey,
    ts: Timestamp,
    dot11: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Completion {
    pairing: Pairing,
    anonce: [u8; 32],
    snonce: [u8; 32],
    /// The MIC-bearing frame
    mic_frame: EapolKey,
    replay_counter: u64,
    frames: [(Timestamp, Vec<u8>); 2],
}

#[derive(Debug, Clone, Default)]
struct Station {
    pending: BTreeMap<Message, Vec<SeenKey>>,
    completion: Option<Completion>,
}

impl Station {
    fn state(&self) -> HandshakeState {
        if self.completion.is_some() {
            HandshakeState::Complete
        } else if self.pending.values().any(|v| !v.is_empty()) {
            HandshakeState::HalfHandshake
        } else {
            HandshakeState::NoData
        }
    }

    fn stored(&self, message: Message) -> &[SeenKey] {
        self.pending.get(&message).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Feed one EAPOL-Key frame; returns true when it completed the pair.
    fn offer(&mut self, seen: SeenKey) -> bool {
        if self.completion.is_some() {
            return false;
        }
        let completion = match seen.key.message {
            Message::M1 => self.stored(Message::M2).iter().find_map(|m2| challenge(&seen, m2)),
            Message::M2 => self
                .stored(Message::M1)
                .iter()
                .find_map(|m1| challenge(m1, &seen))
                .or_else(|| {
                    self.stored(Message::M3)
                        .iter()
                        .find_map(|m3| self.authorized(&seen, m3))
                }),
            Message::M3 => self
                .stored(Message::M2)
                .iter()
                .find_map(|m2| self.authorized(m2, &seen))
                .or_else(|| self.stored(Message::M4).iter().find_map(|m4| installed(&seen, m4))),
            Message::M4 => self.stored(Message::M3).iter().find_map(|m3| installed(m3, &seen)),
        };

        match completion {
            Some(c) => {
                self.completion = Some(c);
                self.pending.clear();
                true
            }
            None => {
                // nonce-less M4s (WPA2) can never pair; they carry no
                // material worth keeping
                if seen.key.message != Message::M4 || seen.key.has_nonce() {
                    let slot = self.pending.entry(seen.key.message).or_default();
                    if slot.len() == MAX_PENDING {
                        slot.remove(0);
                    }
                    slot.push(seen);
                }
                false
            }
        }
    }

    fn authorized(&self, m2: &SeenKey, m3: &SeenKey) -> Option<Completion> {
        if m3.key.replay_counter != m2.key.replay_counter.wrapping_add(1) {
            return None;
        }
        let conflicting_m1 = self.stored(Message::M1).iter().any(|m1| {
            m1.key.replay_counter == m2.key.replay_counter && m1.key.nonce != m3.key.nonce
        });
        if conflicting_m1 {
            return None;
        }
        Some(complete(Pairing::Authorized, m3.key.nonce, m2, m3, m2))
    }
}

fn challenge(m1: &SeenKey, m2: &SeenKey) -> Option<Completion> {
    if m1.key.replay_counter != m2.key.replay_counter {
        return None;
    }
    Some(complete(Pairing::Challenge, m1.key.nonce, m2, m1, m2))
}

fn installed(m3: &SeenKey, m4: &SeenKey) -> Option<Completion> {
    if m3.key.replay_counter != m4.key.replay_counter || !m4.key.has_nonce() {
        return None;
    }
    Some(complete(Pairing::Installed, m3.key.nonce, m4, m3, m4))
}

/// `station_side` supplies SNonce and MIC; frames are emitted in message order.
fn complete(
    pairing: Pairing,
    anonce: [u8; 32],
    station_side: &SeenKey,
    a: &SeenKey,
    b: &SeenKey,
) -> Completion {
    let (first, second) = if a.key.message <= b.key.message { (a, b) } else { (b, a) };
    Completion {
        pairing,
        anonce,
        snonce: station_side.key.nonce,
        mic_frame: station_side.key.clone(),
        replay_counter: station_side.key.replay_counter,
        frames: [
            (first.ts, first.dot11.clone()),
            (second.ts, second.dot11.clone()),
        ],
    }
}

#[derive(Debug, Clone)]
struct AccessPoint {
    essid: Essid,
    ts: Timestamp,
    /// Beacon or probe response that named it
    dot11: Vec<u8>,
}

/// Everything learned from one capture.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    aps: BTreeMap<MacAddr, AccessPoint>,
    stations: BTreeMap<StationKey, Station>,
    stats: CaptureStats,
}

impl Capture {
    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Every (AP, station) pair that sent at least one EAPOL-Key frame.
    pub fn pairs(&self) -> impl Iterator<Item = StationKey> + '_ {
        self.stations.keys().copied()
    }

    /// Access points with a known ESSID.
    pub fn access_points(&self) -> impl Iterator<Item = (MacAddr, &Essid)> + '_ {
        self.aps.iter().map(|(mac, ap)| (*mac, &ap.essid))
    }

    pub fn essid_of(&self, ap: MacAddr) -> Option<&Essid> {
        self.aps.get(&ap).map(|ap| &ap.essid)
    }

    pub fn state(&self, pair: StationKey) -> HandshakeState {
        self.stations
            .get(&pair)
            .map(Station::state)
            .unwrap_or(HandshakeState::NoData)
    }

    pub fn is_completed(&self, pair: StationKey) -> bool {
        self.state(pair) == HandshakeState::Complete
    }

    /// The handshake of a completed pair, labelled with its AP's ESSID.
    pub fn handshake(&self, pair: StationKey) -> Result<Handshake, CaptureError> {
        let (ap, station) = pair;
        let completion = self
            .stations
            .get(&pair)
            .and_then(|s| s.completion.as_ref())
            .ok_or_else(|| CaptureError::Incomplete {
                ap: ap.to_string(),
                station: station.to_string(),
            })?;
        let essid = self
            .essid_of(ap)
            .ok_or_else(|| CaptureError::EssidUnknown(ap.to_string()))?;

        let mut eapol_frame = completion.mic_frame.frame.clone();
        zero_mic(&mut eapol_frame);
        Ok(Handshake {
            essid: essid.clone(),
            ap_mac: ap,
            station_mac: station,
            anonce: completion.anonce,
            snonce: completion.snonce,
            mic: completion.mic_frame.mic,
            eapol_frame,
            key_version: completion.mic_frame.key_version,
            replay_counter: completion.replay_counter,
            pairing: completion.pairing,
        })
    }

    /// All completed handshakes whose ESSID is known, best pairing first
    /// within each AP.
    pub fn handshakes(&self) -> Vec<Handshake> {
        let mut out: Vec<Handshake> = self
            .stations
            .keys()
            .filter_map(|&pair| self.handshake(pair).ok())
            .collect();
        out.sort_by(|a, b| {
            a.ap_mac
                .cmp(&b.ap_mac)
                .then(b.pairing.rank().cmp(&a.pairing.rank()))
                .then(a.station_mac.cmp(&b.station_mac))
        });
        out
    }

    /// Name every access point the capture saw EAPOL traffic for but no
    /// beacon or probe response. Already named APs keep their ESSID.
    pub fn assume_essid(&mut self, essid: &Essid) {
        let unnamed: Vec<MacAddr> = self
            .stations
            .keys()
            .map(|(ap, _)| *ap)
            .filter(|ap| !self.aps.contains_key(ap))
            .collect();
        for ap in unnamed {
            self.aps.entry(ap).or_insert_with(|| AccessPoint {
                essid: essid.clone(),
                ts: Timestamp::default(),
                dot11: Vec::new(),
            });
        }
    }

    /// Best handshake for one AP, or for the only AP with one.
    pub fn best_handshake(&self, ap: Option<MacAddr>) -> Result<Handshake, CaptureError> {
        let candidates = self.handshakes();
        let mut matching = candidates
            .into_iter()
            .filter(|hs| ap.map_or(true, |ap| hs.ap_mac == ap));
        let first = matching.next().ok_or_else(|| {
            CaptureError::Format(match ap {
                Some(ap) => format!("no complete handshake for {}", ap),
                None => "no complete handshake in capture".into(),
            })
        })?;
        if ap.is_none() && matching.any(|hs| hs.ap_mac != first.ap_mac) {
            return Err(CaptureError::Format(
                "capture holds handshakes for several access points; pick one".into(),
            ));
        }
        Ok(first)
    }
}

/// Incremental parser: feed packets as they are read.
#[derive(Debug, Default)]
pub struct CaptureParser {
    capture: Capture,
    unsupported_linktype: Option<i32>,
}

impl CaptureParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet captured on `linktype`.
    pub fn feed(&mut self, linktype: i32, packet: &[u8]) {
        self.feed_at(linktype, Timestamp::default(), packet);
    }

    pub fn feed_at(&mut self, linktype: i32, ts: Timestamp, packet: &[u8]) {
        let stats = &mut self.capture.stats;
        stats.packets += 1;

        let dot11 = match frame::strip_link_layer(linktype, packet) {
            Ok(Some(dot11)) => dot11,
            Ok(None) => {
                stats.unsupported_link += 1;
                self.unsupported_linktype = Some(linktype);
                return;
            }
            Err(anomaly) => {
                stats.count(anomaly);
                return;
            }
        };

        match frame::parse_dot11(dot11) {
            Ok(None) => {}
            Err(anomaly) => stats.count(anomaly),
            Ok(Some(Dot11::Essid { bssid, essid })) => {
                self.capture.aps.entry(bssid).or_insert_with(|| {
                    debug!(ap = %bssid, essid = %essid, "access point named");
                    AccessPoint {
                        essid,
                        ts,
                        dot11: dot11.to_vec(),
                    }
                });
            }
            Ok(Some(Dot11::Key { ap, station, key })) => {
                stats.eapol_frames += 1;
                let message = key.message;
                let entry = self.capture.stations.entry((ap, station)).or_default();
                let seen = SeenKey {
                    key,
                    ts,
                    dot11: dot11.to_vec(),
                };
                if entry.offer(seen) {
                    debug!(%ap, %station, ?message, "handshake complete");
                }
            }
        }
    }

    /// Count a packet lost to a truncated capture file.
    pub fn note_truncated(&mut self) {
        self.capture.stats.truncated += 1;
    }

    pub fn capture(&self) -> &Capture {
        &self.capture
    }

    pub fn finish(self) -> Capture {
        self.capture
    }
}

/// Parse a whole pcap or pcapng capture.
pub fn parse(bytes: &[u8]) -> Result<Capture, CaptureError> {
    let mut parser = CaptureParser::new();
    let truncated = pcap::read_packets(bytes, |p| parser.feed_at(p.linktype, p.ts, p.data))?;
    if truncated {
        parser.note_truncated();
    }

    let unsupported = parser.unsupported_linktype;
    let capture = parser.finish();
    let stats = capture.stats();
    if stats.anomalies() > 0 {
        warn!(
            truncated = stats.truncated,
            malformed = stats.malformed,
            "discarded malformed packets"
        );
    }
    if let Some(linktype) = unsupported {
        if stats.unsupported_link == stats.packets {
            return Err(CaptureError::LinkType(linktype));
        }
    }
    info!(
        packets = stats.packets,
        eapol = stats.eapol_frames,
        aps = capture.aps.len(),
        stations = capture.stations.len(),
        "capture parsed"
    );
    Ok(capture)
}

/// Summary of one (AP, station) pair.
#[derive(Debug, Clone, Serialize)]
pub struct StationSummary {
    pub ap: MacAddr,
    pub station: MacAddr,
    pub essid: Option<Essid>,
    pub state: HandshakeState,
    pub pairing: Option<Pairing>,
    pub key_version: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub access_points: Vec<(MacAddr, Option<Essid>)>,
    pub stations: Vec<StationSummary>,
    pub stats: CaptureStats,
}

impl Analysis {
    pub fn completed(&self) -> usize {
        self.stations
            .iter()
            .filter(|s| s.state == HandshakeState::Complete)
            .count()
    }
}

/// Per-pair summaries of a capture.
pub fn analyze(bytes: &[u8]) -> Result<Analysis> {
    let capture = parse(bytes)?;

    let mut aps: BTreeSet<MacAddr> = capture.aps.keys().copied().collect();
    aps.extend(capture.stations.keys().map(|(ap, _)| *ap));

    let stations = capture
        .stations
        .iter()
        .map(|(&(ap, station), s)| StationSummary {
            ap,
            station,
            essid: capture.essid_of(ap).cloned(),
            state: s.state(),
            pairing: s.completion.as_ref().map(|c| c.pairing),
            key_version: s.completion.as_ref().map(|c| c.mic_frame.key_version),
        })
        .collect();

    Ok(Analysis {
        access_points: aps
            .into_iter()
            .map(|ap| (ap, capture.essid_of(ap).cloned()))
            .collect(),
        stations,
        stats: capture.stats,
    })
}

/// A pcap holding only what the completed handshakes need: one frame
/// naming each AP and the two frames of each completed pair.
pub fn strip_capture(bytes: &[u8]) -> Result<Vec<u8>> {
    let capture = parse(bytes)?;
    let mut writer = PcapWriter::new(Vec::new())?;
    let mut kept = 0usize;

    for (mac, ap) in &capture.aps {
        let completed: Vec<&Completion> = capture
            .stations
            .range((*mac, MacAddr([0; 6]))..=(*mac, MacAddr::BROADCAST))
            .filter_map(|(_, s)| s.completion.as_ref())
            .collect();
        if completed.is_empty() {
            continue;
        }
        if !ap.dot11.is_empty() {
            writer.write(ap.ts, &ap.dot11)?;
        }
        for completion in completed {
            for (ts, frame) in &completion.frames {
                writer.write(*ts, frame)?;
            }
            kept += 1;
        }
    }

    info!(handshakes = kept, "capture stripped");
    Ok(writer.into_inner())
}
