/*!
 * WPA/WPA2 4-way handshake
 *
 * A completed handshake carries everything needed to test a PMK offline:
 * - ESSID (the PBKDF2 salt) and both MAC addresses
 * - ANonce and SNonce
 * - the MIC-bearing EAPOL frame (MIC field zeroed) and the MIC itself
 *
 * Handshakes are produced by the capture parser and can be saved to and
 * loaded from JSON so an attack can run without the original capture.
 */

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Essid, MacAddr, Mic};

/// Offset of the 16-byte MIC inside an EAPOL-Key frame.
pub const MIC_OFFSET: usize = 81;
pub const MIC_LEN: usize = 16;

/// Which two messages of the exchange produced the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pairing {
    /// Message 1 + message 2, equal replay counters.
    Challenge,
    /// Message 2 + message 3, counter of message 3 one greater.
    Authorized,
    /// Message 3 + message 4, equal replay counters.
    Installed,
}

impl Pairing {
    /// Confidence ranking used when several pairings are known for one
    /// station: the challenge pairing binds the nonces most directly.
    pub fn rank(self) -> u8 {
        match self {
            Pairing::Challenge => 3,
            Pairing::Authorized => 2,
            Pairing::Installed => 1,
        }
    }
}

impl fmt::Display for Pairing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Pairing::Challenge => "M1+M2",
            Pairing::Authorized => "M2+M3",
            Pairing::Installed => "M3+M4",
        };
        f.write_str(s)
    }
}

/// WPA/WPA2 4-way handshake data structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Network ESSID (used in PMK derivation)
    pub essid: Essid,

    /// AP MAC address (BSSID)
    pub ap_mac: MacAddr,

    /// Station MAC address
    pub station_mac: MacAddr,

    /// Authenticator Nonce (from AP)
    #[serde(with = "hex::serde")]
    pub anonce: [u8; 32],

    /// Supplicant Nonce (from station)
    #[serde(with = "hex::serde")]
    pub snonce: [u8; 32],

    /// Message Integrity Code recorded in the MIC-bearing frame
    #[serde(with = "hex::serde")]
    pub mic: Mic,

    /// EAPOL frame (with MIC field zeroed) for MIC calculation
    #[serde(with = "hex::serde")]
    pub eapol_frame: Vec<u8>,

    /// Key version (1 = HMAC-MD5, 2 = HMAC-SHA1, 3 = AES-CMAC)
    pub key_version: u8,

    /// Replay counter of the exchange
    pub replay_counter: u64,

    pub pairing: Pairing,
}

impl Handshake {
    /// Load handshake from a JSON file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save handshake as pretty-printed JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ESSID:       {}", self.essid)?;
        writeln!(f, "AP:          {}", self.ap_mac)?;
        writeln!(f, "Station:     {}", self.station_mac)?;
        writeln!(f, "Pairing:     {}", self.pairing)?;
        writeln!(f, "Key version: {}", self.key_version)?;
        write!(f, "MIC:         {}", hex::encode(self.mic))
    }
}

/// Zero the MIC field of an EAPOL-Key frame in place.
pub fn zero_mic(frame: &mut [u8]) {
    if frame.len() >= MIC_OFFSET + MIC_LEN {
        frame[MIC_OFFSET..MIC_OFFSET + MIC_LEN].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Handshake {
        Handshake {
            essid: "linksys".parse().unwrap(),
            ap_mac: "00:0b:86:c2:a4:85".parse().unwrap(),
            station_mac: "00:13:ce:55:98:ef".parse().unwrap(),
            anonce: [0xa1; 32],
            snonce: [0xb2; 32],
            mic: [0xc3; 16],
            eapol_frame: vec![1, 3, 0, 0x75],
            key_version: 2,
            replay_counter: 7,
            pairing: Pairing::Authorized,
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hs.json");

        let hs = sample();
        hs.save_to_file(&path).unwrap();
        let loaded = Handshake::load_from_file(&path).unwrap();
        assert_eq!(loaded, hs);

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"authorized\""));
        assert!(json.contains(&"c3".repeat(16)));
    }

    #[test]
    fn test_zero_mic() {
        let mut frame = vec![0xffu8; 99];
        zero_mic(&mut frame);
        assert!(frame[MIC_OFFSET..MIC_OFFSET + MIC_LEN].iter().all(|&b| b == 0));
        assert_eq!(frame[MIC_OFFSET - 1], 0xff);
        assert_eq!(frame[MIC_OFFSET + MIC_LEN], 0xff);

        let mut short = vec![0xffu8; 10];
        zero_mic(&mut short);
        assert!(short.iter().all(|&b| b == 0xff));
    }

    #[test]
    fn test_pairing_display() {
        assert_eq!(Pairing::Challenge.to_string(), "M1+M2");
        assert!(Pairing::Challenge.rank() > Pairing::Installed.rank());
    }
}
