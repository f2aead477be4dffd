/*!
 * Validated value types: ESSIDs, password candidates, MAC addresses
 */

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// WPA passphrase bounds (IEEE 802.11i, Annex M.4)
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 63;

pub const MAX_ESSID_LEN: usize = 32;

/// 32-byte Pairwise Master Key
pub type Pmk = [u8; 32];

/// 16-byte EAPOL-Key message integrity code
pub type Mic = [u8; 16];

/// Network name used as the PBKDF2 salt.
///
/// Stored as raw bytes: ESSIDs are not required to be UTF-8.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "EssidRepr", into = "EssidRepr")]
pub struct Essid(Vec<u8>);

impl Essid {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, ValidationError> {
        let bytes = bytes.into();
        if bytes.is_empty() || bytes.len() > MAX_ESSID_LEN {
            return Err(ValidationError::EssidLength(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, ValidationError> {
        let bytes = hex::decode(s).map_err(|e| ValidationError::Hex(e.to_string()))?;
        Self::new(bytes)
    }
}

impl FromStr for Essid {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.as_bytes().to_vec())
    }
}

impl fmt::Display for Essid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Essid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Essid({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// Serialized as text when the bytes are UTF-8, as hex otherwise.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum EssidRepr {
    Text(String),
    Raw { hex: String },
}

impl TryFrom<EssidRepr> for Essid {
    type Error = ValidationError;

    fn try_from(repr: EssidRepr) -> Result<Self, Self::Error> {
        match repr {
            EssidRepr::Text(s) => Essid::new(s.into_bytes()),
            EssidRepr::Raw { hex } => Essid::from_hex(&hex),
        }
    }
}

impl From<Essid> for EssidRepr {
    fn from(essid: Essid) -> Self {
        match String::from_utf8(essid.0) {
            Ok(s) => EssidRepr::Text(s),
            Err(e) => EssidRepr::Raw {
                hex: hex::encode(e.as_bytes()),
            },
        }
    }
}

/// A password candidate with a valid WPA passphrase length.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Password(Vec<u8>);

impl Password {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, ValidationError> {
        let bytes = bytes.into();
        if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&bytes.len()) {
            return Err(ValidationError::PasswordLength(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl FromStr for Password {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.as_bytes().to_vec())
    }
}

impl fmt::Display for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl Serialize for Password {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// IEEE 802 MAC address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(ValidationError::MacAddress(s.to_string()));
        }
        let mut mac = [0u8; 6];
        for (byte, part) in mac.iter_mut().zip(parts) {
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| ValidationError::MacAddress(s.to_string()))?;
        }
        Ok(MacAddr(mac))
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddr(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_bounds() {
        assert!(Password::new(b"1234567".to_vec()).is_err());
        assert!(Password::new(b"12345678".to_vec()).is_ok());
        assert!(Password::new(vec![b'a'; 63]).is_ok());
        assert_eq!(
            Password::new(vec![b'a'; 64]),
            Err(ValidationError::PasswordLength(64))
        );
    }

    #[test]
    fn test_essid_bounds() {
        assert!(Essid::new(Vec::new()).is_err());
        assert!(Essid::new(vec![b'x'; 32]).is_ok());
        assert!(Essid::new(vec![b'x'; 33]).is_err());
    }

    #[test]
    fn test_essid_hex_roundtrip() {
        let essid = Essid::new(vec![0xff, 0x00, b'a']).unwrap();
        assert_eq!(Essid::from_hex(&essid.to_hex()).unwrap(), essid);
    }

    #[test]
    fn test_essid_serde_text_and_raw() {
        let text: Essid = "linksys".parse().unwrap();
        let json = serde_json::to_string(&text).unwrap();
        assert_eq!(json, "\"linksys\"");
        assert_eq!(serde_json::from_str::<Essid>(&json).unwrap(), text);

        let raw = Essid::new(vec![0xc3, 0x28]).unwrap();
        let json = serde_json::to_string(&raw).unwrap();
        assert_eq!(serde_json::from_str::<Essid>(&json).unwrap(), raw);
    }

    #[test]
    fn test_mac_parse_display() {
        let mac: MacAddr = "00:0B:86:c2:a4:85".parse().unwrap();
        assert_eq!(mac.to_string(), "00:0b:86:c2:a4:85");
        assert!("00:0b:86".parse::<MacAddr>().is_err());
        assert!("zz:0b:86:c2:a4:85".parse::<MacAddr>().is_err());
    }
}
