use std::fmt;
use std::str::FromStr;

use crate::error::BackendError;

/// 128-bit identity of a backend implementation.
///
/// Every backend module defines one constant GUID. Comparing GUIDs is how
/// callers recognise a backend kind regardless of its display name or of
/// which module instance created it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid([u8; 16]);

impl Guid {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Guid(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

impl FromStr for Guid {
    type Err = BackendError;

    /// Parses the hyphenated or plain 32-digit hex form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: Vec<u8> = s.bytes().filter(|&b| b != b'-').collect();
        let invalid = || BackendError::Other(format!("invalid guid: {s}"));
        if hex.len() != 32 {
            return Err(invalid());
        }
        let mut bytes = [0u8; 16];
        for (i, pair) in hex.chunks(2).enumerate() {
            let digits = std::str::from_utf8(pair).map_err(|_| invalid())?;
            bytes[i] = u8::from_str_radix(digits, 16).map_err(|_| invalid())?;
        }
        Ok(Guid(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: Guid = Guid::from_bytes([
        0xaa, 0x67, 0xc7, 0x43, 0x96, 0xe6, 0xa3, 0x8a, 0xe3, 0xaf, 0xea, 0x92, 0x36, 0xbc, 0xfc,
        0x89,
    ]);

    #[test]
    fn test_display_and_parse() {
        let s = G.to_string();
        assert_eq!(s, "aa67c743-96e6-a38a-e3af-ea9236bcfc89");
        assert_eq!(s.parse::<Guid>().unwrap(), G);
        assert_eq!(s.replace('-', "").parse::<Guid>().unwrap(), G);
    }

    #[test]
    fn test_parse_invalid() {
        assert!("1234".parse::<Guid>().is_err());
        assert!("zz67c74396e6a38ae3afea9236bcfc89".parse::<Guid>().is_err());
    }
}
