//! Helpers for the `key=value,key=value` parameter strings that backend
//! modules accept in `init_backend` and `add_device`, and for
//! human-readable sizes such as `"64M"`.

use crate::error::{BackendError, Result};

/// Parsed `key=value` list. Keys are case-insensitive; later entries win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    raw: String,
    entries: Vec<(String, String)>,
}

impl Params {
    pub fn parse(params: &str) -> Result<Params> {
        let mut entries = Vec::new();
        for item in params.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| invalid(params, format!("'{item}' is not key=value")))?;
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(invalid(params, "empty key".to_string()));
            }
            entries.push((key, value.trim().to_string()));
        }
        Ok(Params {
            raw: params.to_string(),
            entries,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        self.get(key)
            .map(|v| {
                v.parse()
                    .map_err(|_| invalid(&self.raw, format!("{key}: '{v}' is not a number")))
            })
            .transpose()
    }

    /// A size such as `"512M"`; see [`parse_size`].
    pub fn get_size(&self, key: &str) -> Result<Option<usize>> {
        self.get(key)
            .map(|v| {
                parse_size(v).map_err(|_| invalid(&self.raw, format!("{key}: bad size '{v}'")))
            })
            .transpose()
    }

    /// Fail on any key outside `known`.
    pub fn expect_keys(&self, known: &[&str]) -> Result<()> {
        match self.entries.iter().find(|(k, _)| !known.contains(&k.as_str())) {
            Some((k, _)) => Err(invalid(&self.raw, format!("unknown key '{k}'"))),
            None => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn invalid(params: &str, reason: String) -> BackendError {
    BackendError::InvalidParams {
        params: params.to_string(),
        reason,
    }
}

/// Parse a byte count with an optional `K`, `M` or `G` suffix (binary
/// multiples, optional trailing `B`, case-insensitive).
pub fn parse_size(s: &str) -> Result<usize> {
    let s = s.trim();
    let upper = s.to_ascii_uppercase();
    let digits = upper.strip_suffix('B').unwrap_or(&upper);
    let (num, multiplier) = match digits.chars().last() {
        Some('K') => (&digits[..digits.len() - 1], 1usize << 10),
        Some('M') => (&digits[..digits.len() - 1], 1 << 20),
        Some('G') => (&digits[..digits.len() - 1], 1 << 30),
        _ => (digits, 1),
    };
    let value: usize = num
        .trim()
        .parse()
        .map_err(|_| invalid(s, "expected a number with an optional K/M/G suffix".into()))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| invalid(s, "size overflows".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        let p = Params::parse("name=sim0, memory=64M,Latency_us=10").unwrap();
        assert_eq!(p.get("name"), Some("sim0"));
        assert_eq!(p.get("latency_us"), Some("10"));
        assert_eq!(p.get_size("memory").unwrap(), Some(64 << 20));
        assert_eq!(p.get_usize("latency_us").unwrap(), Some(10));
        assert_eq!(p.get("missing"), None);
        assert!(p.expect_keys(&["name", "memory", "latency_us"]).is_ok());
        assert!(p.expect_keys(&["name"]).is_err());
    }

    #[test]
    fn test_empty_params() {
        assert!(Params::parse("").unwrap().is_empty());
        assert!(Params::parse(" , ").unwrap().is_empty());
    }

    #[test]
    fn test_bad_params() {
        assert!(matches!(
            Params::parse("name"),
            Err(BackendError::InvalidParams { .. })
        ));
        assert!(Params::parse("=x").is_err());
        let p = Params::parse("n_threads=many").unwrap();
        assert!(p.get_usize("n_threads").is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("512k").unwrap(), 512 << 10);
        assert_eq!(parse_size("64MB").unwrap(), 64 << 20);
        assert_eq!(parse_size("1G").unwrap(), 1 << 30);
        assert_eq!(parse_size("12B").unwrap(), 12);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("").is_err());
    }
}
