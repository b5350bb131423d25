/// BIP44 path parsing and normalization
///
/// Accepts paths like `m/44'/0'/0'/0/5`. Any of the trailing markers
/// `'`, `H`, `h`, `P`, `p` denotes a hardened step and normalizes to `'`.
use crate::error::{WalletError, WalletResult};
use bitcoin::bip32::ChildNumber;
use std::fmt;

/// One step of a derivation path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSegment {
    pub index: u32,
    pub hardened: bool,
}

impl PathSegment {
    /// Parse a normalized segment such as `44'` or `0`
    pub fn parse(segment: &str) -> WalletResult<Self> {
        let (digits, hardened) = match segment.strip_suffix('\'') {
            Some(d) => (d, true),
            None => (segment, false),
        };
        let index: u32 = digits
            .parse()
            .map_err(|_| WalletError::InvalidPath(format!("segment '{segment}' is not numeric")))?;
        if index >= (1 << 31) {
            return Err(WalletError::InvalidPath(format!(
                "segment index {index} out of range"
            )));
        }
        Ok(Self { index, hardened })
    }

    /// Convert to the key library's child number type
    pub fn child_number(&self) -> ChildNumber {
        if self.hardened {
            ChildNumber::from_hardened_idx(self.index).expect("index below 2^31")
        } else {
            ChildNumber::from_normal_idx(self.index).expect("index below 2^31")
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// Parsed BIP44 path; segments past the available depth are `None`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bip44Path {
    pub is_private: bool,
    pub purpose: Option<PathSegment>,
    pub cointype: Option<PathSegment>,
    pub account: Option<PathSegment>,
    pub change: Option<PathSegment>,
    pub address_index: Option<PathSegment>,
}

/// Normalize a BIP44 key path to single-quote hardened markers
pub fn normalize_path(path: &str) -> WalletResult<String> {
    let mut levels = Vec::new();
    for level in path.split('/') {
        if level.is_empty() {
            return Err(WalletError::InvalidPath(
                "could not parse path, index is empty".into(),
            ));
        }
        if level.ends_with(['\'', 'H', 'h', 'P', 'p']) {
            let mut normalized = level[..level.len() - 1].to_string();
            normalized.push('\'');
            levels.push(normalized);
        } else {
            levels.push(level.to_string());
        }
    }
    Ok(levels.join("/"))
}

/// Split a normalized path into segments
pub fn path_levels(path: &str) -> Vec<&str> {
    path.split('/').collect()
}

/// Parse an absolute path into its BIP44 components.
///
/// Path length must be between 1 and 6 (master plus at most five levels);
/// the first level must be `m` (private) or `M` (public).
pub fn parse_path(path: &str) -> WalletResult<Bip44Path> {
    let normalized = normalize_path(path)?;
    let levels = path_levels(&normalized);
    if levels.is_empty() || levels.len() > 6 {
        return Err(WalletError::InvalidPath(format!(
            "path length (depth) must be between 1 and 6, not {}",
            levels.len()
        )));
    }
    let is_private = match levels[0] {
        "m" => true,
        "M" => false,
        other => {
            return Err(WalletError::InvalidPath(format!(
                "path must start with 'm' or 'M', not '{other}'"
            )))
        }
    };
    let segment = |n: usize| -> WalletResult<Option<PathSegment>> {
        levels.get(n).map(|s| PathSegment::parse(s)).transpose()
    };
    Ok(Bip44Path {
        is_private,
        purpose: segment(1)?,
        cointype: segment(2)?,
        account: segment(3)?,
        change: segment(4)?,
        address_index: segment(5)?,
    })
}
