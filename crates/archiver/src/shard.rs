// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Shard key derivation
//!
//! Every file in the repository lives under
//! `{match_type}/{chain_id}/{address}/...`. The shard a file belongs to is
//! decided here and nowhere else: the walker indexes address directories
//! through [`resolve`], and archive names come from [`ShardKey::archive_name`].
//!
//! Address prefixes are always rendered in lower case.

use std::fmt;
use std::path::{Component, Path};

/// Classification of a stored verification result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchType {
    Full,
    Partial,
}

impl MatchType {
    /// Both match types, in the order a run visits them
    pub const ALL: [MatchType; 2] = [MatchType::Full, MatchType::Partial];

    /// Directory name under the repository root
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            MatchType::Full => "full_match",
            MatchType::Partial => "partial_match",
        }
    }

    #[must_use]
    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "full_match" => Some(MatchType::Full),
            "partial_match" => Some(MatchType::Partial),
            _ => None,
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// First byte of a contract address, taken from the two hex digits after `0x`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressPrefix(u8);

impl AddressPrefix {
    #[must_use]
    pub fn new(byte: u8) -> Self {
        Self(byte)
    }

    #[must_use]
    pub fn byte(self) -> u8 {
        self.0
    }

    /// Parse the prefix of an address directory name such as `0xAbCd...`.
    ///
    /// Returns `None` unless the name starts with the literal `0x` and is
    /// followed by at least two hex digits.
    #[must_use]
    pub fn from_address(address: &str) -> Option<Self> {
        let digits = address.strip_prefix("0x")?.as_bytes();
        match digits {
            [hi, lo, ..] if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                Some(Self((hex_value(*hi) << 4) | hex_value(*lo)))
            }
            _ => None,
        }
    }

    /// Every possible prefix, in ascending order
    pub fn all() -> impl Iterator<Item = AddressPrefix> {
        (0..=u8::MAX).map(AddressPrefix)
    }
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

impl fmt::Display for AddressPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}

/// Identifies one shard: one archive per (match type, chain, address prefix)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardKey {
    pub match_type: MatchType,
    pub chain_id: String,
    pub address_prefix: AddressPrefix,
}

impl ShardKey {
    #[must_use]
    pub fn new(match_type: MatchType, chain_id: impl Into<String>, address_prefix: AddressPrefix) -> Self {
        Self {
            match_type,
            chain_id: chain_id.into(),
            address_prefix,
        }
    }

    /// Local and remote file name of this shard's archive
    #[must_use]
    pub fn archive_name(&self) -> String {
        format!(
            "{}.{}.{}.tar.gz",
            self.match_type, self.chain_id, self.address_prefix
        )
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/0x{}",
            self.match_type, self.chain_id, self.address_prefix
        )
    }
}

/// Why a path does not belong to any shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer than three path segments, or an empty chain segment
    TooShallow,
    /// First segment is neither `full_match` nor `partial_match`
    UnknownMatchType,
    /// Third segment does not start with `0x` plus two hex digits
    NotAnAddress,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::TooShallow => "not under a match/chain/address directory",
            SkipReason::UnknownMatchType => "not a match folder",
            SkipReason::NotAnAddress => "not an address folder",
        })
    }
}

/// Outcome of resolving a repository-relative path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Shard(ShardKey),
    Skip(SkipReason),
}

/// Map a repository-relative path to the shard that archives it.
///
/// Only the first three segments are inspected; anything below the address
/// directory belongs to the same shard.
#[must_use]
pub fn resolve(relative: &Path) -> Resolution {
    let mut segments = relative.components().filter_map(|c| match c {
        Component::Normal(s) => Some(s.to_str()),
        _ => None,
    });

    let (Some(match_type), Some(chain_id), Some(address)) =
        (segments.next(), segments.next(), segments.next())
    else {
        return Resolution::Skip(SkipReason::TooShallow);
    };

    // Non-UTF-8 segments can never name a match type, chain or address.
    let (Some(match_type), Some(chain_id), Some(address)) = (match_type, chain_id, address)
    else {
        return Resolution::Skip(SkipReason::NotAnAddress);
    };

    let Some(match_type) = MatchType::from_dir_name(match_type) else {
        return Resolution::Skip(SkipReason::UnknownMatchType);
    };
    if chain_id.is_empty() {
        return Resolution::Skip(SkipReason::TooShallow);
    }
    match AddressPrefix::from_address(address) {
        Some(prefix) => Resolution::Shard(ShardKey::new(match_type, chain_id, prefix)),
        None => Resolution::Skip(SkipReason::NotAnAddress),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(m: MatchType, chain: &str, byte: u8) -> Resolution {
        Resolution::Shard(ShardKey::new(m, chain, AddressPrefix::new(byte)))
    }

    #[test]
    fn test_resolve_full_and_partial() {
        assert_eq!(
            resolve(Path::new("full_match/1/0xAAbb1234/metadata.json")),
            key(MatchType::Full, "1", 0xaa)
        );
        assert_eq!(
            resolve(Path::new("partial_match/137/0xccdd/sources/a/b/C.sol")),
            key(MatchType::Partial, "137", 0xcc)
        );
    }

    #[test]
    fn test_prefix_is_case_normalized() {
        let upper = resolve(Path::new("full_match/1/0xAB/x"));
        let lower = resolve(Path::new("full_match/1/0xab/x"));
        let mixed = resolve(Path::new("full_match/1/0xaB/x"));
        assert_eq!(upper, lower);
        assert_eq!(lower, mixed);

        let Resolution::Shard(shard) = upper else {
            panic!("expected a shard");
        };
        assert_eq!(shard.archive_name(), "full_match.1.ab.tar.gz");
    }

    #[test]
    fn test_skip_reasons() {
        assert_eq!(
            resolve(Path::new("full_match/1/ab12/metadata.json")),
            Resolution::Skip(SkipReason::NotAnAddress)
        );
        assert_eq!(
            resolve(Path::new("full_match/1/0x/metadata.json")),
            Resolution::Skip(SkipReason::NotAnAddress)
        );
        assert_eq!(
            resolve(Path::new("full_match/1/0xa/metadata.json")),
            Resolution::Skip(SkipReason::NotAnAddress)
        );
        assert_eq!(
            resolve(Path::new("full_match/1/0xzz12/metadata.json")),
            Resolution::Skip(SkipReason::NotAnAddress)
        );
        assert_eq!(
            resolve(Path::new("0X/1/0xab12/metadata.json")),
            Resolution::Skip(SkipReason::UnknownMatchType)
        );
        assert_eq!(
            resolve(Path::new("any_match/1/0xab12/metadata.json")),
            Resolution::Skip(SkipReason::UnknownMatchType)
        );
        assert_eq!(
            resolve(Path::new("full_match/1")),
            Resolution::Skip(SkipReason::TooShallow)
        );
    }

    #[test]
    fn test_uppercase_0x_literal_is_not_an_address() {
        assert_eq!(
            resolve(Path::new("full_match/1/0XAB12/metadata.json")),
            Resolution::Skip(SkipReason::NotAnAddress)
        );
    }

    #[test]
    fn test_address_directory_itself_resolves() {
        assert_eq!(
            resolve(Path::new("full_match/5/0x00ff")),
            key(MatchType::Full, "5", 0x00)
        );
    }

    #[test]
    fn test_all_prefixes_are_distinct_archives() {
        let names: std::collections::BTreeSet<String> = AddressPrefix::all()
            .map(|p| ShardKey::new(MatchType::Full, "1", p).archive_name())
            .collect();
        assert_eq!(names.len(), 256);
        assert!(names.contains("full_match.1.00.tar.gz"));
        assert!(names.contains("full_match.1.ff.tar.gz"));
    }

    #[test]
    fn test_shard_key_display() {
        let shard = ShardKey::new(MatchType::Partial, "10", AddressPrefix::new(0x0a));
        assert_eq!(shard.to_string(), "partial_match/10/0x0a");
    }
}
