//! Target-side trace filters
//!
//! The global filter is a 128-bit mask over record numbers; the local filter
//! restricts output to specific objects. Both persist across test cases until
//! a target reset.

use std::collections::BTreeSet;
use std::fmt;

use crate::record::rec;

/// Kinds of target objects that can be selected or filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjKind {
    Sm,
    Ao,
    Mp,
    Eq,
    Te,
    Ap,
    /// A state machine that is also an active object: addresses both slots.
    SmAo,
}

impl ObjKind {
    /// Wire code of the kind.
    pub fn code(self) -> u8 {
        match self {
            ObjKind::Sm => 0,
            ObjKind::Ao => 1,
            ObjKind::Mp => 2,
            ObjKind::Eq => 3,
            ObjKind::Te => 4,
            ObjKind::Ap => 5,
            ObjKind::SmAo => 6,
        }
    }

    /// Parse `SM`, `OBJ_SM`, `SM_AO`, ... (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        let upper = s.to_ascii_uppercase();
        let name = upper.strip_prefix("OBJ_").unwrap_or(&upper);
        Some(match name {
            "SM" => ObjKind::Sm,
            "AO" => ObjKind::Ao,
            "MP" => ObjKind::Mp,
            "EQ" => ObjKind::Eq,
            "TE" => ObjKind::Te,
            "AP" => ObjKind::Ap,
            "SM_AO" => ObjKind::SmAo,
            _ => return None,
        })
    }

    /// The single-object slots this kind addresses.
    pub fn slots(self) -> &'static [ObjKind] {
        match self {
            ObjKind::Sm => &[ObjKind::Sm],
            ObjKind::Ao => &[ObjKind::Ao],
            ObjKind::Mp => &[ObjKind::Mp],
            ObjKind::Eq => &[ObjKind::Eq],
            ObjKind::Te => &[ObjKind::Te],
            ObjKind::Ap => &[ObjKind::Ap],
            ObjKind::SmAo => &[ObjKind::Sm, ObjKind::Ao],
        }
    }
}

impl fmt::Display for ObjKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjKind::Sm => "SM",
            ObjKind::Ao => "AO",
            ObjKind::Mp => "MP",
            ObjKind::Eq => "EQ",
            ObjKind::Te => "TE",
            ObjKind::Ap => "AP",
            ObjKind::SmAo => "SM_AO",
        })
    }
}

/// Records that cannot be filtered out: the session-start record and the
/// test/dictionary/status block.
const NON_MASKABLE: &[(u8, u8)] = &[(rec::EMPTY, rec::EMPTY), (rec::TEST_PAUSED, rec::ASSERT_FAIL)];

/// Named record groups as inclusive ranges of record numbers.
const GROUPS: &[(&str, &[(u8, u8)])] = &[
    ("ALL", &[(0, 124)]),
    ("SM", &[(1, 9), (55, 57)]),
    ("AO", &[(10, 18), (45, 45)]),
    ("EQ", &[(19, 22), (46, 46)]),
    ("MP", &[(24, 25), (47, 47)]),
    ("QF", &[(26, 31), (38, 44)]),
    ("TE", &[(32, 38)]),
    ("SC", &[(48, 54)]),
    ("U0", &[(100, 104)]),
    ("U1", &[(105, 109)]),
    ("U2", &[(110, 114)]),
    ("U3", &[(115, 119)]),
    ("U4", &[(120, 124)]),
    ("UA", &[(100, 124)]),
];

fn group(name: &str) -> Option<&'static [(u8, u8)]> {
    GROUPS.iter().find(|(g, _)| *g == name).map(|(_, ranges)| *ranges)
}

fn mask_of(ranges: &[(u8, u8)]) -> u128 {
    ranges
        .iter()
        .flat_map(|&(lo, hi)| lo..=hi)
        .fold(0u128, |m, n| m | (1u128 << n))
}

/// Global and local filter state as last sent to the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    global: u128,
    local: BTreeSet<(ObjKind, u64)>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `glb_filter` items: group names or record numbers, each
    /// optionally prefixed with `-` to turn it off. Returns the offending
    /// item if one is not recognised; the set is unchanged in that case.
    pub fn apply_global<S: AsRef<str>>(&mut self, items: &[S]) -> Result<(), String> {
        let mut global = self.global;
        for item in items {
            let item = item.as_ref();
            let (on, name) = match item.strip_prefix('-') {
                Some(rest) => (false, rest),
                None => (true, item.strip_prefix('+').unwrap_or(item)),
            };
            let upper = name.to_ascii_uppercase();
            let upper = upper
                .strip_prefix("QS_")
                .map(|g| g.strip_suffix("_RECORDS").unwrap_or(g))
                .unwrap_or(&upper);
            let mask = match group(upper) {
                Some(ranges) => mask_of(ranges),
                None => match name.parse::<u8>() {
                    Ok(n) if n < rec::LIMIT => 1u128 << n,
                    _ => return Err(item.to_string()),
                },
            };
            if on {
                global |= mask;
            } else {
                global &= !mask;
            }
        }
        self.global = global;
        Ok(())
    }

    pub fn is_enabled(&self, record: u8) -> bool {
        record < 128 && (self.encode_global_mask() >> record) & 1 == 1
    }

    /// The 16-byte mask as the target receives it.
    pub fn global_bytes(&self) -> [u8; 16] {
        self.encode_global_mask().to_le_bytes()
    }

    fn encode_global_mask(&self) -> u128 {
        let always_off: u128 = (1u128 << 125) | (1u128 << 126) | (1u128 << 127);
        (self.global | mask_of(NON_MASKABLE)) & !always_off
    }

    pub fn add_local(&mut self, kind: ObjKind, addr: u64) {
        self.local.insert((kind, addr));
    }

    pub fn local(&self) -> impl Iterator<Item = &(ObjKind, u64)> {
        self.local.iter()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
