//! Member references: `Cube.member` or `Alias.member`.

use std::fmt;

use serde::Serialize;

use super::cube::{CubeId, InstanceId};

/// A parsed `Instance.member` path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberPath {
    pub instance: String,
    pub member: String,
}

impl MemberPath {
    /// Split on the first dot. Both halves must be non-empty.
    pub fn parse(path: &str) -> Option<Self> {
        let (instance, member) = path.split_once('.')?;
        if instance.is_empty() || member.is_empty() || member.contains('.') {
            return None;
        }
        Some(Self {
            instance: instance.into(),
            member: member.into(),
        })
    }
}

impl fmt::Display for MemberPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.instance, self.member)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Dimension,
    Measure,
}

/// A member path bound to its owning instance and definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedMember {
    pub path: MemberPath,
    pub instance: InstanceId,
    pub cube: CubeId,
    pub kind: MemberKind,
    /// Index into the owning cube's dimensions or measures.
    pub index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let p = MemberPath::parse("PickupZone.zoneName").unwrap();
        assert_eq!(p.instance, "PickupZone");
        assert_eq!(p.member, "zoneName");
        assert_eq!(p.to_string(), "PickupZone.zoneName");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(MemberPath::parse("tripCount").is_none());
        assert!(MemberPath::parse(".tripCount").is_none());
        assert!(MemberPath::parse("TaxiTrips.").is_none());
        assert!(MemberPath::parse("a.b.c").is_none());
    }
}
