//! `${...}` reference parsing for member and join SQL.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{CubeId, SqlTemplate, TemplateSegment};

static REFERENCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\$\{\s*([^}]*?)\s*\}").ok());

static BARE_COLUMN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());

/// Segment before cube names are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawSegment {
    Text(String),
    SelfCube,
    Reference(String),
}

/// Split SQL into text and `${...}` references.
pub fn parse(sql: &str) -> Vec<RawSegment> {
    let Some(re) = REFERENCE.as_ref() else {
        return vec![RawSegment::Text(sql.into())];
    };
    let mut segments = Vec::new();
    let mut last = 0;
    for caps in re.captures_iter(sql) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > last {
            segments.push(RawSegment::Text(sql[last..whole.start()].into()));
        }
        let name = name.as_str();
        segments.push(if name == "CUBE" {
            RawSegment::SelfCube
        } else {
            RawSegment::Reference(name.into())
        });
        last = whole.end();
    }
    if last < sql.len() {
        segments.push(RawSegment::Text(sql[last..].into()));
    }
    segments
}

/// Parse member SQL. A bare column name is qualified with `${CUBE}` so it
/// stays unambiguous once other cubes are joined in.
pub fn parse_member_sql(sql: &str) -> Vec<RawSegment> {
    let trimmed = sql.trim();
    if BARE_COLUMN.as_ref().is_some_and(|re| re.is_match(trimmed)) {
        return vec![RawSegment::SelfCube, RawSegment::Text(format!(".{trimmed}"))];
    }
    parse(sql)
}

/// Names referenced by the segments, excluding `${CUBE}`.
pub fn references(segments: &[RawSegment]) -> impl Iterator<Item = &str> {
    segments.iter().filter_map(|s| match s {
        RawSegment::Reference(name) => Some(name.as_str()),
        _ => None,
    })
}

/// Resolve references through `lookup`; the unresolved names are returned
/// as the error.
pub fn resolve(
    segments: Vec<RawSegment>,
    lookup: impl Fn(&str) -> Option<CubeId>,
) -> Result<SqlTemplate, Vec<String>> {
    let mut unresolved = Vec::new();
    let mut resolved = Vec::with_capacity(segments.len());
    for segment in segments {
        match segment {
            RawSegment::Text(t) => resolved.push(TemplateSegment::Text(t)),
            RawSegment::SelfCube => resolved.push(TemplateSegment::SelfCube),
            RawSegment::Reference(name) => match lookup(&name) {
                Some(id) => resolved.push(TemplateSegment::Cube(id)),
                None => unresolved.push(name),
            },
        }
    }
    if unresolved.is_empty() {
        Ok(SqlTemplate {
            segments: resolved,
        })
    } else {
        Err(unresolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_predicate() {
        let segs = parse("${CUBE}.PULocationID = ${TaxiZones}.LocationID");
        assert_eq!(
            segs,
            vec![
                RawSegment::SelfCube,
                RawSegment::Text(".PULocationID = ".into()),
                RawSegment::Reference("TaxiZones".into()),
                RawSegment::Text(".LocationID".into()),
            ]
        );
    }

    #[test]
    fn test_bare_column_is_qualified() {
        assert_eq!(
            parse_member_sql("VendorID"),
            vec![RawSegment::SelfCube, RawSegment::Text(".VendorID".into())]
        );
        // Expressions are left alone
        assert_eq!(
            parse_member_sql("fare_amount / 100"),
            vec![RawSegment::Text("fare_amount / 100".into())]
        );
    }

    #[test]
    fn test_resolve_reports_every_unknown_name() {
        let segs = parse("${Nope}.a = ${Missing}.b AND ${Known}.c = 1");
        let err = resolve(segs, |n| (n == "Known").then_some(CubeId(0))).unwrap_err();
        assert_eq!(err, vec!["Nope".to_string(), "Missing".to_string()]);
    }

    #[test]
    fn test_member_reference_is_not_a_cube() {
        let segs = parse("${TaxiZones.borough}");
        assert_eq!(references(&segs).collect::<Vec<_>>(), vec!["TaxiZones.borough"]);
    }
}
