//! The JSON query request.

use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// A semantic query: members by `Cube.member` path plus filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(default)]
    pub measures: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub time_dimensions: Vec<TimeDimensionRequest>,
    #[serde(default, skip_serializing_if = "Order::is_empty")]
    pub order: Order,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measure(mut self, path: &str) -> Self {
        self.measures.push(path.into());
        self
    }

    pub fn dimension(mut self, path: &str) -> Self {
        self.dimensions.push(path.into());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn time_dimension(mut self, td: TimeDimensionRequest) -> Self {
        self.time_dimensions.push(td);
        self
    }

    pub fn order_by(mut self, path: &str, direction: OrderDirection) -> Self {
        self.order.0.push((path.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A filter: a member condition or a nested boolean group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    And { and: Vec<Filter> },
    Or { or: Vec<Filter> },
    Member(MemberFilter),
}

impl Filter {
    pub fn member(member: &str, operator: &str, values: Vec<serde_json::Value>) -> Self {
        Filter::Member(MemberFilter {
            member: member.into(),
            operator: operator.into(),
            values,
        })
    }
}

/// `{ member, operator, values }`. The operator stays a string until
/// compile so unknown operators are a compile error, not a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberFilter {
    #[serde(alias = "dimension")]
    pub member: String,
    pub operator: String,
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeDimensionRequest {
    pub dimension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
}

impl TimeDimensionRequest {
    pub fn new(dimension: &str) -> Self {
        Self {
            dimension: dimension.into(),
            granularity: None,
            date_range: None,
        }
    }

    pub fn granularity(mut self, granularity: &str) -> Self {
        self.granularity = Some(granularity.into());
        self
    }

    pub fn date_range(mut self, from: &str, to: &str) -> Self {
        self.date_range = Some(DateRange::Absolute(vec![from.into(), to.into()]));
        self
    }

    pub fn relative(mut self, range: &str) -> Self {
        self.date_range = Some(DateRange::Relative(range.into()));
        self
    }
}

/// `["2024-01-01", "2024-01-31"]` or `"last 7 days"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateRange {
    Absolute(Vec<String>),
    Relative(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// Requested ordering, in priority order.
///
/// Accepts `{ "Cube.member": "desc" }` (key order kept) or
/// `[["Cube.member", "desc"]]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Order(pub Vec<(String, OrderDirection)>);

impl Order {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Order {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderVisitor;

        impl<'de> Visitor<'de> for OrderVisitor {
            type Value = Order;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of member to direction or a list of [member, direction] pairs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Order, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<String, OrderDirection>()? {
                    entries.push(entry);
                }
                Ok(Order(entries))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Order, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = seq.next_element::<(String, OrderDirection)>()? {
                    entries.push(entry);
                }
                Ok(Order(entries))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Order, E> {
                Ok(Order::default())
            }
        }

        deserializer.deserialize_any(OrderVisitor)
    }
}
