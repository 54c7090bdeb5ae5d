//! Shipping readiness: when a quantity of stock can leave the warehouse.
//!
//! The data model exposes readiness as two nullable fields (`shipping_time` in
//! days, `shipping_date` as an absolute timestamp). Internally it is one enum,
//! which makes "both set" unrepresentable.

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Readiness of a ledger entry, an item at a quantity, or a whole unit.
///
/// The derived ordering is the lexical policy:
/// `Immediate < Days(a) < Days(b) (a < b) < Date(x) < Date(y) (x < y)`.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Readiness {
    /// Ships immediately (no time or date recorded).
    #[default]
    Immediate,
    /// Ships after a number of days.
    Days(u32),
    /// Ships on a known date.
    Date(DateTime<Utc>),
}

impl Readiness {
    /// Build from the nullable field pair; both set is `InvalidEntryKind`.
    pub fn from_fields(
        shipping_time: Option<u32>,
        shipping_date: Option<DateTime<Utc>>,
    ) -> DomainResult<Self> {
        match (shipping_time, shipping_date) {
            (Some(_), Some(_)) => Err(DomainError::InvalidEntryKind),
            (Some(days), None) => Ok(Self::Days(days)),
            (None, Some(date)) => Ok(Self::Date(date)),
            (None, None) => Ok(Self::Immediate),
        }
    }

    pub fn shipping_time(&self) -> Option<u32> {
        match self {
            Self::Days(days) => Some(*days),
            _ => None,
        }
    }

    pub fn shipping_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(date) => Some(*date),
            _ => None,
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate)
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("immediate"),
            Self::Days(days) => write!(f, "{days}d"),
            Self::Date(date) => write!(f, "{}", date.to_rfc3339()),
        }
    }
}

/// Per-item "unlimited stock" override: infinite supply with fixed readiness.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlimitedStock {
    ShippingTime(u32),
    ShippingDate(DateTime<Utc>),
}

impl UnlimitedStock {
    /// Build from the nullable field pair; `None` when neither is set.
    pub fn from_fields(
        shipping_time: Option<u32>,
        shipping_date: Option<DateTime<Utc>>,
    ) -> DomainResult<Option<Self>> {
        match (shipping_time, shipping_date) {
            (Some(_), Some(_)) => Err(DomainError::InvalidEntryKind),
            (Some(days), None) => Ok(Some(Self::ShippingTime(days))),
            (None, Some(date)) => Ok(Some(Self::ShippingDate(date))),
            (None, None) => Ok(None),
        }
    }

    pub fn readiness(&self) -> Readiness {
        match self {
            Self::ShippingTime(days) => Readiness::Days(*days),
            Self::ShippingDate(date) => Readiness::Date(*date),
        }
    }

    /// A date override strictly in the past is expired; time overrides never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self, Self::ShippingDate(date) if *date < now)
    }
}

/// How a day-count readiness is compared against a dated one.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessComparison {
    /// A date always outranks any day-count.
    #[default]
    Lexical,
    /// Day-counts are resolved against "now" and compared as calendar instants.
    Calendar,
}

impl FromStr for ReadinessComparison {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lexical" => Ok(Self::Lexical),
            "calendar" => Ok(Self::Calendar),
            other => Err(DomainError::validation(format!(
                "unknown readiness comparison {other:?} (expected lexical|calendar)"
            ))),
        }
    }
}

/// Total order over readiness values used by the resolver and the search.
///
/// Ledger fulfilment order, a unit's "latest component" and a search's
/// "soonest combination" all go through the same order so the three stay
/// consistent with each other.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReadinessOrder {
    comparison: ReadinessComparison,
    now: DateTime<Utc>,
}

impl ReadinessOrder {
    pub fn new(comparison: ReadinessComparison, now: DateTime<Utc>) -> Self {
        Self { comparison, now }
    }

    pub fn lexical() -> Self {
        Self::new(ReadinessComparison::Lexical, DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn calendar(now: DateTime<Utc>) -> Self {
        Self::new(ReadinessComparison::Calendar, now)
    }

    pub fn comparison(&self) -> ReadinessComparison {
        self.comparison
    }

    pub fn compare(&self, a: &Readiness, b: &Readiness) -> Ordering {
        match self.comparison {
            ReadinessComparison::Lexical => a.cmp(b),
            ReadinessComparison::Calendar => self
                .instant(a)
                .cmp(&self.instant(b))
                .then_with(|| a.cmp(b)),
        }
    }

    /// The later of two readiness values (first wins on ties).
    pub fn latest(&self, a: Readiness, b: Readiness) -> Readiness {
        if self.compare(&b, &a) == Ordering::Greater { b } else { a }
    }

    /// The sooner of two readiness values (first wins on ties).
    pub fn soonest(&self, a: Readiness, b: Readiness) -> Readiness {
        if self.compare(&b, &a) == Ordering::Less { b } else { a }
    }

    /// Strictly sooner than `other`.
    pub fn is_sooner(&self, candidate: &Readiness, other: &Readiness) -> bool {
        self.compare(candidate, other) == Ordering::Less
    }

    fn instant(&self, readiness: &Readiness) -> DateTime<Utc> {
        match readiness {
            Readiness::Immediate => self.now,
            Readiness::Days(days) => self.now + Duration::days(i64::from(*days)),
            Readiness::Date(date) => *date,
        }
    }
}

impl Default for ReadinessOrder {
    fn default() -> Self {
        Self::lexical()
    }
}
