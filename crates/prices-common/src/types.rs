//! Domain types shared by the ingestion pipeline, the stores and the API

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive, Zero};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;

/// Number of fractional digits kept for prices (currency precision).
pub const PRICE_SCALE: i64 = 2;

/// One validated row of a price list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Product identifier, the business key of a record
    pub id: i64,
    pub created_at: NaiveDate,
    pub name: String,
    pub category: String,
    /// Non-negative amount, always carried at [`PRICE_SCALE`] digits
    pub price: BigDecimal,
}

impl PriceRecord {
    /// Build a record, normalizing the price to currency precision.
    ///
    /// Rounding is half-even so that repeated import/export cycles are stable.
    pub fn new(
        id: i64,
        created_at: NaiveDate,
        name: impl Into<String>,
        category: impl Into<String>,
        price: BigDecimal,
    ) -> Self {
        Self {
            id,
            created_at,
            name: name.into(),
            category: category.into(),
            price: price.with_scale_round(PRICE_SCALE, RoundingMode::HalfEven),
        }
    }
}

/// Totals reported after an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub total_items: i64,
    pub total_categories: i64,
    #[serde(serialize_with = "serialize_price_number")]
    pub total_price: BigDecimal,
}

impl AggregateSummary {
    /// Summary of nothing: `{0, 0, 0}`
    pub fn zero() -> Self {
        Self {
            total_items: 0,
            total_categories: 0,
            total_price: BigDecimal::zero().with_scale(PRICE_SCALE),
        }
    }

    /// Count, distinct categories and exact price sum over `records`
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a PriceRecord>,
    {
        let mut total_items = 0i64;
        let mut total_price = BigDecimal::zero().with_scale(PRICE_SCALE);
        let mut categories: HashSet<&str> = HashSet::new();

        for record in records {
            total_items += 1;
            total_price += &record.price;
            categories.insert(record.category.as_str());
        }

        Self {
            total_items,
            total_categories: categories.len() as i64,
            total_price,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_items == 0
    }
}

impl Default for AggregateSummary {
    fn default() -> Self {
        Self::zero()
    }
}

/// JSON clients expect `total_price` as a number, not the decimal string
/// bigdecimal produces by default.
fn serialize_price_number<S>(value: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value.to_f64() {
        Some(number) => serializer.serialize_f64(number),
        None => Err(serde::ser::Error::custom(format!(
            "price total {} is not representable as a JSON number",
            value
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn price(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_new_normalizes_price_scale() {
        let record = PriceRecord::new(1, date("2024-01-01"), "A", "Fruit", price("1.5"));
        assert_eq!(record.price.to_string(), "1.50");

        let record = PriceRecord::new(2, date("2024-01-01"), "B", "Fruit", price("2.345"));
        assert_eq!(record.price.to_string(), "2.34");

        let record = PriceRecord::new(3, date("2024-01-01"), "C", "Fruit", price("2.355"));
        assert_eq!(record.price.to_string(), "2.36");
    }

    #[test]
    fn test_zero_summary() {
        let summary = AggregateSummary::zero();
        assert!(summary.is_empty());
        assert_eq!(summary.total_categories, 0);
        assert_eq!(summary.total_price, BigDecimal::zero());
    }

    #[test]
    fn test_summary_from_records() {
        let records = vec![
            PriceRecord::new(1, date("2024-01-01"), "A", "Fruit", price("1.50")),
            PriceRecord::new(2, date("2024-01-02"), "B", "Fruit", price("2.50")),
            PriceRecord::new(3, date("2024-01-03"), "C", "Veg", price("3.00")),
        ];

        let summary = AggregateSummary::from_records(&records);
        assert_eq!(summary.total_items, 3);
        assert_eq!(summary.total_categories, 2);
        assert_eq!(summary.total_price, price("7.00"));
    }

    #[test]
    fn test_summary_serializes_price_as_number() {
        let summary = AggregateSummary {
            total_items: 2,
            total_categories: 1,
            total_price: price("4.00"),
        };

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["total_items"], 2);
        assert_eq!(json["total_categories"], 1);
        assert_eq!(json["total_price"].as_f64(), Some(4.0));
    }

    proptest! {
        #[test]
        fn prop_summary_matches_naive_totals(
            rows in prop::collection::vec((0u8..6, 0u32..100_000), 0..64)
        ) {
            let records: Vec<PriceRecord> = rows
                .iter()
                .enumerate()
                .map(|(i, (category, cents))| {
                    PriceRecord::new(
                        i as i64,
                        date("2024-01-01"),
                        format!("item-{}", i),
                        format!("category-{}", category),
                        price(&format!("{}.{:02}", cents / 100, cents % 100)),
                    )
                })
                .collect();

            let summary = AggregateSummary::from_records(&records);

            let distinct: HashSet<u8> = rows.iter().map(|(c, _)| *c).collect();
            let cents: u64 = rows.iter().map(|(_, c)| u64::from(*c)).sum();

            prop_assert_eq!(summary.total_items, rows.len() as i64);
            prop_assert_eq!(summary.total_categories, distinct.len() as i64);
            prop_assert_eq!(
                summary.total_price,
                price(&format!("{}.{:02}", cents / 100, cents % 100))
            );
        }
    }
}
