//! Table definitions served by the bundled binary.
//!
//! Tax rules (current and historical flavors) and carrier preferences, a
//! small reference table that is eager-loaded at startup.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::key::{CacheKey, HistoricalKey};
use crate::loader::TableLoader;
use crate::record::{Record, Validity};

pub const TAX_RULES: &str = "TaxRulesRecord";
pub const TAX_RULES_HISTORICAL: &str = "TaxRulesRecordHistorical";
pub const CARRIER_PREFERENCE: &str = "CarrierPreference";

// == Tax Rules ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxRulesRecord {
    pub nation: String,
    pub tax_point_tag: char,
    pub seq_no: u32,
    pub tax_code: String,
    /// Amount in minor currency units
    pub tax_amount: i64,
    pub currency: String,
    pub validity: Validity,
}

impl Record for TaxRulesRecord {
    fn validity(&self) -> Validity {
        self.validity
    }

    fn memory_estimate(&self) -> usize {
        std::mem::size_of::<Self>() + self.nation.len() + self.tax_code.len() + self.currency.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxRulesKey {
    pub nation: String,
    pub tax_point_tag: char,
}

impl TaxRulesKey {
    pub fn new(nation: impl Into<String>, tax_point_tag: char) -> Self {
        Self {
            nation: nation.into(),
            tax_point_tag,
        }
    }

    pub fn of(record: &TaxRulesRecord) -> Self {
        Self::new(record.nation.clone(), record.tax_point_tag)
    }
}

impl CacheKey for TaxRulesKey {
    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("NATION", self.nation.clone()),
            ("TAXPOINTTAG", self.tax_point_tag.to_string()),
        ]
    }
}

pub fn tax_rules_loader(rows: Vec<TaxRulesRecord>) -> TableLoader<TaxRulesKey, TaxRulesRecord> {
    TableLoader::new(TAX_RULES, "Taxes", rows, |key: &TaxRulesKey, row: &TaxRulesRecord| {
        row.nation == key.nation && row.tax_point_tag == key.tax_point_tag
    })
}

/// Historical flavor: one fetch covers every row overlapping the key's bucket.
pub fn tax_rules_historical_loader(
    rows: Vec<TaxRulesRecord>,
) -> TableLoader<HistoricalKey<TaxRulesKey>, TaxRulesRecord> {
    TableLoader::new(
        TAX_RULES_HISTORICAL,
        "Historical",
        rows,
        |key: &HistoricalKey<TaxRulesKey>, row: &TaxRulesRecord| {
            row.nation == key.key.nation
                && row.tax_point_tag == key.key.tax_point_tag
                && key.bucket.overlaps(&row.validity)
        },
    )
}

/// Deterministic demo rows around `reference`: per nation and tax point, one
/// long-lived rule, one expired, one future and one with an effective window.
pub fn sample_tax_rules(reference: NaiveDateTime) -> Vec<TaxRulesRecord> {
    const NATIONS: [(&str, &str); 6] = [
        ("US", "USD"),
        ("CA", "CAD"),
        ("GB", "GBP"),
        ("DE", "EUR"),
        ("FR", "EUR"),
        ("JP", "JPY"),
    ];
    let days = Duration::days;

    let mut rows = Vec::new();
    for (n, (nation, currency)) in NATIONS.iter().enumerate() {
        for tag in ['D', 'S'] {
            let windows = [
                Validity::new(reference - days(60), reference + days(365)),
                Validity::new(reference - days(365), reference - days(30)),
                Validity::new(reference + days(10), reference + days(400)),
                Validity::new(reference - days(90), reference + days(90))
                    .with_effective(reference, reference + days(20)),
            ];
            for (i, validity) in windows.into_iter().enumerate() {
                let seq_no = (i as u32 + 1) * 100;
                rows.push(TaxRulesRecord {
                    nation: nation.to_string(),
                    tax_point_tag: tag,
                    seq_no,
                    tax_code: format!("{}{}", nation, i + 1),
                    tax_amount: (n as i64 + 1) * 250 + seq_no as i64,
                    currency: currency.to_string(),
                    validity,
                });
            }
        }
    }
    rows
}

// == Carrier Preference ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierPreference {
    pub carrier: String,
    pub apply_single_tax_per_segment: bool,
    pub fare_calc_carrier: String,
    pub validity: Validity,
}

impl Record for CarrierPreference {
    fn validity(&self) -> Validity {
        self.validity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CarrierKey {
    pub carrier: String,
}

impl CarrierKey {
    pub fn new(carrier: impl Into<String>) -> Self {
        Self {
            carrier: carrier.into(),
        }
    }
}

impl CacheKey for CarrierKey {
    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![("CARRIER", self.carrier.clone())]
    }
}

/// Eager-loaded: [`Cache::warm_up`](crate::cache::Cache::warm_up) populates every carrier.
pub fn carrier_preference_loader(
    rows: Vec<CarrierPreference>,
) -> TableLoader<CarrierKey, CarrierPreference> {
    TableLoader::new(
        CARRIER_PREFERENCE,
        "Rules",
        rows,
        |key: &CarrierKey, row: &CarrierPreference| row.carrier == key.carrier,
    )
    .with_eager_load(|row: &CarrierPreference| CarrierKey::new(row.carrier.clone()))
}

pub fn sample_carrier_preferences(reference: NaiveDateTime) -> Vec<CarrierPreference> {
    ["AA", "BA", "LH", "AF", "JL", "AC"]
        .iter()
        .enumerate()
        .map(|(i, carrier)| CarrierPreference {
            carrier: carrier.to_string(),
            apply_single_tax_per_segment: i % 2 == 0,
            fare_calc_carrier: carrier.to_string(),
            validity: Validity::new(
                reference - Duration::days(365),
                reference + Duration::days(3650),
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn reference() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_sample_rows_share_key_columns_per_group() {
        let rows = sample_tax_rules(reference());
        assert_eq!(rows.len(), 6 * 2 * 4);
        let us_d: Vec<_> = rows
            .iter()
            .filter(|r| TaxRulesKey::of(r) == TaxRulesKey::new("US", 'D'))
            .collect();
        assert_eq!(us_d.len(), 4);
    }

    #[test]
    fn test_sample_rows_have_mixed_currency() {
        let rows = sample_tax_rules(reference());
        let current = rows
            .iter()
            .filter(|r| r.nation == "US" && r.tax_point_tag == 'D')
            .filter(|r| r.is_current(reference() + Duration::days(5)))
            .count();
        // long-lived rule plus the effective-window rule
        assert_eq!(current, 2);
    }

    #[test]
    fn test_key_flat() {
        assert_eq!(TaxRulesKey::new("US", 'D').flat(), "US|D");
        assert_eq!(CarrierKey::new("AA").flat(), "AA");
    }
}
