// libs/booking-cell/src/services/policy.rs
use serde::{Deserialize, Serialize};

/// Treatments that don't match any rule are effectively unlimited.
pub const UNLIMITED_CAPACITY: i32 = 99;

/// One administrator-editable rule: any treatment name containing one of
/// the keywords is capped at `max_capacity` concurrent bookings per
/// (date, slot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityRule {
    pub keywords: Vec<String>,
    pub max_capacity: i32,
}

/// Row shape of the `treatment_capacity_policies` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityPolicyRow {
    pub keyword: String,
    pub max_capacity: i32,
}

/// Maps a treatment name to its per-slot occupancy limit. The single
/// source of truth for capacity - call sites never carry their own limits.
#[derive(Debug, Clone)]
pub struct TreatmentCapacityPolicy {
    rules: Vec<CapacityRule>,
    default_capacity: i32,
}

impl Default for TreatmentCapacityPolicy {
    /// Built-in categories, also used to seed the policy table:
    /// consultation-style treatments take the full chair and staff
    /// attention (capacity 1); whitening/cleaning run several chairs in
    /// parallel (capacity 4).
    fn default() -> Self {
        Self {
            rules: vec![
                CapacityRule {
                    keywords: vec![
                        "初診".to_string(),
                        "無料相談".to_string(),
                        "精密検査".to_string(),
                        "カウンセリング".to_string(),
                    ],
                    max_capacity: 1,
                },
                CapacityRule {
                    keywords: vec!["ホワイトニング".to_string(), "クリーニング".to_string()],
                    max_capacity: 4,
                },
            ],
            default_capacity: UNLIMITED_CAPACITY,
        }
    }
}

impl TreatmentCapacityPolicy {
    /// Build from policy-table rows; rows sharing a capacity collapse into
    /// one rule. Empty input falls back to the built-in defaults.
    pub fn from_rows(rows: Vec<CapacityPolicyRow>) -> Self {
        if rows.is_empty() {
            return Self::default();
        }

        let mut rules: Vec<CapacityRule> = Vec::new();
        for row in rows {
            match rules.iter_mut().find(|rule| rule.max_capacity == row.max_capacity) {
                Some(rule) => rule.keywords.push(row.keyword),
                None => rules.push(CapacityRule {
                    keywords: vec![row.keyword],
                    max_capacity: row.max_capacity,
                }),
            }
        }

        Self {
            rules,
            default_capacity: UNLIMITED_CAPACITY,
        }
    }

    /// Case-insensitive substring match against the rule keywords; the
    /// first matching rule wins.
    pub fn capacity_for(&self, treatment_name: &str) -> i32 {
        let needle = treatment_name.to_lowercase();

        for rule in &self.rules {
            if rule
                .keywords
                .iter()
                .any(|keyword| needle.contains(&keyword.to_lowercase()))
            {
                return rule.max_capacity;
            }
        }

        self.default_capacity
    }
}
