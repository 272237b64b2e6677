use serde::{Deserialize, Serialize};
use upline_core::{EngineError, Settings};

// ─── Plan Tiers ─────────────────────────────────────────────────────────────

/// Membership plan tier. Ordering follows rank: Tier1 < Tier2 < Tier3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Tier1,
    Tier2,
    Tier3,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Tier1, Plan::Tier2, Plan::Tier3];

    /// Stable string codec matching the database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Tier1 => "tier1",
            Plan::Tier2 => "tier2",
            Plan::Tier3 => "tier3",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Plan::Tier1 => 1,
            Plan::Tier2 => 2,
            Plan::Tier3 => 3,
        }
    }

    /// Hierarchy rule: a sponsor may only gate activations for tiers at or
    /// below its own plan.
    pub fn can_sponsor(&self, requested: Plan) -> bool {
        requested.rank() <= self.rank()
    }
}

impl std::str::FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tier1" => Ok(Plan::Tier1),
            "tier2" => Ok(Plan::Tier2),
            "tier3" => Ok(Plan::Tier3),
            other => Err(format!("unknown plan: {other}")),
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Pricing ────────────────────────────────────────────────────────────────

/// Commission amounts for one tier. `gross_price` is what the member pays
/// (revenue reporting only); `direct` and `passive` are the payouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPricing {
    pub gross_price: i64,
    pub direct: i64,
    pub passive: i64,
}

/// Per-tier pricing, externally configurable via `PLAN_PRICING`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingTable {
    tier1: PlanPricing,
    tier2: PlanPricing,
    tier3: PlanPricing,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            tier1: PlanPricing {
                gross_price: 24,
                direct: 16,
                passive: 2,
            },
            tier2: PlanPricing {
                gross_price: 59,
                direct: 40,
                passive: 4,
            },
            tier3: PlanPricing {
                gross_price: 130,
                direct: 85,
                passive: 7,
            },
        }
    }
}

impl PricingTable {
    pub fn get(&self, plan: Plan) -> PlanPricing {
        match plan {
            Plan::Tier1 => self.tier1,
            Plan::Tier2 => self.tier2,
            Plan::Tier3 => self.tier3,
        }
    }

    /// Parse a `tier:gross:direct:passive` comma list, overriding defaults
    /// for the tiers it names.
    pub fn from_spec(spec: &str) -> Result<Self, EngineError> {
        let mut table = Self::default();

        for part in spec.split(',').filter(|p| !p.trim().is_empty()) {
            let fields: Vec<&str> = part.trim().split(':').collect();
            if fields.len() != 4 {
                return Err(EngineError::InvalidInput(format!(
                    "malformed pricing entry: {part}"
                )));
            }

            let plan: Plan = fields[0]
                .parse()
                .map_err(EngineError::InvalidInput)?;
            let parse = |s: &str| {
                s.trim().parse::<i64>().map_err(|_| {
                    EngineError::InvalidInput(format!("malformed pricing amount: {s}"))
                })
            };
            let pricing = PlanPricing {
                gross_price: parse(fields[1])?,
                direct: parse(fields[2])?,
                passive: parse(fields[3])?,
            };

            match plan {
                Plan::Tier1 => table.tier1 = pricing,
                Plan::Tier2 => table.tier2 = pricing,
                Plan::Tier3 => table.tier3 = pricing,
            }
        }

        Ok(table)
    }

    /// Pricing for this deployment: the `PLAN_PRICING` override if set,
    /// defaults otherwise.
    pub fn from_settings(settings: &Settings) -> Result<Self, EngineError> {
        match settings.plan_pricing.as_deref() {
            Some(spec) => Self::from_spec(spec),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_rule() {
        assert!(Plan::Tier1.can_sponsor(Plan::Tier1));
        assert!(!Plan::Tier1.can_sponsor(Plan::Tier2));
        assert!(!Plan::Tier2.can_sponsor(Plan::Tier3));
        assert!(Plan::Tier3.can_sponsor(Plan::Tier1));
        assert!(Plan::Tier3.can_sponsor(Plan::Tier3));
    }

    #[test]
    fn plan_codec_round_trips() {
        for plan in Plan::ALL {
            assert_eq!(plan.as_str().parse::<Plan>().unwrap(), plan);
        }
        assert!("tier4".parse::<Plan>().is_err());
    }

    #[test]
    fn default_pricing_matches_published_table() {
        let table = PricingTable::default();
        assert_eq!(table.get(Plan::Tier1).direct, 16);
        assert_eq!(table.get(Plan::Tier1).passive, 2);
        assert_eq!(table.get(Plan::Tier2).direct, 40);
        assert_eq!(table.get(Plan::Tier2).passive, 4);
        assert_eq!(table.get(Plan::Tier3).direct, 85);
        assert_eq!(table.get(Plan::Tier3).passive, 7);
        assert_eq!(table.get(Plan::Tier3).gross_price, 130);
    }

    #[test]
    fn spec_overrides_named_tiers_only() {
        let table = PricingTable::from_spec("tier2:100:50:5").unwrap();
        assert_eq!(
            table.get(Plan::Tier2),
            PlanPricing {
                gross_price: 100,
                direct: 50,
                passive: 5
            }
        );
        assert_eq!(table.get(Plan::Tier1), PricingTable::default().get(Plan::Tier1));
    }

    #[test]
    fn malformed_spec_is_rejected() {
        assert!(PricingTable::from_spec("tier1:24:16").is_err());
        assert!(PricingTable::from_spec("tier9:1:1:1").is_err());
        assert!(PricingTable::from_spec("tier1:a:b:c").is_err());
    }
}
