use super::error::AggregateError;

const MAX_DECIMALS: u32 = 10;

/// Names of the engine quantities the aggregator reads.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantityNames {
    pub income_tax: String,
    pub net_income: String,
    /// Summed into a single total-benefits figure per household.
    pub benefits: Vec<String>,
    pub market_income: String,
    pub household_weight: String,
    pub state: String,
    pub age: String,
    pub is_head: String,
    pub is_spouse: String,
    pub is_dependent: String,
}

impl Default for QuantityNames {
    fn default() -> Self {
        Self {
            income_tax: "income_tax".to_string(),
            net_income: "household_net_income_including_health_benefits".to_string(),
            benefits: ["household_benefits", "medicaid", "aca_ptc", "chip"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            market_income: "irs_gross_income".to_string(),
            household_weight: "household_weight".to_string(),
            state: "state_code".to_string(),
            age: "age".to_string(),
            is_head: "is_tax_unit_head".to_string(),
            is_spouse: "is_tax_unit_spouse".to_string(),
            is_dependent: "is_tax_unit_dependent".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    /// A step is recorded for a household when any |delta| is strictly above this.
    pub materiality_threshold: f64,
    pub provision_decimals: u32,
    /// Wide-table totals are rounded to the nearest multiple of this.
    pub total_rounding_unit: f64,
    pub percent_decimals: u32,
    pub weight_decimals: u32,
    pub default_head_age: i64,
    pub quantities: QuantityNames,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            materiality_threshold: 0.5,
            provision_decimals: 2,
            total_rounding_unit: 1.0,
            percent_decimals: 2,
            weight_decimals: 2,
            default_head_age: 40,
            quantities: QuantityNames::default(),
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<(), AggregateError> {
        if !self.materiality_threshold.is_finite() || self.materiality_threshold < 0.0 {
            return Err(AggregateError::invalid_config(
                "materiality threshold must be a finite value >= 0",
            ));
        }

        // totals are whole currency units
        let unit = self.total_rounding_unit;
        if !unit.is_finite() || unit < 1.0 || unit.fract() != 0.0 {
            return Err(AggregateError::invalid_config(
                "total rounding unit must be a whole number >= 1",
            ));
        }

        for (name, decimals) in [
            ("provision decimals", self.provision_decimals),
            ("percent decimals", self.percent_decimals),
            ("weight decimals", self.weight_decimals),
        ] {
            if decimals > MAX_DECIMALS {
                return Err(AggregateError::invalid_config(format!(
                    "{name} must be <= {MAX_DECIMALS}"
                )));
            }
        }

        if self.default_head_age < 0 {
            return Err(AggregateError::invalid_config(
                "default head age must be >= 0",
            ));
        }

        let q = &self.quantities;
        if q.benefits.is_empty() {
            return Err(AggregateError::invalid_config(
                "at least one benefit quantity is required",
            ));
        }
        let named = [
            &q.income_tax,
            &q.net_income,
            &q.market_income,
            &q.household_weight,
            &q.state,
            &q.age,
            &q.is_head,
            &q.is_spouse,
            &q.is_dependent,
        ];
        if named
            .into_iter()
            .chain(q.benefits.iter())
            .any(|name| name.trim().is_empty())
        {
            return Err(AggregateError::invalid_config(
                "quantity names must not be empty",
            ));
        }

        Ok(())
    }
}
