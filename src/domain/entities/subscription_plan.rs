use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "plan_interval", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanInterval {
    Month,
    Year,
    OneTime,
}

impl PlanInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanInterval::Month => "month",
            PlanInterval::Year => "year",
            PlanInterval::OneTime => "one_time",
        }
    }

    /// Maps the provider's recurring interval. Prices without a recurring
    /// component are one-time purchases.
    pub fn from_provider(s: Option<&str>) -> Self {
        match s {
            Some("month") => PlanInterval::Month,
            Some("year") => PlanInterval::Year,
            _ => PlanInterval::OneTime,
        }
    }
}
