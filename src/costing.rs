//! # Cost Calculator
//!
//! Unit, line and recipe cost arithmetic, plus the profit-margin check used
//! when pricing a recipe for sale.

use serde::{Deserialize, Serialize};

use crate::model::IngredientLine;

/// Sale price suggested for a recipe: cost times this markup
pub const DEFAULT_MARKUP: f64 = 3.0;
/// Margins below this percentage are flagged as low
pub const LOW_MARGIN_PERCENT: f64 = 30.0;
/// Margins above this percentage are flagged as excellent
pub const EXCELLENT_MARGIN_PERCENT: f64 = 50.0;

/// Price per unit of a package. A zero (or invalid) package size yields 0.
pub fn unit_cost(price_paid: f64, package_size: f64) -> f64 {
    if package_size > 0.0 && package_size.is_finite() {
        price_paid / package_size
    } else {
        0.0
    }
}

/// Cost of the quantity a recipe uses
pub fn line_cost(unit_cost: f64, quantity_used: f64) -> f64 {
    unit_cost * quantity_used
}

/// Sum of line costs
pub fn recipe_cost(lines: &[IngredientLine]) -> f64 {
    lines.iter().map(|line| line.line_cost).sum()
}

pub fn suggested_sale_price(cost: f64, markup: f64) -> f64 {
    cost * markup
}

/// How healthy a margin is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginVerdict {
    Low,
    Healthy,
    Excellent,
}

impl MarginVerdict {
    pub fn from_percent(margin_percent: f64) -> Self {
        if margin_percent < LOW_MARGIN_PERCENT {
            MarginVerdict::Low
        } else if margin_percent > EXCELLENT_MARGIN_PERCENT {
            MarginVerdict::Excellent
        } else {
            MarginVerdict::Healthy
        }
    }
}

/// Profit and margin of selling a recipe at a given price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginAnalysis {
    pub cost: f64,
    pub sale_price: f64,
    pub profit: f64,
    /// profit / sale price × 100
    pub margin_percent: f64,
    pub verdict: MarginVerdict,
}

impl MarginAnalysis {
    /// Returns `None` when the sale price is not positive: there is no margin to speak of
    pub fn new(cost: f64, sale_price: f64) -> Option<Self> {
        if sale_price <= 0.0 || !sale_price.is_finite() {
            return None;
        }
        let profit = sale_price - cost;
        let margin_percent = profit / sale_price * 100.0;
        Some(Self {
            cost,
            sale_price,
            profit,
            margin_percent,
            verdict: MarginVerdict::from_percent(margin_percent),
        })
    }

    /// Analyse at the suggested price (cost × markup)
    pub fn with_markup(cost: f64, markup: f64) -> Option<Self> {
        Self::new(cost, suggested_sale_price(cost, markup))
    }
}
