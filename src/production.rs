//! # Production Module
//!
//! The request → validate → (block) → deduct → record sequence for turning
//! recipes into finished goods.
//!
//! Planning is pure ([`build_plan`], [`authorize`], [`build_record`]); the
//! async entry points load recipes and stock from the store and hand the
//! staged plan to [`db::commit_production`]. A version conflict during commit
//! re-runs the whole sequence against fresh stock.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::config::{DeductionOrder, ProductionSettings, ShortfallPolicy};
use crate::db;
use crate::error::{CostingError, Result};
use crate::model::{ProducedItem, ProductionRecord, Recipe, StockLot};
use crate::planning::{
    aggregate_requirements, match_stock, plan_deductions, DeductionPlan, Requirements,
    StockReport,
};
use crate::retry::with_retry;

/// One line of a production order: a recipe id and how many batches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub recipe_id: String,
    pub multiplier: f64,
}

impl FromStr for OrderItem {
    type Err = CostingError;

    /// Parses `recipe_id` (one batch) or `recipe_id=multiplier`
    fn from_str(s: &str) -> Result<Self> {
        let (recipe_id, multiplier) = match s.rsplit_once('=') {
            Some((id, raw)) => {
                let multiplier = raw.trim().parse::<f64>().map_err(|_| {
                    CostingError::Validation(format!("invalid multiplier '{raw}' for '{id}'"))
                })?;
                (id.trim(), multiplier)
            }
            None => (s.trim(), 1.0),
        };

        if recipe_id.is_empty() {
            return Err(CostingError::Validation("recipe id must not be empty".to_string()));
        }
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(CostingError::Validation(format!(
                "multiplier for '{recipe_id}' must be greater than zero"
            )));
        }

        Ok(Self {
            recipe_id: recipe_id.to_string(),
            multiplier,
        })
    }
}

impl fmt::Display for OrderItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.recipe_id, self.multiplier)
    }
}

/// What to produce, plus optional revenue from selling it
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProductionOrder {
    pub items: Vec<OrderItem>,
    pub revenue: Option<f64>,
}

impl ProductionOrder {
    pub fn new(items: Vec<OrderItem>, revenue: Option<f64>) -> Result<Self> {
        if items.is_empty() {
            return Err(CostingError::Validation(
                "a production order needs at least one recipe".to_string(),
            ));
        }
        if let Some(revenue) = revenue {
            if !revenue.is_finite() || revenue < 0.0 {
                return Err(CostingError::Validation(
                    "revenue must be zero or positive".to_string(),
                ));
            }
        }
        Ok(Self { items, revenue })
    }
}

/// Everything computed for an order before anything is written
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionPlan {
    pub batches: Vec<(Recipe, f64)>,
    pub requirements: Requirements,
    pub report: StockReport,
    pub deductions: DeductionPlan,
}

impl ProductionPlan {
    /// Σ recipe cost × multiplier
    pub fn estimated_cost(&self) -> f64 {
        self.batches
            .iter()
            .map(|(recipe, multiplier)| recipe.total_cost * multiplier)
            .sum()
    }
}

/// Result of a confirmed production
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionOutcome {
    pub plan: ProductionPlan,
    pub record: ProductionRecord,
}

/// Aggregate, match and stage deductions for already-loaded batches
pub fn build_plan(
    batches: Vec<(Recipe, f64)>,
    lots: &[StockLot],
    order: DeductionOrder,
) -> Result<ProductionPlan> {
    let requirements = aggregate_requirements(&batches)?;
    let report = match_stock(&requirements, lots);
    let deductions = plan_deductions(&requirements, lots, order);
    Ok(ProductionPlan {
        batches,
        requirements,
        report,
        deductions,
    })
}

/// Apply the shortfall policy. Returns whether production goes ahead despite
/// a shortfall.
pub fn authorize(plan: &ProductionPlan, policy: ShortfallPolicy) -> Result<bool> {
    if plan.report.is_sufficient() {
        return Ok(false);
    }

    let missing = plan
        .report
        .insufficient()
        .map(|line| format!("{} (short {:.2} {})", line.name, line.shortfall, line.unit))
        .collect::<Vec<_>>()
        .join(", ");

    match policy {
        ShortfallPolicy::Block => Err(CostingError::InsufficientStock(missing)),
        ShortfallPolicy::Warn => {
            warn!(missing = %missing, "Producing despite insufficient stock");
            Ok(true)
        }
    }
}

/// History record describing a plan about to be committed
pub fn build_record(plan: &ProductionPlan, revenue: Option<f64>, forced: bool) -> ProductionRecord {
    let items = plan
        .batches
        .iter()
        .map(|(recipe, multiplier)| ProducedItem {
            recipe_id: recipe.id.clone(),
            recipe_name: recipe.name.clone(),
            multiplier: *multiplier,
        })
        .collect::<Vec<_>>();

    ProductionRecord {
        id: None,
        quantity_produced: items.iter().map(|item| item.multiplier).sum(),
        items,
        estimated_cost: plan.estimated_cost(),
        consumed_cost: plan.deductions.consumed_cost(),
        revenue,
        forced,
        shortfalls: plan.report.shortfalls(),
        produced_at: Utc::now(),
    }
}

async fn load_batches(pool: &PgPool, order: &ProductionOrder) -> Result<Vec<(Recipe, f64)>> {
    let mut batches = Vec::with_capacity(order.items.len());
    for item in &order.items {
        let recipe = db::read_recipe(pool, &item.recipe_id)
            .await?
            .ok_or_else(|| CostingError::NotFound(format!("recipe '{}'", item.recipe_id)))?;
        batches.push((recipe, item.multiplier));
    }
    Ok(batches)
}

async fn load_plan(
    pool: &PgPool,
    order: &ProductionOrder,
    deduction_order: DeductionOrder,
) -> Result<ProductionPlan> {
    let batches = load_batches(pool, order).await?;
    let keys = batches
        .iter()
        .flat_map(|(recipe, _)| recipe.ingredients.iter().map(|line| line.key()))
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    let lots = db::list_stock_lots_for(pool, &keys).await?;
    build_plan(batches, &lots, deduction_order)
}

/// Compute the stock check for an order without changing anything
pub async fn preview_production(
    pool: &PgPool,
    settings: &ProductionSettings,
    order: &ProductionOrder,
) -> Result<ProductionPlan> {
    with_retry(&settings.recovery, "preview_production", move || {
        load_plan(pool, order, settings.deduction_order)
    })
    .await
}

/// Validate, deduct stock and record the production.
///
/// Under [`ShortfallPolicy::Block`] an insufficient plan fails with
/// `InsufficientStock` and nothing is written.
pub async fn confirm_production(
    pool: &PgPool,
    settings: &ProductionSettings,
    order: &ProductionOrder,
) -> Result<ProductionOutcome> {
    info!(
        items = order.items.len(),
        policy = %settings.shortfall_policy,
        order = %settings.deduction_order,
        "Confirming production"
    );

    with_retry(&settings.recovery, "confirm_production", move || async move {
        let plan = load_plan(pool, order, settings.deduction_order).await?;
        let forced = authorize(&plan, settings.shortfall_policy)?;
        let record = build_record(&plan, order.revenue, forced);
        let record = db::commit_production(pool, &plan.deductions, &record).await?;

        info!(
            history_id = ?record.id,
            estimated_cost = record.estimated_cost,
            consumed_cost = record.consumed_cost,
            forced,
            "Production recorded"
        );
        Ok(ProductionOutcome { plan, record })
    })
    .await
}
