//! # Production Planning
//!
//! Turns a set of (recipe, multiplier) batches into consolidated ingredient
//! requirements, compares them against pooled stock, and stages the per-lot
//! deductions that would satisfy them.
//!
//! Everything here is pure: deductions are computed as a [`DeductionPlan`]
//! of new quantities plus the lot versions they were computed from, and the
//! store applies the whole plan in one transaction.
//!
//! Quantities are pooled in the base unit of their dimension (g, ml, unid);
//! lots whose unit cannot be converted to the requirement's unit are ignored
//! for that requirement and reported.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DeductionOrder;
use crate::error::{CostingError, Result};
use crate::model::{Recipe, ShortfallNote, StockLot, Unit};

/// Quantities below this are treated as zero
pub const QUANTITY_EPSILON: f64 = 1e-9;

/// Total need for one ingredient across a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    /// Canonical ingredient key
    pub key: String,
    /// Name as written in the first recipe line that needed it
    pub name: String,
    /// Base unit the quantity is expressed in
    pub unit: Unit,
    pub quantity: f64,
}

/// Requirements keyed by canonical ingredient key
pub type Requirements = BTreeMap<String, Requirement>;

/// Sum `quantity_used × multiplier` per ingredient across all batches.
///
/// Multipliers must be positive. An ingredient used with units of different
/// dimensions (say grams in one recipe and milliliters in another) cannot be
/// pooled and is rejected.
pub fn aggregate_requirements(batches: &[(Recipe, f64)]) -> Result<Requirements> {
    let mut requirements = Requirements::new();

    for (recipe, multiplier) in batches {
        if !multiplier.is_finite() || *multiplier <= 0.0 {
            return Err(CostingError::Validation(format!(
                "multiplier for '{}' must be greater than zero",
                recipe.name
            )));
        }

        for line in &recipe.ingredients {
            let key = line.key();
            let base_unit = line.unit.base_unit();
            let needed = line.quantity_in_base() * multiplier;

            match requirements.get_mut(&key) {
                Some(existing) if existing.unit != base_unit => {
                    return Err(CostingError::Validation(format!(
                        "ingredient '{}' is used with incompatible units ({} and {})",
                        existing.name, existing.unit, line.unit
                    )));
                }
                Some(existing) => existing.quantity += needed,
                None => {
                    requirements.insert(
                        key.clone(),
                        Requirement {
                            key,
                            name: line.name.clone(),
                            unit: base_unit,
                            quantity: needed,
                        },
                    );
                }
            }
        }
    }

    debug!(ingredients = requirements.len(), batches = batches.len(), "Aggregated requirements");
    Ok(requirements)
}

/// Whether stock covers a requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockState {
    Sufficient,
    Insufficient,
}

/// Requirement compared against pooled stock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockStatus {
    pub key: String,
    pub name: String,
    pub unit: Unit,
    pub required: f64,
    pub available: f64,
    /// max(0, required − available)
    pub shortfall: f64,
    pub state: StockState,
    /// Lots with the same name whose unit cannot be converted
    pub ignored_lots: Vec<String>,
}

/// Stock check for a whole plan
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StockReport {
    pub lines: Vec<StockStatus>,
}

impl StockReport {
    pub fn is_sufficient(&self) -> bool {
        self.lines
            .iter()
            .all(|line| line.state == StockState::Sufficient)
    }

    pub fn insufficient(&self) -> impl Iterator<Item = &StockStatus> {
        self.lines
            .iter()
            .filter(|line| line.state == StockState::Insufficient)
    }

    pub fn shortfalls(&self) -> Vec<ShortfallNote> {
        self.insufficient()
            .map(|line| ShortfallNote {
                ingredient: line.name.clone(),
                unit: line.unit,
                shortfall: line.shortfall,
            })
            .collect()
    }

    pub fn status_for(&self, ingredient: &str) -> Option<&StockStatus> {
        let key = crate::model::normalize_key(ingredient);
        self.lines.iter().find(|line| line.key == key)
    }
}

fn lots_for<'a>(requirement: &Requirement, lots: &'a [StockLot]) -> (Vec<&'a StockLot>, Vec<String>) {
    let mut usable = Vec::new();
    let mut ignored = Vec::new();
    for lot in lots.iter().filter(|lot| lot.key() == requirement.key) {
        if lot.unit.is_compatible(&requirement.unit) {
            usable.push(lot);
        } else {
            ignored.push(lot.id.clone());
        }
    }
    (usable, ignored)
}

/// Compare each requirement with the pooled quantity of every matching lot
pub fn match_stock(requirements: &Requirements, lots: &[StockLot]) -> StockReport {
    let lines = requirements
        .values()
        .map(|requirement| {
            let (usable, ignored_lots) = lots_for(requirement, lots);
            let available: f64 = usable.iter().map(|lot| lot.quantity_in_base()).sum();
            let shortfall = (requirement.quantity - available).max(0.0);
            let state = if shortfall > QUANTITY_EPSILON {
                StockState::Insufficient
            } else {
                StockState::Sufficient
            };
            StockStatus {
                key: requirement.key.clone(),
                name: requirement.name.clone(),
                unit: requirement.unit,
                required: requirement.quantity,
                available,
                shortfall: if state == StockState::Sufficient { 0.0 } else { shortfall },
                state,
                ignored_lots,
            }
        })
        .collect();

    StockReport { lines }
}

/// New quantity for one lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotDeduction {
    pub lot_id: String,
    pub ingredient_key: String,
    /// In the lot's own unit
    pub previous_quantity: f64,
    /// In the lot's own unit; never negative
    pub new_quantity: f64,
    /// Version the lot had when the plan was computed
    pub expected_version: i64,
    /// Amount taken at the lot's reference unit cost
    pub consumed_cost: f64,
}

impl LotDeduction {
    pub fn deducted(&self) -> f64 {
        self.previous_quantity - self.new_quantity
    }
}

/// Staged deductions for a whole plan; nothing has been written yet
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeductionPlan {
    pub deductions: Vec<LotDeduction>,
    /// Needs left over once every matching lot is exhausted
    pub unmet: Vec<ShortfallNote>,
}

impl DeductionPlan {
    pub fn consumed_cost(&self) -> f64 {
        self.deductions.iter().map(|d| d.consumed_cost).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.unmet.is_empty()
    }

    /// Apply the staged quantities to in-memory lots, bumping their version
    pub fn apply_to(&self, lots: &mut [StockLot]) {
        for deduction in &self.deductions {
            if let Some(lot) = lots.iter_mut().find(|lot| lot.id == deduction.lot_id) {
                lot.quantity = deduction.new_quantity.max(0.0);
                lot.version += 1;
            }
        }
    }
}

fn order_lots(lots: &mut [&StockLot], order: DeductionOrder) {
    let by_insertion =
        |a: &&StockLot, b: &&StockLot| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id));
    match order {
        DeductionOrder::Insertion => lots.sort_by(by_insertion),
        DeductionOrder::SmallestFirst => lots.sort_by(|a, b| {
            a.quantity_in_base()
                .partial_cmp(&b.quantity_in_base())
                .unwrap_or(Ordering::Equal)
                .then_with(|| by_insertion(a, b))
        }),
    }
}

/// Stage deductions that satisfy each requirement from its matching lots.
///
/// Lots are visited in `order`; each is drawn down to zero before the next is
/// touched, and none goes below zero. Whatever cannot be covered ends up in
/// [`DeductionPlan::unmet`].
pub fn plan_deductions(
    requirements: &Requirements,
    lots: &[StockLot],
    order: DeductionOrder,
) -> DeductionPlan {
    let mut plan = DeductionPlan::default();

    for requirement in requirements.values() {
        let (mut usable, _) = lots_for(requirement, lots);
        order_lots(&mut usable, order);

        let mut remaining = requirement.quantity;
        for lot in usable {
            if remaining <= QUANTITY_EPSILON {
                break;
            }
            let on_hand = lot.quantity_in_base();
            if on_hand <= QUANTITY_EPSILON {
                continue;
            }

            let taken = on_hand.min(remaining);
            remaining -= taken;
            let new_quantity = lot.unit.from_base(on_hand - taken).max(0.0);
            let taken_in_lot_unit = lot.unit.from_base(taken);

            debug!(
                lot_id = %lot.id,
                ingredient = %requirement.key,
                taken = taken_in_lot_unit,
                new_quantity,
                "Staged lot deduction"
            );

            plan.deductions.push(LotDeduction {
                lot_id: lot.id.clone(),
                ingredient_key: requirement.key.clone(),
                previous_quantity: lot.quantity,
                new_quantity,
                expected_version: lot.version,
                consumed_cost: taken_in_lot_unit * lot.reference_unit_cost(),
            });
        }

        if remaining > QUANTITY_EPSILON {
            plan.unmet.push(ShortfallNote {
                ingredient: requirement.name.clone(),
                unit: requirement.unit,
                shortfall: remaining,
            });
        }
    }

    plan
}
