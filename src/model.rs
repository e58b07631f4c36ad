//! # Recipe and Stock Data Model
//!
//! Records persisted by the store: priced ingredient lines, recipes built
//! from them, stock lots on hand, and append-only production records.
//!
//! ## Identity
//!
//! Names are matched through one canonical key (see [`normalize_key`]).
//! The same key drives stock lookups and id derivation, so "Farinha de Trigo"
//! and "farinha  de trigo" refer to the same ingredient everywhere.
//!
//! ## Usage
//!
//! ```rust
//! use recipe_costing::model::{IngredientLine, Recipe, Unit};
//!
//! let flour = IngredientLine::new("Flour", 5.0, 1000.0, Unit::Grams, 250.0).unwrap();
//! let recipe = Recipe::new("Carrot Cake", "Ana", vec![flour]).unwrap();
//! assert_eq!(recipe.id, "carrot_cake__ana");
//! assert!((recipe.total_cost - 1.25).abs() < 1e-9);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::costing;
use crate::error::{CostingError, Result};

/// Separator between the normalized parts of a derived id
pub const ID_SEPARATOR: &str = "__";

/// Maximum accepted length for names and authors
pub const MAX_NAME_LENGTH: usize = 255;

/// Measurement units accepted for purchases and recipe lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    /// Grams
    #[serde(rename = "g")]
    Grams,
    /// Kilograms
    #[serde(rename = "kg")]
    Kilograms,
    /// Milliliters
    #[serde(rename = "ml")]
    Milliliters,
    /// Liters
    #[serde(rename = "L")]
    Liters,
    /// Individual pieces/items
    #[serde(rename = "unid")]
    Pieces,
}

/// Physical dimension of a unit; only units of the same dimension convert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Mass,
    Volume,
    Count,
}

impl Unit {
    /// Short label used in storage and display
    pub fn display_name(&self) -> &'static str {
        match self {
            Unit::Grams => "g",
            Unit::Kilograms => "kg",
            Unit::Milliliters => "ml",
            Unit::Liters => "L",
            Unit::Pieces => "unid",
        }
    }

    pub fn dimension(&self) -> Dimension {
        match self {
            Unit::Grams | Unit::Kilograms => Dimension::Mass,
            Unit::Milliliters | Unit::Liters => Dimension::Volume,
            Unit::Pieces => Dimension::Count,
        }
    }

    /// Smallest unit of the same dimension, used when pooling quantities
    pub fn base_unit(&self) -> Unit {
        match self.dimension() {
            Dimension::Mass => Unit::Grams,
            Dimension::Volume => Unit::Milliliters,
            Dimension::Count => Unit::Pieces,
        }
    }

    fn base_factor(&self) -> f64 {
        match self {
            Unit::Kilograms | Unit::Liters => 1000.0,
            Unit::Grams | Unit::Milliliters | Unit::Pieces => 1.0,
        }
    }

    /// Convert a quantity in this unit into the base unit
    pub fn to_base(&self, quantity: f64) -> f64 {
        quantity * self.base_factor()
    }

    /// Convert a base-unit quantity back into this unit
    pub fn from_base(&self, quantity: f64) -> f64 {
        quantity / self.base_factor()
    }

    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.dimension() == other.dimension()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Unit {
    type Err = CostingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "g" | "gram" | "grams" | "grama" | "gramas" => Ok(Unit::Grams),
            "kg" | "kilogram" | "kilograms" | "quilo" | "quilos" => Ok(Unit::Kilograms),
            "ml" | "milliliter" | "milliliters" | "mililitro" | "mililitros" => {
                Ok(Unit::Milliliters)
            }
            "l" | "liter" | "liters" | "litre" | "litres" | "litro" | "litros" => Ok(Unit::Liters),
            "unid" | "un" | "unit" | "units" | "piece" | "pieces" | "pcs" => Ok(Unit::Pieces),
            other => Err(CostingError::Validation(format!("unknown unit '{other}'"))),
        }
    }
}

/// Canonical form of a name: lowercased words joined by a single `_`.
///
/// Whitespace and underscores both separate words, so a key never starts or
/// ends with `_` and never contains [`ID_SEPARATOR`].
pub fn normalize_key(name: &str) -> String {
    name.split(|c: char| c.is_whitespace() || c == '_')
        .filter(|word| !word.is_empty())
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Derive the identity key of a recipe from its name and author
pub fn recipe_id(name: &str, author: &str) -> String {
    format!("{}{ID_SEPARATOR}{}", normalize_key(name), normalize_key(author))
}

/// Derive the identity key of a stock lot.
///
/// Brand and market keep fixed slots (`name__brand__market`); only trailing
/// empty slots are dropped, so a market-only lot is `flour____acme` while a
/// brand-only lot is `flour__acme`.
pub fn stock_lot_id(name: &str, brand: Option<&str>, market: Option<&str>) -> String {
    let mut parts = vec![
        normalize_key(name),
        brand.map(normalize_key).unwrap_or_default(),
        market.map(normalize_key).unwrap_or_default(),
    ];
    while parts.len() > 1 && parts.last().is_some_and(|part| part.is_empty()) {
        parts.pop();
    }
    parts.join(ID_SEPARATOR)
}

fn validate_name(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if normalize_key(trimmed).is_empty() {
        return Err(CostingError::Validation(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(CostingError::Validation(format!(
            "{field} must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_amount(field: &str, value: f64, allow_zero: bool) -> Result<f64> {
    if !value.is_finite() || value < 0.0 || (!allow_zero && value == 0.0) {
        let expectation = if allow_zero { "zero or positive" } else { "greater than zero" };
        return Err(CostingError::Validation(format!("{field} must be {expectation}")));
    }
    Ok(value)
}

fn clean_qualifier(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// One priced ingredient inside a recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientLine {
    /// Ingredient name as entered (e.g., "Leite Condensado")
    pub name: String,
    /// Price paid for the whole package
    pub purchase_price: f64,
    /// Size of the package, in `unit`
    pub package_size: f64,
    pub unit: Unit,
    /// Quantity the recipe uses, in `unit`
    pub quantity_used: f64,
    /// Derived: price per unit
    pub unit_cost: f64,
    /// Derived: cost of the quantity used
    pub line_cost: f64,
}

impl IngredientLine {
    /// Create a validated line; rejects a missing name, a zero package size
    /// and a zero quantity before computing costs
    pub fn new(
        name: &str,
        purchase_price: f64,
        package_size: f64,
        unit: Unit,
        quantity_used: f64,
    ) -> Result<Self> {
        let name = validate_name("ingredient name", name)?;
        let purchase_price = validate_amount("purchase price", purchase_price, true)?;
        let package_size = validate_amount("package size", package_size, false)?;
        let quantity_used = validate_amount("quantity used", quantity_used, false)?;

        let mut line = Self {
            name,
            purchase_price,
            package_size,
            unit,
            quantity_used,
            unit_cost: 0.0,
            line_cost: 0.0,
        };
        line.recompute();
        Ok(line)
    }

    /// Re-derive unit and line cost from price, package size and quantity
    pub fn recompute(&mut self) {
        self.unit_cost = costing::unit_cost(self.purchase_price, self.package_size);
        self.line_cost = costing::line_cost(self.unit_cost, self.quantity_used);
    }

    pub fn key(&self) -> String {
        normalize_key(&self.name)
    }

    /// Quantity used, expressed in the base unit of its dimension
    pub fn quantity_in_base(&self) -> f64 {
        self.unit.to_base(self.quantity_used)
    }
}

impl FromStr for IngredientLine {
    type Err = CostingError;

    /// Parses `name:price:package_size:unit:quantity_used`; the name may
    /// itself contain colons
    fn from_str(s: &str) -> Result<Self> {
        let mut fields = s.rsplitn(5, ':');
        let (Some(quantity), Some(unit), Some(package), Some(price), Some(name)) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Err(CostingError::Validation(format!(
                "expected name:price:package:unit:quantity, got '{s}'"
            )));
        };

        let number = |field: &str, raw: &str| {
            raw.trim()
                .replace(',', ".")
                .parse::<f64>()
                .map_err(|_| CostingError::Validation(format!("invalid {field} '{raw}'")))
        };

        Self::new(
            name,
            number("price", price)?,
            number("package size", package)?,
            unit.parse()?,
            number("quantity", quantity)?,
        )
    }
}

/// A named recipe owned by an author
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    /// Derived from name and author, see [`recipe_id`]
    pub id: String,
    pub name: String,
    pub author: String,
    pub ingredients: Vec<IngredientLine>,
    /// Derived: sum of line costs
    pub total_cost: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recipe {
    pub fn new(name: &str, author: &str, ingredients: Vec<IngredientLine>) -> Result<Self> {
        let name = validate_name("recipe name", name)?;
        let author = validate_name("author", author)?;
        if ingredients.is_empty() {
            return Err(CostingError::Validation(
                "a recipe needs at least one ingredient".to_string(),
            ));
        }

        let now = Utc::now();
        let mut recipe = Self {
            id: recipe_id(&name, &author),
            name,
            author,
            ingredients,
            total_cost: 0.0,
            created_at: now,
            updated_at: now,
        };
        recipe.recompute_totals();
        Ok(recipe)
    }

    /// Re-derive every line and the recipe total
    pub fn recompute_totals(&mut self) {
        for line in &mut self.ingredients {
            line.recompute();
        }
        self.total_cost = costing::recipe_cost(&self.ingredients);
    }

    /// Label shown when choosing a recipe, e.g. "Bolo (by Ana)"
    pub fn label(&self) -> String {
        format!("{} (by {})", self.name, self.author)
    }
}

/// A purchased batch of one ingredient, tracked per brand and market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLot {
    /// Derived from name, brand and market, see [`stock_lot_id`]
    pub id: String,
    pub name: String,
    pub brand: Option<String>,
    pub market: Option<String>,
    /// Quantity on hand, in `unit`; never negative
    pub quantity: f64,
    /// Price paid for one reference package
    pub reference_price: f64,
    pub reference_package_size: f64,
    pub unit: Unit,
    /// Bumped on every write; used for check-and-set updates
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockLot {
    pub fn new(
        name: &str,
        brand: Option<&str>,
        market: Option<&str>,
        quantity: f64,
        reference_price: f64,
        reference_package_size: f64,
        unit: Unit,
    ) -> Result<Self> {
        let name = validate_name("ingredient name", name)?;
        let brand = clean_qualifier(brand);
        let market = clean_qualifier(market);
        let quantity = validate_amount("quantity on hand", quantity, true)?;
        let reference_price = validate_amount("reference price", reference_price, true)?;
        let reference_package_size =
            validate_amount("reference package size", reference_package_size, true)?;

        let now = Utc::now();
        Ok(Self {
            id: stock_lot_id(&name, brand.as_deref(), market.as_deref()),
            name,
            brand,
            market,
            quantity,
            reference_price,
            reference_package_size,
            unit,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn key(&self) -> String {
        normalize_key(&self.name)
    }

    /// Price per unit from the reference package; 0 when the size is unknown
    pub fn reference_unit_cost(&self) -> f64 {
        costing::unit_cost(self.reference_price, self.reference_package_size)
    }

    pub fn quantity_in_base(&self) -> f64 {
        self.unit.to_base(self.quantity)
    }

    /// "Flour (Acme, Market X)"
    pub fn label(&self) -> String {
        let qualifiers: Vec<&str> = [self.brand.as_deref(), self.market.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if qualifiers.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, qualifiers.join(", "))
        }
    }
}

/// Reference purchase data remembered per ingredient name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceReference {
    pub price: f64,
    pub package_size: f64,
    pub unit: Unit,
}

impl PriceReference {
    pub fn unit_cost(&self) -> f64 {
        costing::unit_cost(self.price, self.package_size)
    }
}

/// One recipe and how many batches of it were produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducedItem {
    pub recipe_id: String,
    pub recipe_name: String,
    pub multiplier: f64,
}

/// An ingredient that was short when production was confirmed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortfallNote {
    pub ingredient: String,
    pub unit: Unit,
    pub shortfall: f64,
}

/// Append-only record of a confirmed production
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionRecord {
    /// Assigned by the store on insert
    pub id: Option<i64>,
    pub items: Vec<ProducedItem>,
    /// Sum of the multipliers of all items
    pub quantity_produced: f64,
    /// Sum of recipe cost times multiplier
    pub estimated_cost: f64,
    /// Cost of the stock actually consumed, at lot reference prices
    pub consumed_cost: f64,
    pub revenue: Option<f64>,
    /// Produced although some ingredient was short
    pub forced: bool,
    pub shortfalls: Vec<ShortfallNote>,
    pub produced_at: DateTime<Utc>,
}

impl ProductionRecord {
    /// Revenue minus estimated cost, when revenue is known
    pub fn profit(&self) -> Option<f64> {
        self.revenue.map(|revenue| revenue - self.estimated_cost)
    }

    pub fn recipe_names(&self) -> String {
        self.items
            .iter()
            .map(|item| item.recipe_name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
