//! # Store Module
//!
//! PostgreSQL persistence for recipes, stock lots and production history.
//!
//! Stock lots carry a `version` column that every write bumps. Production
//! deductions are applied with check-and-set updates inside one transaction
//! together with the history insert, so a confirmed production is either
//! fully recorded or not at all.

use std::collections::BTreeMap;

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgExecutor, Postgres, Row, Transaction};
use tracing::{debug, info, warn};

use crate::error::{CostingError, Result};
use crate::model::{
    IngredientLine, PriceReference, ProducedItem, ProductionRecord, Recipe, ShortfallNote,
    StockLot, Unit, stock_lot_id,
};
use crate::planning::DeductionPlan;

const MAX_CONNECTIONS: u32 = 5;

const RECIPE_COLUMNS: &str = "id, name, author, ingredients, created_at, updated_at";

const LOT_COLUMNS: &str = "id, name, brand, market, quantity, reference_price, \
    reference_package_size, unit, version, created_at, updated_at";

const HISTORY_COLUMNS: &str = "id, items, quantity_produced, estimated_cost, consumed_cost, \
    revenue, forced, shortfalls, produced_at";

/// Open a connection pool
pub async fn connect(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS recipes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            author TEXT NOT NULL,
            ingredients TEXT NOT NULL,
            total_cost DOUBLE PRECISION NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS stock_lots (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            ingredient_key TEXT NOT NULL,
            brand TEXT,
            market TEXT,
            quantity DOUBLE PRECISION NOT NULL CHECK (quantity >= 0),
            reference_price DOUBLE PRECISION NOT NULL,
            reference_package_size DOUBLE PRECISION NOT NULL,
            unit TEXT NOT NULL,
            version BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS stock_lots_ingredient_key_idx ON stock_lots (ingredient_key)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS production_history (
            id BIGSERIAL PRIMARY KEY,
            items TEXT NOT NULL,
            quantity_produced DOUBLE PRECISION NOT NULL,
            estimated_cost DOUBLE PRECISION NOT NULL,
            consumed_cost DOUBLE PRECISION NOT NULL,
            revenue DOUBLE PRECISION,
            forced BOOLEAN NOT NULL DEFAULT FALSE,
            shortfalls TEXT NOT NULL,
            produced_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS production_history_produced_at_idx
         ON production_history (produced_at DESC)",
    )
    .execute(pool)
    .await?;

    info!("Database schema initialized successfully");
    Ok(())
}

fn recipe_from_row(row: &PgRow) -> Result<Recipe> {
    let ingredients: String = row.try_get("ingredients")?;
    let ingredients: Vec<IngredientLine> = serde_json::from_str(&ingredients)?;

    let mut recipe = Recipe {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        author: row.try_get("author")?,
        ingredients,
        total_cost: 0.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    };
    // stored costs are never trusted over their inputs
    recipe.recompute_totals();
    Ok(recipe)
}

fn lot_from_row(row: &PgRow) -> Result<StockLot> {
    let unit: String = row.try_get("unit")?;
    Ok(StockLot {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        brand: row.try_get("brand")?,
        market: row.try_get("market")?,
        quantity: row.try_get("quantity")?,
        reference_price: row.try_get("reference_price")?,
        reference_package_size: row.try_get("reference_package_size")?,
        unit: unit.parse()?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn history_from_row(row: &PgRow) -> Result<ProductionRecord> {
    let items: String = row.try_get("items")?;
    let shortfalls: String = row.try_get("shortfalls")?;
    Ok(ProductionRecord {
        id: Some(row.try_get("id")?),
        items: serde_json::from_str::<Vec<ProducedItem>>(&items)?,
        quantity_produced: row.try_get("quantity_produced")?,
        estimated_cost: row.try_get("estimated_cost")?,
        consumed_cost: row.try_get("consumed_cost")?,
        revenue: row.try_get("revenue")?,
        forced: row.try_get("forced")?,
        shortfalls: serde_json::from_str::<Vec<ShortfallNote>>(&shortfalls)?,
        produced_at: row.try_get("produced_at")?,
    })
}

/// Insert or overwrite a recipe by its derived id.
///
/// The price, package size and unit of every line are remembered on the
/// matching brandless stock lot in the same transaction.
pub async fn save_recipe(pool: &PgPool, recipe: &Recipe) -> Result<Recipe> {
    info!(recipe_id = %recipe.id, ingredients = recipe.ingredients.len(), "Saving recipe");

    let mut recipe = recipe.clone();
    recipe.recompute_totals();
    let ingredients = serde_json::to_string(&recipe.ingredients)?;

    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        "INSERT INTO recipes (id, name, author, ingredients, total_cost)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (id) DO UPDATE SET
             name = EXCLUDED.name,
             author = EXCLUDED.author,
             ingredients = EXCLUDED.ingredients,
             total_cost = EXCLUDED.total_cost,
             updated_at = NOW()
         RETURNING created_at, updated_at",
    )
    .bind(&recipe.id)
    .bind(&recipe.name)
    .bind(&recipe.author)
    .bind(&ingredients)
    .bind(recipe.total_cost)
    .fetch_one(&mut *tx)
    .await?;

    recipe.created_at = row.try_get("created_at")?;
    recipe.updated_at = row.try_get("updated_at")?;

    remember_prices(&mut tx, &recipe.ingredients).await?;

    tx.commit().await?;

    info!(recipe_id = %recipe.id, total_cost = recipe.total_cost, "Recipe saved");
    Ok(recipe)
}

/// Record each line's purchase data on its brandless stock lot.
///
/// Missing lots are created empty; a lot holding stock in a different unit
/// keeps its unit and prices so its quantity stays meaningful.
async fn remember_prices(
    tx: &mut Transaction<'_, Postgres>,
    lines: &[IngredientLine],
) -> Result<()> {
    for line in lines {
        let lot_id = stock_lot_id(&line.name, None, None);
        debug!(lot_id = %lot_id, price = line.purchase_price, "Remembering ingredient price");

        sqlx::query(
            "INSERT INTO stock_lots
                 (id, name, ingredient_key, brand, market, quantity,
                  reference_price, reference_package_size, unit)
             VALUES ($1, $2, $3, NULL, NULL, 0, $4, $5, $6)
             ON CONFLICT (id) DO UPDATE SET
                 reference_price = EXCLUDED.reference_price,
                 reference_package_size = EXCLUDED.reference_package_size,
                 unit = EXCLUDED.unit,
                 version = stock_lots.version + 1,
                 updated_at = NOW()
             WHERE stock_lots.quantity = 0 OR stock_lots.unit = EXCLUDED.unit",
        )
        .bind(&lot_id)
        .bind(&line.name)
        .bind(line.key())
        .bind(line.purchase_price)
        .bind(line.package_size)
        .bind(line.unit.display_name())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Read a recipe by id
pub async fn read_recipe(pool: &PgPool, recipe_id: &str) -> Result<Option<Recipe>> {
    debug!(recipe_id, "Reading recipe");

    let sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = $1");
    let row = sqlx::query(&sql)
        .bind(recipe_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(recipe_from_row).transpose()
}

/// All recipes, sorted by name then author
pub async fn list_recipes(pool: &PgPool) -> Result<Vec<Recipe>> {
    let sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes ORDER BY name, author");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(recipe_from_row).collect()
}

/// Delete a recipe by id; returns whether it existed
pub async fn delete_recipe(pool: &PgPool, recipe_id: &str) -> Result<bool> {
    info!(recipe_id, "Deleting recipe");

    let result = sqlx::query("DELETE FROM recipes WHERE id = $1")
        .bind(recipe_id)
        .execute(pool)
        .await?;

    if result.rows_affected() > 0 {
        info!(recipe_id, "Recipe deleted");
        Ok(true)
    } else {
        info!(recipe_id, "No recipe found to delete");
        Ok(false)
    }
}

/// Add a purchase to stock.
///
/// A new lot is inserted as given. An existing lot with the same id gets the
/// quantity added (converted to the lot's unit) and its reference price
/// refreshed when the purchase states a package size; otherwise the stored
/// price is kept. Units of different dimensions are rejected.
pub async fn add_stock(pool: &PgPool, purchase: &StockLot) -> Result<StockLot> {
    info!(lot_id = %purchase.id, quantity = purchase.quantity, unit = %purchase.unit, "Adding stock");

    let mut tx = pool.begin().await?;

    let sql = format!("SELECT {LOT_COLUMNS} FROM stock_lots WHERE id = $1 FOR UPDATE");
    let existing = sqlx::query(&sql)
        .bind(&purchase.id)
        .fetch_optional(&mut *tx)
        .await?
        .as_ref()
        .map(lot_from_row)
        .transpose()?;

    let row = match existing {
        None => {
            let sql = format!(
                "INSERT INTO stock_lots
                     (id, name, ingredient_key, brand, market, quantity,
                      reference_price, reference_package_size, unit)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 RETURNING {LOT_COLUMNS}"
            );
            sqlx::query(&sql)
                .bind(&purchase.id)
                .bind(&purchase.name)
                .bind(purchase.key())
                .bind(&purchase.brand)
                .bind(&purchase.market)
                .bind(purchase.quantity)
                .bind(purchase.reference_price)
                .bind(purchase.reference_package_size)
                .bind(purchase.unit.display_name())
                .fetch_one(&mut *tx)
                .await?
        }
        Some(lot) => {
            if !lot.unit.is_compatible(&purchase.unit) {
                return Err(CostingError::Validation(format!(
                    "stock lot '{}' is tracked in {}, cannot add {}",
                    lot.label(),
                    lot.unit,
                    purchase.unit
                )));
            }
            let added = lot.unit.from_base(purchase.quantity_in_base());
            // a purchase without a package size carries no price
            let (price, package_size) = if purchase.reference_package_size > 0.0 {
                (
                    purchase.reference_price,
                    lot.unit.from_base(purchase.unit.to_base(purchase.reference_package_size)),
                )
            } else {
                (lot.reference_price, lot.reference_package_size)
            };

            let sql = format!(
                "UPDATE stock_lots SET
                     quantity = quantity + $1,
                     reference_price = $2,
                     reference_package_size = $3,
                     version = version + 1,
                     updated_at = NOW()
                 WHERE id = $4
                 RETURNING {LOT_COLUMNS}"
            );
            sqlx::query(&sql)
                .bind(added)
                .bind(price)
                .bind(package_size)
                .bind(&lot.id)
                .fetch_one(&mut *tx)
                .await?
        }
    };

    let lot = lot_from_row(&row)?;
    tx.commit().await?;

    info!(lot_id = %lot.id, quantity = lot.quantity, version = lot.version, "Stock updated");
    Ok(lot)
}

/// Read a stock lot by id
pub async fn read_stock_lot(pool: &PgPool, lot_id: &str) -> Result<Option<StockLot>> {
    let sql = format!("SELECT {LOT_COLUMNS} FROM stock_lots WHERE id = $1");
    let row = sqlx::query(&sql).bind(lot_id).fetch_optional(pool).await?;
    row.as_ref().map(lot_from_row).transpose()
}

/// All stock lots in insertion order
pub async fn list_stock_lots(pool: &PgPool) -> Result<Vec<StockLot>> {
    let sql = format!("SELECT {LOT_COLUMNS} FROM stock_lots ORDER BY created_at, id");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(lot_from_row).collect()
}

/// Stock lots for the given canonical ingredient keys, in insertion order
pub async fn list_stock_lots_for(pool: &PgPool, keys: &[String]) -> Result<Vec<StockLot>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {LOT_COLUMNS} FROM stock_lots WHERE ingredient_key = ANY($1) ORDER BY created_at, id"
    );
    let rows = sqlx::query(&sql).bind(keys).fetch_all(pool).await?;
    rows.iter().map(lot_from_row).collect()
}

/// Delete a stock lot by id; returns whether it existed
pub async fn delete_stock_lot(pool: &PgPool, lot_id: &str) -> Result<bool> {
    info!(lot_id, "Deleting stock lot");

    let result = sqlx::query("DELETE FROM stock_lots WHERE id = $1")
        .bind(lot_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Latest known purchase data per canonical ingredient key, for pre-filling
/// new lines
pub async fn known_prices(pool: &PgPool) -> Result<BTreeMap<String, PriceReference>> {
    let rows = sqlx::query(
        "SELECT ingredient_key, reference_price, reference_package_size, unit
         FROM stock_lots
         WHERE reference_package_size > 0
         ORDER BY updated_at, id",
    )
    .fetch_all(pool)
    .await?;

    let mut prices = BTreeMap::new();
    for row in &rows {
        let unit: String = row.try_get("unit")?;
        let unit: Unit = unit.parse()?;
        prices.insert(
            row.try_get::<String, _>("ingredient_key")?,
            PriceReference {
                price: row.try_get("reference_price")?,
                package_size: row.try_get("reference_package_size")?,
                unit,
            },
        );
    }
    Ok(prices)
}

async fn insert_history<'e, E>(executor: E, record: &ProductionRecord) -> Result<ProductionRecord>
where
    E: PgExecutor<'e>,
{
    let items = serde_json::to_string(&record.items)?;
    let shortfalls = serde_json::to_string(&record.shortfalls)?;

    let row = sqlx::query(
        "INSERT INTO production_history
             (items, quantity_produced, estimated_cost, consumed_cost,
              revenue, forced, shortfalls, produced_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING id, produced_at",
    )
    .bind(&items)
    .bind(record.quantity_produced)
    .bind(record.estimated_cost)
    .bind(record.consumed_cost)
    .bind(record.revenue)
    .bind(record.forced)
    .bind(&shortfalls)
    .bind(record.produced_at)
    .fetch_one(executor)
    .await?;

    let mut stored = record.clone();
    stored.id = Some(row.try_get("id")?);
    stored.produced_at = row.try_get("produced_at")?;
    Ok(stored)
}

/// Append a history record on its own
pub async fn append_history(pool: &PgPool, record: &ProductionRecord) -> Result<ProductionRecord> {
    let stored = insert_history(pool, record).await?;
    info!(history_id = ?stored.id, "Production history appended");
    Ok(stored)
}

/// Most recent history records first
pub async fn list_history(pool: &PgPool, limit: i64) -> Result<Vec<ProductionRecord>> {
    let sql = format!(
        "SELECT {HISTORY_COLUMNS} FROM production_history ORDER BY produced_at DESC, id DESC LIMIT $1"
    );
    let rows = sqlx::query(&sql).bind(limit).fetch_all(pool).await?;
    rows.iter().map(history_from_row).collect()
}

/// Apply staged deductions and append the history record atomically.
///
/// Each lot is updated only if its version still matches the one the plan
/// was computed from; otherwise the transaction is rolled back and a
/// `Conflict` is returned so the caller can re-plan.
pub async fn commit_production(
    pool: &PgPool,
    plan: &DeductionPlan,
    record: &ProductionRecord,
) -> Result<ProductionRecord> {
    info!(deductions = plan.deductions.len(), "Committing production");

    let mut tx = pool.begin().await?;

    for deduction in &plan.deductions {
        let result = sqlx::query(
            "UPDATE stock_lots
             SET quantity = $1, version = version + 1, updated_at = NOW()
             WHERE id = $2 AND version = $3",
        )
        .bind(deduction.new_quantity.max(0.0))
        .bind(&deduction.lot_id)
        .bind(deduction.expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            warn!(
                lot_id = %deduction.lot_id,
                expected_version = deduction.expected_version,
                "Stock lot changed since planning, rolling back"
            );
            return Err(CostingError::Conflict(format!(
                "stock lot '{}' changed since the plan was computed",
                deduction.lot_id
            )));
        }
    }

    let stored = insert_history(&mut *tx, record).await?;
    tx.commit().await?;

    info!(history_id = ?stored.id, "Production committed");
    Ok(stored)
}
