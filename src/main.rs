//! Recipe costing - operator command line
//!
//! Every command is gated by the shared group password, then runs against
//! the PostgreSQL store named by `DATABASE_URL`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recipe_costing::access::AccessGate;
use recipe_costing::config::{AppConfig, ShortfallPolicy};
use recipe_costing::costing::MarginAnalysis;
use recipe_costing::db;
use recipe_costing::error::CostingError;
use recipe_costing::localization::{init_localization, t_args_lang};
use recipe_costing::model::{IngredientLine, Recipe, StockLot, Unit};
use recipe_costing::production::{confirm_production, preview_production, OrderItem, ProductionOrder};
use recipe_costing::ui_builder;

/// Command-line arguments for recipe-costing
#[derive(Parser, Debug)]
#[command(name = "recipe-costing")]
#[command(about = "Recipe cost calculator with stock-aware production")]
#[command(version)]
struct Args {
    /// Group password
    #[arg(long, env = "PANTRY_PASSWORD", hide_env_values = true)]
    password: String,

    /// Message language, overrides APP_LANGUAGE ("en" or "pt")
    #[arg(long)]
    lang: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cost a single ingredient line without saving it
    Line {
        /// name:price:package_size:unit:quantity_used
        ingredient: IngredientLine,
    },
    /// Manage the recipe library
    Recipe {
        #[command(subcommand)]
        action: RecipeCommand,
    },
    /// Manage stock lots
    Stock {
        #[command(subcommand)]
        action: StockCommand,
    },
    /// Check stock for a production order without changing anything
    Plan {
        /// recipe_id or recipe_id=multiplier
        #[arg(required = true)]
        items: Vec<OrderItem>,
    },
    /// Deduct stock and record a production
    Produce {
        /// recipe_id or recipe_id=multiplier
        #[arg(required = true)]
        items: Vec<OrderItem>,

        /// Revenue from selling the batch
        #[arg(long)]
        revenue: Option<f64>,

        /// "block" or "warn", overrides SHORTFALL_POLICY
        #[arg(long)]
        shortfall_policy: Option<ShortfallPolicy>,
    },
    /// Show recent productions
    History {
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

#[derive(Subcommand, Debug)]
enum RecipeCommand {
    /// Save or overwrite a recipe (same name and author replaces it)
    Save {
        #[arg(long)]
        name: String,
        #[arg(long)]
        author: String,
        /// name:price:package_size:unit:quantity_used, repeatable
        #[arg(long = "ingredient", required = true)]
        ingredients: Vec<IngredientLine>,
    },
    List,
    Show {
        id: String,
    },
    Delete {
        id: String,
    },
    /// Profit and margin at a sale price (default: cost x markup)
    Margin {
        id: String,
        #[arg(long)]
        sale_price: Option<f64>,
        #[arg(long)]
        markup: Option<f64>,
    },
}

#[derive(Subcommand, Debug)]
enum StockCommand {
    /// Add a purchase; an existing lot for the same brand and market is restocked
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        brand: Option<String>,
        #[arg(long)]
        market: Option<String>,
        #[arg(long)]
        quantity: f64,
        #[arg(long)]
        unit: Unit,
        /// Price paid for one reference package
        #[arg(long, requires = "package_size")]
        price: Option<f64>,
        /// Size of the reference package, in the same unit; without it a
        /// restock keeps the lot's known price
        #[arg(long, requires = "price")]
        package_size: Option<f64>,
    },
    List,
    Delete {
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_tracing();

    let args = Args::parse();
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    init_localization().context("Failed to load message bundles")?;

    let language = args.lang.clone().unwrap_or_else(|| config.language.clone());

    match run(args, &config, &language).await {
        Ok(()) => Ok(()),
        Err(err) => match err.downcast_ref::<CostingError>() {
            Some(costing_error) => {
                error!(error = %costing_error, "Command failed");
                eprintln!("{}", ui_builder::format_error(costing_error, &language));
                std::process::exit(1);
            }
            None => Err(err),
        },
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "recipe_costing=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(args: Args, config: &AppConfig, language: &str) -> Result<()> {
    AccessGate::new(config.access_secret.as_str()).check(&args.password)?;

    info!("Connecting to database");
    let pool = db::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    db::init_database_schema(&pool)
        .await
        .context("Failed to initialize database schema")?;

    match args.command {
        Command::Line { ingredient } => {
            println!("{}", ui_builder::format_line_cost(&ingredient, language));
            let prices = db::known_prices(&pool).await?;
            if let Some(reference) = prices.get(&ingredient.key()) {
                println!(
                    "{}",
                    ui_builder::format_known_price(&ingredient.name, reference, language)
                );
            }
        }
        Command::Recipe { action } => run_recipe(&pool, action, config, language).await?,
        Command::Stock { action } => run_stock(&pool, action, language).await?,
        Command::Plan { items } => {
            let order = ProductionOrder::new(items, None)?;
            let plan = preview_production(&pool, &config.production, &order).await?;
            print!("{}", ui_builder::format_plan(&plan, language));
        }
        Command::Produce {
            items,
            revenue,
            shortfall_policy,
        } => {
            let order = ProductionOrder::new(items, revenue)?;
            let mut settings = config.production.clone();
            if let Some(policy) = shortfall_policy {
                settings.shortfall_policy = policy;
            }
            let outcome = confirm_production(&pool, &settings, &order).await?;
            print!("{}", ui_builder::format_plan(&outcome.plan, language));
            print!("{}", ui_builder::format_production_recorded(&outcome.record, language));
        }
        Command::History { limit } => {
            let records = db::list_history(&pool, limit.max(1)).await?;
            print!("{}", ui_builder::format_history(&records, language));
        }
    }

    Ok(())
}

async fn run_recipe(
    pool: &PgPool,
    action: RecipeCommand,
    config: &AppConfig,
    language: &str,
) -> Result<()> {
    match action {
        RecipeCommand::Save {
            name,
            author,
            ingredients,
        } => {
            let recipe = Recipe::new(&name, &author, ingredients)?;
            let saved = db::save_recipe(pool, &recipe).await?;
            println!(
                "{}",
                t_args_lang(
                    "recipe-saved",
                    &[
                        ("name", &saved.label()),
                        ("count", &saved.ingredients.len().to_string()),
                        ("total", &ui_builder::format_money(saved.total_cost)),
                    ],
                    language,
                )
            );
        }
        RecipeCommand::List => {
            let recipes = db::list_recipes(pool).await?;
            print!("{}", ui_builder::format_recipe_list(&recipes, language));
        }
        RecipeCommand::Show { id } => match db::read_recipe(pool, &id).await? {
            Some(recipe) => print!("{}", ui_builder::format_recipe_detail(&recipe, language)),
            None => println!("{}", t_args_lang("recipe-not-found", &[("id", &id)], language)),
        },
        RecipeCommand::Delete { id } => {
            let key = if db::delete_recipe(pool, &id).await? {
                "recipe-deleted"
            } else {
                "recipe-not-found"
            };
            println!("{}", t_args_lang(key, &[("id", &id)], language));
        }
        RecipeCommand::Margin {
            id,
            sale_price,
            markup,
        } => {
            let Some(recipe) = db::read_recipe(pool, &id).await? else {
                println!("{}", t_args_lang("recipe-not-found", &[("id", &id)], language));
                return Ok(());
            };
            let analysis = match sale_price {
                Some(price) => MarginAnalysis::new(recipe.total_cost, price),
                None => MarginAnalysis::with_markup(
                    recipe.total_cost,
                    markup.unwrap_or(config.default_markup),
                ),
            };
            print!("{}", ui_builder::format_margin(analysis.as_ref(), language));
        }
    }
    Ok(())
}

async fn run_stock(pool: &PgPool, action: StockCommand, language: &str) -> Result<()> {
    match action {
        StockCommand::Add {
            name,
            brand,
            market,
            quantity,
            unit,
            price,
            package_size,
        } => {
            let purchase = StockLot::new(
                &name,
                brand.as_deref(),
                market.as_deref(),
                quantity,
                price.unwrap_or(0.0),
                package_size.unwrap_or(0.0),
                unit,
            )?;
            let lot = db::add_stock(pool, &purchase).await?;
            println!("{}", ui_builder::format_stock_saved(&lot, language));
        }
        StockCommand::List => {
            let lots = db::list_stock_lots(pool).await?;
            print!("{}", ui_builder::format_stock_list(&lots, language));
        }
        StockCommand::Delete { id } => {
            let key = if db::delete_stock_lot(pool, &id).await? {
                "stock-deleted"
            } else {
                "stock-not-found"
            };
            println!("{}", t_args_lang(key, &[("id", &id)], language));
        }
    }
    Ok(())
}
