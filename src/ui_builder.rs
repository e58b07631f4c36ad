//! UI Builder module for formatting command output

use crate::costing::{MarginAnalysis, MarginVerdict};
use crate::error::CostingError;
use crate::model::{IngredientLine, PriceReference, ProductionRecord, Recipe, StockLot};
use crate::planning::StockState;
use crate::production::ProductionPlan;

// Import localization
use crate::localization::{t_args_lang, t_lang};

/// Plain two-decimal amount, no currency symbol
pub fn format_money(amount: f64) -> String {
    format!("{amount:.2}")
}

/// Whole numbers without decimals, otherwise up to three decimals
pub fn format_quantity(quantity: f64) -> String {
    if quantity.fract() == 0.0 {
        return format!("{}", quantity as i64);
    }
    let text = format!("{quantity:.3}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Unit and line cost of a single priced line
pub fn format_line_cost(line: &IngredientLine, language: &str) -> String {
    t_args_lang(
        "line-cost",
        &[
            ("name", &line.name),
            ("unit_cost", &format!("{:.4}", line.unit_cost)),
            ("unit", line.unit.display_name()),
            ("line_cost", &format_money(line.line_cost)),
        ],
        language,
    )
}

pub fn format_known_price(name: &str, reference: &PriceReference, language: &str) -> String {
    t_args_lang(
        "known-price",
        &[
            ("name", name),
            ("price", &format_money(reference.price)),
            ("package", &format_quantity(reference.package_size)),
            ("unit", reference.unit.display_name()),
        ],
        language,
    )
}

/// Recipe library listing
pub fn format_recipe_list(recipes: &[Recipe], language: &str) -> String {
    if recipes.is_empty() {
        return t_lang("recipe-list-empty", language);
    }

    let mut result = format!("{}\n", t_lang("recipe-list-header", language));
    for recipe in recipes {
        result.push_str(&format!(
            "• {}\n",
            t_args_lang(
                "recipe-list-entry",
                &[
                    ("label", &recipe.label()),
                    ("id", &recipe.id),
                    ("total", &format_money(recipe.total_cost)),
                ],
                language,
            )
        ));
    }
    result
}

/// Detailed table of one recipe
pub fn format_recipe_detail(recipe: &Recipe, language: &str) -> String {
    let mut result = format!(
        "{}\n",
        t_args_lang(
            "recipe-detail-header",
            &[("label", &recipe.label()), ("id", &recipe.id)],
            language,
        )
    );

    for (i, line) in recipe.ingredients.iter().enumerate() {
        result.push_str(&format!(
            "{}. {}\n",
            i + 1,
            t_args_lang(
                "recipe-detail-line",
                &[
                    ("name", &line.name),
                    ("quantity", &format_quantity(line.quantity_used)),
                    ("unit", line.unit.display_name()),
                    ("package", &format_quantity(line.package_size)),
                    ("price", &format_money(line.purchase_price)),
                    ("line_cost", &format_money(line.line_cost)),
                ],
                language,
            )
        ));
    }

    result.push_str(&t_args_lang(
        "recipe-total",
        &[("total", &format_money(recipe.total_cost))],
        language,
    ));
    result.push('\n');
    result
}

/// Margin summary with its verdict
pub fn format_margin(analysis: Option<&MarginAnalysis>, language: &str) -> String {
    let Some(analysis) = analysis else {
        return t_lang("margin-no-price", language);
    };

    let summary = t_args_lang(
        "margin-summary",
        &[
            ("cost", &format_money(analysis.cost)),
            ("price", &format_money(analysis.sale_price)),
            ("profit", &format_money(analysis.profit)),
            ("margin", &format!("{:.1}", analysis.margin_percent)),
        ],
        language,
    );
    let verdict = match analysis.verdict {
        MarginVerdict::Low => t_lang("margin-low", language),
        MarginVerdict::Healthy => t_lang("margin-healthy", language),
        MarginVerdict::Excellent => t_lang("margin-excellent", language),
    };
    format!("{summary}\n{verdict}\n")
}

fn format_lot_entry(lot: &StockLot, language: &str) -> String {
    t_args_lang(
        "stock-list-entry",
        &[
            ("label", &lot.label()),
            ("id", &lot.id),
            ("quantity", &format_quantity(lot.quantity)),
            ("unit", lot.unit.display_name()),
        ],
        language,
    )
}

/// Stock lots on hand
pub fn format_stock_list(lots: &[StockLot], language: &str) -> String {
    if lots.is_empty() {
        return t_lang("stock-list-empty", language);
    }

    let mut result = format!("{}\n", t_lang("stock-list-header", language));
    for lot in lots {
        result.push_str(&format!("• {}\n", format_lot_entry(lot, language)));
    }
    result
}

pub fn format_stock_saved(lot: &StockLot, language: &str) -> String {
    t_args_lang(
        "stock-saved",
        &[
            ("label", &lot.label()),
            ("quantity", &format_quantity(lot.quantity)),
            ("unit", lot.unit.display_name()),
        ],
        language,
    )
}

/// Per-ingredient stock check for a production plan
pub fn format_plan(plan: &ProductionPlan, language: &str) -> String {
    let mut result = format!("{}\n", t_lang("plan-header", language));

    for line in &plan.report.lines {
        let required = format_quantity(line.required);
        let available = format_quantity(line.available);
        let shortfall = format_quantity(line.shortfall);
        let unit = line.unit.display_name();
        let args = [
            ("name", line.name.as_str()),
            ("required", required.as_str()),
            ("available", available.as_str()),
            ("shortfall", shortfall.as_str()),
            ("unit", unit),
        ];
        let key = match line.state {
            StockState::Sufficient => "plan-line-ok",
            StockState::Insufficient => "plan-line-short",
        };
        result.push_str(&format!("• {}\n", t_args_lang(key, &args, language)));

        if !line.ignored_lots.is_empty() {
            result.push_str(&format!(
                "  {}\n",
                t_args_lang(
                    "plan-ignored-lots",
                    &[("name", &line.name), ("lots", &line.ignored_lots.join(", "))],
                    language,
                )
            ));
        }
    }

    let verdict = if plan.report.is_sufficient() {
        t_lang("plan-sufficient", language)
    } else {
        t_lang("plan-insufficient", language)
    };
    result.push_str(&format!("{verdict}\n"));
    result.push_str(&t_args_lang(
        "plan-estimated-cost",
        &[("cost", &format_money(plan.estimated_cost()))],
        language,
    ));
    result.push('\n');
    result
}

pub fn format_production_recorded(record: &ProductionRecord, language: &str) -> String {
    let mut result = String::new();
    if record.forced {
        result.push_str(&format!("{}\n", t_lang("production-forced", language)));
    }
    result.push_str(&t_args_lang(
        "production-recorded",
        &[
            ("id", &record.id.map(|id| id.to_string()).unwrap_or_default()),
            ("cost", &format_money(record.estimated_cost)),
            ("consumed", &format_money(record.consumed_cost)),
        ],
        language,
    ));
    result.push('\n');
    result
}

/// Production history, most recent first
pub fn format_history(records: &[ProductionRecord], language: &str) -> String {
    if records.is_empty() {
        return t_lang("history-empty", language);
    }

    let mut result = format!("{}\n", t_lang("history-header", language));
    for record in records {
        let mut entry = t_args_lang(
            "history-entry",
            &[
                ("id", &record.id.map(|id| id.to_string()).unwrap_or_default()),
                ("date", &record.produced_at.format("%Y-%m-%d %H:%M").to_string()),
                ("recipes", &record.recipe_names()),
                ("quantity", &format_quantity(record.quantity_produced)),
                ("cost", &format_money(record.estimated_cost)),
            ],
            language,
        );
        if let (Some(revenue), Some(profit)) = (record.revenue, record.profit()) {
            entry.push_str(", ");
            entry.push_str(&t_args_lang(
                "history-revenue",
                &[("revenue", &format_money(revenue)), ("profit", &format_money(profit))],
                language,
            ));
        }
        result.push_str(&format!("• {entry}\n"));
    }
    result
}

/// Inline message for an error the user can act on
pub fn format_error(err: &CostingError, language: &str) -> String {
    match err {
        CostingError::AccessDenied => t_lang("access-denied", language),
        CostingError::Validation(message) => {
            t_args_lang("error-validation", &[("message", message)], language)
        }
        CostingError::InsufficientStock(missing) => {
            t_args_lang("production-blocked", &[("missing", missing)], language)
        }
        CostingError::Store(_) | CostingError::Serialization(_) | CostingError::Conflict(_) => {
            t_args_lang("error-store", &[("message", &err.to_string())], language)
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeductionOrder;
    use crate::model::Unit;
    use crate::production::build_plan;

    #[test]
    fn test_format_quantity() {
        assert_eq!(format_quantity(200.0), "200");
        assert_eq!(format_quantity(0.75), "0.75");
        assert_eq!(format_quantity(1.0 / 3.0), "0.333");
        assert_eq!(format_money(2.0), "2.00");
    }

    #[test]
    fn test_format_plan_marks_short_lines() {
        let recipe = Recipe::new(
            "Cake",
            "Ana",
            vec![IngredientLine::new("Flour", 5.0, 1000.0, Unit::Grams, 200.0).unwrap()],
        )
        .unwrap();
        let lots = vec![StockLot::new("Flour", None, None, 150.0, 5.0, 1000.0, Unit::Grams).unwrap()];
        let plan = build_plan(vec![(recipe, 1.0)], &lots, DeductionOrder::SmallestFirst).unwrap();

        let text = format_plan(&plan, "en");
        assert!(text.contains("SHORT Flour"));
        assert!(text.contains("missing 50 g"));
        assert!(text.contains("Some ingredients are short."));

        let text = format_plan(&plan, "pt");
        assert!(text.contains("FALTA Flour"));
    }

    #[test]
    fn test_format_margin_verdicts() {
        let analysis = MarginAnalysis::new(8.0, 10.0);
        let text = format_margin(analysis.as_ref(), "en");
        assert!(text.contains("margin 20.0%"));
        assert!(text.contains("Low margin"));
        assert!(format_margin(None, "en").contains("sale price above zero"));
    }

    #[test]
    fn test_format_error_messages() {
        let text = format_error(&CostingError::Validation("package size must be greater than zero".into()), "en");
        assert!(text.contains("package size must be greater than zero"));
        assert!(format_error(&CostingError::AccessDenied, "pt").contains("Senha incorreta"));
    }
}
