//! # Production Flow Tests
//!
//! In-memory walk through costing, requirement aggregation, stock matching
//! and deduction using the public API only.

use rand::Rng;
use recipe_costing::config::{DeductionOrder, ShortfallPolicy};
use recipe_costing::costing::{line_cost, recipe_cost, unit_cost, MarginAnalysis, MarginVerdict};
use recipe_costing::model::{IngredientLine, Recipe, StockLot, Unit};
use recipe_costing::planning::{aggregate_requirements, match_stock, plan_deductions};
use recipe_costing::production::{authorize, build_plan, build_record};

fn brigadeiro() -> Recipe {
    Recipe::new(
        "Brigadeiro",
        "Bia",
        vec![
            IngredientLine::new("Leite Condensado", 7.5, 395.0, Unit::Grams, 395.0).unwrap(),
            IngredientLine::new("Chocolate em Pó", 12.0, 200.0, Unit::Grams, 40.0).unwrap(),
            IngredientLine::new("Manteiga", 10.0, 200.0, Unit::Grams, 20.0).unwrap(),
        ],
    )
    .unwrap()
}

#[test]
fn test_recipe_cost_is_sum_of_line_costs() {
    let recipe = brigadeiro();
    // 7.50 + 2.40 + 1.00
    assert!((recipe.total_cost - 10.9).abs() < 1e-9);
    assert!((recipe_cost(&recipe.ingredients) - recipe.total_cost).abs() < 1e-12);

    for line in &recipe.ingredients {
        let expected = line_cost(unit_cost(line.purchase_price, line.package_size), line.quantity_used);
        assert!((line.line_cost - expected).abs() < 1e-12);
    }
}

#[test]
fn test_zero_package_size_costs_nothing() {
    assert_eq!(unit_cost(10.0, 0.0), 0.0);
    assert_eq!(line_cost(unit_cost(10.0, 0.0), 50.0), 0.0);
}

#[test]
fn test_margin_for_suggested_price() {
    let recipe = brigadeiro();
    let analysis = MarginAnalysis::with_markup(recipe.total_cost, 3.0).unwrap();
    assert!((analysis.sale_price - 32.7).abs() < 1e-9);
    assert_eq!(analysis.verdict, MarginVerdict::Excellent);
    assert!(MarginAnalysis::new(recipe.total_cost, 0.0).is_none());
}

#[test]
fn test_two_recipes_share_one_requirement() {
    let cake = Recipe::new(
        "Cake",
        "Ana",
        vec![IngredientLine::new("Flour", 5.0, 1000.0, Unit::Grams, 100.0).unwrap()],
    )
    .unwrap();
    let bread = Recipe::new(
        "Bread",
        "Ana",
        vec![IngredientLine::new("flour", 5.0, 1000.0, Unit::Grams, 100.0).unwrap()],
    )
    .unwrap();

    let requirements = aggregate_requirements(&[(cake, 1.0), (bread, 1.0)]).unwrap();
    assert_eq!(requirements.len(), 1);
    assert_eq!(requirements["flour"].quantity, 200.0);

    let lots = vec![StockLot::new("Flour", None, None, 150.0, 5.0, 1000.0, Unit::Grams).unwrap()];
    let report = match_stock(&requirements, &lots);
    assert!(!report.is_sufficient());
    assert_eq!(report.lines[0].shortfall, 50.0);
}

#[test]
fn test_warned_production_consumes_everything_available() {
    let lots = vec![
        StockLot::new("Leite Condensado", Some("Moça"), None, 395.0, 7.5, 395.0, Unit::Grams).unwrap(),
        StockLot::new("Chocolate em Pó", None, None, 20.0, 12.0, 200.0, Unit::Grams).unwrap(),
        StockLot::new("Manteiga", None, None, 0.2, 10.0, 0.2, Unit::Kilograms).unwrap(),
    ];

    let plan = build_plan(vec![(brigadeiro(), 1.0)], &lots, DeductionOrder::SmallestFirst).unwrap();
    assert!(authorize(&plan, ShortfallPolicy::Block).is_err());
    let forced = authorize(&plan, ShortfallPolicy::Warn).unwrap();
    let record = build_record(&plan, Some(25.0), forced);
    assert_eq!(record.shortfalls.len(), 1);
    assert_eq!(record.shortfalls[0].ingredient, "Chocolate em Pó");

    let mut after = lots.clone();
    plan.deductions.apply_to(&mut after);
    assert_eq!(after[0].quantity, 0.0);
    assert_eq!(after[1].quantity, 0.0);
    assert!((after[2].quantity - 0.18).abs() < 1e-9);
    assert!(after.iter().all(|lot| lot.version == 1));
}

#[test]
fn test_repeated_deductions_never_go_negative() {
    let mut rng = rand::thread_rng();
    let mut lots = vec![
        StockLot::new("Flour", Some("A"), None, 1.0, 5.0, 1.0, Unit::Kilograms).unwrap(),
        StockLot::new("Flour", Some("B"), None, 250.0, 5.0, 1000.0, Unit::Grams).unwrap(),
        StockLot::new("Flour", Some("C"), None, 75.0, 5.0, 1000.0, Unit::Grams).unwrap(),
    ];

    for round in 0..50 {
        let quantity = rng.gen_range(1.0..400.0);
        let recipe = Recipe::new(
            "Bread",
            "Ana",
            vec![IngredientLine::new("Flour", 5.0, 1000.0, Unit::Grams, quantity).unwrap()],
        )
        .unwrap();
        let order = if round % 2 == 0 {
            DeductionOrder::SmallestFirst
        } else {
            DeductionOrder::Insertion
        };

        let requirements = aggregate_requirements(&[(recipe, 1.0)]).unwrap();
        let before: f64 = lots.iter().map(|lot| lot.quantity_in_base()).sum();
        let plan = plan_deductions(&requirements, &lots, order);
        plan.apply_to(&mut lots);
        let after: f64 = lots.iter().map(|lot| lot.quantity_in_base()).sum();

        assert!(lots.iter().all(|lot| lot.quantity >= 0.0));
        let consumed = before - after;
        assert!(consumed <= quantity + 1e-6);
        if plan.is_complete() {
            assert!((consumed - quantity).abs() < 1e-6);
        } else {
            assert!(after.abs() < 1e-6);
        }
    }
}
