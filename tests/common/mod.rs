#![allow(dead_code)]

use gengy_tree::{
    FieldSpec, Grammar, GrammarBuilder, IntRange, ListSizeBetween, TreeBasedRepresentation, TreeConfig,
    ValueType, VarRange,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Root := Leaf | Middle(x: Root)
pub fn leaf_middle() -> Grammar {
    let mut b = GrammarBuilder::new();
    let root = b.symbol("Root");
    let leaf = b.production("Leaf", vec![]);
    let middle = b.production("Middle", vec![FieldSpec::new("x", ValueType::Symbol(root))]);
    b.abstract_symbol("Root", &[leaf, middle]);
    b.build(root).unwrap()
}

/// A small arithmetic language with ranged literals and bounded argument lists.
pub fn arithmetic() -> Grammar {
    let mut b = GrammarBuilder::new();
    let expr = b.symbol("Expr");
    let lit = b.production(
        "Lit",
        vec![FieldSpec::new("value", ValueType::Int).with_handler(IntRange::new(-10, 10))],
    );
    let var = b.production(
        "Var",
        vec![FieldSpec::new("name", ValueType::Str).with_handler(VarRange::names(&["x", "y", "z"]))],
    );
    let add = b.weighted_production(
        "Add",
        vec![
            FieldSpec::new("lhs", ValueType::Symbol(expr)),
            FieldSpec::new("rhs", ValueType::Symbol(expr)),
        ],
        2.0,
    );
    let neg = b.weighted_production("Neg", vec![FieldSpec::new("e", ValueType::Symbol(expr))], 1.0);
    let sum = b.production(
        "Sum",
        vec![
            FieldSpec::new("terms", ValueType::list_of(ValueType::Symbol(expr)))
                .with_handler(ListSizeBetween::new(1, 4)),
        ],
    );
    let unary = b.abstract_symbol("Unary", &[neg]);
    b.abstract_symbol("Expr", &[lit, var, add, unary, sum]);
    b.build(expr).unwrap()
}

pub fn representation(grammar: Grammar, max_depth: i32) -> TreeBasedRepresentation {
    let config = TreeConfig {
        max_depth,
        max_string_length: 3,
        ..TreeConfig::default()
    };
    TreeBasedRepresentation::new(grammar, config).unwrap()
}
