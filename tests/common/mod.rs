#![allow(dead_code)]

use miml_re::{config::ExtractorConfig, data::Dataset};

/// Six two-sentence bags over relations A and B: A, none, B, A, none, B.
/// Every bag is negative for the relations it does not hold, and every fold's
/// training complement sees all three sentence labels.
pub fn six_bags() -> Dataset {
    let layout: [(&str, &[&str], &[&str]); 6] = [
        ("fa", &["A"], &["B"]),
        ("fn", &[], &["A", "B"]),
        ("fb", &["B"], &["A"]),
        ("fa", &["A"], &["B"]),
        ("fn", &[], &["A", "B"]),
        ("fb", &["B"], &["A"]),
    ];
    let mut data = Dataset::new();
    for (i, (feature, positive, negative)) in layout.into_iter().enumerate() {
        data.add_bag(
            &format!("entity{i}"),
            "value",
            &[vec![feature], vec![feature]],
            positive,
            negative,
            &[],
        )
        .unwrap();
    }
    data
}

pub fn config() -> ExtractorConfig {
    ExtractorConfig {
        folds: 3,
        epochs: 4,
        z_regularization: 0.1,
        y_regularization: 0.1,
        squash_randomization: true,
        ..ExtractorConfig::default()
    }
}
