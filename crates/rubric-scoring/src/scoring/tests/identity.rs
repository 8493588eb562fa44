use super::common::*;
use crate::scoring::{Directive, ScoreValue, ScoringError, IDENTITY_METHOD};

#[test]
fn identity_items_pass_through_verbatim() {
    let rubric = vec![
        rubric("demographics", "handedness", "d1", "I"),
        rubric("mood", "total", "m1", "sum"),
        rubric("mood", "total", "m2", "sum"),
    ];
    let responses = vec![
        answer("s1", "d1", "left"),
        answer("s1", "m1", "2"),
        answer("s1", "m2", "3"),
    ];

    let table = engine().score(&responses, &rubric).expect("scores");

    let identity = table
        .find("demographics", "handedness", "s1")
        .expect("identity row");
    assert_eq!(identity.score, ScoreValue::Verbatim("left".to_string()));
    assert_eq!(identity.method, IDENTITY_METHOD);
    assert_eq!(identity.item_count, 1);

    let total = table.find("mood", "total", "s1").expect("numeric row");
    assert_eq!(total.score, ScoreValue::Numeric(5.0));
    assert_eq!(total.item_count, 2);
    assert_eq!(table.summary.identity_rows, 1);
    assert_eq!(table.summary.numeric_rows, 2);
}

#[test]
fn identity_and_numeric_tags_cannot_share_a_subscale() {
    let rubric = vec![
        rubric("mood", "total", "m1", "I"),
        rubric("mood", "total", "m2", "1"),
    ];
    let responses = vec![answer("s1", "m1", "2"), answer("s1", "m2", "3")];

    match engine().score(&responses, &rubric) {
        Err(ScoringError::InconsistentDirective {
            directive: Directive::Include,
            values,
            ..
        }) => assert_eq!(values, vec!["I", "1"]),
        other => panic!("expected inconsistent include, got {other:?}"),
    }
}

#[test]
fn numeric_looking_identity_values_stay_verbatim() {
    let rubric = vec![rubric("demographics", "age", "d2", "I")];
    let responses = vec![answer("s1", "d2", "07")];

    let table = engine().score(&responses, &rubric).expect("scores");

    assert_eq!(table.rows[0].score, ScoreValue::Verbatim("07".to_string()));
}

#[test]
fn conflicting_identity_values_are_fatal() {
    let rubric = vec![
        rubric("demographics", "site", "d3a", "I"),
        rubric("demographics", "site", "d3b", "I"),
    ];
    let responses = vec![answer("s1", "d3a", "north"), answer("s1", "d3b", "south")];

    match engine().score(&responses, &rubric) {
        Err(ScoringError::InconsistentDirective {
            directive: Directive::IdentityValue,
            values,
            ..
        }) => assert_eq!(values, vec!["north", "south"]),
        other => panic!("expected inconsistent identity value, got {other:?}"),
    }
}

#[test]
fn unanswered_identity_item_is_missing() {
    let rubric = vec![
        rubric("demographics", "site", "d3", "I"),
        rubric("mood", "total", "m1", "1"),
    ];
    let responses = vec![answer("s1", "m1", "2"), answer("s1", "d3", "NA")];

    let table = engine().score(&responses, &rubric).expect("scores");

    let site = table.find("demographics", "site", "s1").expect("identity row");
    assert_eq!(site.score, ScoreValue::Missing);
    assert_eq!(site.missing_count, 1);
    assert_eq!(table.summary.empty_groups, 1);
}
