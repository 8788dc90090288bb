//! Field-path parser/printer properties and record access through paths.

use edge_record::{field_path_string, parse_field_path, Field, PathElement, Record};
use proptest::prelude::*;

fn element_strategy() -> impl Strategy<Value = PathElement> {
    prop_oneof![
        "[a-zA-Z0-9 _'/\\[\\]\"\\\\*.-]{1,8}".prop_map(PathElement::Map),
        (0usize..64).prop_map(PathElement::List),
        Just(PathElement::MapWildcard),
        Just(PathElement::ListWildcard),
    ]
}

proptest! {
    #[test]
    fn printed_paths_parse_back(steps in prop::collection::vec(element_strategy(), 0..6)) {
        let mut elements = vec![PathElement::Root];
        elements.extend(steps);

        let printed = field_path_string(&elements);
        let parsed = parse_field_path(&printed).unwrap();
        prop_assert_eq!(&parsed, &elements);

        let reprinted = field_path_string(&parsed);
        prop_assert_eq!(parse_field_path(&reprinted).unwrap(), parsed);
    }

    #[test]
    fn parse_never_panics(input in ".{0,16}") {
        if let Err(err) = parse_field_path(&input) {
            prop_assert!(err.position <= input.len());
        }
    }
}

#[test]
fn literal_parse_scenario() {
    assert_eq!(
        parse_field_path("/a/b[2]/c").unwrap(),
        vec![
            PathElement::Root,
            PathElement::Map("a".into()),
            PathElement::Map("b".into()),
            PathElement::List(2),
            PathElement::Map("c".into()),
        ]
    );

    let err = parse_field_path("/a[x]").unwrap_err();
    assert_eq!(err.reason, "only numbers and '*' allowed between '[' and ']'");
    assert_eq!(err.position, 3);
}

#[test]
fn every_listed_path_resolves() {
    let mut record = Record::with_source("origin", "s");
    record.set_creating("/a/b[1]/c", Field::long(3)).unwrap();
    record.set_creating("/'odd/name'", Field::boolean(true)).unwrap();

    for path in record.field_paths() {
        assert!(
            record.get(&path).unwrap().is_some(),
            "path {} listed but not resolvable",
            path
        );
    }
}
