use pretty_assertions::assert_eq;

use super::*;

fn prefix_table(routes: &[(&str, &str)]) -> RouteTable {
    let mut table = RouteTable::new(MatchMode::Prefix);
    for (pattern, destination) in routes {
        table.add_route(pattern, destination).unwrap();
    }
    table
}

#[test]
fn test_first_match_wins() {
    let table = prefix_table(&[("sensors/#", "/all"), ("sensors/raw/#", "/raw")]);
    let route = table.match_topic("sensors/raw/temp1").unwrap();
    assert_eq!(route.destination(), "/all");

    // Reversed registration order flips the winner
    let table = prefix_table(&[("sensors/raw/#", "/raw"), ("sensors/#", "/all")]);
    let route = table.match_topic("sensors/raw/temp1").unwrap();
    assert_eq!(route.destination(), "/raw");
    let route = table.match_topic("sensors/cooked/temp1").unwrap();
    assert_eq!(route.destination(), "/all");
}

#[test]
fn test_no_match() {
    let table = prefix_table(&[("sensors/#", "/readings")]);
    assert!(table.match_topic("actuators/valve").is_none());
    assert!(table.match_topic("sensor").is_none());
}

#[test]
fn test_destination_child_suffix() {
    let table = prefix_table(&[("a/#", "/readings/#"), ("b/#", "/readings")]);

    let child = table.match_topic("a/temp1").unwrap();
    assert!(child.appends_topic_as_child());
    assert_eq!(child.destination(), "/readings");
    assert_eq!(child.resolve_path("temp1"), "/readings/temp1");

    let flat = table.match_topic("b/temp1").unwrap();
    assert!(!flat.appends_topic_as_child());
    assert_eq!(flat.resolve_path("temp1"), "/readings");
}

#[test]
fn test_destination_normalization() {
    let route = Route::new("x/#", "readings/", MatchMode::Prefix).unwrap();
    assert_eq!(route.destination(), "/readings");

    let root_child = Route::new("x/#", "/#", MatchMode::Prefix).unwrap();
    assert_eq!(root_child.destination(), "");
    assert_eq!(root_child.resolve_path("t"), "/t");
}

#[test]
fn test_prefix_mode_rejects_plus() {
    let mut table = RouteTable::new(MatchMode::Prefix);
    let err = table.add_route("sensors/+/temp", "/t").unwrap_err();
    assert!(matches!(err, RouteError::UnsupportedWildcard(_)));
    assert!(err.to_string().contains("segment"));
    assert!(table.is_empty());
}

#[test]
fn test_segment_mode_table() {
    let mut table = RouteTable::new(MatchMode::Segment);
    table.add_route("sensors/+/temp", "/temps/#").unwrap();
    table.add_route("sensors/#", "/other").unwrap();

    assert_eq!(
        table.match_topic("sensors/kitchen/temp").unwrap().pattern(),
        "sensors/+/temp"
    );
    assert_eq!(
        table.match_topic("sensors/kitchen/humidity").unwrap().pattern(),
        "sensors/#"
    );
    assert!(table.match_topic("sensorsX/kitchen").is_none());
}

#[test]
fn test_from_config_keeps_order() {
    let routes: Vec<RouteConfig> = ["s/#:/first", "s/a/#:/second"]
        .iter()
        .map(|r| r.parse().unwrap())
        .collect();
    let table = RouteTable::from_config(MatchMode::Prefix, &routes).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.match_topic("s/a/b").unwrap().destination(), "/first");
}

#[test]
fn test_filters_are_deduplicated() {
    let table = prefix_table(&[("s/#", "/a"), ("t/#", "/b"), ("s/#", "/c")]);
    assert_eq!(table.filters(), vec!["s/#".to_string(), "t/#".to_string()]);
}

#[test]
fn test_subtopic() {
    assert_eq!(subtopic("sensors/raw/temp1"), "temp1");
    assert_eq!(subtopic("temp1"), "temp1");
    assert_eq!(subtopic("sensors/raw/"), "");
}

#[test]
fn test_child_key_rules() {
    assert!(check_child_key("temp1").is_ok());
    assert!(check_child_key("room?1").is_ok());
    assert!(check_child_key("50% humid").is_ok());

    assert_eq!(check_child_key(""), Err("child key is empty"));
    for key in ["a.b", "$sys", "x#", "x[0]", "y]", "tab\there"] {
        assert!(check_child_key(key).is_err(), "{}", key);
    }
    assert!(check_child_key(&"k".repeat(769)).is_err());
    assert!(check_child_key(&"k".repeat(768)).is_ok());
}
