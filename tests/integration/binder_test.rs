use std::collections::HashMap;
use std::ffi::c_int;

use gpuperf::platform::binder::{resolve_first, Binder, Capability, CapabilityTable, RawSymbol};

type Query = unsafe extern "C" fn(c_int) -> c_int;

unsafe extern "C" fn twice(x: c_int) -> c_int {
    x * 2
}

unsafe extern "C" fn thrice(x: c_int) -> c_int {
    x * 3
}

fn table(entries: &[(&str, Query)]) -> HashMap<String, RawSymbol> {
    entries
        .iter()
        .map(|(name, f)| (name.to_string(), *f as RawSymbol))
        .collect()
}

#[test]
fn test_first_present_candidate_wins() {
    let symbols = table(&[("query", twice), ("query_v2", thrice)]);

    let mut binder = Binder::new(&symbols);
    let newest: Capability<Query> =
        unsafe { binder.resolve("newest", &["query_v3", "query_v2", "query"]) };
    let oldest: Capability<Query> = unsafe { binder.resolve("oldest", &["query"]) };

    assert_eq!(newest.symbol(), Some("query_v2"));
    assert_eq!(newest.revision(), Some(1));
    assert_eq!(unsafe { newest.get().unwrap()(5) }, 15);
    assert_eq!(unsafe { oldest.get().unwrap()(5) }, 10);
}

#[test]
fn test_absent_when_no_candidate_resolves() {
    let symbols = table(&[("other", twice)]);
    assert!(resolve_first(&symbols, &["query_v2", "query"]).is_none());

    let mut binder = Binder::new(&symbols);
    let cap: Capability<Query> = unsafe { binder.resolve("query", &["query_v2", "query"]) };
    assert!(!cap.is_present());
    assert_eq!(cap.operation(), "query");
    assert!(!binder.table().is_present("query"));
}

#[test]
fn test_tables_merge() {
    let first = table(&[("a", twice)]);
    let second = table(&[]);

    let mut binder = Binder::new(&first);
    let _: Capability<Query> = unsafe { binder.resolve("a", &["a"]) };
    let a = binder.finish();

    let mut binder = Binder::new(&second);
    let _: Capability<Query> = unsafe { binder.resolve("b", &["b"]) };
    let b = binder.finish();

    let merged = CapabilityTable::merge([a, b]);
    assert_eq!(merged.len(), 2);
    assert_eq!(merged.symbol("a"), Some("a"));
    assert_eq!(merged.missing().collect::<Vec<_>>(), vec!["b"]);
}
