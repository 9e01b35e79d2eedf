//! Integration tests for the aggregate bag engine
//!
//! These cover the store end to end: building from text, accumulating,
//! projecting and filtering, and persisting through files.

use std::io::Cursor;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use flowagg::aggbag::{AggBag, FieldSelection, RowFilter};
use flowagg::config::BadLinePolicy;
use flowagg::field::{FieldType, NoSiteNames, Value};
use flowagg::text::{parse_columns, AggBagBuilder, BadLines, LineReader};
use flowagg::{Bag, EngineError, IpSet, Persist};

/// Path under the system temp dir unique to this process and test
fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("flowagg-{}-{name}", std::process::id()))
}

/// One record per `(protocol, bytes)` pair, counting records only.
fn proto_store(records: &[(u64, u64)]) -> AggBag {
    let mut store = AggBag::from_fields(&[FieldType::Protocol], &[FieldType::Records]).unwrap();
    for (proto, _bytes) in records {
        let mut key = store.new_key();
        let mut cursor = key.cursor();
        assert_eq!(cursor.field(), Some(FieldType::Protocol));
        cursor.set_unsigned(*proto).unwrap();
        assert!(!cursor.advance());
        let mut counter = store.new_counter();
        counter.set_unsigned(FieldType::Records, 1).unwrap();
        store.add(&key, &counter).unwrap();
    }
    store
}

fn rows(store: &AggBag) -> Vec<(u64, u64)> {
    store
        .iter()
        .map(|(k, c)| {
            (
                k.get_unsigned(FieldType::Protocol).unwrap(),
                c.get_unsigned(FieldType::Records).unwrap(),
            )
        })
        .collect()
}

#[test]
fn test_protocol_record_counts() {
    let store = proto_store(&[(6, 100), (6, 50), (17, 10)]);
    assert_eq!(rows(&store), vec![(6, 2), (17, 1)]);
}

#[test]
fn test_accumulation_is_order_independent() {
    let records = [(6, 100), (17, 10), (1, 3)];
    let expected = proto_store(&records);
    let permutations = [
        [records[0], records[2], records[1]],
        [records[1], records[0], records[2]],
        [records[2], records[1], records[0]],
    ];
    for order in permutations {
        assert_eq!(proto_store(&order), expected);
    }
}

#[test]
fn test_saturation_and_floor() {
    let mut store = AggBag::from_fields(&[FieldType::DPort], &[FieldType::SumBytes]).unwrap();
    let mut key = store.new_key();
    key.set_unsigned(FieldType::DPort, 80).unwrap();
    let mut big = store.new_counter();
    big.set_unsigned(FieldType::SumBytes, u64::MAX - 5).unwrap();
    store.add(&key, &big).unwrap();
    store.add(&key, &big).unwrap();
    assert_eq!(
        store.get(&key).unwrap().get_unsigned(FieldType::SumBytes).unwrap(),
        u64::MAX
    );

    let mut small = store.new_counter();
    small.set_unsigned(FieldType::SumBytes, 10).unwrap();
    store.set(&key, &small).unwrap();
    store.subtract(&key, &big).unwrap();
    assert_eq!(
        store.get(&key).unwrap().get_unsigned(FieldType::SumBytes).unwrap(),
        0
    );
}

#[test]
fn test_file_round_trip() {
    let mut store = AggBag::from_fields(
        &[FieldType::SIpv4, FieldType::STime, FieldType::Flags],
        &[FieldType::Records, FieldType::SumPackets],
    )
    .unwrap();
    for (i, addr) in ["10.0.0.1", "192.168.7.9", "10.0.0.1"].iter().enumerate() {
        let mut key = store.new_key();
        key.set_ip(FieldType::SIpv4, addr.parse::<IpAddr>().unwrap())
            .unwrap();
        key.set_unsigned(FieldType::STime, 1_700_000_000).unwrap();
        key.set_unsigned(FieldType::Flags, 0x12).unwrap();
        let mut counter = store.new_counter();
        counter.set_unsigned(FieldType::Records, 1).unwrap();
        counter.set_unsigned(FieldType::SumPackets, i as u64 + 1).unwrap();
        store.add(&key, &counter).unwrap();
    }

    let path = temp_path("round-trip.agg");
    store.save(&path).unwrap();
    let back = AggBag::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(back, store);
    assert_eq!(back.len(), 2);
    assert_eq!(back.counter_total(FieldType::SumPackets).unwrap(), 6);
}

#[test]
fn test_load_reports_path() {
    let path = temp_path("does-not-exist.agg");
    match AggBag::load(&path) {
        Err(EngineError::Io { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected an I/O error, got {other:?}"),
    }

    let wrong = temp_path("wrong-kind.set");
    IpSet::new_v4().save(&wrong).unwrap();
    let result = AggBag::load(&wrong);
    std::fs::remove_file(&wrong).ok();
    assert!(matches!(result, Err(EngineError::Format(_))));
}

#[test]
fn test_projection_to_nothing_fails_and_leaves_source() {
    let store = proto_store(&[(6, 1)]);
    let before = store.clone();
    let result = store.project(
        &FieldSelection::Remove(vec![FieldType::Protocol]),
        &[],
    );
    assert!(matches!(result, Err(EngineError::EmptyFieldList("key"))));
    assert_eq!(store, before);
}

#[test]
fn test_projection_inserts_constant() {
    let store = proto_store(&[(6, 1), (17, 1)]);
    let projected = store
        .project(
            &FieldSelection::All,
            &[(FieldType::Sensor, Value::Unsigned(4))],
        )
        .unwrap();
    assert_eq!(projected.len(), 2);
    for (key, _) in projected.iter() {
        assert_eq!(key.get_unsigned(FieldType::Sensor).unwrap(), 4);
    }
}

#[test]
fn test_filter_then_convert() {
    let text = "10.0.0.1|6|10\n10.0.0.2|17|20\n10.0.0.3|6|30\n";
    let columns = parse_columns("sIPv4,protocol,sum-bytes").unwrap();
    let mut builder = AggBagBuilder::new(&columns, &[], &NoSiteNames).unwrap();
    builder
        .read_lines(
            LineReader::new(Cursor::new(text), "#", 2048),
            &mut BadLines::new(BadLinePolicy::Abort),
        )
        .unwrap();
    let mut store = builder.into_store();

    let mut allowed = IpSet::new_v4();
    allowed
        .insert_block("10.0.0.0".parse().unwrap(), 31)
        .unwrap();
    let zeroed = store
        .apply_filters(&[
            RowFilter::in_set(FieldType::SIpv4, Arc::new(allowed), false),
            RowFilter::max(FieldType::Protocol, 6),
        ])
        .unwrap();
    assert_eq!(zeroed, 2);
    assert_eq!(store.len(), 3);

    let set = store.to_ipset().unwrap();
    assert_eq!(set.count(), 1);
    assert!(set.contains("10.0.0.1".parse().unwrap()));

    let bag: Bag = store.to_bag(FieldType::Protocol, FieldType::SumBytes).unwrap();
    assert_eq!(bag.get(Value::Unsigned(6)).unwrap(), 10);
    assert_eq!(bag.get(Value::Unsigned(17)).unwrap(), 0);

    let path = temp_path("filtered.bag");
    bag.save(&path).unwrap();
    let back = Bag::load(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(back, bag);
}

#[test]
fn test_merge_requires_matching_keys() {
    let mut a = proto_store(&[(6, 1)]);
    let b = AggBag::from_fields(&[FieldType::DPort], &[FieldType::Records]).unwrap();
    assert!(matches!(
        a.add_bag(&b),
        Err(EngineError::FieldListMismatch("key"))
    ));

    let c = proto_store(&[(6, 1), (1, 1)]);
    a.add_bag(&c).unwrap();
    assert_eq!(rows(&a), vec![(1, 1), (6, 2)]);
    a.subtract_bag(&c).unwrap();
    a.subtract_bag(&c).unwrap();
    assert_eq!(rows(&a), vec![(1, 0), (6, 0)]);
}
