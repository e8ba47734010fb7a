mod common;

use common::{create_table, partitioned_schema, pv, read_sorted, write_and_commit};
use tablestore::{
    ColumnRef, DataType, Field, FileStoreTable, Predicate, PredicateBuilder, Row, ScalarValue,
    TableSchema, WriteMode,
};

fn nullable_int_table() -> common::TestTable {
    let schema = TableSchema::new(vec![Field::new("a", DataType::Int32, true)]);
    let fixture = create_table(schema, |o| o.write_mode(WriteMode::AppendOnly));
    let values = [
        Some(1),
        Some(2),
        Some(3),
        None,
        None,
        Some(4),
        Some(5),
        Some(6),
    ];
    write_and_commit(
        &fixture.table,
        "load",
        values
            .into_iter()
            .map(|v| Row::insert(vec![ScalarValue::from(v)])),
    )
    .expect("load rows");
    fixture
}

fn ints<const N: usize>(values: [Option<i32>; N]) -> Vec<ScalarValue> {
    values.into_iter().map(ScalarValue::from).collect()
}

fn a() -> ColumnRef {
    ColumnRef::new("a")
}

#[test]
fn in_list_with_null_matches_only_members() {
    let fixture = nullable_int_table();
    let filter = Predicate::in_list(a(), ints([Some(0), None, Some(3), Some(7)]));
    assert_eq!(
        read_sorted(fixture.table.new_read_builder().with_filter(filter)),
        vec!["+I[3]"]
    );
}

#[test]
fn not_in_list_with_null_selects_nothing() {
    let fixture = nullable_int_table();
    let filter = Predicate::not_in_list(
        a(),
        ints([Some(0), Some(1), None, Some(2), Some(5), Some(7)]),
    );
    let read = fixture.table.new_read_builder().with_filter(filter);
    assert!(read.to_rows().expect("rows").is_empty());
    // every file is provably UNKNOWN-or-FALSE, so none is even planned
    assert_eq!(read.plan().expect("plan").file_count(), 0);
}

#[test]
fn not_in_without_null_skips_null_rows() {
    let fixture = nullable_int_table();
    let filter = Predicate::not_in_list(a(), ints([Some(1), Some(2), Some(5)]));
    assert_eq!(
        read_sorted(fixture.table.new_read_builder().with_filter(filter)),
        vec!["+I[3]", "+I[4]", "+I[6]"]
    );
}

#[test]
fn between_and_null_checks() {
    let fixture = nullable_int_table();
    let table = &fixture.table;

    let between = PredicateBuilder::leaf()
        .between(a(), ScalarValue::Int32(2), ScalarValue::Int32(4))
        .build();
    assert_eq!(
        read_sorted(table.new_read_builder().with_filter(between)),
        vec!["+I[2]", "+I[3]", "+I[4]"]
    );

    let not_between = Predicate::not_between(a(), ScalarValue::Int32(2), ScalarValue::Int32(4));
    assert_eq!(
        read_sorted(table.new_read_builder().with_filter(not_between)),
        vec!["+I[1]", "+I[5]", "+I[6]"]
    );

    assert_eq!(
        read_sorted(table.new_read_builder().with_filter(Predicate::is_null(a()))),
        vec!["+I[NULL]", "+I[NULL]"]
    );
    let not_equal = Predicate::not_eq(a(), ScalarValue::Int32(3));
    assert_eq!(
        read_sorted(table.new_read_builder().with_filter(not_equal)).len(),
        5
    );
    let null_compare = Predicate::eq(a(), ScalarValue::Null);
    assert!(table
        .new_read_builder()
        .with_filter(null_compare)
        .to_rows()
        .expect("rows")
        .is_empty());
}

#[test]
fn partition_filter_excluding_every_value_visits_no_files() {
    let fixture = create_table(partitioned_schema(), |o| o.bucket(2));
    let table = &fixture.table;
    write_and_commit(
        table,
        "c1",
        [
            Row::insert(pv("2024-01-01", 1, Some(1))),
            Row::insert(pv("2024-01-02", 2, Some(2))),
            Row::insert(pv("2024-01-03", 3, Some(3))),
        ],
    )
    .expect("commit");

    let dt = ColumnRef::new("dt");
    let missing = Predicate::in_list(dt.clone(), [ScalarValue::from("2023-12-31")]);
    let plan = table
        .new_read_builder()
        .with_filter(missing)
        .plan()
        .expect("plan");
    assert!(plan.snapshot_id.is_some());
    assert!(plan.splits.is_empty());

    let one = Predicate::eq(dt, ScalarValue::from("2024-01-02"));
    let read = table.new_read_builder().with_filter(one);
    let plan = read.plan().expect("plan");
    assert!(plan
        .splits
        .iter()
        .all(|split| split.partition.components()[0] == ScalarValue::from("2024-01-02")));
    assert_eq!(read_sorted(read), vec!["+I[2024-01-02, 2, 2]"]);
}

#[test]
fn value_filters_never_resurrect_old_versions() {
    let fixture = create_table(partitioned_schema(), |o| o);
    let table = &fixture.table;
    write_and_commit(table, "c1", [Row::insert(pv("d", 1, Some(10)))]).expect("commit");
    write_and_commit(table, "c2", [Row::update(pv("d", 1, Some(20)))]).expect("commit");

    let old = Predicate::eq(ColumnRef::new("v"), ScalarValue::Int32(10));
    assert!(table
        .new_read_builder()
        .with_filter(old)
        .to_rows()
        .expect("rows")
        .is_empty());

    let key_miss = Predicate::gt(ColumnRef::new("id"), ScalarValue::Int64(5));
    let plan = table
        .new_read_builder()
        .with_filter(key_miss)
        .plan()
        .expect("plan");
    assert_eq!(plan.file_count(), 0);
}

#[test]
fn unknown_filter_column_is_a_config_error() {
    let fixture = nullable_int_table();
    let filter = Predicate::eq(ColumnRef::new("nope"), ScalarValue::Int32(1));
    let plan = fixture.table.new_read_builder().with_filter(filter).plan();
    assert!(matches!(plan, Err(tablestore::TableError::Config(_))));
}

fn price(cents: i128) -> ScalarValue {
    ScalarValue::Decimal128(cents, 10, 2)
}

#[test]
fn decimal_columns_round_trip_and_prune() -> Result<(), Box<dyn std::error::Error>> {
    let schema = TableSchema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new(
            "price",
            DataType::Decimal {
                precision: 10,
                scale: 2,
            },
            true,
        ),
    ]);
    let fixture = create_table(schema, |o| o.write_mode(WriteMode::AppendOnly));
    let cheap = [(1, Some(100)), (2, Some(250)), (3, None)];
    let dear = [(4, Some(1_000)), (5, Some(-2_005))];
    for (identity, batch) in [("cheap", &cheap[..]), ("dear", &dear[..])] {
        write_and_commit(
            &fixture.table,
            identity,
            batch.iter().map(|&(id, cents)| {
                Row::insert(vec![ScalarValue::Int64(id), cents.map_or(ScalarValue::Null, price)])
            }),
        )?;
    }

    let table = FileStoreTable::open(fixture.dir.path())?;
    assert_eq!(
        read_sorted(table.new_read_builder()),
        vec!["+I[1, 1.00]", "+I[2, 2.50]", "+I[3, NULL]", "+I[4, 10.00]", "+I[5, -20.05]"]
    );

    // literals of another scale or an integer compare by value
    let above_two = Predicate::gt(ColumnRef::new("price"), ScalarValue::Decimal128(20, 4, 1));
    assert_eq!(
        read_sorted(table.new_read_builder().with_filter(above_two)),
        vec!["+I[2, 2.50]", "+I[4, 10.00]"]
    );
    let at_least_five = Predicate::gt_eq(ColumnRef::new("price"), ScalarValue::Int64(5));
    let read = table.new_read_builder().with_filter(at_least_five);
    assert_eq!(read.plan()?.file_count(), 1);
    assert_eq!(read_sorted(read), vec!["+I[4, 10.00]"]);

    let batch = table
        .new_read_builder()
        .read_batches(&table.new_read_builder().plan()?.splits[0])?
        .next()
        .expect("one batch")?;
    assert_eq!(
        batch.schema().field(1).data_type(),
        &arrow::datatypes::DataType::Decimal128(10, 2)
    );
    Ok(())
}
