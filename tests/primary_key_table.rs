mod common;

use std::collections::BTreeMap;

use common::{
    create_table, keyed_schema, kv, partitioned_schema, pv, read_sorted, render,
    write_and_commit,
};
use tablestore::{
    DataType, Field, FileStoreTable, MergeEngine, MergeEngineOption, Row, RowKind, ScalarValue,
    TableSchema,
};

#[test]
fn last_write_wins_and_delete_hides_key() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = create_table(keyed_schema(), |o| o.bucket(2));
    let table = &fixture.table;
    assert_eq!(table.merge_engine(), Some(MergeEngine::Deduplicate));

    write_and_commit(
        table,
        "c1",
        [
            Row::insert(kv(1, "a")),
            Row::insert(kv(2, "b")),
            Row::insert(kv(3, "c")),
        ],
    )?;
    write_and_commit(
        table,
        "c2",
        [
            Row::update(kv(1, "a2")),
            Row::delete(kv(2, "b")),
            Row::insert(kv(4, "d")),
        ],
    )?;

    assert_eq!(
        read_sorted(table.new_read_builder()),
        vec!["+I[1, a2]", "+I[3, c]", "+I[4, d]"]
    );
    Ok(())
}

#[test]
fn later_insert_resurrects_deleted_key() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = create_table(keyed_schema(), |o| o);
    let table = &fixture.table;

    write_and_commit(table, "c1", [Row::insert(kv(1, "a"))])?;
    write_and_commit(table, "c2", [Row::delete(kv(1, "a"))])?;
    assert!(table.new_read_builder().to_rows()?.is_empty());

    write_and_commit(table, "c3", [Row::insert(kv(1, "again"))])?;
    assert_eq!(read_sorted(table.new_read_builder()), vec!["+I[1, again]"]);
    Ok(())
}

#[test]
fn partitioned_table_keeps_one_row_per_key() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = create_table(partitioned_schema(), |o| o.bucket(3));
    let table = &fixture.table;

    write_and_commit(
        table,
        "c1",
        [
            Row::insert(pv("2024-01-01", 1, Some(10))),
            Row::insert(pv("2024-01-02", 1, Some(20))),
            Row::insert(pv("2024-01-01", 2, None)),
        ],
    )?;
    write_and_commit(
        table,
        "c2",
        [
            Row::update(pv("2024-01-01", 1, Some(11))),
            Row::delete(pv("2024-01-02", 1, Some(20))),
        ],
    )?;

    assert_eq!(
        read_sorted(table.new_read_builder()),
        vec!["+I[2024-01-01, 1, 11]", "+I[2024-01-01, 2, NULL]"]
    );
    let projected = table
        .new_read_builder()
        .with_projection(["v", "id"])
        .to_rows()?;
    assert_eq!(render(&projected), vec!["+I[11, 1]", "+I[NULL, 2]"]);
    Ok(())
}

fn random_ops(rng: &mut fastrand::Rng, count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| {
            let id = rng.i64(0..16);
            let values = kv(id, &format!("v{i}"));
            match rng.u8(0..10) {
                0..=5 => Row::insert(values),
                6..=7 => Row::update(values),
                _ => Row::delete(values),
            }
        })
        .collect()
}

fn expected_state(ops: &[Row]) -> Vec<String> {
    let mut state: BTreeMap<i64, Row> = BTreeMap::new();
    for op in ops {
        let ScalarValue::Int64(id) = op.values[0] else {
            unreachable!("id column is BIGINT");
        };
        if op.kind == RowKind::Delete {
            state.remove(&id);
        } else {
            state.insert(id, Row::insert(op.values.clone()));
        }
    }
    render(&state.into_values().collect::<Vec<_>>())
}

#[test]
fn partial_commits_match_single_commit() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    for round in 0..4 {
        let ops = random_ops(&mut rng, 120);
        let tune = |o: tablestore::CoreOptions| {
            o.bucket(2)
                .write_buffer_rows(7)
                .target_file_rows(5)
                .compaction_max_sorted_run_num(3)
        };

        let single = create_table(keyed_schema(), tune);
        write_and_commit(&single.table, "all", ops.clone())?;

        let partial = create_table(keyed_schema(), tune);
        let mut write = partial.table.new_write()?;
        let commit = partial.table.new_commit("partial");
        let mut start = 0;
        let mut batch = 0;
        while start < ops.len() {
            let end = (start + rng.usize(1..40)).min(ops.len());
            for op in &ops[start..end] {
                write.write(op.clone())?;
            }
            let message = write.prepare_commit(rng.bool())?;
            commit.commit(&format!("batch-{batch}"), [message])?;
            start = end;
            batch += 1;
        }
        // drain compactions still in flight
        let message = write.prepare_commit(true)?;
        commit.commit("final", [message])?;
        write.close();

        let expected = expected_state(&ops);
        assert_eq!(
            read_sorted(single.table.new_read_builder()),
            expected,
            "single commit, round {round}"
        );
        assert_eq!(
            read_sorted(partial.table.new_read_builder()),
            expected,
            "partial commits, round {round}"
        );
    }
    Ok(())
}

#[test]
fn partial_update_merges_non_null_fields() -> Result<(), Box<dyn std::error::Error>> {
    let schema = TableSchema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("a", DataType::Utf8, true),
        Field::new("b", DataType::Utf8, true),
    ])
    .primary_keys(["id"]);
    let fixture = create_table(schema, |o| {
        o.merge_engine(MergeEngineOption::PartialUpdate)
            .compaction_max_sorted_run_num(2)
    });
    let table = &fixture.table;
    assert_eq!(table.merge_engine(), Some(MergeEngine::PartialUpdate));

    let row = |a: Option<&str>, b: Option<&str>| {
        vec![ScalarValue::Int32(1), ScalarValue::from(a), ScalarValue::from(b)]
    };
    write_and_commit(table, "c1", [Row::insert(row(Some("x"), None))])?;
    write_and_commit(table, "c2", [Row::update(row(None, Some("y")))])?;
    assert_eq!(read_sorted(table.new_read_builder()), vec!["+I[1, x, y]"]);

    write_and_commit(
        table,
        "c3",
        [Row::delete(row(None, None)), Row::insert(row(None, Some("z")))],
    )?;
    assert_eq!(read_sorted(table.new_read_builder()), vec!["+I[1, NULL, z]"]);
    Ok(())
}

#[test]
fn schema_violations_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = create_table(keyed_schema(), |o| o);
    let mut write = fixture.table.new_write()?;

    let arity = write.write(Row::insert(vec![ScalarValue::Int64(1)]));
    assert!(matches!(arity, Err(tablestore::TableError::SchemaMismatch(_))));

    let null_key = write.write(Row::insert(vec![ScalarValue::Null, "a".into()]));
    assert!(matches!(null_key, Err(tablestore::TableError::SchemaMismatch(_))));

    let wrong_type = write.write(Row::insert(vec!["1".into(), "a".into()]));
    assert!(matches!(wrong_type, Err(tablestore::TableError::SchemaMismatch(_))));

    write.close();
    let closed = write.write(Row::insert(kv(1, "a")));
    assert!(matches!(closed, Err(tablestore::TableError::Closed)));
    Ok(())
}

#[test]
fn reopened_table_keeps_options_and_data() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = create_table(keyed_schema(), |o| o.bucket(4));
    write_and_commit(&fixture.table, "c1", [Row::insert(kv(7, "seven"))])?;

    let reopened = FileStoreTable::open(fixture.dir.path())?;
    assert_eq!(reopened.options().bucket_count(), 4);
    assert_eq!(reopened.schema().primary_key_names(), ["id".to_string()]);
    assert_eq!(read_sorted(reopened.new_read_builder()), vec!["+I[7, seven]"]);

    let again = FileStoreTable::create(
        tablestore::CoreOptions::new(fixture.dir.path()),
        keyed_schema(),
    );
    assert!(matches!(again, Err(tablestore::TableError::Config(_))));
    Ok(())
}
