mod common;

use common::{
    create_table, keyed_schema, kv, partitioned_schema, pv, read_sorted, write_and_commit,
};
use tablestore::{CommitKind, FileStoreTable, Row, TableError};

#[test]
fn resubmitted_identity_is_a_noop() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = create_table(keyed_schema(), |o| o);
    let table = &fixture.table;

    let mut write = table.new_write()?;
    write.write(Row::insert(kv(1, "a")))?;
    let message = write.prepare_commit(true)?;
    let commit = table.new_commit("job-1");

    assert_eq!(commit.commit("txn-1", [message.clone()])?, Some(1));
    assert_eq!(commit.commit("txn-1", [message.clone()])?, None);
    // a fresh committer for the same user still sees the identity
    assert_eq!(table.new_commit("job-1").commit("txn-1", [message])?, None);

    assert_eq!(read_sorted(table.new_read_builder()), vec!["+I[1, a]"]);
    assert_eq!(table.latest_snapshot()?.map(|s| s.id), Some(1));
    Ok(())
}

#[test]
fn empty_commit_publishes_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = create_table(keyed_schema(), |o| o);
    let mut write = fixture.table.new_write()?;
    let message = write.prepare_commit(false)?;
    assert!(message.is_empty());
    assert_eq!(fixture.table.new_commit("u").commit("empty", [message])?, None);
    assert!(fixture.table.latest_snapshot()?.is_none());
    Ok(())
}

#[test]
fn overlapping_writers_conflict() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = create_table(keyed_schema(), |o| o);
    let table = &fixture.table;

    let mut first = table.new_write()?;
    let mut second = table.new_write()?;
    first.write(Row::insert(kv(1, "first")))?;
    second.write(Row::insert(kv(1, "second")))?;
    let first_message = first.prepare_commit(true)?;
    let second_message = second.prepare_commit(true)?;

    table.new_commit("a").commit("a-1", [first_message])?;
    let err = table
        .new_commit("b")
        .commit("b-1", [second_message])
        .expect_err("same bucket from a stale base");
    assert!(matches!(err, TableError::CommitConflict(_)));
    assert!(err.is_retryable());

    // retrying from a fresh writer succeeds
    let mut retry = table.new_write()?;
    retry.write(Row::insert(kv(1, "second")))?;
    table
        .new_commit("b")
        .commit("b-1", [retry.prepare_commit(true)?])?;
    assert_eq!(read_sorted(table.new_read_builder()), vec!["+I[1, second]"]);
    Ok(())
}

#[test]
fn disjoint_partitions_commit_concurrently() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = create_table(partitioned_schema(), |o| o);
    let table = fixture.table.clone();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let table = table.clone();
            std::thread::spawn(move || -> Result<(), TableError> {
                let dt = format!("p{i}");
                let mut write = table.new_write()?;
                write.write(Row::insert(pv(&dt, i, Some(i as i32))))?;
                let message = write.prepare_commit(true)?;
                table.new_commit(format!("writer-{i}")).commit("only", [message])?;
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread")?;
    }

    assert_eq!(table.latest_snapshot()?.map(|s| s.id), Some(4));
    assert_eq!(
        read_sorted(table.new_read_builder()),
        vec!["+I[p0, 0, 0]", "+I[p1, 1, 1]", "+I[p2, 2, 2]", "+I[p3, 3, 3]"]
    );
    Ok(())
}

#[test]
fn time_travel_reads_older_snapshots() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = create_table(keyed_schema(), |o| o);
    let table = &fixture.table;
    write_and_commit(table, "c1", [Row::insert(kv(1, "v1"))])?;
    write_and_commit(table, "c2", [Row::update(kv(1, "v2")), Row::insert(kv(2, "b"))])?;
    write_and_commit(table, "c3", [Row::delete(kv(2, "b"))])?;

    assert_eq!(
        read_sorted(table.new_read_builder().with_snapshot(1)),
        vec!["+I[1, v1]"]
    );
    assert_eq!(
        read_sorted(table.new_read_builder().with_snapshot(2)),
        vec!["+I[1, v2]", "+I[2, b]"]
    );
    assert_eq!(read_sorted(table.new_read_builder()), vec!["+I[1, v2]"]);

    let missing = table.new_read_builder().with_snapshot(9).plan();
    assert!(matches!(missing, Err(TableError::Snapshot(_))));
    Ok(())
}

#[test]
fn changelog_records_input_rows() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = create_table(keyed_schema(), |o| o);
    let table = &fixture.table;
    write_and_commit(table, "c1", [Row::insert(kv(1, "a")), Row::insert(kv(2, "b"))])?;
    write_and_commit(table, "c2", [Row::update(kv(1, "a2")), Row::delete(kv(2, "b"))])?;

    let all: Vec<String> = table
        .read_changelog(None, 2)?
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(all, vec!["+I[1, a]", "+I[2, b]", "+U[1, a2]", "-D[2, b]"]);

    let second: Vec<String> = table
        .read_changelog(Some(1), 2)?
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(second, vec!["+U[1, a2]", "-D[2, b]"]);

    // changelog visibility surfaces the retracted key
    assert_eq!(
        read_sorted(table.new_read_builder().with_changelog(true)),
        vec!["+U[1, a2]", "-D[2, b]"]
    );
    Ok(())
}

#[test]
fn compaction_rewrites_runs_without_changing_results() -> Result<(), Box<dyn std::error::Error>>
{
    let fixture = create_table(keyed_schema(), |o| o.compaction_max_sorted_run_num(2));
    let table = &fixture.table;
    for i in 0..5 {
        write_and_commit(
            table,
            &format!("c{i}"),
            [Row::insert(kv(i, "x")), Row::delete(kv(i - 1, "x"))],
        )?;
    }
    assert_eq!(read_sorted(table.new_read_builder()), vec!["+I[4, x]"]);

    let plan = table.new_read_builder().plan()?;
    let runs: usize = plan.splits.iter().map(|s| s.runs.len()).sum();
    assert!(runs <= 2, "runs after compaction: {runs}");

    // older snapshots still read their own files
    assert_eq!(
        read_sorted(table.new_read_builder().with_snapshot(2)),
        vec!["+I[1, x]"]
    );

    let mut write = table.new_write()?;
    write.compact(&tablestore::KeyOwned::default(), 0)?;
    let message = write.prepare_commit(true)?;
    let id = table.new_commit("compactor").commit("full", [message])?;
    let snapshot = table.snapshot(id.expect("compaction snapshot"))?;
    assert_eq!(snapshot.commit_kind, CommitKind::Compact);
    assert_eq!(read_sorted(table.new_read_builder()), vec!["+I[4, x]"]);
    Ok(())
}

#[test]
fn manifests_are_merged_past_the_threshold() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = create_table(keyed_schema(), |o| o.manifest_merge_min_count(2));
    let table = &fixture.table;
    for i in 0..6 {
        write_and_commit(table, &format!("c{i}"), [Row::insert(kv(i, "m"))])?;
        let latest = table.latest_snapshot()?.expect("snapshot");
        assert!(latest.base_manifests.len() <= 2);
    }
    let reopened = FileStoreTable::open(fixture.dir.path())?;
    assert_eq!(read_sorted(reopened.new_read_builder()).len(), 6);
    let latest = reopened.latest_snapshot()?.expect("snapshot");
    assert_eq!(latest.total_record_count, 6);
    Ok(())
}

#[test]
fn racing_compactions_of_one_bucket_conflict() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = create_table(keyed_schema(), |o| o);
    let table = &fixture.table;
    write_and_commit(table, "c1", [Row::insert(kv(1, "a"))])?;
    write_and_commit(table, "c2", [Row::insert(kv(2, "b")), Row::delete(kv(1, "a"))])?;

    let partition = tablestore::KeyOwned::default();
    let mut first = table.new_write()?;
    let mut second = table.new_write()?;
    first.compact(&partition, 0)?;
    second.compact(&partition, 0)?;
    let first_message = first.prepare_commit(true)?;
    let second_message = second.prepare_commit(true)?;
    assert!(!first_message.is_empty() && !second_message.is_empty());

    let id = table.new_commit("compact-a").commit("a", [first_message])?;
    assert_eq!(id, Some(3));
    let err = table
        .new_commit("compact-b")
        .commit("b", [second_message])
        .expect_err("inputs already rewritten");
    assert!(matches!(err, TableError::CommitConflict(_)));
    assert_eq!(table.latest_snapshot()?.map(|s| s.id), Some(3));
    assert_eq!(read_sorted(table.new_read_builder()), vec!["+I[2, b]"]);
    Ok(())
}

#[test]
fn failed_flush_keeps_buffered_rows() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = create_table(keyed_schema(), |o| o);
    let table = &fixture.table;

    let mut write = table.new_write()?;
    write.write(Row::insert(kv(1, "a")))?;
    write.write(Row::insert(kv(2, "b")))?;

    // a plain file where the bucket directory belongs makes every write fail
    let blocker = fixture.dir.path().join("bucket-0");
    std::fs::write(&blocker, b"")?;
    let err = write.prepare_commit(true).expect_err("bucket dir blocked");
    assert!(matches!(err, TableError::Io(_)));

    std::fs::remove_file(&blocker)?;
    let message = write.prepare_commit(true)?;
    assert!(!message.is_empty());
    assert_eq!(table.new_commit("u").commit("after-retry", [message])?, Some(1));
    assert_eq!(read_sorted(table.new_read_builder()), vec!["+I[1, a]", "+I[2, b]"]);
    let changelog: Vec<String> = table
        .read_changelog(None, 1)?
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(changelog, vec!["+I[1, a]", "+I[2, b]"]);
    Ok(())
}
