// tests/metrics_textfile.rs
use interaction_sync::loader::load_rows;
use interaction_sync::telemetry::{install_recorder, write_textfile};
use interaction_sync::{Row, Scalar, SqliteWarehouse, Table};

#[test]
fn textfile_snapshot_carries_run_counters() {
    let handle = install_recorder().unwrap();
    let w = SqliteWarehouse::open_in_memory().unwrap();
    let row: Row = [("contact_id".to_string(), Scalar::Int(1))].into_iter().collect();
    assert_eq!(load_rows(&w, Table::Contacts, &[row]).unwrap(), 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("textfile").join("interaction_sync.prom");
    write_textfile(&handle, &path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("sync_rows_loaded_total"));
    assert!(text.contains("table=\"contacts\""));
    let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![std::ffi::OsString::from("interaction_sync.prom")]);

    // Installing again hands back the same recorder.
    assert!(install_recorder().is_ok());
}
