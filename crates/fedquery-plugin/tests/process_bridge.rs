//! Host ↔ child process bridge against the sample plugin binary.

use rusqlite::Connection;

use fedquery::config::FederationConfig;
use fedquery::Federation;
use fedquery_core::PluginConfig;

const SAMPLE_PLUGIN: &str = env!("CARGO_BIN_EXE_fedquery-sample-plugin");

fn attach(config: PluginConfig) -> (Federation, Connection) {
    let federation = Federation::new(FederationConfig::default()).unwrap();
    let conn = Connection::open_in_memory().unwrap();
    federation
        .attach_plugin(&conn, "echo", SAMPLE_PLUGIN, 0, config)
        .unwrap();
    (federation, conn)
}

fn values(conn: &Connection, sql: &str) -> Vec<String> {
    let mut stmt = conn.prepare(sql).unwrap();
    let rows = stmt.query_map([], |row| row.get::<_, String>(0)).unwrap();
    rows.collect::<Result<_, _>>().unwrap()
}

#[test]
fn test_twenty_rows_over_three_batches() {
    let (_federation, conn) = attach(PluginConfig::new());
    let rows = values(&conn, "SELECT value FROM echo('x')");
    let expected: Vec<String> = (1..=20).map(|n| format!("x-{n}")).collect();
    assert_eq!(rows, expected);
}

#[test]
fn test_offset_is_pushed_to_the_plugin() {
    let (_federation, conn) = attach(PluginConfig::new());
    assert_eq!(
        values(&conn, "SELECT value FROM echo('o') LIMIT 3 OFFSET 5"),
        vec!["o-6", "o-7", "o-8"]
    );
}

#[test]
fn test_cursors_get_distinct_identities() {
    let (_federation, conn) = attach(PluginConfig::new());
    let mut stmt = conn
        .prepare("SELECT DISTINCT cursor FROM (SELECT cursor FROM echo('a') UNION ALL SELECT cursor FROM echo('b'))")
        .unwrap();
    let cursors: Vec<i64> = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(cursors.len(), 2);
}

#[test]
fn test_one_process_serves_every_attachment() {
    let federation = Federation::new(FederationConfig::default()).unwrap();
    let conn = Connection::open_in_memory().unwrap();
    federation
        .attach_plugin(&conn, "first", SAMPLE_PLUGIN, 0, PluginConfig::new())
        .unwrap();
    federation
        .attach_plugin(&conn, "second", SAMPLE_PLUGIN, 0, PluginConfig::new())
        .unwrap();

    assert_eq!(values(&conn, "SELECT value FROM first('f')").len(), 20);
    assert_eq!(values(&conn, "SELECT value FROM second('s')").len(), 20);
}

#[test]
fn test_plugin_errors_reach_the_statement() {
    let mut config = PluginConfig::new();
    config.insert("total_rows".to_string(), "many".to_string());
    let federation = Federation::new(FederationConfig::default()).unwrap();
    let conn = Connection::open_in_memory().unwrap();
    federation
        .attach_plugin(&conn, "broken", SAMPLE_PLUGIN, 0, config)
        .unwrap();

    // Initialization happens on first use of the eponymous table.
    let err = conn.prepare("SELECT value FROM broken('x')").unwrap_err();
    assert!(err.to_string().contains("total_rows"), "{err}");
}
