//! Unit tests for decoding persisted task parameters.

use rstest::rstest;

use crate::schema_change::domain::{
    ParameterUpgradeError, RateLimitConfig, TASK_PARAMETERS_VERSION, TaskParameters,
    decode_task_parameters, encode_task_parameters,
};

const LEGACY_BLOB: &str = r#"{
    "databaseName": "shop",
    "originTableName": "orders",
    "newTableName": "_orders_osc_new_",
    "renamedTableName": "_orders_osc_old_",
    "originTableCreateDdl": "CREATE TABLE orders (id INT)",
    "newTableCreateDdl": "CREATE TABLE _orders_osc_new_ (id INT, note TEXT)",
    "sqlsToBeExecuted": ["CREATE INDEX idx_note ON _orders_osc_new_ (note)"],
    "filterColumns": ["id"],
    "rateLimitConfig": {"rowLimit": 100, "dataSizeLimit": -1},
    "resourceID": -1,
    "k8sMapperPort": 0,
    "odcCommandURl": "http://10.0.0.5:18001",
    "omsProjectId": null
}"#;

#[test]
fn legacy_blob_upgrades_to_current_layout() {
    let parameters = decode_task_parameters(LEGACY_BLOB).expect("legacy blob should decode");

    assert_eq!(parameters.version, TASK_PARAMETERS_VERSION);
    assert_eq!(parameters.origin_table_name, "orders");
    assert_eq!(parameters.origin_table_ddl, "CREATE TABLE orders (id INT)");
    assert_eq!(parameters.auxiliary_sqls.len(), 1);
    assert_eq!(parameters.rate_limit, RateLimitConfig::rows_per_second(100));
    assert_eq!(parameters.resource_id, None);
    assert_eq!(parameters.mapped_port, None);
    assert_eq!(
        parameters.control_url.as_deref(),
        Some("http://10.0.0.5:18001")
    );
    assert_eq!(parameters.migration_project_id, None);
    assert!(!parameters.resource_released);
}

#[test]
fn current_layout_survives_encoding() {
    let mut parameters = TaskParameters::new("shop", "orders", "CREATE TABLE x (id INT)")
        .with_rate_limit(RateLimitConfig::rows_per_second(50));
    parameters.migration_project_id = Some("project-7".to_owned());

    let encoded = encode_task_parameters(&parameters).expect("parameters should encode");
    let decoded = decode_task_parameters(&encoded).expect("parameters should decode");

    assert_eq!(decoded, parameters);
}

#[rstest]
#[case(r#"{"version": 7, "database_name": "shop"}"#)]
#[case(r#"{"version": 0}"#)]
fn rejects_unknown_versions(#[case] blob: &str) {
    let result = decode_task_parameters(blob);

    assert!(matches!(
        result,
        Err(ParameterUpgradeError::UnsupportedVersion(_))
    ));
}

#[rstest]
#[case("[1, 2, 3]")]
#[case("\"orders\"")]
fn rejects_non_object_blobs(#[case] blob: &str) {
    let result = decode_task_parameters(blob);

    assert!(matches!(result, Err(ParameterUpgradeError::Malformed(_))));
}
