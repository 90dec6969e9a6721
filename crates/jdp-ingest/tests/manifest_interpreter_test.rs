//! End-to-end manifest interpreter tests: YAML in, entity trees out.

use std::collections::HashMap;

use jdp_ingest::manifest::{
    parse_manifest_yaml, EntitySchema, EnumRegistry, ManifestContext, ManifestError, Row,
    FOREACH_LOOP_VALUE_NAME,
};

const VIOLATION_MANIFEST: &str = r#"
violation:
  external_id:
    $concat:
      $values:
        - DOC_ID
        - CYCLE_NO
        - VIOLATION_NO
  violation_date: VIOLATION_DATE
  violation_metadata:
    $json_dict:
      kind: $literal("SUPERVISION")
      source: SOURCE_SYSTEM
  violation_types:
    - $foreach:
        $iterable: VIOLATION_TYPES
        $result:
          violation_type_entry:
            violation_type:
              $raw_text: $iter
              $mappings:
                ViolationType.FELONY: FEL
                ViolationType.MISDEMEANOR: MIS
                ViolationType.TECHNICAL:
                  - TEC
                  - TECH
              $ignore:
                - UNK
  response:
    violation_response:
      external_id: RESPONSE_ID
      response_date: RESPONSE_DATE
"#;

fn context() -> ManifestContext {
    ManifestContext::new(EnumRegistry::standard())
        .with_entity("violation", EntitySchema::new())
        .with_entity("violation_response", EntitySchema::new())
        .with_entity(
            "violation_type_entry",
            EntitySchema::new()
                .with_enum_field("violation_type", "ViolationType")
                .enum_entity(),
        )
        .with_common_arg("state_code", "US_XX")
}

fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn full_row() -> HashMap<String, String> {
    row(&[
        ("DOC_ID", "12345"),
        ("CYCLE_NO", ""),
        ("VIOLATION_NO", "1"),
        ("VIOLATION_DATE", "2021-06-01"),
        ("SOURCE_SYSTEM", "OMNI"),
        ("VIOLATION_TYPES", "FEL,TECH,UNK"),
        ("RESPONSE_ID", "R-1"),
        ("RESPONSE_DATE", "2021-06-15"),
    ])
}

#[test]
fn builds_full_entity_tree_from_row() {
    let manifest = parse_manifest_yaml(VIOLATION_MANIFEST, &context()).unwrap();
    let columns = full_row();

    let entity = manifest
        .build_from_row(&Row::new(&columns))
        .unwrap()
        .unwrap();

    assert_eq!(entity.entity_type, "violation");
    assert_eq!(entity.string_field("state_code"), Some("US_XX"));
    // The empty CYCLE_NO column concatenates as the NONE placeholder.
    assert_eq!(entity.string_field("external_id"), Some("12345-NONE-1"));
    assert_eq!(entity.string_field("violation_date"), Some("2021-06-01"));

    let response = entity.child_entities("response");
    assert_eq!(response.len(), 1);
    assert_eq!(response[0].entity_type, "violation_response");
    assert_eq!(response[0].string_field("external_id"), Some("R-1"));
    assert_eq!(response[0].string_field("state_code"), Some("US_XX"));
}

#[test]
fn json_dict_output_is_sorted_and_stable() {
    let manifest = parse_manifest_yaml(VIOLATION_MANIFEST, &context()).unwrap();
    let columns = full_row();

    let entity = manifest
        .build_from_row(&Row::new(&columns))
        .unwrap()
        .unwrap();

    let metadata = entity.string_field("violation_metadata").unwrap();
    assert_eq!(metadata, r#"{"kind": "SUPERVISION", "source": "OMNI"}"#);
    // The output must round-trip as JSON.
    let parsed: serde_json::Value = serde_json::from_str(metadata).unwrap();
    assert_eq!(parsed["kind"], "SUPERVISION");
    assert_eq!(parsed["source"], "OMNI");
}

#[test]
fn foreach_expands_and_drops_ignored_enum_entities() {
    let manifest = parse_manifest_yaml(VIOLATION_MANIFEST, &context()).unwrap();
    let columns = full_row();

    let entity = manifest
        .build_from_row(&Row::new(&columns))
        .unwrap()
        .unwrap();

    // FEL and TECH map; UNK is ignored and its wrapper entity dropped.
    let types = entity.child_entities("violation_types");
    assert_eq!(types.len(), 2);
    let parsed: Vec<String> = types
        .iter()
        .map(|t| {
            t.enum_field("violation_type")
                .unwrap()
                .parse()
                .unwrap()
                .unwrap()
        })
        .collect();
    assert_eq!(parsed, vec!["FELONY", "TECHNICAL"]);

    // Evaluation must not leak the loop value into the source row.
    assert!(!columns.contains_key(FOREACH_LOOP_VALUE_NAME));
    assert_eq!(columns, full_row());
}

#[test]
fn empty_type_list_builds_no_entries() {
    let manifest = parse_manifest_yaml(VIOLATION_MANIFEST, &context()).unwrap();
    let mut columns = full_row();
    columns.insert("VIOLATION_TYPES".to_string(), String::new());

    let entity = manifest
        .build_from_row(&Row::new(&columns))
        .unwrap()
        .unwrap();

    assert!(entity.child_entities("violation_types").is_empty());
    assert!(entity.field("violation_types").is_none());
}

#[test]
fn missing_column_fails_the_row() {
    let manifest = parse_manifest_yaml(VIOLATION_MANIFEST, &context()).unwrap();
    let mut columns = full_row();
    columns.remove("VIOLATION_DATE");

    let result = manifest.build_from_row(&Row::new(&columns));
    assert!(matches!(result, Err(ManifestError::MissingColumn(_))));
}

#[test]
fn unmapped_raw_text_fails_when_resolved() {
    let manifest = parse_manifest_yaml(VIOLATION_MANIFEST, &context()).unwrap();
    let mut columns = full_row();
    columns.insert("VIOLATION_TYPES".to_string(), "BOGUS".to_string());

    // Building the tree resolves enum wrapper filters, which forces a parse
    // of the unmapped raw text.
    let result = manifest.build_from_row(&Row::new(&columns));
    assert!(matches!(
        result,
        Err(ManifestError::UnmappedRawText { .. })
    ));
}
