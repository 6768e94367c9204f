use alphaplan::store::{from_json, load, save, to_json_pretty, ValueFunctionDocument};
use alphaplan::{AlphaVector, BeliefState, StoreConfig, ValueFunctionStore};
use tempfile::tempdir;

fn sample_store() -> ValueFunctionStore {
    let store = ValueFunctionStore::new(
        3,
        StoreConfig {
            tolerance: 1e-6,
            caching: false,
            ..StoreConfig::default()
        },
    )
    .unwrap();
    // Raise max_value, then remove the vector that set it.
    store.add(AlphaVector::new(3, vec![9.0, 9.0, 9.0]).unwrap(), false).unwrap();
    store.add(AlphaVector::new(0, vec![5.0, 0.0, 0.0]).unwrap(), false).unwrap();
    store.add(AlphaVector::new(1, vec![0.0, 3.0, 1.0]).unwrap(), false).unwrap();
    store.add(AlphaVector::new(2, vec![1.0, 1.0, 2.0]).unwrap(), false).unwrap();
    store.prune_low_hit_count_vectors(0, 1).unwrap();
    store
}

#[test]
fn file_roundtrip_preserves_attributes() {
    let store = sample_store();
    assert_eq!(store.len().unwrap(), 3);

    let dir = tempdir().unwrap();
    let path = dir.path().join("value_function.json");
    save(&store, &path).unwrap();
    let restored = load(&path).unwrap();

    assert_eq!(restored.tolerance(), 1e-6);
    assert!(!restored.caching());
    assert_eq!(restored.max_value().unwrap(), 9.0);
    assert_eq!(restored.state_count(), 3);

    let original: Vec<(usize, Vec<f64>)> = store
        .vectors()
        .unwrap()
        .iter()
        .map(|v| (v.action(), v.coefficients().to_vec()))
        .collect();
    let loaded: Vec<(usize, Vec<f64>)> = restored
        .vectors()
        .unwrap()
        .iter()
        .map(|v| (v.action(), v.coefficients().to_vec()))
        .collect();
    assert_eq!(original, loaded);
}

#[test]
fn document_roundtrip_preserves_envelope() {
    let store = ValueFunctionStore::new(3, StoreConfig::default()).unwrap();
    store.add(AlphaVector::new(0, vec![5.0, 0.0, 0.0]).unwrap(), false).unwrap();
    store.add(AlphaVector::new(1, vec![0.0, 3.0, 1.0]).unwrap(), false).unwrap();

    let json = to_json_pretty(&store).unwrap();
    let doc: ValueFunctionDocument = serde_json::from_str(&json).unwrap();
    assert_eq!(doc.vector_count, 2);
    assert_eq!(doc.max_value, Some(5.0));

    let restored = from_json(&json).unwrap();
    for weights in [[1.0, 0.0, 0.0], [0.2, 0.5, 0.3], [0.0, 0.0, 1.0]] {
        let b = BeliefState::from_dense(&weights).unwrap();
        assert_eq!(store.value_at(&b).unwrap(), restored.value_at(&b).unwrap());
    }
}

#[test]
fn malformed_documents_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "not json").unwrap();
    assert!(load(&path).unwrap_err().is_persistence());

    let wrong_length = r#"{
        "vector_count": 1,
        "state_count": 2,
        "tolerance": 1e-9,
        "caching": true,
        "max_value": 1.0,
        "vectors": [{ "action": 0, "coefficients": [1.0, 2.0, 3.0] }]
    }"#;
    assert!(from_json(wrong_length).unwrap_err().is_validation());

    assert!(load(dir.path().join("missing.json")).unwrap_err().is_persistence());
}
