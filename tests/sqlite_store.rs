use std::fs;
use std::path::Path;

use polylet::constants::outputs::NAMELIST_FILE;
use polylet::{
    Cell, Criteria, DatasetSpec, Fingerprint, Fingerprinter, InMemoryCanonicalizer, Pipeline,
    PipelineError, PipelineOptions, PrepareManifest, PropertyLookup, RecordStore, SqliteStore,
    StoreContext, StoreError, StoreSettings, StoredRow, Table, export_names,
};

struct ConstantFingerprinter;

impl Fingerprinter for ConstantFingerprinter {
    fn fingerprint(&self, _: &str) -> Result<Fingerprint, PipelineError> {
        Ok(Fingerprint::pinned(serde_json::json!([0, 1])))
    }
}

fn row<const N: usize>(fields: [(&str, Cell); N]) -> StoredRow {
    fields
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Create a database file with one known polymer, one property, and its names.
fn seed_database(path: &Path) {
    fs::write(path, b"").unwrap();
    let mut store = SqliteStore::open(path).unwrap();
    store.initialize_schema().unwrap();
    store
        .insert(
            Table::Homopolymer,
            &row([
                ("smiles", Cell::from("C=C")),
                ("canonical_smiles", Cell::from("[*]CC[*]")),
                ("category", Cell::from("known")),
            ]),
        )
        .unwrap();
    store
        .upsert(
            Table::Property,
            &row([("short_name", Cell::from("D_gas"))]),
            row([("name", Cell::from("Gas Diffusivity")), ("unit", Cell::from("cm^2/s"))]),
            false,
        )
        .unwrap();
    for (name, search_name) in [("polyethylene", "pe"), ("poly(ethylene)", "pe2")] {
        store
            .insert(
                Table::PolymerName,
                &row([
                    ("hp_id", Cell::Int(1)),
                    ("name", Cell::from(name)),
                    ("search_name", Cell::from(search_name)),
                ]),
            )
            .unwrap();
    }
}

#[test]
fn prepare_against_a_sqlite_store() {
    let temp = tempfile::tempdir().unwrap();
    let db_path = temp.path().join("polydb.sqlite");
    seed_database(&db_path);
    fs::write(
        temp.path().join("Dgas.csv"),
        "smiles,value,gas\n[*]CC[*],0.5,CO2\n[*]CC([*])C,0.7,CO2\n",
    )
    .unwrap();

    let context = StoreContext::try_connect(&StoreSettings::sqlite(&db_path)).unwrap();
    let canon = InMemoryCanonicalizer::new()
        .with_fixed_point("[*]CC[*]")
        .with_fixed_point("[*]CC([*])C");
    let manifest = PrepareManifest {
        properties: PrepareManifest::builtin().properties,
        datasets: vec![
            DatasetSpec::new("Dgas.csv", "gas_diffusivity", "smiles", "value")
                .with_short_name("D_gas")
                .with_condition("gas", "gas"),
        ],
    };
    let pipeline = Pipeline::new(
        &context,
        &canon,
        &ConstantFingerprinter,
        PipelineOptions::new(temp.path()),
    );
    let report = pipeline.prepare(&manifest).unwrap();

    assert_eq!(report.datasets[0].property, PropertyLookup::Found(1));
    assert_eq!(report.datasets[0].existing_properties, 1);
    assert_eq!(report.datasets[0].new_properties, 1);
    assert_eq!(report.new_polymers, 1);

    let existing = fs::read_to_string(temp.path().join("gas_diffusivity_existing_polymers.jsonl"))
        .unwrap();
    assert_eq!(
        existing,
        "{\"hp_id\":1,\"prop_id\":1,\"value\":0.5,\"calculation_method\":\"md\",\"conditions\":\"{\\\"gas\\\":\\\"CO2\\\"}\",\"note\":\"\"}\n"
    );
    let catalogue = fs::read_to_string(temp.path().join("new_properties.jsonl")).unwrap();
    assert_eq!(catalogue.lines().count(), 3);

    // The pipeline only reads.
    let store = context.store().unwrap();
    assert_eq!(
        store.get_all(Table::Homopolymer, &Criteria::new()).unwrap().len(),
        1
    );
}

#[test]
fn namelist_exports_names_from_sqlite() {
    let temp = tempfile::tempdir().unwrap();
    let db_path = temp.path().join("polydb.sqlite");
    seed_database(&db_path);

    let context = StoreContext::try_connect(&StoreSettings::sqlite(db_path)).unwrap();
    let out = temp.path().join(NAMELIST_FILE);
    assert_eq!(export_names(&context, &out).unwrap(), 4);
    let names = fs::read_to_string(&out).unwrap();
    assert_eq!(names.lines().nth(1), Some(r#"{"polymer":"pe"}"#));
}

#[test]
fn connected_context_is_read_only() {
    let temp = tempfile::tempdir().unwrap();
    let db_path = temp.path().join("polydb.sqlite");
    seed_database(&db_path);

    let mut context = StoreContext::try_connect(&StoreSettings::sqlite(&db_path)).unwrap();
    let store = context.store_mut().unwrap();
    let err = store
        .insert(Table::Homopolymer, &row([("canonical_smiles", Cell::from("[*]CCO[*]"))]))
        .unwrap_err();
    assert!(matches!(err, StoreError::Sqlite(_)));
    assert_eq!(
        store.get_all(Table::Homopolymer, &Criteria::new()).unwrap().len(),
        1
    );
}
