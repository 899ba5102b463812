//! Polymer name list export for the `namelist` command.

use std::path::Path;

use tracing::info;

use crate::constants::columns;
use crate::errors::{PipelineError, StoreError};
use crate::frame::Frame;
use crate::store::{Criteria, StoreContext, Table};

/// Collect every polymer name and search name into a single `polymer` column.
pub fn collect_names(context: &StoreContext) -> Result<Frame, PipelineError> {
    let store = context.store().ok_or_else(|| {
        StoreError::Unavailable("the namelist command requires a connected store".into())
    })?;
    let names = store.get_all(Table::PolymerName, &Criteria::new())?;
    info!(count = names.len(), "found names");

    let mut items = Frame::with_columns([columns::POLYMER]);
    for name in &names {
        for field in [columns::NAME, columns::SEARCH_NAME] {
            let value = name.get(field).cloned().unwrap_or_default();
            items.add([(columns::POLYMER, value)])?;
        }
    }
    Ok(items)
}

/// Write `namelist.jsonl`-style output to `out`. Returns the number of entries.
pub fn export_names(context: &StoreContext, out: &Path) -> Result<usize, PipelineError> {
    let items = collect_names(context)?;
    items.write_jsonl(out)?;
    info!(path = %out.display(), entries = items.len(), "name list saved");
    Ok(items.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Cell;
    use crate::store::MemoryStore;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn every_name_and_search_name_becomes_an_entry() {
        let temp = tempdir().unwrap();
        let context = StoreContext::with_store(Box::new(
            MemoryStore::new()
                .with_row(
                    Table::PolymerName,
                    [("name", Cell::from("polyethylene")), ("search_name", Cell::from("pe"))],
                )
                .with_row(
                    Table::PolymerName,
                    [("name", Cell::from("polystyrene")), ("search_name", Cell::from("ps"))],
                ),
        ));
        let out = temp.path().join("namelist.jsonl");
        assert_eq!(export_names(&context, &out).unwrap(), 4);

        let text = fs::read_to_string(&out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"polymer":"polyethylene"}"#,
                r#"{"polymer":"pe"}"#,
                r#"{"polymer":"polystyrene"}"#,
                r#"{"polymer":"ps"}"#,
            ]
        );
    }

    #[test]
    fn offline_context_fails_fast() {
        let temp = tempdir().unwrap();
        let err = export_names(&StoreContext::offline(), &temp.path().join("namelist.jsonl"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Store(StoreError::Unavailable(_))));
    }
}
