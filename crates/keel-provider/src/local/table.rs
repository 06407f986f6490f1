use keel_core::{Attributes, ID_SUFFIX_LEN, ROW_PREFIX, generate_id};
use tracing::debug;

use super::{LocalProvider, row_key, table_key, validate_name};
use crate::error::{ProviderError, ProviderResult};

impl LocalProvider {
    pub(super) fn fetch_row(&self, app: &str, table: &str, id: &str) -> ProviderResult<Attributes> {
        self.require_app(app)?;
        validate_name("table", table)?;
        validate_name("row", id)?;
        self.load_record(&row_key(app, table, id), "row", &format!("{table}/{id}"))
    }

    pub(super) fn store_row(
        &self,
        app: &str,
        table: &str,
        attrs: Attributes,
    ) -> ProviderResult<String> {
        self.require_app(app)?;
        validate_name("table", table)?;
        let id = generate_id(ROW_PREFIX, ID_SUFFIX_LEN);
        self.store.store_record(&row_key(app, table, &id), &attrs)?;
        debug!(%app, %table, row = %id, "row stored");
        Ok(id)
    }

    /// Row ids of `table`, sorted. Empty for a table never written.
    pub(super) fn list_rows(&self, app: &str, table: &str) -> ProviderResult<Vec<String>> {
        self.require_app(app)?;
        validate_name("table", table)?;
        Ok(self.store.list(&table_key(app, table))?)
    }

    pub(super) fn delete_row(&self, app: &str, table: &str, id: &str) -> ProviderResult<()> {
        self.require_app(app)?;
        validate_name("table", table)?;
        validate_name("row", id)?;
        match self.store.delete(&row_key(app, table, id)) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                Err(ProviderError::not_found("row", &format!("{table}/{id}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}
