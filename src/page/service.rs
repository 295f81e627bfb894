// Page operations implemented directly on the store engine.
use std::sync::Arc;

use super::{Page, PageByName, PageSummary};
use crate::core::error::Error;
use crate::store::{Param, Statement, Store};

pub struct PageService {
    store: Arc<Store>,
}

impl PageService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Page names, sorted case-sensitively.
    pub async fn fetch_all_pages(&self) -> Result<Vec<String>, Error> {
        let rows = self.store.query(Statement::AllPages, Vec::new()).await?;
        let mut names = rows
            .iter()
            .map(|row| row.text(0).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;
        names.sort();
        Ok(names)
    }

    pub async fn fetch_all_pages_data(&self) -> Result<Vec<PageSummary>, Error> {
        let rows = self.store.query(Statement::AllPagesData, Vec::new()).await?;
        rows.iter()
            .map(|row| -> Result<PageSummary, Error> {
                Ok(PageSummary {
                    id: row.int(0)?,
                    name: row.text(1)?.to_string(),
                })
            })
            .collect()
    }

    /// With duplicate names, the page with the lowest id wins.
    pub async fn fetch_page(&self, name: &str) -> Result<Option<PageByName>, Error> {
        let rows = self
            .store
            .query(Statement::GetPage, vec![Param::from(name)])
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        Ok(Some(PageByName {
            id: row.int(0)?,
            raw_content: row.text(1)?.to_string(),
        }))
    }

    pub async fn fetch_page_by_id(&self, id: i64) -> Result<Option<Page>, Error> {
        let rows = self
            .store
            .query(Statement::GetPageById, vec![Param::Int(id)])
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        Ok(Some(Page {
            id: row.int(0)?,
            name: row.text(1)?.to_string(),
            content: row.text(2)?.to_string(),
        }))
    }

    pub async fn create_page(&self, name: &str, content: &str) -> Result<(), Error> {
        self.store
            .execute(Statement::CreatePage, vec![name.into(), content.into()])
            .await?;
        Ok(())
    }

    /// Succeeds even when `id` does not exist; nothing is created in that case.
    pub async fn save_page(&self, id: i64, content: &str) -> Result<(), Error> {
        let updated = self
            .store
            .execute(Statement::SavePage, vec![content.into(), Param::Int(id)])
            .await?;
        if updated == 0 {
            tracing::debug!(id, "save matched no page");
        }
        Ok(())
    }

    /// Succeeds even when `id` does not exist.
    pub async fn delete_page(&self, id: i64) -> Result<(), Error> {
        let deleted = self
            .store
            .execute(Statement::DeletePage, vec![Param::Int(id)])
            .await?;
        if deleted == 0 {
            tracing::debug!(id, "delete matched no page");
        }
        Ok(())
    }
}
