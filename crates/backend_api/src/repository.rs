use async_trait::async_trait;
use models::{CreateKaimemoAmountRequest, CreateKaimemoRequest, Kaimemo, KaimemoAmount};
use notion_client::properties::{
    number_property, rich_text_equals, rich_text_property, select_property, title_property,
};
use notion_client::{NotionClient, Page};
use serde_json::Map;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ApiError, Result};

/// Repository trait for the record store holding memos and amount records.
/// Removal archives the record; nothing is edited in place.
#[async_trait]
pub trait KaimemoRepository: Send + Sync {
    async fn fetch_kaimemo(&self, owner: &str) -> Result<Vec<Kaimemo>>;
    async fn insert_kaimemo(&self, req: &CreateKaimemoRequest) -> Result<String>;
    async fn remove_kaimemo(&self, id: &str) -> Result<()>;
    async fn fetch_amount_records(&self, owner: &str) -> Result<Vec<KaimemoAmount>>;
    async fn insert_amount(&self, req: &CreateKaimemoAmountRequest) -> Result<String>;
    async fn remove_amount(&self, id: &str) -> Result<()>;
}

const OWNER_PROPERTY: &str = "tempUserID";

/// Notion-backed implementation. Memos and amount records live in two
/// separate databases sharing the owner property.
pub struct NotionKaimemoRepository {
    client: NotionClient,
    kaimemo_database_id: String,
    summary_database_id: String,
}

impl NotionKaimemoRepository {
    pub fn new(
        client: NotionClient,
        kaimemo_database_id: impl Into<String>,
        summary_database_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            kaimemo_database_id: kaimemo_database_id.into(),
            summary_database_id: summary_database_id.into(),
        }
    }
}

fn log_unsupported(page: &Page) {
    let unsupported = page.unsupported_properties();
    if !unsupported.is_empty() {
        debug!(page = %page.id, properties = ?unsupported, "Ignoring unsupported Notion properties");
    }
}

/// name: title, tag: select, done: checkbox
pub fn kaimemo_from_page(page: &Page) -> notion_client::Result<Kaimemo> {
    log_unsupported(page);
    Ok(Kaimemo {
        id: page.id.clone(),
        name: page.title("name")?.unwrap_or_default(),
        tag: page.select("tag")?.unwrap_or_default(),
        done: page.checkbox("done")?.unwrap_or(false),
    })
}

/// date: title, tag: select, amount: number
pub fn amount_from_page(page: &Page) -> notion_client::Result<KaimemoAmount> {
    log_unsupported(page);
    Ok(KaimemoAmount {
        id: page.id.clone(),
        date: page.title("date")?.unwrap_or_default(),
        tag: page.select("tag")?.unwrap_or_default(),
        amount: page.integer("amount")?.unwrap_or(0),
    })
}

#[async_trait]
impl KaimemoRepository for NotionKaimemoRepository {
    async fn fetch_kaimemo(&self, owner: &str) -> Result<Vec<Kaimemo>> {
        let pages = self
            .client
            .query_database(&self.kaimemo_database_id, Some(rich_text_equals(OWNER_PROPERTY, owner)))
            .await?;
        let memos = pages
            .iter()
            .map(kaimemo_from_page)
            .collect::<notion_client::Result<Vec<_>>>()?;
        Ok(memos)
    }

    async fn insert_kaimemo(&self, req: &CreateKaimemoRequest) -> Result<String> {
        let mut properties = Map::new();
        properties.insert("name".to_string(), title_property(&req.name));
        properties.insert("tag".to_string(), select_property(&req.tag));
        properties.insert(OWNER_PROPERTY.to_string(), rich_text_property(&req.temp_user_id));

        let page = self
            .client
            .create_page(&self.kaimemo_database_id, properties)
            .await?;
        Ok(page.id)
    }

    async fn remove_kaimemo(&self, id: &str) -> Result<()> {
        self.client.archive_page(id).await?;
        Ok(())
    }

    async fn fetch_amount_records(&self, owner: &str) -> Result<Vec<KaimemoAmount>> {
        let pages = self
            .client
            .query_database(&self.summary_database_id, Some(rich_text_equals(OWNER_PROPERTY, owner)))
            .await?;
        let records = pages
            .iter()
            .map(amount_from_page)
            .collect::<notion_client::Result<Vec<_>>>()?;
        Ok(records)
    }

    async fn insert_amount(&self, req: &CreateKaimemoAmountRequest) -> Result<String> {
        let mut properties = Map::new();
        properties.insert("date".to_string(), title_property(&req.date));
        properties.insert("tag".to_string(), select_property(&req.tag));
        properties.insert("amount".to_string(), number_property(req.amount as f64));
        properties.insert(OWNER_PROPERTY.to_string(), rich_text_property(&req.temp_user_id));

        let page = self
            .client
            .create_page(&self.summary_database_id, properties)
            .await?;
        Ok(page.id)
    }

    async fn remove_amount(&self, id: &str) -> Result<()> {
        self.client.archive_page(id).await?;
        Ok(())
    }
}

/// In-process store for local development (`KAIMEMO_STORE=memory`) and tests.
#[derive(Default)]
pub struct MemoryKaimemoRepository {
    memos: RwLock<Vec<(String, Kaimemo)>>,
    amounts: RwLock<Vec<(String, KaimemoAmount)>>,
}

impl MemoryKaimemoRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KaimemoRepository for MemoryKaimemoRepository {
    async fn fetch_kaimemo(&self, owner: &str) -> Result<Vec<Kaimemo>> {
        let memos = self.memos.read().await;
        Ok(memos
            .iter()
            .filter(|(o, _)| o == owner)
            .map(|(_, memo)| memo.clone())
            .collect())
    }

    async fn insert_kaimemo(&self, req: &CreateKaimemoRequest) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let memo = Kaimemo {
            id: id.clone(),
            tag: req.tag.clone(),
            name: req.name.clone(),
            done: false,
        };
        self.memos.write().await.push((req.temp_user_id.clone(), memo));
        Ok(id)
    }

    async fn remove_kaimemo(&self, id: &str) -> Result<()> {
        let mut memos = self.memos.write().await;
        let before = memos.len();
        memos.retain(|(_, memo)| memo.id != id);
        if memos.len() == before {
            return Err(ApiError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn fetch_amount_records(&self, owner: &str) -> Result<Vec<KaimemoAmount>> {
        let amounts = self.amounts.read().await;
        Ok(amounts
            .iter()
            .filter(|(o, _)| o == owner)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn insert_amount(&self, req: &CreateKaimemoAmountRequest) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let record = KaimemoAmount {
            id: id.clone(),
            date: req.date.clone(),
            tag: req.tag.clone(),
            amount: req.amount,
        };
        self.amounts.write().await.push((req.temp_user_id.clone(), record));
        Ok(id)
    }

    async fn remove_amount(&self, id: &str) -> Result<()> {
        let mut amounts = self.amounts.write().await;
        let before = amounts.len();
        amounts.retain(|(_, record)| record.id != id);
        if amounts.len() == before {
            return Err(ApiError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
