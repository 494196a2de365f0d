use models::{
    CreateKaimemoAmountRequest, CreateKaimemoRequest, Kaimemo, KaimemoSummaryResponse,
    TelegraphRequest,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use crate::broadcaster::{BroadcastReport, Broadcaster, Outbound};
use crate::error::{ApiError, Result};
use crate::repository::KaimemoRepository;

/// Memo and amount operations over the record store. Memo mutations push a
/// fresh snapshot to the owner's live connections.
pub struct KaimemoService {
    repo: Arc<dyn KaimemoRepository>,
    broadcaster: Arc<Broadcaster>,
    /// Completed memo mutations. Snapshots carry the value read before
    /// their fetch so a writer can drop one that is older than what it sent.
    version: AtomicU64,
}

/// Largest absolute amount accepted on a single record.
pub const MAX_AMOUNT: i64 = 1_000_000_000_000;

fn require(value: &str, message: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(message.to_string()));
    }
    Ok(())
}

impl KaimemoService {
    pub fn new(repo: Arc<dyn KaimemoRepository>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            repo,
            broadcaster,
            version: AtomicU64::new(0),
        }
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub async fn fetch_kaimemo(&self, owner: &str) -> Result<Vec<Kaimemo>> {
        require(owner, "tempUserID is required")?;
        self.repo.fetch_kaimemo(owner).await
    }

    /// Current memo list of `owner`, serialized for the live channel.
    pub async fn snapshot(&self, owner: &str) -> Result<String> {
        let memos = self.fetch_kaimemo(owner).await?;
        serde_json::to_string(&memos).map_err(|e| ApiError::Internal(e.to_string()))
    }

    /// Snapshot tagged with the mutation count it reflects at least.
    pub async fn versioned_snapshot(&self, owner: &str) -> Result<Outbound> {
        let version = self.version.load(Ordering::SeqCst);
        let payload = self.snapshot(owner).await?;
        Ok(Outbound::snapshot(version, payload))
    }

    fn record_mutation(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn create_kaimemo(&self, req: CreateKaimemoRequest) -> Result<String> {
        require(&req.temp_user_id, "tempUserID is required")?;
        require(&req.tag, "tag is required")?;
        require(&req.name, "name is required")?;

        let id = self.repo.insert_kaimemo(&req).await?;
        self.record_mutation();
        info!(owner = %req.temp_user_id, id = %id, "Created kaimemo");
        self.publish(&req.temp_user_id).await;
        Ok(id)
    }

    pub async fn remove_kaimemo(&self, owner: &str, id: &str) -> Result<()> {
        require(owner, "tempUserID is required")?;
        require(id, "ID is required")?;

        self.repo.remove_kaimemo(id).await?;
        self.record_mutation();
        info!(owner, id, "Removed kaimemo");
        self.publish(owner).await;
        Ok(())
    }

    /// Applies one live-channel request for `owner`.
    pub async fn apply_live_request(&self, owner: &str, request: TelegraphRequest) -> Result<()> {
        match request {
            TelegraphRequest::Create { tag, name } => {
                self.create_kaimemo(CreateKaimemoRequest {
                    temp_user_id: owner.to_string(),
                    tag,
                    name,
                })
                .await?;
            }
            TelegraphRequest::Delete { id } => self.remove_kaimemo(owner, &id).await?,
        }
        Ok(())
    }

    /// Pushes the owner's snapshot to the live connections. The mutation has
    /// already happened, so a failed fetch is only logged.
    pub async fn publish(&self, owner: &str) -> BroadcastReport {
        match self.versioned_snapshot(owner).await {
            Ok(frame) => self.broadcaster.broadcast(owner, &frame),
            Err(err) => {
                error!(owner, error = %err, "Failed to fetch snapshot for broadcast");
                BroadcastReport::default()
            }
        }
    }

    pub async fn fetch_summary(&self, owner: &str) -> Result<KaimemoSummaryResponse> {
        require(owner, "tempUserID is required")?;
        let records = self.repo.fetch_amount_records(owner).await?;
        Ok(summary_engine::summarize(&records)?)
    }

    pub async fn create_amount(&self, req: CreateKaimemoAmountRequest) -> Result<String> {
        require(&req.temp_user_id, "tempUserID is required")?;
        require(&req.tag, "tag is required")?;
        summary_engine::validate_date(&req.date)
            .map_err(|_| ApiError::BadRequest(format!("Invalid date '{}' (expected YYYY-MM-DD)", req.date)))?;
        if !matches!(req.amount.checked_abs(), Some(amount) if amount <= MAX_AMOUNT) {
            return Err(ApiError::BadRequest(format!("amount must be within ±{MAX_AMOUNT}")));
        }

        let id = self.repo.insert_amount(&req).await?;
        info!(owner = %req.temp_user_id, id = %id, amount = req.amount, "Created kaimemo amount");
        Ok(id)
    }

    pub async fn remove_amount(&self, owner: &str, id: &str) -> Result<()> {
        require(owner, "tempUserID is required")?;
        require(id, "ID is required")?;
        self.repo.remove_amount(id).await
    }
}
