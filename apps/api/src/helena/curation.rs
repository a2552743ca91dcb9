//! Human curation of Helena drafts.
//!
//! ```text
//! pending ──approve──▶ approved   (publishes a knowledge article)
//!    │ ▲   ──reject───▶ rejected   (reason required)
//!  edit│ │cancel
//!    ▼ │
//! editing ─approve/reject─▶ approved / rejected
//! ```
//!
//! `approved` and `rejected` are terminal. The publish and reject writes
//! themselves run inside the `approve_pending_article` and
//! `reject_pending_article` procedures. A published article is then
//! handed to the search index.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::article::{DraftStatus, PendingArticle};
use crate::search::semantic::KNOWLEDGE_ARTICLE;
use crate::search::{IndexedDocument, KnowledgeIndex};

const MAX_KEYWORDS: usize = 20;

pub fn ensure_transition(from: DraftStatus, to: DraftStatus) -> Result<(), AppError> {
    use DraftStatus::*;
    let allowed = matches!(
        (from, to),
        (Pending, Approved)
            | (Pending, Rejected)
            | (Pending, Editing)
            | (Editing, Pending)
            | (Editing, Approved)
            | (Editing, Rejected)
    );
    if allowed {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "Draft cannot move from {from} to {to}"
        )))
    }
}

pub fn validate_reason(reason: &str) -> Result<&str, AppError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::Validation(
            "A rejection reason is required".into(),
        ));
    }
    Ok(reason)
}

/// Edits an agent may make while approving. Unset fields keep the draft's value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApprovalOverrides {
    pub title: Option<String>,
    pub content: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub is_public: Option<bool>,
}

impl ApprovalOverrides {
    /// Blank title or content counts as unset; keywords are trimmed,
    /// lower-cased and de-duplicated in order.
    pub fn normalized(self) -> Self {
        let non_blank = |s: Option<String>| {
            s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };
        let keywords = self.keywords.map(|list| {
            let mut seen = Vec::new();
            for kw in list {
                let kw = kw.trim().to_lowercase();
                if !kw.is_empty() && !seen.contains(&kw) {
                    seen.push(kw);
                }
            }
            seen.truncate(MAX_KEYWORDS);
            seen
        });
        Self {
            title: non_blank(self.title),
            content: non_blank(self.content),
            keywords,
            is_public: self.is_public,
        }
    }
}

/// Checks the decision fields agree with the status.
pub fn check_decision(draft: &PendingArticle) -> Result<(), String> {
    let published = draft.published_article_id.is_some();
    let has_reason = draft
        .rejection_reason
        .as_deref()
        .is_some_and(|r| !r.trim().is_empty());
    match draft.status {
        DraftStatus::Approved if !published => Err("approved draft has no article".into()),
        DraftStatus::Approved if has_reason => Err("approved draft has a rejection reason".into()),
        DraftStatus::Rejected if !has_reason => Err("rejected draft has no reason".into()),
        DraftStatus::Rejected if published => Err("rejected draft has an article".into()),
        DraftStatus::Pending | DraftStatus::Editing if published || has_reason => {
            Err("undecided draft carries a decision".into())
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HelenaStats {
    /// Includes drafts being edited.
    pub total_pending: i64,
    pub total_approved: i64,
    pub total_rejected: i64,
    pub avg_confidence: f64,
}

impl HelenaStats {
    pub fn tally<I>(drafts: I) -> Self
    where
        I: IntoIterator<Item = (DraftStatus, f64)>,
    {
        let mut stats = HelenaStats::default();
        let mut confidence_sum = 0.0;
        let mut count = 0usize;
        for (status, confidence) in drafts {
            match status {
                DraftStatus::Pending | DraftStatus::Editing => stats.total_pending += 1,
                DraftStatus::Approved => stats.total_approved += 1,
                DraftStatus::Rejected => stats.total_rejected += 1,
            }
            confidence_sum += confidence;
            count += 1;
        }
        if count > 0 {
            stats.avg_confidence = confidence_sum / count as f64;
        }
        stats
    }
}

#[derive(Debug, Serialize)]
pub struct ApprovalResult {
    pub article_id: Uuid,
    pub draft: PendingArticle,
}

impl ApprovalResult {
    /// What the search index stores for the published article.
    pub fn indexed_document(&self) -> IndexedDocument {
        IndexedDocument {
            id: self.article_id,
            document_type: KNOWLEDGE_ARTICLE.to_string(),
            company_id: self.draft.company_id,
            content: format!("{}\n\n{}", self.draft.title, self.draft.content),
        }
    }
}

/// Persistence behind curation decisions, scoped to one unit of work.
///
/// `publish` and `record_rejection` carry the full decision write: the
/// Postgres store delegates them to the `approve_pending_article` and
/// `reject_pending_article` procedures.
#[async_trait]
pub trait DraftStore: Send {
    async fn lock(&mut self, company_id: Uuid, draft_id: Uuid) -> Result<PendingArticle, AppError>;

    /// Creates the knowledge article and marks the draft approved. Returns the article id.
    async fn publish(
        &mut self,
        draft_id: Uuid,
        agent_id: Uuid,
        overrides: &ApprovalOverrides,
    ) -> Result<Uuid, AppError>;

    async fn record_rejection(
        &mut self,
        draft_id: Uuid,
        agent_id: Uuid,
        reason: &str,
    ) -> Result<(), AppError>;

    async fn set_status(&mut self, draft_id: Uuid, to: DraftStatus)
        -> Result<PendingArticle, AppError>;

    async fn reload(&mut self, draft_id: Uuid) -> Result<PendingArticle, AppError>;

    /// Status and confidence of every draft of the company.
    async fn scores(&mut self, company_id: Uuid) -> Result<Vec<(DraftStatus, f64)>, AppError>;
}

pub async fn approve_with<S: DraftStore>(
    store: &mut S,
    company_id: Uuid,
    draft_id: Uuid,
    agent_id: Uuid,
    overrides: ApprovalOverrides,
) -> Result<ApprovalResult, AppError> {
    let overrides = overrides.normalized();
    let draft = store.lock(company_id, draft_id).await?;
    ensure_transition(draft.status, DraftStatus::Approved)?;

    let article_id = store.publish(draft_id, agent_id, &overrides).await?;
    let draft = store.reload(draft_id).await?;
    check_decision(&draft).map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    Ok(ApprovalResult { article_id, draft })
}

pub async fn reject_with<S: DraftStore>(
    store: &mut S,
    company_id: Uuid,
    draft_id: Uuid,
    agent_id: Uuid,
    reason: &str,
) -> Result<PendingArticle, AppError> {
    let reason = validate_reason(reason)?;
    let draft = store.lock(company_id, draft_id).await?;
    ensure_transition(draft.status, DraftStatus::Rejected)?;

    store.record_rejection(draft_id, agent_id, reason).await?;
    let draft = store.reload(draft_id).await?;
    check_decision(&draft).map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    Ok(draft)
}

pub async fn move_with<S: DraftStore>(
    store: &mut S,
    company_id: Uuid,
    draft_id: Uuid,
    to: DraftStatus,
) -> Result<PendingArticle, AppError> {
    let draft = store.lock(company_id, draft_id).await?;
    ensure_transition(draft.status, to)?;
    store.set_status(draft_id, to).await
}

pub async fn stats_with<S: DraftStore>(store: &mut S, company_id: Uuid) -> Result<HelenaStats, AppError> {
    Ok(HelenaStats::tally(store.scores(company_id).await?))
}

/// Makes a published article findable through semantic search. Failures are
/// logged and leave the approval in place.
pub async fn index_published(index: &dyn KnowledgeIndex, result: &ApprovalResult) -> bool {
    match index.index_document(&result.indexed_document()).await {
        Ok(()) => {
            info!("Article {} indexed for search", result.article_id);
            true
        }
        Err(e) => {
            warn!("Article {} published but not indexed: {e}", result.article_id);
            false
        }
    }
}

pub async fn list_pending(pool: &PgPool, company_id: Uuid) -> Result<Vec<PendingArticle>, AppError> {
    Ok(sqlx::query_as::<_, PendingArticle>(
        r#"
        SELECT * FROM pending_articles
        WHERE company_id = $1 AND status IN ('pending', 'editing')
        ORDER BY created_at DESC
        "#,
    )
    .bind(company_id)
    .fetch_all(pool)
    .await?)
}

pub async fn stats(pool: &PgPool, company_id: Uuid) -> Result<HelenaStats, AppError> {
    let mut store = PgDraftStore::begin(pool).await?;
    let stats = stats_with(&mut store, company_id).await?;
    store.commit().await?;
    Ok(stats)
}

pub async fn begin_editing(
    pool: &PgPool,
    company_id: Uuid,
    draft_id: Uuid,
) -> Result<PendingArticle, AppError> {
    let mut store = PgDraftStore::begin(pool).await?;
    let draft = move_with(&mut store, company_id, draft_id, DraftStatus::Editing).await?;
    store.commit().await?;
    Ok(draft)
}

pub async fn cancel_editing(
    pool: &PgPool,
    company_id: Uuid,
    draft_id: Uuid,
) -> Result<PendingArticle, AppError> {
    let mut store = PgDraftStore::begin(pool).await?;
    let draft = move_with(&mut store, company_id, draft_id, DraftStatus::Pending).await?;
    store.commit().await?;
    Ok(draft)
}

pub async fn approve(
    pool: &PgPool,
    company_id: Uuid,
    draft_id: Uuid,
    agent_id: Uuid,
    overrides: ApprovalOverrides,
) -> Result<ApprovalResult, AppError> {
    let mut store = PgDraftStore::begin(pool).await?;
    let result = approve_with(&mut store, company_id, draft_id, agent_id, overrides).await?;
    store.commit().await?;

    info!(
        "Draft {draft_id} approved by {agent_id}; published article {}",
        result.article_id
    );
    Ok(result)
}

pub async fn reject(
    pool: &PgPool,
    company_id: Uuid,
    draft_id: Uuid,
    agent_id: Uuid,
    reason: &str,
) -> Result<PendingArticle, AppError> {
    let mut store = PgDraftStore::begin(pool).await?;
    let draft = reject_with(&mut store, company_id, draft_id, agent_id, reason).await?;
    store.commit().await?;

    info!("Draft {draft_id} rejected by {agent_id}");
    Ok(draft)
}

/// `DraftStore` over one Postgres transaction.
pub struct PgDraftStore {
    tx: Transaction<'static, Postgres>,
}

impl PgDraftStore {
    pub async fn begin(pool: &PgPool) -> Result<Self, AppError> {
        Ok(Self {
            tx: pool.begin().await?,
        })
    }

    pub async fn commit(self) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DraftStore for PgDraftStore {
    async fn lock(&mut self, company_id: Uuid, draft_id: Uuid) -> Result<PendingArticle, AppError> {
        sqlx::query_as::<_, PendingArticle>(
            "SELECT * FROM pending_articles WHERE id = $1 AND company_id = $2 FOR UPDATE",
        )
        .bind(draft_id)
        .bind(company_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Draft {draft_id} not found")))
    }

    async fn publish(
        &mut self,
        draft_id: Uuid,
        agent_id: Uuid,
        overrides: &ApprovalOverrides,
    ) -> Result<Uuid, AppError> {
        Ok(
            sqlx::query_scalar("SELECT approve_pending_article($1, $2, $3, $4, $5, $6)")
                .bind(draft_id)
                .bind(agent_id)
                .bind(overrides.title.as_deref())
                .bind(overrides.content.as_deref())
                .bind(overrides.keywords.as_deref())
                .bind(overrides.is_public)
                .fetch_one(&mut *self.tx)
                .await?,
        )
    }

    async fn record_rejection(
        &mut self,
        draft_id: Uuid,
        agent_id: Uuid,
        reason: &str,
    ) -> Result<(), AppError> {
        sqlx::query("SELECT reject_pending_article($1, $2, $3)")
            .bind(draft_id)
            .bind(agent_id)
            .bind(reason)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn set_status(
        &mut self,
        draft_id: Uuid,
        to: DraftStatus,
    ) -> Result<PendingArticle, AppError> {
        Ok(
            sqlx::query_as("UPDATE pending_articles SET status = $2 WHERE id = $1 RETURNING *")
                .bind(draft_id)
                .bind(to.as_str())
                .fetch_one(&mut *self.tx)
                .await?,
        )
    }

    async fn reload(&mut self, draft_id: Uuid) -> Result<PendingArticle, AppError> {
        Ok(
            sqlx::query_as::<_, PendingArticle>("SELECT * FROM pending_articles WHERE id = $1")
                .bind(draft_id)
                .fetch_one(&mut *self.tx)
                .await?,
        )
    }

    async fn scores(&mut self, company_id: Uuid) -> Result<Vec<(DraftStatus, f64)>, AppError> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            "SELECT status, confidence_score FROM pending_articles WHERE company_id = $1",
        )
        .bind(company_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter()
            .map(|(status, confidence)| {
                status
                    .parse::<DraftStatus>()
                    .map(|status| (status, confidence))
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("{e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::article::KnowledgeArticle;
    use crate::search::semantic::fakes::MemoryIndex;
    use crate::search::semantic::{assemble, find_matches, SearchOptions};
    use chrono::Utc;
    use sqlx::types::Json;
    use std::collections::HashMap;

    fn draft(status: DraftStatus) -> PendingArticle {
        PendingArticle {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            source_ticket_id: Some(Uuid::new_v4()),
            title: "Erro ao exportar relatório".into(),
            content: "## Problema".into(),
            keywords: vec!["relatório".into()],
            confidence_score: 0.7,
            similar_articles: Json(vec![]),
            status,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            published_article_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in [DraftStatus::Approved, DraftStatus::Rejected] {
            for to in DraftStatus::ALL {
                assert!(ensure_transition(from, *to).is_err(), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_editing_round_trip() {
        assert!(ensure_transition(DraftStatus::Pending, DraftStatus::Editing).is_ok());
        assert!(ensure_transition(DraftStatus::Editing, DraftStatus::Pending).is_ok());
        assert!(ensure_transition(DraftStatus::Editing, DraftStatus::Approved).is_ok());
        assert!(ensure_transition(DraftStatus::Editing, DraftStatus::Editing).is_err());
    }

    #[test]
    fn test_blank_reason_is_rejected() {
        assert!(matches!(validate_reason("   "), Err(AppError::Validation(_))));
        assert_eq!(validate_reason("  duplicado ").unwrap(), "duplicado");
    }

    #[test]
    fn test_overrides_are_normalized() {
        let overrides = ApprovalOverrides {
            title: Some("  ".into()),
            content: Some(" Novo conteúdo ".into()),
            keywords: Some(vec!["Senha".into(), "senha ".into(), "".into(), "Login".into()]),
            is_public: Some(false),
        }
        .normalized();
        assert_eq!(overrides.title, None);
        assert_eq!(overrides.content.as_deref(), Some("Novo conteúdo"));
        assert_eq!(overrides.keywords, Some(vec!["senha".to_string(), "login".to_string()]));
        assert_eq!(overrides.is_public, Some(false));
    }

    #[test]
    fn test_decision_invariant() {
        let mut approved = draft(DraftStatus::Approved);
        assert!(check_decision(&approved).is_err());
        approved.published_article_id = Some(Uuid::new_v4());
        assert!(check_decision(&approved).is_ok());
        approved.rejection_reason = Some("x".into());
        assert!(check_decision(&approved).is_err());

        let mut rejected = draft(DraftStatus::Rejected);
        assert!(check_decision(&rejected).is_err());
        rejected.rejection_reason = Some("duplicado".into());
        assert!(check_decision(&rejected).is_ok());

        assert!(check_decision(&draft(DraftStatus::Pending)).is_ok());
    }

    #[test]
    fn test_stats_tally() {
        let stats = HelenaStats::tally([
            (DraftStatus::Pending, 0.6),
            (DraftStatus::Editing, 0.8),
            (DraftStatus::Approved, 0.9),
            (DraftStatus::Rejected, 0.5),
        ]);
        assert_eq!(stats.total_pending, 2);
        assert_eq!(stats.total_approved, 1);
        assert_eq!(stats.total_rejected, 1);
        assert!((stats.avg_confidence - 0.7).abs() < 1e-9);
        assert_eq!(HelenaStats::tally(Vec::<(DraftStatus, f64)>::new()),
            HelenaStats::default()
        );
    }

    /// Drafts and articles in memory. `publish` and `record_rejection`
    /// follow the stored procedures: they refuse decided drafts, publish
    /// with coalesced overrides and store the trimmed reason.
    #[derive(Default)]
    struct MemoryDrafts {
        drafts: HashMap<Uuid, PendingArticle>,
        articles: Vec<KnowledgeArticle>,
    }

    impl MemoryDrafts {
        fn with(drafts: Vec<PendingArticle>) -> Self {
            Self {
                drafts: drafts.into_iter().map(|d| (d.id, d)).collect(),
                articles: Vec::new(),
            }
        }

        fn undecided(&mut self, draft_id: Uuid) -> Result<&mut PendingArticle, AppError> {
            let draft = self
                .drafts
                .get_mut(&draft_id)
                .ok_or_else(|| AppError::NotFound(format!("Draft {draft_id} not found")))?;
            if !matches!(draft.status, DraftStatus::Pending | DraftStatus::Editing) {
                return Err(AppError::Conflict(format!("Draft {draft_id} is already {}", draft.status)));
            }
            Ok(draft)
        }
    }

    #[async_trait]
    impl DraftStore for MemoryDrafts {
        async fn lock(&mut self, company_id: Uuid, draft_id: Uuid) -> Result<PendingArticle, AppError> {
            self.drafts
                .get(&draft_id)
                .filter(|d| d.company_id == company_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Draft {draft_id} not found")))
        }

        async fn publish(
            &mut self,
            draft_id: Uuid,
            agent_id: Uuid,
            overrides: &ApprovalOverrides,
        ) -> Result<Uuid, AppError> {
            let draft = self.undecided(draft_id)?;
            if let Some(title) = &overrides.title {
                draft.title = title.clone();
            }
            if let Some(content) = &overrides.content {
                draft.content = content.clone();
            }
            if let Some(keywords) = &overrides.keywords {
                draft.keywords = keywords.clone();
            }
            let article = KnowledgeArticle {
                id: Uuid::new_v4(),
                company_id: draft.company_id,
                title: draft.title.clone(),
                content: draft.content.clone(),
                keywords: draft.keywords.clone(),
                is_public: overrides.is_public.unwrap_or(false),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            draft.status = DraftStatus::Approved;
            draft.approved_by = Some(agent_id);
            draft.approved_at = Some(Utc::now());
            draft.published_article_id = Some(article.id);
            let article_id = article.id;
            self.articles.push(article);
            Ok(article_id)
        }

        async fn record_rejection(
            &mut self,
            draft_id: Uuid,
            agent_id: Uuid,
            reason: &str,
        ) -> Result<(), AppError> {
            let draft = self.undecided(draft_id)?;
            draft.status = DraftStatus::Rejected;
            draft.rejected_by = Some(agent_id);
            draft.rejected_at = Some(Utc::now());
            draft.rejection_reason = Some(reason.trim().to_string());
            Ok(())
        }

        async fn set_status(
            &mut self,
            draft_id: Uuid,
            to: DraftStatus,
        ) -> Result<PendingArticle, AppError> {
            let draft = self.undecided(draft_id)?;
            draft.status = to;
            Ok(draft.clone())
        }

        async fn reload(&mut self, draft_id: Uuid) -> Result<PendingArticle, AppError> {
            self.drafts
                .get(&draft_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Draft {draft_id} not found")))
        }

        async fn scores(&mut self, company_id: Uuid) -> Result<Vec<(DraftStatus, f64)>, AppError> {
            Ok(self
                .drafts
                .values()
                .filter(|d| d.company_id == company_id)
                .map(|d| (d.status, d.confidence_score))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_rejecting_a_pending_draft() {
        let pending = draft(DraftStatus::Pending);
        let (company, id) = (pending.company_id, pending.id);
        let mut other = draft(DraftStatus::Approved);
        other.company_id = company;
        other.published_article_id = Some(Uuid::new_v4());
        let mut store = MemoryDrafts::with(vec![pending, other]);

        let before = stats_with(&mut store, company).await.unwrap();
        let agent = Uuid::new_v4();
        let rejected = reject_with(&mut store, company, id, agent, "  Conteúdo duplicado ")
            .await
            .unwrap();

        assert_eq!(rejected.status, DraftStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Conteúdo duplicado"));
        assert_eq!(rejected.rejected_by, Some(agent));
        assert!(rejected.published_article_id.is_none());
        assert!(store.articles.is_empty());

        let after = stats_with(&mut store, company).await.unwrap();
        assert_eq!(after.total_rejected, before.total_rejected + 1);
        assert_eq!(after.total_pending, before.total_pending - 1);
        assert_eq!(after.total_approved, before.total_approved);
    }

    #[tokio::test]
    async fn test_second_decision_conflicts() {
        let pending = draft(DraftStatus::Pending);
        let (company, id) = (pending.company_id, pending.id);
        let mut store = MemoryDrafts::with(vec![pending]);

        reject_with(&mut store, company, id, Uuid::new_v4(), "fora de escopo")
            .await
            .unwrap();

        let again = reject_with(&mut store, company, id, Uuid::new_v4(), "outro motivo").await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
        let approve = approve_with(&mut store, company, id, Uuid::new_v4(), ApprovalOverrides::default()).await;
        assert!(matches!(approve, Err(AppError::Conflict(_))));
        let edit = move_with(&mut store, company, id, DraftStatus::Editing).await;
        assert!(matches!(edit, Err(AppError::Conflict(_))));

        assert_eq!(store.drafts[&id].rejection_reason.as_deref(), Some("fora de escopo"));
        assert!(store.articles.is_empty());
    }

    #[tokio::test]
    async fn test_blank_reason_leaves_draft_pending() {
        let pending = draft(DraftStatus::Pending);
        let (company, id) = (pending.company_id, pending.id);
        let mut store = MemoryDrafts::with(vec![pending]);

        let result = reject_with(&mut store, company, id, Uuid::new_v4(), "  ").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(store.drafts[&id].status, DraftStatus::Pending);
    }

    #[tokio::test]
    async fn test_approval_from_editing_applies_overrides() {
        let pending = draft(DraftStatus::Pending);
        let (company, id) = (pending.company_id, pending.id);
        let mut store = MemoryDrafts::with(vec![pending]);

        move_with(&mut store, company, id, DraftStatus::Editing).await.unwrap();
        let overrides = ApprovalOverrides {
            title: Some(" Exportar relatórios em PDF ".into()),
            is_public: Some(true),
            ..ApprovalOverrides::default()
        };
        let result = approve_with(&mut store, company, id, Uuid::new_v4(), overrides)
            .await
            .unwrap();

        assert_eq!(result.draft.status, DraftStatus::Approved);
        assert_eq!(result.draft.published_article_id, Some(result.article_id));
        let article = &store.articles[0];
        assert_eq!(article.id, result.article_id);
        assert_eq!(article.title, "Exportar relatórios em PDF");
        assert_eq!(article.content, "## Problema");
        assert!(article.is_public);

        let stats = stats_with(&mut store, company).await.unwrap();
        assert_eq!((stats.total_pending, stats.total_approved), (0, 1));
    }

    #[tokio::test]
    async fn test_other_company_cannot_decide() {
        let pending = draft(DraftStatus::Pending);
        let id = pending.id;
        let mut store = MemoryDrafts::with(vec![pending]);
        let result = reject_with(&mut store, Uuid::new_v4(), id, Uuid::new_v4(), "motivo").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_approved_article_becomes_searchable() {
        let pending = draft(DraftStatus::Pending);
        let (company, id) = (pending.company_id, pending.id);
        let mut store = MemoryDrafts::with(vec![pending]);
        let index = MemoryIndex::default();
        let options = SearchOptions::default();

        let before = find_matches(&index, company, "exportar relatório", &options).await.unwrap();
        assert!(before.is_empty());

        let result = approve_with(&mut store, company, id, Uuid::new_v4(), ApprovalOverrides::default())
            .await
            .unwrap();
        assert!(index_published(&index, &result).await);

        let indexed = index.documents.lock().unwrap().clone();
        assert_eq!(indexed.len(), 1);
        assert_eq!(indexed[0].id, result.article_id);
        assert_eq!(indexed[0].document_type, KNOWLEDGE_ARTICLE);
        assert_eq!(indexed[0].company_id, company);
        assert!(indexed[0].content.starts_with("Erro ao exportar relatório"));

        let ranked = find_matches(&index, company, "exportar relatório", &options).await.unwrap();
        let results = assemble(ranked, store.articles.clone(), options.limit);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].article.id, result.article_id);
        assert_eq!(results[0].relevance_score, 100);

        let elsewhere = find_matches(&index, Uuid::new_v4(), "exportar relatório", &options)
            .await
            .unwrap();
        assert!(elsewhere.is_empty());
    }

    #[tokio::test]
    async fn test_indexing_failure_keeps_approval() {
        struct DownIndex;

        #[async_trait]
        impl KnowledgeIndex for DownIndex {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
                Err(AppError::Upstream("down".into()))
            }

            async fn match_documents(
                &self,
                _request: &crate::search::MatchRequest<'_>,
            ) -> Result<Vec<crate::search::DocumentMatch>, AppError> {
                Err(AppError::Upstream("down".into()))
            }

            async fn index_document(&self, _document: &IndexedDocument) -> Result<(), AppError> {
                Err(AppError::Upstream("down".into()))
            }
        }

        let pending = draft(DraftStatus::Pending);
        let (company, id) = (pending.company_id, pending.id);
        let mut store = MemoryDrafts::with(vec![pending]);
        let result = approve_with(&mut store, company, id, Uuid::new_v4(), ApprovalOverrides::default())
            .await
            .unwrap();

        assert!(!index_published(&DownIndex, &result).await);
        assert_eq!(store.drafts[&id].status, DraftStatus::Approved);
    }
}
