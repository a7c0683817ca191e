use crate::db::DbPool;
use crate::normalize::product_or_default;
use crate::types::{Card, CardId, Citation, Recommendation, RelayError, Result};
use sqlx::Row;

/// Thin gateway between normalized cards and the storage collaborator.
/// Persistence is best-effort from the caller's point of view: a rejected
/// save never invalidates the in-memory card.
#[derive(Clone)]
pub struct CardStore {
    pool: DbPool,
}

impl CardStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Validates and inserts one card, returning it augmented with a
    /// generated id and a server-assigned creation timestamp.
    pub async fn save(&self, card: &Card) -> Result<Card> {
        let owner = match card.owner_email.as_deref() {
            Some(o) if !o.trim().is_empty() => o.to_lowercase(),
            _ => {
                return Err(RelayError::Validation(
                    "Missing required fields: ownerEmail".into(),
                )
                .into())
            }
        };
        if card.text.trim().is_empty() {
            return Err(RelayError::Validation("Missing required fields: text".into()).into());
        }

        let id = CardId::new();
        let product = product_or_default(card.product.as_deref());
        let created_at = chrono::Utc::now().to_rfc3339();
        let citations_json = serde_json::to_string(&card.citations)?;
        let recommendations_json = serde_json::to_string(&card.recommendations)?;
        let questions_json = serde_json::to_string(&card.suggested_questions)?;

        sqlx::query(
            "INSERT INTO cards (id, owner_email, product, rating, text, citations_json, \
             recommendations_json, suggested_questions_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id.0)
        .bind(&owner)
        .bind(&product)
        .bind(card.rating)
        .bind(&card.text)
        .bind(&citations_json)
        .bind(&recommendations_json)
        .bind(&questions_json)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            "[store] Saved card {} for {} ({})",
            id,
            owner,
            product
        );

        Ok(Card {
            id: Some(id.0),
            owner_email: Some(owner),
            product: Some(product),
            created_at,
            ..card.clone()
        })
    }

    /// All cards for one owner, newest first.
    pub async fn list_by_owner(&self, owner_email: &str) -> Result<Vec<Card>> {
        let rows = sqlx::query(
            "SELECT id, owner_email, product, rating, text, citations_json, \
             recommendations_json, suggested_questions_json, created_at \
             FROM cards WHERE owner_email = ? ORDER BY created_at DESC",
        )
        .bind(owner_email.to_lowercase())
        .fetch_all(&self.pool)
        .await?;

        let mut cards = Vec::with_capacity(rows.len());
        for row in rows {
            cards.push(Self::row_to_card(&row)?);
        }
        Ok(cards)
    }

    fn row_to_card(row: &sqlx::sqlite::SqliteRow) -> Result<Card> {
        let citations: Vec<Citation> = serde_json::from_str(row.get("citations_json"))?;
        let recommendations: Vec<Recommendation> =
            serde_json::from_str(row.get("recommendations_json"))?;
        let suggested_questions: Vec<String> =
            serde_json::from_str(row.get("suggested_questions_json"))?;

        Ok(Card {
            id: Some(row.get("id")),
            owner_email: Some(row.get("owner_email")),
            product: Some(row.get("product")),
            rating: row.get("rating"),
            text: row.get("text"),
            citations,
            recommendations,
            suggested_questions,
            created_at: row.get("created_at"),
        })
    }
}
