//! Prompt override storage
//!
//! System prompts ship inside product definitions; the prompts table lets an
//! operator override them per product and scope without redeploying.
//! Resolution is: latest active database row, else the definition's fallback.

use chrono::Utc;
use orrery_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Prompt scope within a product
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptScope {
    System,
    StepInsight,
    Followup,
    FinalBriefing,
}

impl PromptScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptScope::System => "system",
            PromptScope::StepInsight => "step_insight",
            PromptScope::Followup => "followup",
            PromptScope::FinalBriefing => "final_briefing",
        }
    }
}

/// Resolve the prompt for a product and scope, falling back to the
/// definition's built-in prompt when no override is active.
pub async fn get_prompt(
    pool: &SqlitePool,
    product_slug: &str,
    scope: PromptScope,
    fallback: &str,
) -> String {
    let result: std::result::Result<Option<String>, sqlx::Error> = sqlx::query_scalar(
        r#"
        SELECT content FROM prompts
        WHERE product_slug = ? AND scope = ? AND is_active = 1
        ORDER BY version DESC
        LIMIT 1
        "#,
    )
    .bind(product_slug)
    .bind(scope.as_str())
    .fetch_optional(pool)
    .await;

    match result {
        Ok(Some(content)) => content,
        Ok(None) => fallback.to_string(),
        Err(e) => {
            // An override lookup failure degrades to the fallback prompt
            tracing::warn!(
                product_slug,
                scope = scope.as_str(),
                error = %e,
                "Prompt override lookup failed; using fallback"
            );
            fallback.to_string()
        }
    }
}

/// Install a new prompt override (new highest version, active)
pub async fn upsert_prompt(
    pool: &SqlitePool,
    product_slug: &str,
    scope: PromptScope,
    content: &str,
) -> Result<()> {
    let next_version: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(version), 0) + 1 FROM prompts WHERE product_slug = ? AND scope = ?",
    )
    .bind(product_slug)
    .bind(scope.as_str())
    .fetch_one(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO prompts (id, product_slug, scope, content, version, is_active, created_at)
        VALUES (?, ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(product_slug)
    .bind(scope.as_str())
    .bind(content)
    .bind(next_version)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}
