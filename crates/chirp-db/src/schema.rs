// ============================================================================
// Schema bootstrap
// ============================================================================

use sqlx::PgPool;

/// Registered accounts, owned by the user service
const CREATE_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id BIGSERIAL PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TWEETS: &str = r#"
CREATE TABLE IF NOT EXISTS tweets (
    id BIGSERIAL PRIMARY KEY,
    author TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_LIKES: &str = r#"
CREATE TABLE IF NOT EXISTS likes (
    id BIGSERIAL PRIMARY KEY,
    tweet_id BIGINT NOT NULL,
    liked_by TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_REPLIES: &str = r#"
CREATE TABLE IF NOT EXISTS replies (
    id BIGSERIAL PRIMARY KEY,
    tweet_id BIGINT NOT NULL,
    author TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Pending deletion events awaiting relay to the broker
const CREATE_DELETION_OUTBOX: &str = r#"
CREATE TABLE IF NOT EXISTS deletion_outbox (
    id BIGSERIAL PRIMARY KEY,
    event_id UUID NOT NULL,
    username TEXT NOT NULL,
    payload JSONB NOT NULL,
    attempts INT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    published_at TIMESTAMPTZ,
    last_error TEXT
)
"#;

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_tweets_author ON tweets(author)",
    "CREATE INDEX IF NOT EXISTS idx_likes_liked_by ON likes(liked_by)",
    "CREATE INDEX IF NOT EXISTS idx_replies_author ON replies(author)",
    "CREATE INDEX IF NOT EXISTS idx_deletion_outbox_unpublished \
     ON deletion_outbox(id) WHERE published_at IS NULL",
];

/// Create all tables and indexes if they do not exist
pub async fn init_schema(pool: &PgPool) -> anyhow::Result<()> {
    for ddl in [
        CREATE_USERS,
        CREATE_TWEETS,
        CREATE_LIKES,
        CREATE_REPLIES,
        CREATE_DELETION_OUTBOX,
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    for ddl in CREATE_INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::info!("Database schema initialized");
    Ok(())
}
