//! v002 -- Moderation, VIP and site configuration tables.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS blocked_users (
    blocker_id  TEXT NOT NULL,
    blocked_id  TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (blocker_id, blocked_id)
);

CREATE INDEX IF NOT EXISTS idx_blocked_users_blocked
    ON blocked_users(blocked_id);

CREATE TABLE IF NOT EXISTS reports (
    id           TEXT PRIMARY KEY NOT NULL,
    reporter_id  TEXT NOT NULL,
    reported_id  TEXT NOT NULL,
    message_id   TEXT,
    reason       TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bans (
    id          TEXT PRIMARY KEY NOT NULL,
    user_id     TEXT NOT NULL,
    reason      TEXT NOT NULL,
    expires_at  TEXT,                         -- NULL = permanent
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bans_user ON bans(user_id);

CREATE TABLE IF NOT EXISTS vip_subscriptions (
    user_id             TEXT PRIMARY KEY NOT NULL,
    plan                TEXT NOT NULL,        -- monthly | quarterly | yearly
    status              TEXT NOT NULL,        -- active | cancelled | past_due | expired
    current_period_end  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_photo_uploads (
    user_id      TEXT NOT NULL,
    upload_date  TEXT NOT NULL,               -- YYYY-MM-DD, UTC
    count        INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (user_id, upload_date)
);

CREATE TABLE IF NOT EXISTS site_settings (
    key         TEXT PRIMARY KEY NOT NULL,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
