//! v001 -- Initial schema creation.
//!
//! Creates the conversation tables: `profiles`, `messages`, `message_media`
//! and `message_reactions`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Profiles
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    id          TEXT PRIMARY KEY NOT NULL,    -- auth provider user id
    nickname    TEXT NOT NULL,
    role        TEXT NOT NULL DEFAULT 'standard',
    vip         INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    gender      TEXT,
    age         INTEGER,
    country     TEXT,
    interests   TEXT NOT NULL DEFAULT '[]',   -- JSON array of strings
    created_at  TEXT NOT NULL                 -- RFC-3339
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_profiles_nickname
    ON profiles(nickname COLLATE NOCASE);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                 TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_key   TEXT NOT NULL,              -- sorted "a_b"
    sender_id          TEXT NOT NULL,
    receiver_id        TEXT NOT NULL,
    content            TEXT,
    reply_to           TEXT,                       -- nullable message id
    is_read            INTEGER NOT NULL DEFAULT 0,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL,
    deleted_at         TEXT,
    translated_content TEXT,
    language_code      TEXT
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_key, created_at DESC);

-- ----------------------------------------------------------------
-- Media (one attachment per message)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_media (
    id          TEXT PRIMARY KEY NOT NULL,
    message_id  TEXT NOT NULL UNIQUE,
    user_id     TEXT NOT NULL,
    url         TEXT NOT NULL,
    media_type  TEXT NOT NULL,                -- image | voice | video
    created_at  TEXT NOT NULL,

    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Reactions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_reactions (
    id          TEXT PRIMARY KEY NOT NULL,
    message_id  TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    emoji       TEXT NOT NULL,
    created_at  TEXT NOT NULL,

    UNIQUE (message_id, user_id, emoji),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_reactions_message
    ON message_reactions(message_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
