// Chatwii client core: sessions, conversations, messaging and moderation
// over a realtime JSON tree and a relational store.

pub mod config;
pub mod error;
pub mod messaging;
pub mod moderation;
pub mod rate_limit;
pub mod session;
pub mod settings;
pub mod state;
pub mod sync;
pub mod translate;

pub use config::ClientConfig;
pub use error::{ClientError, ErrorKind, Result};
pub use messaging::{OutgoingMedia, OutgoingMessage, ReactionToggle};
pub use session::SignInRequest;
pub use settings::ClientSettings;
pub use state::{ChatClient, MockBackends, Session};
pub use sync::{ConversationSync, SyncOptions, SyncState};
pub use translate::{StubTranslator, Translation, Translator};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the default `fmt` subscriber. `RUST_LOG` overrides the filter.
/// Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("chatwii_client=debug,chatwii_realtime=debug,chatwii_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
