pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{MagpieError, Result};
pub use types::{
    AuthorRef, Cursor, GenerationContext, MentionEvent, Notification, NotificationKind,
    NotificationPage, PlatformPost, Trend, TrendKind,
};
