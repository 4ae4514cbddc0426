mod telegram;

pub use telegram::TelegramNotifier;

use crate::error::Result;

/// Outbound chat channel that delivered articles are posted to.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn send(&self, text: &str) -> Result<()>;
}
