use teloxide::types::Message;
use tracing::debug;

/// Only the configured administrator may drive the bot; everyone else is ignored.
pub fn is_admin(message: &Message, admin_user_id: u64) -> bool {
    let sender = message.from.as_ref().map(|user| user.id.0);
    let allowed = sender == Some(admin_user_id);
    if !allowed {
        debug!(
            "Ignoring message {} in chat {} from {:?}",
            message.id.0, message.chat.id.0, sender
        );
    }
    allowed
}
