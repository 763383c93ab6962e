use serde::{Deserialize, Serialize};

use crate::domain::conversation::ThreadId;

/// One address a profile can be reached on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub user_id: String,
    pub channel: String,
}

impl ChannelBinding {
    pub fn new(user_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), channel: channel.into() }
    }
}

/// A message as it arrives from a delivery channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_type: String,
    pub from: String,
    pub text: String,
}

impl InboundMessage {
    pub fn new(
        channel_type: impl Into<String>,
        from: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self { channel_type: channel_type.into(), from: from.into(), text: text.into() }
    }

    /// Renders the context block the model sees for this message.
    pub fn render_prompt(&self, thread_id: &ThreadId, bindings: &[ChannelBinding]) -> String {
        let profile_info = bindings
            .iter()
            .map(|binding| format!("- UserID: {}, Channel: {}", binding.user_id, binding.channel))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "The following user has sent a message:\n\
             - UserID: {from} ProfileID: {thread_id}\n\
             - Message: {text}\n\
             - Sent via: {channel}\n\n\
             Here are all associated user profiles:\n\
             {profile_info}\n\n\
             Respond to user queries either on the originating channel or on the channel \
             explicitly specified in the request, with help of comms-agent",
            from = self.from,
            text = self.text,
            channel = self.channel_type,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelBinding, InboundMessage};
    use crate::domain::conversation::ThreadId;

    #[test]
    fn prompt_lists_every_binding_of_the_profile() {
        let inbound = InboundMessage::new("whatsapp", "+15550001", "status?");
        let prompt = inbound.render_prompt(
            &ThreadId("P1".to_owned()),
            &[
                ChannelBinding::new("+15550001", "whatsapp"),
                ChannelBinding::new("ana@example.com", "email"),
            ],
        );

        assert!(prompt.contains("- UserID: +15550001 ProfileID: P1"));
        assert!(prompt.contains("- Message: status?"));
        assert!(prompt.contains("- Sent via: whatsapp"));
        assert!(prompt.contains("- UserID: ana@example.com, Channel: email"));
    }
}
