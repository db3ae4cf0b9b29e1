use crate::protocol::constants::{PRESENCE_CHANNEL_PREFIX, PRIVATE_CHANNEL_PREFIX};

/// Channel variant, inferred from the name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    Public,
    Private,
    Presence,
}

impl ChannelType {
    pub fn from_name(name: &str) -> Self {
        if name.starts_with(PRESENCE_CHANNEL_PREFIX) {
            ChannelType::Presence
        } else if name.starts_with(PRIVATE_CHANNEL_PREFIX) {
            ChannelType::Private
        } else {
            ChannelType::Public
        }
    }

    /// Private and presence channels require a valid auth signature on
    /// subscribe.
    pub fn requires_authentication(&self) -> bool {
        matches!(self, ChannelType::Private | ChannelType::Presence)
    }

    pub fn is_presence(&self) -> bool {
        matches!(self, ChannelType::Presence)
    }
}
