pub mod manager;
pub mod types;

pub use manager::ChannelManager;
pub use types::ChannelType;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Presence identity of one member as carried in the channel roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceMemberInfo {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Value>,
}
