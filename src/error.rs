use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Could not find app key `{0}`.")]
    UnknownAppKey(String),

    #[error("Application is disabled")]
    ApplicationDisabled,

    #[error("Origin not allowed")]
    OriginNotAllowed,

    #[error("Over capacity")]
    OverCapacity,

    #[error("Auth error: {0}")]
    Auth(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// WebSocket close code for admission and protocol failures.
    ///
    /// 4000-4099 codes tell the client not to reconnect, 4100-4199 to back
    /// off before reconnecting, per the Pusher protocol.
    pub fn close_code(&self) -> u16 {
        match self {
            Error::UnknownAppKey(_) => 4001,
            Error::ApplicationDisabled => 4003,
            Error::OriginNotAllowed => 4009,
            Error::Auth(_) => 4009,
            Error::OverCapacity => 4100,
            _ => 4200,
        }
    }

    /// Message safe to surface to the connected client.
    pub fn client_message(&self) -> String {
        match self {
            Error::UnknownAppKey(_) => self.to_string(),
            Error::ApplicationDisabled => "Application is disabled".to_string(),
            Error::OriginNotAllowed => "Origin not allowed".to_string(),
            Error::OverCapacity => "Over capacity".to_string(),
            Error::Auth(msg) => msg.clone(),
            Error::Channel(msg) => msg.clone(),
            Error::Dispatch(msg) => msg.clone(),
            Error::InvalidMessageFormat(_) => "Invalid message format".to_string(),
            Error::PayloadTooLarge(_) => "Payload too large".to_string(),
            _ => "Internal server error".to_string(),
        }
    }

    /// Whether this error must terminate the connection (admission errors)
    /// or leave it open (subscription and message scoped errors).
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Error::UnknownAppKey(_)
                | Error::ApplicationDisabled
                | Error::OriginNotAllowed
                | Error::OverCapacity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_errors_map_to_protocol_close_codes() {
        assert_eq!(Error::UnknownAppKey("abc".into()).close_code(), 4001);
        assert_eq!(Error::OriginNotAllowed.close_code(), 4009);
        assert_eq!(Error::OverCapacity.close_code(), 4100);
        assert_eq!(Error::ApplicationDisabled.close_code(), 4003);
    }

    #[test]
    fn unknown_app_key_message_includes_the_key() {
        let err = Error::UnknownAppKey("NonWorkingKey".into());
        assert_eq!(
            err.client_message(),
            "Could not find app key `NonWorkingKey`."
        );
    }

    #[test]
    fn subscription_errors_are_not_fatal() {
        assert!(!Error::Auth("Invalid signature".into()).is_fatal_to_connection());
        assert!(!Error::Channel("Missing presence data".into()).is_fatal_to_connection());
        assert!(Error::OverCapacity.is_fatal_to_connection());
    }
}
