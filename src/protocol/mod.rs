//! Messages exchanged on the assist stream.
//!
//! The messages are prost types so they travel unchanged over a tonic
//! bidirectional stream. They are declared here rather than generated.

mod transport;
pub mod grpc;

pub use transport::{
    channel_transport, spawn_receiver, ChannelReplies, ChannelRequests, ClientEnd, Inbound,
    Outbound, RecvError, RecvReq, ReplySink, RequestSource,
};

/// A yes/no question put to the user.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChoiceBool {
    #[prost(bool, tag = "1")]
    pub value: bool,
    #[prost(string, tag = "2")]
    pub title: String,
    #[prost(string, tag = "3")]
    pub description: String,
    #[prost(string, tag = "4")]
    pub affirmative: String,
    #[prost(string, tag = "5")]
    pub negative: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Choice {
    #[prost(oneof = "choice::Variant", tags = "1")]
    pub variant: Option<choice::Variant>,
}

pub mod choice {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        #[prost(message, tag = "1")]
        Bool(super::ChoiceBool),
    }
}

impl Choice {
    pub fn boolean(choice: ChoiceBool) -> Self {
        Self {
            variant: Some(choice::Variant::Bool(choice)),
        }
    }

    pub fn as_bool(&self) -> Option<&ChoiceBool> {
        match &self.variant {
            Some(choice::Variant::Bool(b)) => Some(b),
            None => None,
        }
    }
}

/// Client to server.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActReq {
    #[prost(bool, tag = "1")]
    pub cancel: bool,
    #[prost(message, optional, tag = "2")]
    pub choice: Option<Choice>,
}

impl ActReq {
    pub fn cancel() -> Self {
        Self {
            cancel: true,
            choice: None,
        }
    }

    pub fn chosen(value: bool) -> Self {
        Self {
            cancel: false,
            choice: Some(Choice::boolean(ChoiceBool {
                value,
                ..Default::default()
            })),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorMsg {
    #[prost(string, tag = "1")]
    pub error: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExposePort {
    #[prost(uint32, tag = "1")]
    pub port: u32,
}

/// Server to client. A reply without a variant ends the session.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActReply {
    #[prost(string, tag = "1")]
    pub source: String,
    #[prost(oneof = "act_reply::Variant", tags = "2, 3, 4, 5")]
    pub variant: Option<act_reply::Variant>,
}

pub mod act_reply {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        #[prost(string, tag = "2")]
        Log(String),
        #[prost(message, tag = "3")]
        Choice(super::Choice),
        #[prost(message, tag = "4")]
        Error(super::ErrorMsg),
        #[prost(message, tag = "5")]
        Expose(super::ExposePort),
    }
}

impl ActReply {
    pub fn log(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            variant: Some(act_reply::Variant::Log(text.into())),
        }
    }

    pub fn choice(source: impl Into<String>, choice: ChoiceBool) -> Self {
        Self {
            source: source.into(),
            variant: Some(act_reply::Variant::Choice(Choice::boolean(choice))),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            source: "ayup".to_string(),
            variant: Some(act_reply::Variant::Error(ErrorMsg { error: text.into() })),
        }
    }

    pub fn expose(source: impl Into<String>, port: u16) -> Self {
        Self {
            source: source.into(),
            variant: Some(act_reply::Variant::Expose(ExposePort { port: port.into() })),
        }
    }

    pub fn done() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.variant.is_none()
    }

    pub fn log_text(&self) -> Option<&str> {
        match &self.variant {
            Some(act_reply::Variant::Log(text)) => Some(text),
            _ => None,
        }
    }

    pub fn error_text(&self) -> Option<&str> {
        match &self.variant {
            Some(act_reply::Variant::Error(e)) => Some(&e.error),
            _ => None,
        }
    }

    pub fn choice_bool(&self) -> Option<&ChoiceBool> {
        match &self.variant {
            Some(act_reply::Variant::Choice(c)) => c.as_bool(),
            _ => None,
        }
    }

    pub fn exposed_port(&self) -> Option<u32> {
        match &self.variant {
            Some(act_reply::Variant::Expose(e)) => Some(e.port),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_reply_constructors() {
        let reply = ActReply::log("python", "requirements.txt exists");
        assert_eq!(reply.source, "python");
        assert_eq!(reply.log_text(), Some("requirements.txt exists"));
        assert!(!reply.is_done());

        assert!(ActReply::done().is_done());
        assert_eq!(ActReply::error("boom").error_text(), Some("boom"));
        assert_eq!(
            ActReply::expose("exec", 5000).variant,
            Some(act_reply::Variant::Expose(ExposePort { port: 5000 }))
        );
    }

    #[test]
    fn test_chosen_request_survives_encoding() {
        let req = ActReq::chosen(true);
        let decoded = ActReq::decode(req.encode_to_vec().as_slice()).unwrap();

        assert!(!decoded.cancel);
        assert!(decoded.choice.as_ref().and_then(Choice::as_bool).unwrap().value);
    }
}
