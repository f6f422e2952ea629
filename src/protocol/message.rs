//! FIPA ACL message record exchanged between agents and agencies.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{AgencyName, AgentId, Performative, Protocol, ProtocolId};

/// An agent message.
///
/// Field names on the wire follow the short JSON keys peer agencies already speak,
/// so batches can be exchanged with agencies written against the same API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclMessage {
    /// Sending time, stamped by the sending ACL
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// Communicative act, see [`Performative`]
    #[serde(rename = "perf")]
    pub performative: i32,
    pub sender: AgentId,
    /// Name of the agency the sender lives on, stamped by the outbound link
    #[serde(rename = "agencys", default)]
    pub agency_sender: AgencyName,
    pub receiver: AgentId,
    /// Name of the agency the receiver lives on, stamped by the outbound link
    #[serde(rename = "agencyr", default)]
    pub agency_receiver: AgencyName,
    /// Agent subsequent messages of this conversation should go to
    #[serde(rename = "repto", default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<AgentId>,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "lang", default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(rename = "enc", default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(rename = "ont", default, skip_serializing_if = "Option::is_none")]
    pub ontology: Option<String>,
    /// Interaction protocol, see [`Protocol`]
    #[serde(rename = "prot")]
    pub protocol: ProtocolId,
    #[serde(rename = "convid", default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,
    #[serde(rename = "repwith", default, skip_serializing_if = "Option::is_none")]
    pub reply_with: Option<String>,
    #[serde(rename = "inrepto", default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<i64>,
    /// Latest time the sender would like a reply by
    #[serde(rename = "repby", default, skip_serializing_if = "Option::is_none")]
    pub reply_by: Option<DateTime<Utc>>,
}

/// A message whose performative is outside the FIPA range.
///
/// The message itself is complete and can still be sent; the caller decides.
#[derive(Debug, Clone, Error)]
#[error("non fipa-conform performative {}", .message.performative)]
pub struct MalformedMessage {
    pub message: AclMessage,
}

impl MalformedMessage {
    pub fn into_message(self) -> AclMessage {
        self.message
    }
}

impl AclMessage {
    /// Create a message with the given header and content.
    pub fn new(
        sender: AgentId,
        receiver: AgentId,
        protocol: impl Into<ProtocolId>,
        performative: impl Into<i32>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            performative: performative.into(),
            sender,
            agency_sender: String::new(),
            receiver,
            agency_receiver: String::new(),
            reply_to: None,
            content: content.into(),
            language: None,
            encoding: None,
            ontology: None,
            protocol: protocol.into(),
            conversation_id: None,
            reply_with: None,
            in_reply_to: None,
            reply_by: None,
        }
    }

    /// Check the performative range.
    pub fn validate(self) -> Result<Self, MalformedMessage> {
        if self.performative_kind().is_some() {
            Ok(self)
        } else {
            Err(MalformedMessage { message: self })
        }
    }

    pub fn performative_kind(&self) -> Option<Performative> {
        Performative::from_code(self.performative)
    }

    pub fn protocol_kind(&self) -> Option<Protocol> {
        Protocol::from_id(self.protocol)
    }

    pub fn with_conversation_id(mut self, id: i64) -> Self {
        self.conversation_id = Some(id);
        self
    }

    pub fn with_reply_with(mut self, token: impl Into<String>) -> Self {
        self.reply_with = Some(token.into());
        self
    }

    pub fn with_reply_by(mut self, deadline: DateTime<Utc>) -> Self {
        self.reply_by = Some(deadline);
        self
    }

    pub fn with_ontology(mut self, ontology: impl Into<String>) -> Self {
        self.ontology = Some(ontology.into());
        self
    }

    /// Build the reply to this message, addressed to `reply_to` if set, else the sender.
    pub fn reply(&self, performative: impl Into<i32>, content: impl Into<String>) -> Self {
        let mut reply = AclMessage::new(
            self.receiver,
            self.reply_to.unwrap_or(self.sender),
            self.protocol,
            performative,
            content,
        );
        reply.conversation_id = self.conversation_id;
        reply.in_reply_to = self.conversation_id;
        reply.language = self.language.clone();
        reply.encoding = self.encoding.clone();
        reply.ontology = self.ontology.clone();
        reply
    }
}

impl fmt::Display for AclMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sender: {}; Receiver: {}; Timestamp: {}; ",
            self.sender, self.receiver, self.timestamp
        )?;
        match self.protocol_kind() {
            Some(prot) => write!(f, "Protocol: {}; ", prot)?,
            None => write!(f, "Protocol: Unknown({}); ", self.protocol)?,
        }
        match self.performative_kind() {
            Some(perf) => write!(f, "Performative: {}; ", perf)?,
            None => write!(f, "Performative: Unknown({}); ", self.performative)?,
        }
        write!(f, "Content: {}", self.content)
    }
}
