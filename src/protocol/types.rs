//! Identifier and enumeration types for agent communication.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent identifier, unique within one multi-agent system.
pub type AgentId = u32;

/// Multi-agent system identifier.
pub type MasId = u32;

/// Network-addressable name of an agency process.
pub type AgencyName = String;

/// Raw protocol identifier as carried on the wire.
pub type ProtocolId = i32;

/// FIPA communicative acts.
///
/// The discriminants are the integer codes used on the wire; a message may carry
/// any integer, and only values in `None..=Subscribe` are FIPA conform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum Performative {
    None = 0,
    AcceptProposal = 1,
    Agree = 2,
    Cancel = 3,
    CallForProposal = 4,
    Confirm = 5,
    Disconfirm = 6,
    Failure = 7,
    Inform = 8,
    InformIf = 9,
    InformRef = 10,
    NotUnderstood = 11,
    Propagate = 12,
    Propose = 13,
    Proxy = 14,
    QueryIf = 15,
    QueryRef = 16,
    Refuse = 17,
    RejectProposal = 18,
    Request = 19,
    RequestWhen = 20,
    RequestWhenever = 21,
    Subscribe = 22,
}

impl Performative {
    pub const ALL: [Performative; 23] = [
        Performative::None,
        Performative::AcceptProposal,
        Performative::Agree,
        Performative::Cancel,
        Performative::CallForProposal,
        Performative::Confirm,
        Performative::Disconfirm,
        Performative::Failure,
        Performative::Inform,
        Performative::InformIf,
        Performative::InformRef,
        Performative::NotUnderstood,
        Performative::Propagate,
        Performative::Propose,
        Performative::Proxy,
        Performative::QueryIf,
        Performative::QueryRef,
        Performative::Refuse,
        Performative::RejectProposal,
        Performative::Request,
        Performative::RequestWhen,
        Performative::RequestWhenever,
        Performative::Subscribe,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Look up the performative for a wire code, `None` when out of range.
    pub fn from_code(code: i32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }

    pub fn label(self) -> &'static str {
        match self {
            Performative::None => "None",
            Performative::AcceptProposal => "Accept Proposal",
            Performative::Agree => "Agree",
            Performative::Cancel => "Cancel",
            Performative::CallForProposal => "Call For Proposal",
            Performative::Confirm => "Confirm",
            Performative::Disconfirm => "Disconfirm",
            Performative::Failure => "Failure",
            Performative::Inform => "Inform",
            Performative::InformIf => "Inform If",
            Performative::InformRef => "Inform Ref",
            Performative::NotUnderstood => "Not Understood",
            Performative::Propagate => "Propagate",
            Performative::Propose => "Propose",
            Performative::Proxy => "Proxy",
            Performative::QueryIf => "Query If",
            Performative::QueryRef => "Query Ref",
            Performative::Refuse => "Refuse",
            Performative::RejectProposal => "Reject Proposal",
            Performative::Request => "Request",
            Performative::RequestWhen => "Request When",
            Performative::RequestWhenever => "Request Whenever",
            Performative::Subscribe => "Subscribe",
        }
    }
}

impl From<Performative> for i32 {
    fn from(perf: Performative) -> Self {
        perf.code()
    }
}

impl fmt::Display for Performative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// FIPA interaction protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Protocol {
    None = 0,
    Request = 1,
    Query = 2,
    RequestWhen = 3,
    ContractNet = 4,
    IteratedContractNet = 5,
    EnglishAuction = 6,
    DutchAuction = 7,
    Brokering = 8,
    Recruiting = 9,
    Subscribe = 10,
    Propose = 11,
}

impl Protocol {
    pub const ALL: [Protocol; 12] = [
        Protocol::None,
        Protocol::Request,
        Protocol::Query,
        Protocol::RequestWhen,
        Protocol::ContractNet,
        Protocol::IteratedContractNet,
        Protocol::EnglishAuction,
        Protocol::DutchAuction,
        Protocol::Brokering,
        Protocol::Recruiting,
        Protocol::Subscribe,
        Protocol::Propose,
    ];

    pub fn id(self) -> ProtocolId {
        self as ProtocolId
    }

    pub fn from_id(id: ProtocolId) -> Option<Self> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }

    pub fn label(self) -> &'static str {
        match self {
            Protocol::None => "None",
            Protocol::Request => "Request",
            Protocol::Query => "Query",
            Protocol::RequestWhen => "Request When",
            Protocol::ContractNet => "Contract-Net",
            Protocol::IteratedContractNet => "Iterated Contract-Net",
            Protocol::EnglishAuction => "English Auction",
            Protocol::DutchAuction => "Dutch Auction",
            Protocol::Brokering => "Brokering",
            Protocol::Recruiting => "Recruiting",
            Protocol::Subscribe => "Subscribe",
            Protocol::Propose => "Propose",
        }
    }
}

impl From<Protocol> for ProtocolId {
    fn from(prot: Protocol) -> Self {
        prot.id()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Run status of an agent or agency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Starting,
    Running,
    Error,
    Terminated,
}

/// Status code plus the time it was last changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Status {
    pub code: StatusCode,
    #[serde(rename = "lastupdate")]
    pub last_update: DateTime<Utc>,
}

impl Status {
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            last_update: Utc::now(),
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new(StatusCode::Starting)
    }
}
