//! SIP message view consumed and produced by the routing core.
//!
//! Header values are `rvoip-sip-core` types: URIs are [`Uri`], Via entries
//! are [`ViaHeader`] with their [`Param`] lists, and request methods and
//! status codes are sip-core's [`Method`] and [`StatusCode`]. The transport
//! parses the wire message with sip-core and hands the engine the headers
//! routing reads or rewrites, in this shape.

pub mod headers;

pub use headers::{generate_branch, uri_for, via_for, UriExt, ViaHeaderExt, BRANCH_MAGIC_COOKIE};
pub use rvoip_sip_core::types::param::{GenericValue, Param};
pub use rvoip_sip_core::types::uri::{Host, Scheme, Uri};
pub use rvoip_sip_core::types::via::{SentProtocol, ViaHeader};
pub use rvoip_sip_core::types::{Method, StatusCode};

/// Max-Forwards value for freshly built requests
pub const DEFAULT_MAX_FORWARDS: u32 = 70;

/// From/To header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr {
    pub uri: Uri,
    pub tag: Option<String>,
}

impl NameAddr {
    pub fn new(uri: Uri) -> Self {
        Self { uri, tag: None }
    }
}

/// CSeq header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

/// Request line or status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request { method: Method, uri: Uri },
    Response { status: StatusCode, reason: String },
}

/// A SIP request or response as the routing core sees it.
///
/// Header lists are ordered top-first: `via[0]` is the most recent hop and
/// `route[0]` the next hop to consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipMessage {
    pub start_line: StartLine,
    pub via: Vec<ViaHeader>,
    pub route: Vec<Uri>,
    pub record_route: Vec<Uri>,
    pub contact: Vec<Uri>,
    pub max_forwards: u32,
    pub from: NameAddr,
    pub to: NameAddr,
    pub call_id: String,
    pub cseq: CSeq,
    pub user_agent: Option<String>,
    pub event: Option<String>,
}

impl SipMessage {
    /// New request with default headers; From/To both name the request URI
    pub fn request(method: Method, uri: Uri) -> Self {
        let party = NameAddr::new(uri.clone());
        Self {
            start_line: StartLine::Request { method: method.clone(), uri },
            via: Vec::new(),
            route: Vec::new(),
            record_route: Vec::new(),
            contact: Vec::new(),
            max_forwards: DEFAULT_MAX_FORWARDS,
            from: party.clone(),
            to: party,
            call_id: uuid::Uuid::new_v4().to_string(),
            cseq: CSeq { seq: 1, method },
            user_agent: None,
            event: None,
        }
    }

    /// Response to `request`, copying the headers a UAS copies (RFC 3261 8.2.6.2)
    pub fn response_to(request: &SipMessage, status: StatusCode) -> Self {
        Self {
            start_line: StartLine::Response {
                status,
                reason: status.reason_phrase().to_string(),
            },
            via: request.via.clone(),
            route: Vec::new(),
            record_route: request.record_route.clone(),
            contact: Vec::new(),
            max_forwards: request.max_forwards,
            from: request.from.clone(),
            to: request.to.clone(),
            call_id: request.call_id.clone(),
            cseq: request.cseq.clone(),
            user_agent: None,
            event: None,
        }
    }

    pub fn with_via(mut self, via: ViaHeader) -> Self {
        self.via.push(via);
        self
    }

    pub fn with_route(mut self, route: Uri) -> Self {
        self.route.push(route);
        self
    }

    pub fn with_contact(mut self, contact: Uri) -> Self {
        self.contact.push(contact);
        self
    }

    pub fn with_to_tag(mut self, tag: impl Into<String>) -> Self {
        self.to.tag = Some(tag.into());
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }

    pub fn with_cseq(mut self, seq: u32, method: Method) -> Self {
        self.cseq = CSeq { seq, method };
        self
    }

    pub fn with_max_forwards(mut self, max_forwards: u32) -> Self {
        self.max_forwards = max_forwards;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start_line, StartLine::Request { .. })
    }

    pub fn method(&self) -> Option<&Method> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn request_uri(&self) -> Option<&Uri> {
        match &self.start_line {
            StartLine::Request { uri, .. } => Some(uri),
            StartLine::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match &self.start_line {
            StartLine::Request { .. } => None,
            StartLine::Response { status, .. } => Some(*status),
        }
    }

    /// Method that drives routing: the request method, or the CSeq method of a response
    pub fn routing_method(&self) -> &Method {
        self.method().unwrap_or(&self.cseq.method)
    }

    pub fn top_via(&self) -> Option<&ViaHeader> {
        self.via.first()
    }

    pub fn top_via_mut(&mut self) -> Option<&mut ViaHeader> {
        self.via.first_mut()
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.to.tag.as_deref()
    }

    /// One-line description for logs
    pub fn summary(&self) -> String {
        match &self.start_line {
            StartLine::Request { method, uri } => {
                format!("{} {} call-id={}", method, uri, self.call_id)
            }
            StartLine::Response { status, reason } => {
                format!("{} {} ({}) call-id={}", status.as_u16(), reason, self.cseq.method, self.call_id)
            }
        }
    }
}
