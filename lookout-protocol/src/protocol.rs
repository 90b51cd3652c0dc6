use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::ProtocolError;

/// Maximum message size (10MB)
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Default page size in bytes, and the increment the cursor engine grows
/// its read window by when a window holds no usable line boundary.
pub const DEFAULT_PAGE_BYTES: i64 = 2400;

/// Largest page a caller may ask for; leaves room for the envelope within
/// [`MAX_MESSAGE_SIZE`]
pub const MAX_PAGE_BYTES: i64 = 8 * 1024 * 1024;

/// Default port of the worker-side log tail service
pub const DEFAULT_LOG_SERVER_PORT: u16 = 4040;

/// Direction of a log read relative to the caller's cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadDirection {
    /// Read newly appended lines after the forward position
    Forward,
    /// Read older lines before the backward position
    Backward,
}

impl ReadDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }
}

impl fmt::Display for ReadDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical identity of a deployed function, independent of the worker
/// currently running it.
///
/// The three components are kept as separate fields so that
/// `("ab", "c", "x")` and `("a", "bc", "x")` never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId {
    pub tenant: String,
    pub namespace: String,
    pub name: String,
}

impl FunctionId {
    pub fn new(
        tenant: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `tenant/namespace/name`. Every component must be non-empty.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('/');
        let tenant = parts.next().filter(|p| !p.is_empty())?;
        let namespace = parts.next().filter(|p| !p.is_empty())?;
        let name = parts.next().filter(|p| !p.is_empty())?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(tenant, namespace, name))
    }

    /// Log file of one instance on the worker running it:
    /// `{root}/{tenant}/{namespace}/{name}/{name}-{instance}.log`
    pub fn log_path(&self, root: impl AsRef<Path>, instance: u32) -> PathBuf {
        root.as_ref()
            .join(&self.tenant)
            .join(&self.namespace)
            .join(&self.name)
            .join(format!("{}-{}.log", self.name, instance))
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant, self.namespace, self.name)
    }
}

/// Read request served by a worker's log tail service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    /// Absolute path of the log file on the worker
    pub file: String,
    pub direction: ReadDirection,
    /// Requested page size in bytes (the engine never reads less than
    /// [`DEFAULT_PAGE_BYTES`])
    pub bytes: i64,
    /// Forward cursor; `<= 0` means "current end of file"
    pub forward_index: i64,
    /// Backward cursor; `<= 0` means "current end of file"
    pub backward_index: i64,
}

/// One page of whole log lines plus the updated cursor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPage {
    pub logs: String,
    pub forward_index: i64,
    pub backward_index: i64,
}

impl LogPage {
    /// An empty page is a successful read with nothing new to show
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

/// Caller-side paging parameters for a function log fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    /// Explicit direction. When absent, a positive forward position selects
    /// `Forward` and anything else selects `Backward`.
    #[serde(default)]
    pub direction: Option<ReadDirection>,
    pub bytes: i64,
    #[serde(default)]
    pub forward_position: i64,
    #[serde(default)]
    pub backward_position: i64,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            direction: None,
            bytes: DEFAULT_PAGE_BYTES,
            forward_position: 0,
            backward_position: 0,
        }
    }
}

impl LogQuery {
    /// Page backward from the given position (0 = end of file)
    pub fn backward(bytes: i64, position: i64) -> Self {
        Self {
            direction: Some(ReadDirection::Backward),
            bytes,
            forward_position: 0,
            backward_position: position,
        }
    }

    /// Page forward from the given position (0 = end of file)
    pub fn forward(bytes: i64, position: i64) -> Self {
        Self {
            direction: Some(ReadDirection::Forward),
            bytes,
            forward_position: position,
            backward_position: 0,
        }
    }

    /// The direction this query resolves to
    pub fn effective_direction(&self) -> ReadDirection {
        match self.direction {
            Some(direction) => direction,
            None if self.forward_position > 0 => ReadDirection::Forward,
            None => ReadDirection::Backward,
        }
    }
}

/// Request sent to a lookout node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Liveness check
    Ping,
    /// Read one page from a log file on this worker (agent)
    ReadLog(ReadRequest),
    /// Resolve the worker hosting a function instance and read one page
    /// of its log (gateway)
    FetchLog {
        function: FunctionId,
        /// Instance index within the function
        instance: u32,
        /// Pin the worker instead of resolving it
        #[serde(default)]
        worker_id: Option<String>,
        query: LogQuery,
    },
    /// Return the cached record for a function (gateway)
    DescribeFunction { function: FunctionId },
    /// Count functions registered under a tenant (gateway)
    CountFunctions { tenant: String },
}

impl Request {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::ReadLog(_) => "ReadLog",
            Request::FetchLog { .. } => "FetchLog",
            Request::DescribeFunction { .. } => "DescribeFunction",
            Request::CountFunctions { .. } => "CountFunctions",
        }
    }
}

/// Classification carried by error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Unknown function, unknown instance or missing log file
    NotFound,
    /// The request was rejected before doing any work
    InvalidRequest,
    /// Reading the log failed, possibly transiently
    Io,
    /// A downstream node could not be reached in time
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::InvalidRequest => "invalid request",
            Self::Io => "io",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response sent back for every request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Successful response
    Ok {
        /// Optional message
        message: Option<String>,
        /// Optional data payload
        data: Option<ResponseData>,
    },
    /// Error response
    Error { kind: ErrorKind, message: String },
}

impl Response {
    /// Create a success response with a message
    pub fn ok_with_message(msg: impl Into<String>) -> Self {
        Response::Ok {
            message: Some(msg.into()),
            data: None,
        }
    }

    /// Create a success response with data
    pub fn ok_with_data(data: ResponseData) -> Self {
        Response::Ok {
            message: None,
            data: Some(data),
        }
    }

    /// Create an error response
    pub fn error(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Response::Error {
            kind,
            message: msg.into(),
        }
    }
}

/// Data payload in response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseData {
    /// One page of log lines
    Page(LogPage),
    /// Cached function record
    Function(FunctionInfo),
    /// Number of functions under a tenant
    Count(usize),
}

/// Cached view of a function as seen by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub function: FunctionId,
    /// "function", "source" or "sink"
    pub component: String,
    pub parallelism: u32,
    /// Instances sorted by instance id
    pub instances: Vec<InstanceInfo>,
}

/// Last known placement of one function instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: u32,
    pub running: bool,
    pub worker_id: String,
    /// When the placement was last confirmed, in milliseconds since Unix epoch
    pub last_query_time: i64,
}

/// Client-to-server message with request ID for multiplexing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    pub request: Request,
}

/// Server-to-client message answering the request with the same ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    pub response: Response,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let size = bincode::serialized_size(value).map_err(ProtocolError::Encode)?;
    if size > MAX_MESSAGE_SIZE as u64 {
        return Err(ProtocolError::MessageTooLarge);
    }
    let len = size as u32;
    let mut frame = Vec::with_capacity(4 + size as usize);
    frame.extend_from_slice(&len.to_be_bytes());
    bincode::serialize_into(&mut frame, value).map_err(ProtocolError::Encode)?;
    Ok(frame)
}

/// Encode a request envelope to length-prefixed bincode bytes
pub fn encode_envelope(envelope: &RequestEnvelope) -> Result<Vec<u8>> {
    encode_frame(envelope)
}

/// Decode a request envelope from raw bincode payload (framing already stripped)
pub fn decode_envelope(bytes: &[u8]) -> Result<RequestEnvelope> {
    bincode::deserialize(bytes).map_err(ProtocolError::Decode)
}

/// Encode a response envelope to length-prefixed bincode bytes
pub fn encode_response(envelope: &ResponseEnvelope) -> Result<Vec<u8>> {
    encode_frame(envelope)
}

/// Decode a response envelope from raw bincode payload (framing already stripped)
pub fn decode_response(bytes: &[u8]) -> Result<ResponseEnvelope> {
    bincode::deserialize(bytes).map_err(ProtocolError::Decode)
}
