use thiserror::Error;

/// Failures of the underlying byte source
#[derive(Error, Debug)]
pub enum InputError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Read of {len} bytes at offset {offset} exceeds source size {size}")]
    OutOfBounds { offset: u64, len: usize, size: u64 },
}

/// Failures while decoding the 100-byte database header
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Header buffer too small: got {len} bytes, need 100")]
    TruncatedInput { len: usize },

    #[error("Invalid SQLite magic string")]
    InvalidMagic,
}

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Page {page} is out of range (page count: {page_count})")]
    OutOfRange { page: u32, page_count: u32 },

    #[error("Corrupted page: page={page}, reason={reason}")]
    CorruptPage { page: u32, reason: String },

    #[error("Failed to read page: {0}")]
    Input(#[from] InputError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Malformed varint at offset {offset}")]
    MalformedVarint { offset: usize },

    #[error("Invalid serial type: {0}")]
    InvalidSerialType(u64),

    #[error("Record truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Unexpected value in column '{column}': {reason}")]
    UnexpectedValue { column: &'static str, reason: String },
}

/// Failures while following pointers between pages
#[derive(Error, Debug)]
pub enum TraversalError {
    #[error("Dangling pointer from page {from} to page {to}")]
    DanglingPointer { from: u32, to: u32 },

    #[error("Page {page} visited more than once")]
    DuplicatePageVisit { page: u32 },

    #[error("Corrupt overflow chain at page {page}: {reason}")]
    CorruptOverflowChain { page: u32, reason: String },

    #[error(transparent)]
    Page(#[from] PageError),

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl TraversalError {
    /// Short, stable name of the error kind for reports
    pub fn kind(&self) -> &'static str {
        match self {
            TraversalError::DanglingPointer { .. } => "DanglingPointer",
            TraversalError::DuplicatePageVisit { .. } => "DuplicatePageVisit",
            TraversalError::CorruptOverflowChain { .. } => "CorruptOverflowChain",
            TraversalError::Page(PageError::OutOfRange { .. }) => "OutOfRange",
            TraversalError::Page(PageError::CorruptPage { .. }) => "CorruptPage",
            TraversalError::Page(PageError::Input(_)) => "InputError",
            TraversalError::Record(_) => "RecordError",
        }
    }
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Unreadable database: {0}")]
    Input(#[from] InputError),

    #[error("Not an SQLite database: {0}")]
    InvalidDatabase(HeaderError),

    #[error("Unsupported page size {page_size} (usable size {usable_size})")]
    UnsupportedPageSize { page_size: u32, usable_size: u32 },

    #[error("Failed to read the schema table: {0}")]
    Schema(TraversalError),

    #[error("Failed to walk the freelist: {0}")]
    Freelist(TraversalError),
}

impl From<HeaderError> for AnalysisError {
    fn from(err: HeaderError) -> Self {
        AnalysisError::InvalidDatabase(err)
    }
}
