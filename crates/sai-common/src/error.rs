//! Status codes and error types for QoS control-plane operations.
//!
//! Every driver backend reports a [`Status`] code; the control plane wraps
//! these into [`SaiError`] values that carry enough context (object names,
//! attribute indices) for the caller to act on.

use std::fmt;
use thiserror::Error;

/// Status codes reported across the driver boundary.
///
/// These values correspond to `sai_status_t` in the vendor headers. The
/// attribute-indexed families (`INVALID_ATTR_VALUE_0 + index` and friends)
/// are represented by the base code here; the index travels in [`SaiError`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success = 0,
    Failure = -1,
    NotSupported = -2,
    NoMemory = -3,
    InsufficientResources = -4,
    InvalidParameter = -5,
    ItemAlreadyExists = -6,
    ItemNotFound = -7,
    Uninitialized = -8,
    TableFull = -9,
    MandatoryAttributeMissing = -10,
    ObjectInUse = -11,
    InvalidObjectType = -12,
    InvalidObjectId = -13,
    InvalidAttribute = -14,
    InvalidAttrValue = -15,
    UnknownAttribute = -16,
}

impl Status {
    /// Creates a status from a raw driver return code.
    pub fn from_raw(status: i32) -> Self {
        match status {
            0 => Status::Success,
            -2 => Status::NotSupported,
            -3 => Status::NoMemory,
            -4 => Status::InsufficientResources,
            -5 => Status::InvalidParameter,
            -6 => Status::ItemAlreadyExists,
            -7 => Status::ItemNotFound,
            -8 => Status::Uninitialized,
            -9 => Status::TableFull,
            -10 => Status::MandatoryAttributeMissing,
            -11 => Status::ObjectInUse,
            -12 => Status::InvalidObjectType,
            -13 => Status::InvalidObjectId,
            -14 => Status::InvalidAttribute,
            -15 => Status::InvalidAttrValue,
            -16 => Status::UnknownAttribute,
            _ => Status::Failure,
        }
    }

    /// Returns true if the status indicates success.
    pub fn is_success(&self) -> bool {
        *self == Status::Success
    }

    /// Converts to a Result, returning Ok(()) for success.
    pub fn into_result(self) -> SaiResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(SaiError::Status { status: self })
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "SAI_STATUS_SUCCESS",
            Status::Failure => "SAI_STATUS_FAILURE",
            Status::NotSupported => "SAI_STATUS_NOT_SUPPORTED",
            Status::NoMemory => "SAI_STATUS_NO_MEMORY",
            Status::InsufficientResources => "SAI_STATUS_INSUFFICIENT_RESOURCES",
            Status::InvalidParameter => "SAI_STATUS_INVALID_PARAMETER",
            Status::ItemAlreadyExists => "SAI_STATUS_ITEM_ALREADY_EXISTS",
            Status::ItemNotFound => "SAI_STATUS_ITEM_NOT_FOUND",
            Status::Uninitialized => "SAI_STATUS_UNINITIALIZED",
            Status::TableFull => "SAI_STATUS_TABLE_FULL",
            Status::MandatoryAttributeMissing => "SAI_STATUS_MANDATORY_ATTRIBUTE_MISSING",
            Status::ObjectInUse => "SAI_STATUS_OBJECT_IN_USE",
            Status::InvalidObjectType => "SAI_STATUS_INVALID_OBJECT_TYPE",
            Status::InvalidObjectId => "SAI_STATUS_INVALID_OBJECT_ID",
            Status::InvalidAttribute => "SAI_STATUS_INVALID_ATTRIBUTE",
            Status::InvalidAttrValue => "SAI_STATUS_INVALID_ATTR_VALUE",
            Status::UnknownAttribute => "SAI_STATUS_UNKNOWN_ATTRIBUTE",
        };
        write!(f, "{}", s)
    }
}

/// Error type for QoS control-plane and driver operations.
#[derive(Debug, Clone, Error)]
pub enum SaiError {
    /// A driver call returned a bare error status.
    #[error("driver operation failed: {status}")]
    Status { status: Status },

    /// Invalid parameter passed to an operation.
    #[error("invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// The object id does not resolve to an object of the expected kind.
    #[error("invalid object type: {message}")]
    InvalidObjectType { message: String },

    /// The requested object was not found in the cache.
    #[error("object not found: {object}")]
    NotFound { object: String },

    /// The object already exists in the cache.
    #[error("object already exists: {object}")]
    AlreadyExists { object: String },

    /// The object has live references or children and cannot be removed.
    #[error("object in use: {object}")]
    ObjectInUse { object: String },

    /// A capacity-accounted resource (buffer pool) is exhausted.
    #[error("insufficient resources: {message}")]
    InsufficientResources { message: String },

    /// A mandatory create attribute was not supplied.
    #[error("mandatory attribute {attr_id} missing")]
    MandatoryAttributeMissing { attr_id: u32 },

    /// The attribute at `index` is not part of this object's schema.
    #[error("unknown attribute {attr_id} at index {index}")]
    UnknownAttribute { index: usize, attr_id: u32 },

    /// The attribute at `index` is not valid for the attempted operation.
    #[error("attribute {attr_id} at index {index} not valid for this operation")]
    InvalidAttribute { index: usize, attr_id: u32 },

    /// The attribute at `index` carries a malformed or out-of-range value.
    #[error("invalid value for attribute {attr_id} at index {index}")]
    InvalidAttrValue { index: usize, attr_id: u32 },

    /// The QoS subsystem has not been initialized.
    #[error("QoS subsystem not initialized")]
    Uninitialized,
}

impl SaiError {
    /// Creates an invalid parameter error with a message.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        SaiError::InvalidParameter {
            message: message.into(),
        }
    }

    /// Creates an invalid object type error with a message.
    pub fn invalid_object_type(message: impl Into<String>) -> Self {
        SaiError::InvalidObjectType {
            message: message.into(),
        }
    }

    /// Creates a not found error with an object description.
    pub fn not_found(object: impl Into<String>) -> Self {
        SaiError::NotFound {
            object: object.into(),
        }
    }

    /// Creates an already exists error.
    pub fn already_exists(object: impl Into<String>) -> Self {
        SaiError::AlreadyExists {
            object: object.into(),
        }
    }

    /// Creates an object in use error.
    pub fn object_in_use(object: impl Into<String>) -> Self {
        SaiError::ObjectInUse {
            object: object.into(),
        }
    }

    /// Creates an insufficient resources error.
    pub fn insufficient_resources(message: impl Into<String>) -> Self {
        SaiError::InsufficientResources {
            message: message.into(),
        }
    }

    /// Returns the status code this error maps to at the driver boundary.
    pub fn status(&self) -> Status {
        match self {
            SaiError::Status { status } => *status,
            SaiError::InvalidParameter { .. } => Status::InvalidParameter,
            SaiError::InvalidObjectType { .. } => Status::InvalidObjectType,
            SaiError::NotFound { .. } => Status::ItemNotFound,
            SaiError::AlreadyExists { .. } => Status::ItemAlreadyExists,
            SaiError::ObjectInUse { .. } => Status::ObjectInUse,
            SaiError::InsufficientResources { .. } => Status::InsufficientResources,
            SaiError::MandatoryAttributeMissing { .. } => Status::MandatoryAttributeMissing,
            SaiError::UnknownAttribute { .. } => Status::UnknownAttribute,
            SaiError::InvalidAttribute { .. } => Status::InvalidAttribute,
            SaiError::InvalidAttrValue { .. } => Status::InvalidAttrValue,
            SaiError::Uninitialized => Status::Uninitialized,
        }
    }
}

/// Result type for QoS control-plane and driver operations.
pub type SaiResult<T> = Result<T, SaiError>;
