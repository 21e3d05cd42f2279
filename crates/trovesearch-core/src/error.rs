//! Domain errors that callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IriError {
    #[error("not an iri: {0:?}")]
    NotAnIri(String),
    #[error("invalid iri scheme in {0:?}")]
    InvalidScheme(String),
}

/// A rejected search parameter. Every variant names the offending queryparam.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("invalid queryparam name {0:?}")]
    InvalidQueryparamName(String),
    #[error("{param}: unknown filter operator {operator:?}")]
    UnknownOperator { param: String, operator: String },
    #[error("{param}: operator {operator:?} may only be used on date properties")]
    DateOperatorOnNonDatePath { param: String, operator: String },
    #[error("{param}: invalid property path {path:?}")]
    InvalidPropertypath { param: String, path: String },
    #[error("{param}: glob paths may be at most one step for text search, got {path:?}")]
    GlobTooLong { param: String, path: String },
    #[error("{param}: expected a single value, got {count}")]
    RepeatedSingleValue { param: String, count: usize },
    #[error("{param}: invalid page size {value:?}")]
    InvalidPageSize { param: String, value: String },
    #[error("{param}: invalid cursor")]
    InvalidCursor { param: String },
    #[error("{param}: invalid date value {value:?}")]
    InvalidDate { param: String, value: String },
    #[error("{param}: sort is only supported on date properties, got {path:?}")]
    InvalidSort { param: String, path: String },
    #[error("valueSearchPropertyPath is required")]
    MissingValuesearchPropertypath,
    #[error("{param}: not supported when valueSearchPropertyPath is a date property")]
    UnsupportedDateValuesearch { param: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("unknown index strategy {0:?}")]
    UnknownStrategy(String),
    #[error("unknown or outdated index {indexname:?} (current is {current:?})")]
    UnknownCheck { indexname: String, current: String },
    #[error("index strategy {strategy:?} does not support message type {message_type}")]
    UnsupportedMessageType {
        strategy: String,
        message_type: String,
    },
    #[error("index {0:?} already exists")]
    IndexAlreadyExists(String),
    #[error("index {0:?} does not exist")]
    IndexNotFound(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RdfError {
    #[error("focus iri {0:?} not found in graph")]
    IriMismatch(String),
    #[error("unparseable rdf: {0}")]
    Unparseable(String),
}
