//! Query dispatch to the remote shopping assistant
//!
//! A finalized transcript (or typed query) is exchanged for a reply text
//! and an ordered list of matching products.

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpDispatcher;

/// Body of an assistant query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// The user's question
    pub query: String,
    /// Maximum number of product results
    pub limit: u32,
}

/// A product matched by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductResult {
    pub product_id: i64,
    pub title: String,
    pub image: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Similarity score assigned by the search backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Reply returned for a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub reply_text: String,
    #[serde(default)]
    pub results: Vec<ProductResult>,
}

/// Failure exchanging a query for a reply
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The request never produced a response
    #[error("request failed: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success status
    #[error("assistant endpoint returned {status}")]
    Status { status: u16 },

    /// The response body was not a valid reply
    #[error("invalid reply: {0}")]
    Decode(String),

    /// No reply arrived within the configured timeout
    #[error("no reply within {0:?}")]
    Timeout(std::time::Duration),
}

/// Sends queries to the assistant
#[async_trait]
pub trait QueryDispatcher: Send + Sync {
    async fn query(&self, request: QueryRequest) -> Result<AssistantReply, DispatchError>;
}
