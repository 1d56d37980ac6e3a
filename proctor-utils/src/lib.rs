//! Proctoring Policy Functions
//!
//! ## Current API
//!
//! - Derive session status
//! - Decide sweep eligibility
//! - Count violation strikes
//! - Calculate submission score
//! - Retry backoff for signaling transport
//!
pub mod backoff;
pub mod error;
pub mod score;
pub mod status;
pub mod violation;
