//! RFC 3161 time stamping.
//!
//! A signature is time-stamped by sending the hash of its signature value to
//! a time-stamp authority and embedding the returned token as the
//! `id-aa-timeStampToken` unsigned attribute of the signer info:
//!
//! ```text
//! signature value → hash → TimeStampReq ──HTTP──> TSA
//!                                                  │
//! SignerInfo.unsignedAttrs ← TimeStampToken ← TimeStampResp
//! ```

pub mod asn1;
mod client;
mod error;
mod token;

pub use client::{build_request, process_response, LocalTimestampAuthority, TimestampClient, TimestampProvider};
pub use error::TimestampError;
pub use token::TimestampToken;
