//! Export a Confluence space over XML-RPC: rendered page HTML, attachments,
//! and the space's page hierarchy reproduced as nested directories.

pub mod export;
pub mod hierarchy;
pub mod rpc;
