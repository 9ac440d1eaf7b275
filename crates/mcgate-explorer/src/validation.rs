//! Input validation, applied before any daemon call is made.

use crate::error::ExplorerError;
use crate::types::PageRequest;

pub const MAX_HEIGHT: u64 = 999_999_999;
pub const MAX_PAGE_COUNT: usize = 500;
pub const MAX_NAME_LEN: usize = 32;
pub const MAX_KEY_LEN: usize = 256;
pub const MAX_SEARCH_LEN: usize = 128;

pub const PERMISSION_TYPES: [&str; 16] = [
    "admin", "activate", "mine", "issue", "create", "send", "receive", "write", "read", "connect",
    "low1", "low2", "low3", "high1", "high2", "high3",
];

const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

pub fn height(height: u64) -> Result<u64, ExplorerError> {
    if height > MAX_HEIGHT {
        return Err(ExplorerError::invalid(
            "height",
            height,
            format!("must be at most {MAX_HEIGHT}"),
        ));
    }
    Ok(height)
}

/// 64 hex characters; returned lower-cased.
pub fn hex_id(name: &str, value: &str) -> Result<String, ExplorerError> {
    if value.len() != 64 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ExplorerError::invalid(name, value, "must be 64 hexadecimal characters"));
    }
    Ok(value.to_ascii_lowercase())
}

pub fn block_hash(value: &str) -> Result<String, ExplorerError> {
    hex_id("block hash", value)
}

pub fn txid(value: &str) -> Result<String, ExplorerError> {
    hex_id("txid", value)
}

/// 26 to 35 base58 characters. The leading character is not checked:
/// address version bytes are a per-chain setting.
pub fn address(value: &str) -> Result<String, ExplorerError> {
    if !is_address_shaped(value) {
        return Err(ExplorerError::invalid(
            "address",
            value,
            "must be 26-35 base58 characters",
        ));
    }
    Ok(value.to_string())
}

pub fn is_address_shaped(value: &str) -> bool {
    (26..=35).contains(&value.len()) && value.chars().all(|c| BASE58.contains(c))
}

/// Asset or stream name (asset references such as `52-266-8745` included).
pub fn entity_name(name: &str, value: &str) -> Result<String, ExplorerError> {
    if !is_name_shaped(value) {
        return Err(ExplorerError::invalid(
            name,
            value,
            format!("must be 1-{MAX_NAME_LEN} letters, digits, '-' or '_'"),
        ));
    }
    Ok(value.to_string())
}

pub fn is_name_shaped(value: &str) -> bool {
    (1..=MAX_NAME_LEN).contains(&value.len())
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Stream key or publisher filter: 1 to 256 characters, no NUL.
pub fn stream_key(name: &str, value: &str) -> Result<String, ExplorerError> {
    if value.is_empty() || value.chars().count() > MAX_KEY_LEN || value.contains('\0') {
        return Err(ExplorerError::invalid(
            name,
            value.escape_debug(),
            format!("must be 1-{MAX_KEY_LEN} characters without NUL"),
        ));
    }
    Ok(value.to_string())
}

pub fn page(page: &PageRequest) -> Result<PageRequest, ExplorerError> {
    if page.count == 0 || page.count > MAX_PAGE_COUNT {
        return Err(ExplorerError::invalid(
            "count",
            page.count,
            format!("must be between 1 and {MAX_PAGE_COUNT}"),
        ));
    }
    if page.offset > MAX_HEIGHT as usize {
        return Err(ExplorerError::invalid("offset", page.offset, "out of range"));
    }
    Ok(*page)
}

/// One permission type or `*`; returned lower-cased.
pub fn permission_type(value: &str) -> Result<String, ExplorerError> {
    let lower = value.to_ascii_lowercase();
    if lower == "*" || PERMISSION_TYPES.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        Err(ExplorerError::invalid(
            "permission type",
            value,
            "unknown permission type",
        ))
    }
}

/// Trimmed search query of 1 to 128 characters from `[A-Za-z0-9_.-]`.
pub fn search_query(value: &str) -> Result<String, ExplorerError> {
    let trimmed = value.trim();
    let ok = (1..=MAX_SEARCH_LEN).contains(&trimmed.len())
        && trimmed
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if !ok {
        return Err(ExplorerError::invalid(
            "search query",
            value,
            "must be 1-128 letters, digits, '.', '-' or '_'",
        ));
    }
    Ok(trimmed.to_string())
}
