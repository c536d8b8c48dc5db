//! Deciding partial-download eligibility from probe responses.

use crate::data::UrlInfo;

/// Status code of a successful range response.
pub const PARTIAL_CONTENT: u16 = 206;

/// Headers of the 1-byte `Range: bytes=0-0` probe response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status:         u16,
    pub content_length: Option<u64>,
    pub accept_ranges:  Option<String>,
    pub content_range:  Option<String>,
}

/// Combine the length query and the range probe into a [`UrlInfo`].
///
/// The length comes from the length query, then the `Content-Range` total,
/// then the caller's `known_size`. Partial download needs all of: a known
/// length, an `Accept-Ranges` header other than `none`, a 206 status and a
/// 1-byte body.
pub fn evaluate_probe(
    head_length: Option<u64>,
    probe: &ProbeResponse,
    known_size: Option<u64>,
) -> UrlInfo {
    let file_length = head_length
        .filter(|&len| len > 0)
        .or_else(|| probe.content_range.as_deref().and_then(parse_content_range_total))
        .or(known_size);

    let accepts_ranges = probe
        .accept_ranges
        .as_deref()
        .is_some_and(|v| !v.trim().eq_ignore_ascii_case("none"));

    UrlInfo {
        file_length,
        supports_partial: file_length.is_some()
            && accepts_ranges
            && probe.status == PARTIAL_CONTENT
            && probe.content_length == Some(1),
    }
}

/// Total length from a `Content-Range: bytes 0-0/12345` value; `None` for `*`.
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let pos = value.rfind('/')?;
    value[pos + 1..].trim().parse().ok()
}
