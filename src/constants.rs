//! Shared constants used across the application.

/// User agent string used for evidence capture HTTP requests.
///
/// A realistic browser user agent, so the raw fetch sees the same page a
/// visitor (and the headless browser session) would.
pub const ARCHIVAL_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Raw HTML body of the fetched resource.
pub const CONTENT_HTML: &str = "content.html";
/// Visible text extracted from the rendered page.
pub const CONTENT_TXT: &str = "content.txt";
/// Raw bytes of a PDF resource.
pub const CONTENT_PDF: &str = "content.pdf";
/// Viewport screenshot.
pub const SCREENSHOT: &str = "screenshot.jpg";
/// Composited full-page screenshot.
pub const FULL_SCREENSHOT: &str = "full_screenshot.jpg";
/// Output of the video extractor.
pub const VIDEO: &str = "video.mp4";

/// Newline-joined artifact checksums, the file that gets timestamped.
pub const AGGREGATE_CHECKSUM: &str = "aggregateChecksum.txt";
/// RFC 3161 timestamp query.
pub const TSA_REQUEST: &str = "tsaRequest.tsq";
/// RFC 3161 timestamp reply from the authority.
pub const TSA_RESPONSE: &str = "tsaResponse.tsr";

/// Upper bound on evidences returned by a single listing.
pub const EVIDENCES_RETURN_MAX_LIMIT: i64 = 50;
