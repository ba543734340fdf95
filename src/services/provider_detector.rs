//! Provider detection for incoming requests.
//!
//! Maps a URL path onto the upstream provider that serves it. Provider URL
//! spaces overlap (`/v1/models` is both an OpenAI listing and the Gemini
//! model namespace), so the checks run in a fixed order and the first match
//! wins: Claude, then Gemini, then OpenAI.

use crate::core::recording::Provider;

const CLAUDE_PREFIXES: &[&str] = &["/v1/messages", "/v1/complete"];

const GEMINI_VERSION_PREFIXES: &[&str] = &["/v1/", "/v1beta/", "/v1alpha/"];

const GEMINI_UPLOAD_PREFIXES: &[&str] = &["/upload/v1/", "/upload/v1beta/", "/upload/v1alpha/"];

/// Resource markers that identify Gemini endpoints under a version prefix.
///
/// `/models:` covers the colon-suffixed action form (`/v1beta/models:batchEmbed`).
const GEMINI_RESOURCE_MARKERS: &[&str] = &[
    "/models/",
    "/models:",
    "/files",
    "/cachedContents",
    "/corpora",
    "/tunedModels",
    "/batches",
];

const OPENAI_PREFIXES: &[&str] = &[
    "/v1/chat/completions",
    "/v1/completions",
    "/v1/embeddings",
    "/v1/models",
    "/v1/responses",
];

/// Stateless path classifier.
pub struct ProviderDetector;

impl ProviderDetector {
    /// Classify a request path. Total over all inputs; unmatched paths are
    /// [`Provider::Unknown`].
    pub fn detect(path: &str) -> Provider {
        if starts_with_any(path, CLAUDE_PREFIXES) {
            return Provider::Claude;
        }
        // Gemini before OpenAI to avoid the /v1/models collision
        if Self::is_gemini_path(path) {
            return Provider::Gemini;
        }
        if starts_with_any(path, OPENAI_PREFIXES) {
            return Provider::OpenAI;
        }
        Provider::Unknown
    }

    /// Check if the path matches any Gemini API endpoint pattern.
    pub fn is_gemini_path(path: &str) -> bool {
        if starts_with_any(path, GEMINI_VERSION_PREFIXES) {
            return GEMINI_RESOURCE_MARKERS
                .iter()
                .any(|marker| path.contains(marker));
        }
        // File uploads live under a separate top-level prefix
        starts_with_any(path, GEMINI_UPLOAD_PREFIXES) && path.contains("/files")
    }
}

fn starts_with_any(path: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| path.starts_with(prefix))
}
