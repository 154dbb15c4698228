//! Résumé loading for `match`: PDF text extraction or plain text, chosen by extension.

use std::path::{Path, PathBuf};

use jobfeed_core::{normalize_whitespace, FailureClass};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("extracting text from {path}: {reason}")]
    Pdf { path: PathBuf, reason: String },
    #[error("{path} has no readable text")]
    Empty { path: PathBuf },
}

impl ResumeError {
    pub fn class(&self) -> FailureClass {
        match self {
            ResumeError::Read { .. } => FailureClass::Unavailable,
            ResumeError::Pdf { .. } | ResumeError::Empty { .. } => FailureClass::Parse,
        }
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Collapse whitespace and drop everything except word characters and `.,;:-+#`.
pub fn clean_resume_text(text: &str) -> String {
    let kept = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || "_.,;:-+#".contains(*c))
        .collect::<String>();
    normalize_whitespace(&kept)
}

/// Text of every page, cleaned. Extraction runs on the blocking pool.
pub async fn extract_pdf_text(path: &Path, bytes: Vec<u8>) -> Result<String, ResumeError> {
    let extracted = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|err| ResumeError::Pdf {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?
        .map_err(|err| ResumeError::Pdf {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    Ok(clean_resume_text(&extracted))
}

pub async fn load_resume_text(path: &Path) -> Result<String, ResumeError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ResumeError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let text = if is_pdf(path) {
        extract_pdf_text(path, bytes).await?
    } else {
        String::from_utf8_lossy(&bytes).trim().to_string()
    };
    if text.is_empty() {
        return Err(ResumeError::Empty {
            path: path.to_path_buf(),
        });
    }
    debug!(path = %path.display(), chars = text.len(), "loaded résumé text");
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobfeed_core::extract_keywords;

    fn fixture(relative: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("fixtures")
            .join(relative)
    }

    #[test]
    fn cleaning_keeps_word_characters_and_basic_punctuation() {
        assert_eq!(
            clean_resume_text("  C++ • Rust/Go\n\n(5 yrs), C#; e-mail: dev@x  "),
            "C++ RustGo 5 yrs, C#; e-mail: devx"
        );
    }

    #[tokio::test]
    async fn pdf_resume_text_is_extracted() {
        let text = load_resume_text(&fixture("resume/senior_rust.pdf"))
            .await
            .unwrap();
        assert!(!text.contains('\n'));
        let keywords = extract_keywords(&text);
        for word in ["senior", "rust", "postgres", "kubernetes", "aws"] {
            assert!(keywords.contains(word), "missing {word} in {text:?}");
        }
    }

    #[tokio::test]
    async fn plain_text_resume_is_read_as_is() {
        let text = load_resume_text(&fixture("resume/senior_rust.txt"))
            .await
            .unwrap();
        assert_eq!(text, "Senior Rust engineer.\nPostgres and Kubernetes on AWS.");
    }

    #[tokio::test]
    async fn unreadable_pdf_is_a_parse_failure() {
        let err = extract_pdf_text(Path::new("broken.pdf"), b"not a pdf".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, ResumeError::Pdf { .. }));
        assert_eq!(err.class(), FailureClass::Parse);

        let err = load_resume_text(&fixture("resume/missing.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResumeError::Read { .. }));
    }
}
