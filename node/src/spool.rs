use crate::error::{NodeError, NodeResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use veriscore_core::error::ScoreResult;
use veriscore_core::{Error as CoreError, RoundInput, RoundSource};

const PROCESSED_DIR: &str = "processed";
const FAILED_DIR: &str = "failed";

pub struct SpoolSource {
    dir: PathBuf,
    in_flight: HashMap<String, PathBuf>,
}

impl SpoolSource {
    pub fn new(dir: impl Into<PathBuf>) -> NodeResult<Self> {
        let dir = dir.into();
        for sub in [PROCESSED_DIR, FAILED_DIR] {
            std::fs::create_dir_all(dir.join(sub))
                .map_err(|e| NodeError::Spool(format!("Failed to create spool directory: {}", e)))?;
        }
        Ok(Self {
            dir,
            in_flight: HashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn waiting_files(&self) -> ScoreResult<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && entry.file_type().await?.is_file()
                && !self.in_flight.values().any(|taken| taken == &path)
            {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    async fn move_to(&self, path: &Path, sub: &str) -> ScoreResult<()> {
        let Some(name) = path.file_name() else {
            return Err(CoreError::Round(format!("Invalid spool path {}", path.display())));
        };
        tokio::fs::rename(path, self.dir.join(sub).join(name)).await?;
        Ok(())
    }

    async fn settle(&mut self, round_id: &str, sub: &str) -> ScoreResult<()> {
        let Some(path) = self.in_flight.remove(round_id) else {
            return Err(CoreError::Round(format!("round {} is not in flight", round_id)));
        };
        self.move_to(&path, sub).await
    }
}

#[async_trait]
impl RoundSource for SpoolSource {
    async fn next_round(&mut self) -> ScoreResult<Option<RoundInput>> {
        for path in self.waiting_files().await? {
            let content = tokio::fs::read_to_string(&path).await?;

            match parse_round(&content) {
                Ok(input) if self.in_flight.contains_key(&input.round_id) => {
                    tracing::error!(
                        round_id = %input.round_id,
                        file = %path.display(),
                        "Round is already being processed from another file"
                    );
                    self.move_to(&path, FAILED_DIR).await?;
                }
                Ok(input) => {
                    tracing::debug!(
                        round_id = %input.round_id,
                        file = %path.display(),
                        "Took round from spool"
                    );
                    self.in_flight.insert(input.round_id.clone(), path);
                    return Ok(Some(input));
                }
                Err(e) => {
                    tracing::error!(file = %path.display(), error = %e, "Discarding unreadable round file");
                    self.move_to(&path, FAILED_DIR).await?;
                }
            }
        }

        Ok(None)
    }

    async fn complete(&mut self, round_id: &str) -> ScoreResult<()> {
        self.settle(round_id, PROCESSED_DIR).await
    }

    async fn fail(&mut self, round_id: &str) -> ScoreResult<()> {
        self.settle(round_id, FAILED_DIR).await
    }
}

pub fn parse_round(content: &str) -> ScoreResult<RoundInput> {
    let input: RoundInput = serde_json::from_str(content)?;
    if input.round_id.trim().is_empty() {
        return Err(CoreError::Round("round file has no round_id".to_string()));
    }
    if input.registry.is_empty() {
        return Err(CoreError::Round(format!(
            "round file {} has an empty registry",
            input.round_id
        )));
    }
    Ok(input)
}

pub fn read_round_file(path: &Path) -> NodeResult<RoundInput> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| NodeError::Spool(format!("Failed to read {}: {}", path.display(), e)))?;
    Ok(parse_round(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUND: &str = r#"{
        "round_id": "round-42",
        "registry": [
            {"uid": 0, "hotkey": "hk_burn", "role": "miner"},
            {"uid": 3, "hotkey": "hk_3", "role": "miner"}
        ],
        "responses": [
            {"uid": 3, "statements": [{"statement": "s", "snippets": [
                {"source_url": "https://x.com/a", "excerpt": "e"}
            ]}], "response_time_seconds": 4.5},
            {"uid": 4, "status": "unreachable"}
        ]
    }"#;

    #[test]
    fn test_parse_round() {
        let input = parse_round(ROUND).unwrap();
        assert_eq!(input.round_id, "round-42");
        assert_eq!(input.registry.len(), 2);
        assert_eq!(input.responses[0].flattened_snippets().count(), 1);
        assert_eq!(
            input.responses[1].status,
            veriscore_core::ResponseStatus::Unreachable
        );

        assert!(parse_round(r#"{"round_id": "", "registry": []}"#).is_err());
        assert!(parse_round(r#"{"round_id": "r", "responses": []}"#).is_err());
        assert!(parse_round(r#"{"round_id": "r", "registry": []}"#).is_err());
        assert!(parse_round("not json").is_err());
    }

    #[tokio::test]
    async fn test_spool_takes_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = SpoolSource::new(dir.path()).unwrap();

        std::fs::write(dir.path().join("002.json"), ROUND.replace("round-42", "round-2")).unwrap();
        std::fs::write(dir.path().join("001.json"), ROUND.replace("round-42", "round-1")).unwrap();
        std::fs::write(dir.path().join("000.json"), "{broken").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let first = spool.next_round().await.unwrap().unwrap();
        assert_eq!(first.round_id, "round-1");
        assert!(dir.path().join("001.json").exists());

        let second = spool.next_round().await.unwrap().unwrap();
        assert_eq!(second.round_id, "round-2");
        assert!(spool.next_round().await.unwrap().is_none());

        spool.complete("round-1").await.unwrap();
        spool.fail("round-2").await.unwrap();

        assert!(dir.path().join(FAILED_DIR).join("000.json").exists());
        assert!(dir.path().join(PROCESSED_DIR).join("001.json").exists());
        assert!(dir.path().join(FAILED_DIR).join("002.json").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert!(spool.complete("round-1").await.is_err());
    }

    #[tokio::test]
    async fn test_untaken_round_stays_queued() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("001.json"), ROUND).unwrap();

        {
            let mut spool = SpoolSource::new(dir.path()).unwrap();
            assert!(spool.next_round().await.unwrap().is_some());
        }

        // A restart before completion hands the same round out again.
        let mut spool = SpoolSource::new(dir.path()).unwrap();
        let again = spool.next_round().await.unwrap().unwrap();
        assert_eq!(again.round_id, "round-42");
    }
}
