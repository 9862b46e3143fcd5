use crate::error::{Error, Result};
use crate::models::question_set::GeneratedSet;
use std::path::PathBuf;

/// Files that make up a stored set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Json,
    Questions,
    Transcript,
    Answers,
    PartAudio(u8),
    FullAudio,
    MarkingSummary,
}

impl ArtifactKind {
    pub fn file_name(&self) -> String {
        match self {
            ArtifactKind::Json => "set.json".to_string(),
            ArtifactKind::Questions => "questions.txt".to_string(),
            ArtifactKind::Transcript => "transcript.txt".to_string(),
            ArtifactKind::Answers => "answers.txt".to_string(),
            ArtifactKind::PartAudio(part) => format!("part{}.wav", part),
            ArtifactKind::FullAudio => "full_audio.wav".to_string(),
            ArtifactKind::MarkingSummary => "marking_summary.xlsx".to_string(),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::Json => "application/json",
            ArtifactKind::Questions | ArtifactKind::Transcript | ArtifactKind::Answers => {
                "text/plain; charset=utf-8"
            }
            ArtifactKind::PartAudio(_) | ArtifactKind::FullAudio => "audio/wav",
            ArtifactKind::MarkingSummary => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }

    /// Download names used by `/files/:kind`.
    pub fn from_download_kind(kind: &str) -> Option<Self> {
        match kind {
            "json" => Some(ArtifactKind::Json),
            "questions" => Some(ArtifactKind::Questions),
            "transcript" => Some(ArtifactKind::Transcript),
            "answers" => Some(ArtifactKind::Answers),
            "audio" => Some(ArtifactKind::FullAudio),
            "marking" => Some(ArtifactKind::MarkingSummary),
            _ => None,
        }
    }
}

/// A numbered set directory, `setN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetHandle {
    pub name: String,
    pub number: u32,
    pub dir: PathBuf,
}

impl SetHandle {
    pub fn path(&self, kind: ArtifactKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub async fn has(&self, kind: ArtifactKind) -> bool {
        tokio::fs::metadata(self.path(kind)).await.is_ok()
    }

    /// `set4` → `Set 4`.
    pub fn label(&self) -> String {
        format!("Set {}", self.number)
    }
}

pub fn parse_set_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("set")?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[derive(Debug, Clone)]
pub struct SetStore {
    root: PathBuf,
}

impl SetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn handle(&self, number: u32) -> SetHandle {
        let name = format!("set{}", number);
        SetHandle {
            dir: self.root.join(&name),
            name,
            number,
        }
    }

    async fn numbers(&self) -> Result<Vec<u32>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        let mut numbers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(n) = entry.file_name().to_str().and_then(parse_set_name) {
                numbers.push(n);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Creates the next set directory, one above the highest existing number.
    /// A concurrent caller that wins the same number pushes this one to the next.
    pub async fn allocate(&self) -> Result<SetHandle> {
        tokio::fs::create_dir_all(&self.root).await?;
        let mut next = self.numbers().await?.last().copied().unwrap_or(0) + 1;
        loop {
            let handle = self.handle(next);
            match tokio::fs::create_dir(&handle.dir).await {
                Ok(()) => {
                    tracing::info!("Allocated {}", handle.dir.display());
                    return Ok(handle);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    next = next
                        .checked_add(1)
                        .ok_or_else(|| Error::Internal("Set numbers exhausted".to_string()))?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Newest set whose questions have been written; sets still generating are skipped.
    pub async fn latest(&self) -> Result<Option<SetHandle>> {
        for handle in self.list().await? {
            if handle.has(ArtifactKind::Json).await {
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    pub async fn open(&self, name: &str) -> Result<SetHandle> {
        let number = parse_set_name(name)
            .ok_or_else(|| Error::BadRequest(format!("Invalid set name: {}", name)))?;
        let handle = self.handle(number);
        match tokio::fs::metadata(&handle.dir).await {
            Ok(meta) if meta.is_dir() => Ok(handle),
            _ => Err(Error::NotFound(format!("Set {} not found", name))),
        }
    }

    /// Newest first.
    pub async fn list(&self) -> Result<Vec<SetHandle>> {
        let mut numbers = self.numbers().await?;
        numbers.reverse();
        Ok(numbers.into_iter().map(|n| self.handle(n)).collect())
    }

    pub async fn write_set(&self, handle: &SetHandle, set: &GeneratedSet) -> Result<()> {
        let json = serde_json::to_vec_pretty(set)?;
        tokio::fs::write(handle.path(ArtifactKind::Json), json).await?;
        Ok(())
    }

    pub async fn read_set(&self, handle: &SetHandle) -> Result<GeneratedSet> {
        let path = handle.path(ArtifactKind::Json);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("{} has no question set yet", handle.name)))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    pub async fn write_artifact(
        &self,
        handle: &SetHandle,
        kind: ArtifactKind,
        bytes: impl AsRef<[u8]>,
    ) -> Result<()> {
        tokio::fs::write(handle.path(kind), bytes).await?;
        Ok(())
    }

    /// File names present in the set directory, for listings and history records.
    pub async fn artifacts(&self, handle: &SetHandle) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&handle.dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("ielts-sets-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn set_names_are_validated() {
        assert_eq!(parse_set_name("set12"), Some(12));
        assert_eq!(parse_set_name("set"), None);
        assert_eq!(parse_set_name("set1a"), None);
        assert_eq!(parse_set_name("../set1"), None);
        assert_eq!(ArtifactKind::from_download_kind("audio"), Some(ArtifactKind::FullAudio));
        assert_eq!(ArtifactKind::from_download_kind("exe"), None);
    }

    #[tokio::test]
    async fn allocates_sequentially_and_lists_newest_first() {
        let root = temp_root();
        let store = SetStore::new(&root);
        assert!(store.latest().await.unwrap().is_none());

        let first = store.allocate().await.unwrap();
        assert_eq!(first.name, "set1");
        tokio::fs::create_dir_all(root.join("set9")).await.unwrap();
        tokio::fs::create_dir_all(root.join("notes")).await.unwrap();
        let next = store.allocate().await.unwrap();
        assert_eq!(next.name, "set10");

        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|h| h.name).collect();
        assert_eq!(names, ["set10", "set9", "set1"]);

        assert!(matches!(store.open("set2").await, Err(Error::NotFound(_))));
        assert!(matches!(store.open("etc").await, Err(Error::BadRequest(_))));
        assert_eq!(store.open("set9").await.unwrap().label(), "Set 9");

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_allocations_get_distinct_sets() {
        let root = temp_root();
        let store = SetStore::new(&root);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move { store.allocate().await }));
        }
        let mut numbers = Vec::new();
        for task in tasks {
            numbers.push(task.await.unwrap().unwrap().number);
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=16).collect::<Vec<u32>>());

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn latest_skips_sets_without_questions() {
        let root = temp_root();
        let store = SetStore::new(&root);
        assert!(store.latest().await.unwrap().is_none());

        let done = store.allocate().await.unwrap();
        store
            .write_artifact(&done, ArtifactKind::Json, b"{}")
            .await
            .unwrap();
        let pending = store.allocate().await.unwrap();

        assert_eq!(store.list().await.unwrap()[0], pending);
        assert_eq!(store.latest().await.unwrap().unwrap(), done);

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn set_json_round_trips() {
        let root = temp_root();
        let store = SetStore::new(&root);
        let handle = store.allocate().await.unwrap();
        assert!(matches!(store.read_set(&handle).await, Err(Error::NotFound(_))));

        let set = GeneratedSet {
            key: "2026_03_07_14_05_09".to_string(),
            blocks: vec![],
            requests: vec![],
            reports: vec![],
            logs: vec!["ok".to_string()],
        };
        store.write_set(&handle, &set).await.unwrap();
        assert_eq!(store.read_set(&handle).await.unwrap(), set);
        assert!(handle.has(ArtifactKind::Json).await);
        assert_eq!(store.artifacts(&handle).await.unwrap(), ["set.json"]);

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }
}
